pub mod controller;
pub mod ratchet;
pub mod sizer;

pub use controller::{
    compute_levels, BreakEvenConfig, BreakEvenTrigger, InitialLevels, LevelInputs, LevelMethod,
    PartialTakeConfig, RiskConfig, RiskController, RiskDecision, RiskError, RiskLevels,
    TrailingConfig,
};
pub use sizer::{
    compute_volume, GridState, SizingConfig, SizingError, SizingInput, SizingMode,
    VolumeConstraints,
};
