pub mod config;
pub mod history;
pub mod indicators;
pub mod pipeline;
pub mod signals;
pub mod snapshot;

pub use config::{EntryOrder, StrategyConfig, StrategyFileConfig};
pub use history::History;
pub use indicators::{Field, Indicator, IndicatorSpec, IndicatorValue, Source};
pub use pipeline::{Frame, IndicatorPipeline, InputRef};
pub use signals::{
    crossed_above, crossed_below, crossover, Cross, Filter, SignalContext, SignalEvaluator,
    SignalOutput, SignalSpec,
};
pub use snapshot::{PublishedValue, Reading, SharedSnapshot, SnapshotView};
