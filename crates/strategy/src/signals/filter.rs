use serde::{Deserialize, Serialize};
use tracing::debug;

use common::Direction;

use super::SignalContext;
use crate::pipeline::InputRef;

/// Entry confirmation. A filter whose input is unavailable blocks the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", rename_all = "snake_case")]
pub enum Filter {
    /// Bar volume above `factor` × the referenced volume average.
    VolumeAboveAverage {
        average: InputRef,
        #[serde(default = "default_factor")]
        factor: f64,
    },
    /// Longs only above the moving average, shorts only below.
    Trend { ma: InputRef },
    /// Longs need the oscillator at or above `long_min`, shorts at or below `short_max`.
    Regime {
        oscillator: InputRef,
        long_min: f64,
        short_max: f64,
    },
    /// Another instrument's close must sit on the trade's side of its own
    /// indicator `ma` in the shared snapshot.
    PeerTrend { instrument: String, ma: usize },
}

fn default_factor() -> f64 {
    1.0
}

impl Filter {
    pub fn validate(&self, cells: usize) -> Result<(), String> {
        let index = match self {
            Filter::VolumeAboveAverage { average, .. } => average.index(),
            Filter::Trend { ma } => ma.index(),
            Filter::Regime { oscillator, .. } => oscillator.index(),
            // Peer indices refer to the peer's own pipeline.
            Filter::PeerTrend { .. } => return Ok(()),
        };
        if index >= cells {
            return Err(format!("filter {self:?} refers to missing indicator {index}"));
        }
        Ok(())
    }

    pub fn allows(&self, ctx: &SignalContext<'_>, direction: Direction) -> bool {
        let Some(frame) = ctx.frame(0) else {
            return false;
        };
        let close = ctx.bar.close;
        match self {
            Filter::VolumeAboveAverage { average, factor } => frame
                .read(*average)
                .map_or(false, |avg| ctx.bar.volume > avg * factor),
            Filter::Trend { ma } => frame.read(*ma).map_or(false, |ma| match direction {
                Direction::Long => close > ma,
                Direction::Short => close < ma,
                Direction::Flat => false,
            }),
            Filter::Regime { oscillator, long_min, short_max } => {
                frame.read(*oscillator).map_or(false, |v| match direction {
                    Direction::Long => v >= *long_min,
                    Direction::Short => v <= *short_max,
                    Direction::Flat => false,
                })
            }
            Filter::PeerTrend { instrument, ma } => match ctx.peer(instrument) {
                Ok(peer) => match peer.current.value(*ma) {
                    Some(level) => match direction {
                        Direction::Long => peer.current.close > level,
                        Direction::Short => peer.current.close < level,
                        Direction::Flat => false,
                    },
                    None => false,
                },
                Err(e) => {
                    debug!(instrument = %instrument, error = %e, "Peer filter blocked entry");
                    false
                }
            },
        }
    }
}

/// True when every filter allows an entry in `direction`.
pub fn all_allow(filters: &[Filter], ctx: &SignalContext<'_>, direction: Direction) -> bool {
    filters.iter().all(|f| f.allows(ctx, direction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::testing::{frames, history_of, singles};
    use crate::snapshot::{Reading, SharedSnapshot};

    #[test]
    fn trend_filter_sides() {
        // close 105 against MA 100
        let fs = frames(&[105.0], singles(&[&[100.0]]));
        let h = history_of(&fs, 0, 4);
        let ctx = SignalContext { bar: &fs[0].bar, frames: &h, peers: None };
        let f = Filter::Trend { ma: InputRef::Index(0) };
        assert!(f.allows(&ctx, Direction::Long));
        assert!(!f.allows(&ctx, Direction::Short));
    }

    #[test]
    fn volume_filter_uses_factor() {
        let fs = frames(&[10.0], singles(&[&[800.0]]));
        let h = history_of(&fs, 0, 4);
        let ctx = SignalContext { bar: &fs[0].bar, frames: &h, peers: None };
        let loose = Filter::VolumeAboveAverage { average: InputRef::Index(0), factor: 1.0 };
        let strict = Filter::VolumeAboveAverage { average: InputRef::Index(0), factor: 1.5 };
        assert!(loose.allows(&ctx, Direction::Long));
        assert!(!strict.allows(&ctx, Direction::Long));
    }

    #[test]
    fn missing_peer_blocks_entry() {
        let fs = frames(&[10.0], singles(&[&[9.0]]));
        let h = history_of(&fs, 0, 4);
        let snap = SharedSnapshot::new();
        let view = snap.view();
        let ctx = SignalContext { bar: &fs[0].bar, frames: &h, peers: Some(&view) };
        let f = Filter::PeerTrend { instrument: "BTC".into(), ma: 0 };
        assert!(!f.allows(&ctx, Direction::Long));

        snap.publish(
            "BTC",
            Reading { close_time: fs[0].bar.close_time, close: 50.0, values: Some(vec![40.0]) },
        );
        let view = snap.view();
        let ctx = SignalContext { bar: &fs[0].bar, frames: &h, peers: Some(&view) };
        assert!(f.allows(&ctx, Direction::Long));
        assert!(!f.allows(&ctx, Direction::Short));
    }
}
