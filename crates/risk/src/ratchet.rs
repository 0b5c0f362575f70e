//! Stop ratchet: stops may tighten, never loosen.

use common::Direction;

/// True when `proposed` is strictly tighter than `current` for `direction`.
///
/// Long stops tighten upward, short stops downward. A missing current stop
/// is loosest of all, so any finite proposal tightens it.
pub fn is_tighter(direction: Direction, current: Option<f64>, proposed: f64) -> bool {
    if !proposed.is_finite() {
        return false;
    }
    match (direction, current) {
        (Direction::Flat, _) => false,
        (_, None) => true,
        (Direction::Long, Some(stop)) => proposed > stop,
        (Direction::Short, Some(stop)) => proposed < stop,
    }
}

/// Apply the ratchet rule in place. Returns whether the stop moved.
pub fn tighten(direction: Direction, stop: &mut Option<f64>, proposed: f64) -> bool {
    if is_tighter(direction, *stop, proposed) {
        *stop = Some(proposed);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_stop_rises_but_never_falls() {
        let mut stop = Some(95.0);
        assert!(tighten(Direction::Long, &mut stop, 100.0));
        assert!(!tighten(Direction::Long, &mut stop, 90.0));
        assert_eq!(stop, Some(100.0));
    }

    #[test]
    fn short_stop_falls_but_never_rises() {
        let mut stop = Some(105.0);
        assert!(tighten(Direction::Short, &mut stop, 100.0));
        assert!(!tighten(Direction::Short, &mut stop, 110.0));
        assert_eq!(stop, Some(100.0));
    }

    #[test]
    fn unset_stop_accepts_first_level() {
        let mut stop = None;
        assert!(tighten(Direction::Long, &mut stop, 50.0));
        assert_eq!(stop, Some(50.0));
    }

    #[test]
    fn nan_and_flat_are_ignored() {
        let mut stop = Some(10.0);
        assert!(!tighten(Direction::Long, &mut stop, f64::NAN));
        assert!(!tighten(Direction::Flat, &mut stop, 20.0));
        assert_eq!(stop, Some(10.0));
    }
}
