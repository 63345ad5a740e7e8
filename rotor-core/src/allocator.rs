//! Stateless port selection.
//!
//! Draws uniformly from the given bounds while avoiding the record's current
//! port. The draw is closed-form: the excluded value is removed from the
//! candidate set up front instead of redrawing until a distinct value shows
//! up.

use rand::Rng;

use crate::error::{Result, RotationError};

/// Pick a port from `min..=max`, distinct from `exclude` when it falls
/// inside the bounds. Fails with [`RotationError::NoDistinctPort`] when the
/// candidate set is empty, i.e. a single-value range whose only port is
/// excluded. Configured ranges are validated as `min < max` up front, so for
/// them this is unreachable.
pub fn pick_port(min: u16, max: u16, exclude: Option<u16>) -> Result<u16> {
    debug_assert!(min <= max);
    let span = u32::from(max) - u32::from(min) + 1;

    let excluded = exclude.filter(|p| (min..=max).contains(p));
    let candidates = span - u32::from(excluded.is_some());
    if candidates == 0 {
        return Err(RotationError::NoDistinctPort { min, max });
    }

    let idx = rand::rng().random_range(0..candidates);
    let mut port = min + idx as u16;
    // Skip over the hole left by the excluded value.
    if let Some(ex) = excluded
        && port >= ex
    {
        port += 1;
    }
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_within_bounds_and_skips_excluded() {
        for _ in 0..500 {
            let port = pick_port(1000, 1010, Some(1005)).unwrap();
            assert!((1000..=1010).contains(&port));
            assert_ne!(port, 1005);
        }
    }

    #[test]
    fn two_value_range_always_yields_the_other_port() {
        for _ in 0..100 {
            assert_eq!(pick_port(1000, 1001, Some(1000)).unwrap(), 1001);
            assert_eq!(pick_port(1000, 1001, Some(1001)).unwrap(), 1000);
        }
    }

    #[test]
    fn degenerate_range_with_its_port_excluded_fails() {
        assert!(matches!(
            pick_port(1000, 1000, Some(1000)),
            Err(RotationError::NoDistinctPort { min: 1000, max: 1000 })
        ));
        // Without the exclusion the single value is still a valid draw.
        assert_eq!(pick_port(1000, 1000, None).unwrap(), 1000);
    }

    #[test]
    fn exclusion_outside_range_is_ignored() {
        for _ in 0..100 {
            let port = pick_port(1000, 1001, Some(9999)).unwrap();
            assert!((1000..=1001).contains(&port));
        }
    }

    #[test]
    fn no_exclusion_covers_the_full_range() {
        let mut seen = [false; 3];
        for _ in 0..500 {
            let port = pick_port(1000, 1002, None).unwrap();
            seen[(port - 1000) as usize] = true;
        }
        assert_eq!(seen, [true, true, true]);
    }

    #[test]
    fn boundary_exclusions_still_map_correctly() {
        for _ in 0..200 {
            let port = pick_port(1000, 1002, Some(1000)).unwrap();
            assert!(port == 1001 || port == 1002);
            let port = pick_port(1000, 1002, Some(1002)).unwrap();
            assert!(port == 1000 || port == 1001);
        }
    }
}
