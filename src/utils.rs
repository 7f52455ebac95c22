use divrem::DivCeil;

/// Rounds `value` up to the next multiple of `multiple`, or `None` if that
/// multiple doesn't fit in a `u32`.
pub fn round_up(value: u32, multiple: u32) -> Option<u32> {
    debug_assert_ne!(multiple, 0);
    DivCeil::div_ceil(value, multiple).checked_mul(multiple)
}

/// Moves `required` up in increments of `step` until it is at least `available`.
///
/// Returns `required` unchanged if it already is.
pub fn adjust_up(required: i64, available: i64, step: i64) -> i64 {
    debug_assert!(step > 0);
    if required >= available {
        required
    } else {
        required + DivCeil::div_ceil(available - required, step) * step
    }
}

/// Moves `required` down in increments of `step` until it is at most `available`.
pub fn adjust_down(required: i64, available: i64, step: i64) -> i64 {
    debug_assert!(step > 0);
    if required <= available {
        required
    } else {
        required - DivCeil::div_ceil(required - available, step) * step
    }
}

/// Formats a float as the shortest text which parses back to the same value.
pub fn float_to_string(value: f32) -> String {
    format!("{value:?}")
}

pub fn join_into_string(c: impl IntoIterator<Item = impl ToString>, separator: &str) -> String {
    c.into_iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(40, 4), Some(40));
        assert_eq!(round_up(42, 4), Some(44));
        assert_eq!(round_up(1, 16), Some(16));
    }

    #[test]
    fn test_round_up_past_u32_is_none() {
        assert_eq!(round_up(u32::MAX - 1, 4), None);
        assert_eq!(round_up(u32::MAX, 1), Some(u32::MAX));
    }

    #[test]
    fn test_adjust_down_lands_on_step_grid() {
        assert_eq!(adjust_down(44, 42, 4), 40);
        assert_eq!(adjust_down(44, 44, 4), 44);
        assert_eq!(adjust_down(7, 0, 2), -1);
    }

    #[test]
    fn test_adjust_up_lands_on_step_grid() {
        assert_eq!(adjust_up(-3, 0, 4), 1);
        assert_eq!(adjust_up(-4, -2, 2), -2);
        assert_eq!(adjust_up(5, 0, 4), 5);
    }

    #[test]
    fn test_float_to_string_round_trips() {
        assert_eq!(float_to_string(0.0625), "0.0625");
        assert_eq!(float_to_string(1.0), "1.0");
        let v = 1.0f32 / 3.0;
        assert_eq!(float_to_string(v).parse::<f32>().unwrap(), v);
    }

    proptest! {
        #[test]
        fn test_adjust_down_is_bounded(required in -100i64..100, available in -100i64..100, step in 1i64..9) {
            let r = adjust_down(required, available, step);
            prop_assert!(r <= required);
            prop_assert!(r <= available.max(required));
            prop_assert_eq!((required - r) % step, 0);
            if required > available {
                prop_assert!(r > available - step);
            }
        }

        #[test]
        fn test_adjust_up_is_bounded(required in -100i64..100, available in -100i64..100, step in 1i64..9) {
            let r = adjust_up(required, available, step);
            prop_assert!(r >= required);
            prop_assert_eq!((r - required) % step, 0);
            if required < available {
                prop_assert!(r >= available && r < available + step);
            }
        }
    }
}
