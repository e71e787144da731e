use std::convert::TryFrom;

#[cfg(any(
    target_pointer_width = "16",
    target_pointer_width = "32",
    target_pointer_width = "64"
))]
pub fn usize_to_u64(num: usize) -> Option<u64> {
    Some(num as u64)
}

/// Resolution of the reserve fraction in `fraction_share`.
const FRACTION_SCALE: u128 = 1_000_000;

/// Split `amount` into `parts` equal shares after keeping aside a `reserve` fraction, rounding
/// down. Returns None if `reserve` is not inside [0, 1] or if `parts` is zero.
///
/// `reserve` is rounded to millionths. The rest of the computation is exact.
pub fn fraction_share(amount: u128, reserve: f64, parts: usize) -> Option<u128> {
    if !(0.0..=1.0).contains(&reserve) || parts == 0 {
        return None;
    }
    // Inside [0, FRACTION_SCALE]:
    let keep = ((1.0 - reserve) * FRACTION_SCALE as f64).round() as u128;
    let divisor = FRACTION_SCALE.checked_mul(u128::try_from(parts).ok()?)?;

    // amount * keep / divisor, without computing amount * keep:
    let quotient = amount / divisor;
    let remainder = amount % divisor;
    quotient
        .checked_mul(keep)?
        .checked_add(remainder.checked_mul(keep)? / divisor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usize_to_u64() {
        assert_eq!(usize_to_u64(0usize), Some(0u64));
        assert_eq!(usize_to_u64(1usize), Some(1u64));
    }

    #[test]
    fn test_fraction_share() {
        assert_eq!(fraction_share(1000, 0.25, 4), Some(187));
        assert_eq!(fraction_share(1000, 0.4, 3), Some(200));
        assert_eq!(fraction_share(1000, 0.0, 1), Some(1000));
        assert_eq!(fraction_share(1000, 1.0, 5), Some(0));
        assert_eq!(fraction_share(1000, 1.5, 5), None);
        assert_eq!(fraction_share(1000, -0.1, 5), None);
        assert_eq!(fraction_share(1000, 0.5, 0), None);
    }

    #[test]
    fn test_fraction_share_large_amounts() {
        // Not representable as f64:
        let amount = (1u128 << 60) + 3;
        assert_eq!(fraction_share(amount, 0.0, 1), Some(amount));
        assert_eq!(fraction_share(amount, 0.5, 1), Some((1u128 << 59) + 1));
        assert_eq!(fraction_share(amount, 0.0, 3), Some(amount / 3));

        assert_eq!(fraction_share(u128::max_value(), 0.0, 1), Some(u128::max_value()));
        assert_eq!(fraction_share(u128::max_value(), 0.5, 1), Some(u128::max_value() / 2));
        assert_eq!(fraction_share(u128::max_value(), 1.0, 7), Some(0));
    }
}
