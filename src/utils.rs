/// Get the index of the most significant one bit, i.e., `floor(log2(value))`.
///
/// Returns `None` if `value` is zero.
#[inline]
pub fn locate_most_left_one_bit(value: u64) -> Option<u32> {
    if value == 0 {
        None
    } else {
        Some(u64::BITS - 1 - value.leading_zeros())
    }
}

/// Get the index of the least significant one bit.
///
/// Returns `None` if `value` is zero.
#[inline]
pub fn locate_most_right_one_bit(value: u64) -> Option<u32> {
    if value == 0 {
        None
    } else {
        Some(value.trailing_zeros())
    }
}

/// Round `size` up to a multiple of `alignment`, which must be a power of
/// two. Returns `None` on overflow.
#[inline]
pub fn align_up(size: u64, alignment: u64) -> Option<u64> {
    debug_assert!(alignment.is_power_of_two());
    Some(size.checked_add(alignment - 1)? & !(alignment - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_locations() {
        assert_eq!(locate_most_left_one_bit(0), None);
        assert_eq!(locate_most_left_one_bit(1), Some(0));
        assert_eq!(locate_most_left_one_bit(3), Some(1));
        assert_eq!(locate_most_left_one_bit(u64::MAX), Some(63));
        assert_eq!(locate_most_right_one_bit(0), None);
        assert_eq!(locate_most_right_one_bit(0b1100), Some(2));
        assert_eq!(locate_most_right_one_bit(1 << 63), Some(63));
    }

    #[test]
    fn alignment() {
        assert_eq!(align_up(0, 8), Some(0));
        assert_eq!(align_up(1, 8), Some(8));
        assert_eq!(align_up(16, 8), Some(16));
        assert_eq!(align_up(u64::MAX - 2, 8), None);
    }
}
