//! Wraparound-aware comparison of 16-bit RTP sequence numbers

/// Returns true if `a` comes before `b` in the 16-bit sequence space.
///
/// Numbers are compared by their signed distance, so `65535` is before `0`.
/// When the two numbers are exactly half the sequence space apart the order
/// cannot be decided and `ambiguous_case` is returned instead.
#[inline]
pub fn is_before(a: u16, b: u16, ambiguous_case: bool) -> bool {
    if a == b {
        return false;
    }

    match b.wrapping_sub(a) {
        0x8000 => ambiguous_case,
        distance => distance < 0x8000,
    }
}

/// Signed distance from `from` to `to`.
#[inline]
pub fn distance(from: u16, to: u16) -> i16 {
    to.wrapping_sub(from) as i16
}
