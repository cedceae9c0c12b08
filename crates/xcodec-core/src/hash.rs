use xcodec_proto::SEGMENT_LENGTH;

use crate::tag::Tag;

/// Multiplier for the rolling polynomial hash. Must be odd so that it is
/// invertible mod 2^64, which is what makes an incremental `roll` possible.
const MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;

/// `MULTIPLIER` raised to the `(SEGMENT_LENGTH - 1)`-th power, precomputed
/// so `roll` can remove the outgoing byte's contribution in one multiply.
///
/// The window's Horner-scheme state is `byte_0 * M^(L-1) + ... +
/// byte_{L-1} * M^0`; the leading byte's weight is `M^(L-1)`, not `M^L`,
/// since it is subtracted *before* the whole state is multiplied by `M`
/// again to shift the window forward by one position.
const MULTIPLIER_POW_LEN: u64 = {
    let mut result: u64 = 1;
    let mut i = 0;
    while i < SEGMENT_LENGTH - 1 {
        result = result.wrapping_mul(MULTIPLIER);
        i += 1;
    }
    result
};

/// A sliding-window polynomial hash over fixed-length byte windows.
///
/// Encoder and decoder each maintain one `RollingHash` and must agree
/// bit-for-bit: the hash value is only ever compared within a single
/// process (encoder self-consistency, cache key generation), never sent to
/// a peer, so the exact polynomial is not a wire compatibility concern.
#[derive(Debug, Clone, Copy)]
pub struct RollingHash {
    state: u64,
}

impl Default for RollingHash {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingHash {
    #[must_use]
    pub fn new() -> Self {
        Self { state: 0 }
    }

    /// Reset to the empty-window state.
    pub fn start(&mut self) {
        self.state = 0;
    }

    /// Fold `new_byte` into the window, removing the contribution of
    /// `old_byte` (the byte leaving the trailing edge of a full window).
    ///
    /// Call `start()` before the first `roll` of a fresh window; for the
    /// first `SEGMENT_LENGTH - 1` bytes of a window, `old_byte` should be
    /// `0` (there is nothing yet to remove).
    pub fn roll(&mut self, new_byte: u8, old_byte: u8) -> Tag {
        let removed = (old_byte as u64).wrapping_mul(MULTIPLIER_POW_LEN);
        self.state = self.state.wrapping_sub(removed).wrapping_mul(MULTIPLIER).wrapping_add(new_byte as u64);
        Tag::new(self.state)
    }

    #[must_use]
    pub fn current(&self) -> Tag {
        Tag::new(self.state)
    }
}

/// Compute the hash of a full `SEGMENT_LENGTH`-byte window from scratch.
///
/// # Panics
///
/// Panics if `bytes.len() != SEGMENT_LENGTH`.
#[must_use]
pub fn hash_segment(bytes: &[u8]) -> Tag {
    assert_eq!(bytes.len(), SEGMENT_LENGTH, "hash_segment requires exactly SEGMENT_LENGTH bytes");
    let mut state: u64 = 0;
    for &byte in bytes {
        state = state.wrapping_mul(MULTIPLIER).wrapping_add(byte as u64);
    }
    Tag::new(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_hash_of_same_window_matches_scratch_hash() {
        let data: Vec<u8> = (0..SEGMENT_LENGTH as u8).collect();
        let scratch = hash_segment(&data);

        let mut rolling = RollingHash::new();
        rolling.start();
        let mut last = Tag::new(0);
        for (i, &byte) in data.iter().enumerate() {
            let old = if i < SEGMENT_LENGTH { 0 } else { data[i - SEGMENT_LENGTH] };
            last = rolling.roll(byte, old);
        }
        assert_eq!(last, scratch);
    }

    #[test]
    fn rolling_across_two_windows_matches_scratch_hash_of_second_window() {
        let first: Vec<u8> = vec![1u8; SEGMENT_LENGTH];
        let second: Vec<u8> = vec![2u8; SEGMENT_LENGTH];

        let mut rolling = RollingHash::new();
        rolling.start();
        for &byte in &first {
            rolling.roll(byte, 0);
        }
        let mut last = rolling.current();
        for (i, &byte) in second.iter().enumerate() {
            let old = first[i];
            last = rolling.roll(byte, old);
        }

        assert_eq!(last, hash_segment(&second));
    }

    #[test]
    fn different_data_yields_different_hash_with_overwhelming_probability() {
        let a = hash_segment(&[0u8; SEGMENT_LENGTH]);
        let mut other = vec![0u8; SEGMENT_LENGTH];
        other[0] = 1;
        let b = hash_segment(&other);
        assert_ne!(a, b);
    }
}
