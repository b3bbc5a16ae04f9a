//! Shared helpers for the end-to-end scenario tests.

/// A fixed-width 256-bit unsigned accumulator with wrapping add, used as a
/// component type wide enough to make a running sum exercise carry
/// propagation across limbs. Four little-endian `u64` limbs; only the
/// operations the scenarios need.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct U256(pub [u64; 4]);

impl U256 {
    pub const ZERO: U256 = U256([0; 4]);

    pub fn from_u64(v: u64) -> Self {
        U256([v, 0, 0, 0])
    }

    pub fn from_u128(v: u128) -> Self {
        U256([v as u64, (v >> 64) as u64, 0, 0])
    }

    pub fn wrapping_add(self, other: U256) -> Self {
        let mut out = [0u64; 4];
        let mut carry = 0u128;
        for i in 0..4 {
            let sum = self.0[i] as u128 + other.0[i] as u128 + carry;
            out[i] = sum as u64;
            carry = sum >> 64;
        }
        U256(out)
    }
}
