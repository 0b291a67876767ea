use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::config::{MAX_TARGET_ADJUSTMENT_DOWN, MAX_TARGET_ADJUSTMENT_UP};
use crate::crypto::{Hash, HASH_SIZE};
use crate::serializer::{Reader, ReaderError, Serializer, Writer};

// Proof-of-work threshold: a block ID meets the target when, interpreted as
// a big-endian 256-bit integer, it is <= the target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target(Hash);

impl Target {
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Target(Hash::new(bytes))
    }

    pub fn from_hash(hash: Hash) -> Self {
        Target(hash)
    }

    // easiest possible target, used by test networks
    pub const fn max() -> Self {
        Target(Hash::max())
    }

    pub fn as_hash(&self) -> &Hash {
        &self.0
    }

    pub fn meets(&self, id: &Hash) -> bool {
        id.as_bytes() <= self.0.as_bytes()
    }

    fn to_int(&self) -> U256 {
        U256::from_big_endian(self.0.as_bytes())
    }

    fn from_int(value: U256) -> Self {
        Target(Hash::new(value.to_big_endian()))
    }

    // difficulty = 2^256 / (target + 1), the expected hash count per block
    pub fn difficulty(&self) -> U256 {
        let divisor = self.to_int().saturating_add(U256::one());
        if divisor.is_zero() {
            return U256::MAX;
        }
        U256::MAX / divisor
    }

    // Retarget by the ratio of observed to expected block time, clamped so a
    // burst of lucky or hostile timestamps cannot swing the difficulty more
    // than the configured bound in one step.
    pub fn retarget(&self, elapsed_secs: u64, expected_secs: u64) -> Target {
        if expected_secs == 0 {
            return self.clone();
        }

        let old = self.to_int();
        let elapsed = elapsed_secs.max(1);

        // clamp the ratio before multiplying to keep the math in range
        let clamped = elapsed
            .min(expected_secs.saturating_mul(MAX_TARGET_ADJUSTMENT_UP))
            .max(expected_secs / MAX_TARGET_ADJUSTMENT_DOWN);

        let scaled = old
            .checked_mul(U256::from(clamped))
            .map(|v| v / U256::from(expected_secs))
            .unwrap_or(U256::MAX);

        Target::from_int(scaled.max(U256::one()))
    }

    // Combined work of a chain is summed difficulty; the heavier chain wins
    // a fork regardless of raw length.
    pub fn add_difficulty(total: U256, target: &Target) -> U256 {
        total.saturating_add(target.difficulty())
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serializer for Target {
    fn write(&self, writer: &mut Writer) {
        self.0.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Target(Hash::read(reader)?))
    }

    fn size(&self) -> usize {
        HASH_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mid_target() -> Target {
        let mut bytes = [0u8; HASH_SIZE];
        bytes[0] = 0x00;
        bytes[1] = 0xFF;
        Target::new(bytes)
    }

    #[test]
    fn test_meets() {
        let target = mid_target();
        assert!(target.meets(&Hash::zero()));
        assert!(!target.meets(&Hash::max()));
    }

    #[test]
    fn test_retarget_slows_down_fast_chain() {
        let target = mid_target();
        // blocks arrived twice as fast as expected: target must shrink
        let harder = target.retarget(300, 600);
        assert!(harder.as_hash().as_bytes() < target.as_hash().as_bytes());
    }

    #[test]
    fn test_retarget_clamps_extremes() {
        let target = mid_target();
        let slowest = target.retarget(u64::MAX, 600);
        let expected = target.retarget(600 * MAX_TARGET_ADJUSTMENT_UP, 600);
        assert_eq!(slowest, expected);
    }

    #[test]
    fn test_difficulty_ordering() {
        let easy = Target::max();
        let hard = mid_target();
        assert!(hard.difficulty() > easy.difficulty());
    }
}
