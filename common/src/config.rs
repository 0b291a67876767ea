pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 1 KB = 1024 bytes
pub const BYTES_PER_KB: usize = 1024;

// 12 decimals: 10^12 base units represent one coin
pub const COIN_DECIMALS: u8 = 12;
pub const COIN_PRECISION: u128 = 10u128.pow(COIN_DECIMALS as u32);

// Fixed supply of revenue-sharing funds; every fund output's value is a
// share count out of this total
pub const SIAFUND_COUNT: u64 = 10_000;

// Block rules
// target seconds between blocks
pub const BLOCK_FREQUENCY: u64 = 600;
// blocks a miner payout must age before it is spendable
pub const MATURITY_DELAY: u64 = 144;
// reject blocks whose timestamp is more than this many seconds ahead
pub const FUTURE_THRESHOLD: u64 = 3 * 60 * 60;
// a block's timestamp must exceed the median of this many ancestors
pub const MEDIAN_TIMESTAMP_WINDOW: usize = 11;

// Difficulty retarget rules
// blocks between target recalculations
pub const TARGET_WINDOW: u64 = 1_000;
// clamp on how much one retarget may move the target, as a ratio
pub const MAX_TARGET_ADJUSTMENT_UP: u64 = 3;
pub const MAX_TARGET_ADJUSTMENT_DOWN: u64 = 3;

// Mining payout: flat base subsidy decreasing per block until the floor
pub const INITIAL_COINBASE: u64 = 300_000;
pub const MINIMUM_COINBASE: u64 = 30_000;

// Host/renter storage rules
// sectors are the atomic storage unit, 64 KiB
pub const SECTOR_SIZE: u64 = 1 << 16;
// storage folder size bounds
pub const MIN_STORAGE_FOLDER_SIZE: u64 = 1 << 20;
pub const MAX_STORAGE_FOLDER_SIZE: u64 = 1 << 40;

// Max transaction size in bytes
pub const MAX_TRANSACTION_SIZE: usize = 16 * BYTES_PER_KB;

// Max block size in bytes
pub const MAX_BLOCK_SIZE: usize = 2 * BYTES_PER_KB * BYTES_PER_KB;

// How many blocks a single fetch request may ask for, on the gateway and on
// the explorer's range queries
pub const MAX_BLOCKS_REQUEST: u64 = 10;

// 80-byte mining header: parent (32) + nonce (8) + timestamp (8) + root (32)
pub const BLOCK_HEADER_SIZE: usize = 80;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_sanity() {
        assert!(MAX_TRANSACTION_SIZE <= MAX_BLOCK_SIZE);
        assert!(MINIMUM_COINBASE <= INITIAL_COINBASE);
        assert_eq!(BLOCK_HEADER_SIZE, 32 + 8 + 8 + 32);
    }
}
