//! Shared values for end-to-end tests

/// Time to wait for a spawned server to answer on `/`
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;

pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Upper bound for a whole batch chain to finish when the cooldown is zero
pub const CHAIN_TIMEOUT_MS: u64 = 10_000;

pub const TEST_BATCH_SIZE: usize = 2;

/// Five tweet ids with one blank row in the middle
pub const TEST_IDENTIFIERS: &[&str] = &[
    "1790000000000000001",
    "1790000000000000002",
    "",
    "1790000000000000004",
    "1790000000000000005",
];
