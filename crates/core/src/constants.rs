//! Constants used throughout the quotation core crate.

/// Default SQLite database location when no explicit path is configured.
pub const DEFAULT_DATABASE_PATH: &str = "quote_data/quotes.sqlite3";

/// Default time a connection waits on a locked database before reporting busy.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default number of attempts a write transaction gets when the store reports contention.
pub const DEFAULT_ALLOCATION_ATTEMPTS: u32 = 3;

/// Allowed absolute difference between a stated line total and `quantity * unit_price`.
pub const LINE_TOTAL_TOLERANCE: f64 = 0.01;

/// Upper bound for free-text notes attached to requests and offers.
pub const MAX_NOTES_LEN: usize = 2_000;

/// Upper bound on how many providers a single request may target.
pub const MAX_TARGETS_PER_REQUEST: usize = 50;
