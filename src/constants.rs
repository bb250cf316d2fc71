use std::time::Duration;

/// Upper bound on the number of literals placed into a single IN-list.
/// Larger ID sets are split and, where several conditions are split at
/// once, recombined into one query per chunk combination.
pub const CHUNK_SIZE: usize = 60_000;

/// Slack subtracted from a table's row count when deciding whether its
/// transfer set already covers the whole table. The source stays live
/// while the subset is collected, so counts drift by a few rows.
pub const ROW_COUNT_SLACK: u64 = 100;

/// Headroom added on top of the observed maximum primary key when the
/// destination sequences are bumped after the copy.
pub const SEQUENCE_HEADROOM: i64 = 100_000;

// Connection retry timing
pub const CONNECT_MAX_RETRIES: u32 = 5;
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(200);

// Defaults for the environment-driven settings
pub const DEFAULT_TABLES_PER_BATCH: usize = 500;
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Name of the foreign server created on the destination.
pub const FDW_SERVER_NAME: &str = "src_server";

/// Schema on the destination into which the source's public schema is
/// imported for the copy step.
pub const STAGING_SCHEMA: &str = "tmp_src_schema";
