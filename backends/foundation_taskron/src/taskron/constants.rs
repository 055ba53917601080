// --- Constants

/// Per-worker queue capacity when `TASKRON_QUEUE_CAPACITY` is not set.
/// One slot stays reserved, so a worker holds up to 1023 queued tasks.
pub const DEFAULT_QUEUE_CAPACITY: usize = 0x400;

/// Environment variable overriding the per-worker queue capacity.
pub const QUEUE_CAPACITY_ENV: &str = "TASKRON_QUEUE_CAPACITY";

/// Environment variable capping how many workers the scheduler spawns,
/// below the one-per-selected-core default.
pub const NUM_WORKERS_ENV: &str = "TASKRON_NUM_WORKERS";
