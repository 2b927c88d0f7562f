//! Library defaults for client and worker configuration.

// ── Client ──

pub const TARGET_URL: &str = "http://localhost:7233";
pub const CLIENT_NAME: &str = "corebridge";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

// ── Worker ──

pub const MAX_CACHED_WORKFLOWS: u32 = 1000;
pub const MAX_OUTSTANDING_WORKFLOW_TASKS: u32 = 100;
pub const MAX_OUTSTANDING_ACTIVITIES: u32 = 100;
pub const MAX_OUTSTANDING_NEXUS_TASKS: u32 = 100;
pub const MAX_CONCURRENT_WORKFLOW_TASK_POLLS: u32 = 5;
pub const MAX_CONCURRENT_ACTIVITY_TASK_POLLS: u32 = 5;
pub const NONSTICKY_TO_STICKY_POLL_RATIO: f32 = 0.2;
pub const GRACEFUL_SHUTDOWN_MS: u64 = 0;
pub const NO_REMOTE_ACTIVITIES: bool = false;
