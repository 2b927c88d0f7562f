//! Client and worker configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder setters (programmatic)
//! 2. Environment variables (`COREBRIDGE_*`, read by `from_env()`)
//! 3. Library defaults (`defaults`)
//!
//! # Example
//!
//! ```rust,ignore
//! use corebridge::config::WorkerConfig;
//!
//! let config = WorkerConfig::from_env()
//!     .task_queue("orders")
//!     .max_cached_workflows(500);
//! config.validate()?;
//! ```
//!
//! Both configs translate into the flat `#[repr(C)]` option structs the
//! engine's constructors read (`to_native`). Strings are pinned into the
//! caller's `Scope`, so the returned struct is only valid while that scope
//! is alive.

pub mod defaults;

use std::str::FromStr;
use std::time::Duration;

use corebridge_core::error::{BridgeError, BridgeResult};
use corebridge_core::sys::{ByteArrayRef, ClientOptions, WorkerOptions};

use crate::scope::Scope;

fn from_env_or<T: FromStr>(key: &str, fallback: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn flag_from_env_or(key: &str, fallback: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => fallback,
    }
}

fn text_from_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn host_name() -> String {
    let mut buf = [0u8; 256];
    // Safety: `buf` is writable for its full length.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "unknown-host".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// `pid@hostname`, the identity used when none is configured.
pub fn default_identity() -> String {
    format!("{}@{}", std::process::id(), host_name())
}

fn pin_optional(scope: &mut Scope, value: &Option<String>) -> ByteArrayRef {
    match value {
        Some(v) => scope.str(v),
        None => ByteArrayRef::empty(),
    }
}

// ── Client ──

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Frontend endpoint, e.g. `http://localhost:7233`
    pub target_url: String,
    pub client_name: String,
    pub client_version: String,
    /// Caller identity reported to the server
    pub identity: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ClientConfig {
    /// Library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `COREBRIDGE_TARGET_URL`
    /// - `COREBRIDGE_CLIENT_NAME`
    /// - `COREBRIDGE_CLIENT_VERSION`
    /// - `COREBRIDGE_IDENTITY`
    pub fn from_env() -> Self {
        let base = Self::new();
        Self {
            target_url: text_from_env("COREBRIDGE_TARGET_URL").unwrap_or(base.target_url),
            client_name: text_from_env("COREBRIDGE_CLIENT_NAME").unwrap_or(base.client_name),
            client_version: text_from_env("COREBRIDGE_CLIENT_VERSION")
                .unwrap_or(base.client_version),
            identity: text_from_env("COREBRIDGE_IDENTITY").unwrap_or(base.identity),
        }
    }

    /// Library defaults only, no environment lookup.
    pub fn new() -> Self {
        Self {
            target_url: defaults::TARGET_URL.to_string(),
            client_name: defaults::CLIENT_NAME.to_string(),
            client_version: defaults::CLIENT_VERSION.to_string(),
            identity: default_identity(),
        }
    }

    pub fn target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = url.into();
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = version.into();
        self
    }

    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.target_url.is_empty() {
            return Err(BridgeError::InvalidConfig("target_url must not be empty".into()));
        }
        if self.client_name.is_empty() {
            return Err(BridgeError::InvalidConfig("client_name must not be empty".into()));
        }
        Ok(())
    }

    /// Flatten into the engine's option struct, pinning strings into `scope`.
    pub fn to_native(&self, scope: &mut Scope) -> ClientOptions {
        ClientOptions {
            target_url: scope.str(&self.target_url),
            client_name: scope.str(&self.client_name),
            client_version: scope.str(&self.client_version),
            identity: scope.str(&self.identity),
        }
    }
}

// ── Worker ──

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Task queue to poll. Required.
    pub task_queue: String,
    /// Build id for versioning; empty means unversioned
    pub build_id: String,
    /// Identity override; `None` inherits the client's
    pub identity: Option<String>,
    /// Sticky workflow cache size
    pub max_cached_workflows: u32,
    pub max_outstanding_workflow_tasks: u32,
    pub max_outstanding_activities: u32,
    pub max_outstanding_nexus_tasks: u32,
    pub max_concurrent_workflow_task_polls: u32,
    pub max_concurrent_activity_task_polls: u32,
    /// Share of workflow polls sent to the normal (non-sticky) queue
    pub nonsticky_to_sticky_poll_ratio: f32,
    /// How long activities get to finish after shutdown is initiated
    pub graceful_shutdown_period: Duration,
    /// Do not poll for activity tasks at all
    pub no_remote_activities: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl WorkerConfig {
    /// Library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `COREBRIDGE_TASK_QUEUE`
    /// - `COREBRIDGE_BUILD_ID`
    /// - `COREBRIDGE_WORKER_IDENTITY`
    /// - `COREBRIDGE_MAX_CACHED_WORKFLOWS`
    /// - `COREBRIDGE_MAX_OUTSTANDING_WORKFLOW_TASKS`
    /// - `COREBRIDGE_MAX_OUTSTANDING_ACTIVITIES`
    /// - `COREBRIDGE_MAX_OUTSTANDING_NEXUS_TASKS`
    /// - `COREBRIDGE_WORKFLOW_TASK_POLLS`
    /// - `COREBRIDGE_ACTIVITY_TASK_POLLS`
    /// - `COREBRIDGE_STICKY_POLL_RATIO`
    /// - `COREBRIDGE_GRACEFUL_SHUTDOWN_MS`
    /// - `COREBRIDGE_NO_REMOTE_ACTIVITIES` (0/1)
    pub fn from_env() -> Self {
        Self {
            task_queue: text_from_env("COREBRIDGE_TASK_QUEUE").unwrap_or_default(),
            build_id: text_from_env("COREBRIDGE_BUILD_ID").unwrap_or_default(),
            identity: text_from_env("COREBRIDGE_WORKER_IDENTITY"),
            max_cached_workflows: from_env_or(
                "COREBRIDGE_MAX_CACHED_WORKFLOWS",
                defaults::MAX_CACHED_WORKFLOWS,
            ),
            max_outstanding_workflow_tasks: from_env_or(
                "COREBRIDGE_MAX_OUTSTANDING_WORKFLOW_TASKS",
                defaults::MAX_OUTSTANDING_WORKFLOW_TASKS,
            ),
            max_outstanding_activities: from_env_or(
                "COREBRIDGE_MAX_OUTSTANDING_ACTIVITIES",
                defaults::MAX_OUTSTANDING_ACTIVITIES,
            ),
            max_outstanding_nexus_tasks: from_env_or(
                "COREBRIDGE_MAX_OUTSTANDING_NEXUS_TASKS",
                defaults::MAX_OUTSTANDING_NEXUS_TASKS,
            ),
            max_concurrent_workflow_task_polls: from_env_or(
                "COREBRIDGE_WORKFLOW_TASK_POLLS",
                defaults::MAX_CONCURRENT_WORKFLOW_TASK_POLLS,
            ),
            max_concurrent_activity_task_polls: from_env_or(
                "COREBRIDGE_ACTIVITY_TASK_POLLS",
                defaults::MAX_CONCURRENT_ACTIVITY_TASK_POLLS,
            ),
            nonsticky_to_sticky_poll_ratio: from_env_or(
                "COREBRIDGE_STICKY_POLL_RATIO",
                defaults::NONSTICKY_TO_STICKY_POLL_RATIO,
            ),
            graceful_shutdown_period: Duration::from_millis(from_env_or(
                "COREBRIDGE_GRACEFUL_SHUTDOWN_MS",
                defaults::GRACEFUL_SHUTDOWN_MS,
            )),
            no_remote_activities: flag_from_env_or(
                "COREBRIDGE_NO_REMOTE_ACTIVITIES",
                defaults::NO_REMOTE_ACTIVITIES,
            ),
        }
    }

    /// Library defaults only, no environment lookup.
    pub fn new(task_queue: impl Into<String>) -> Self {
        Self {
            task_queue: task_queue.into(),
            build_id: String::new(),
            identity: None,
            max_cached_workflows: defaults::MAX_CACHED_WORKFLOWS,
            max_outstanding_workflow_tasks: defaults::MAX_OUTSTANDING_WORKFLOW_TASKS,
            max_outstanding_activities: defaults::MAX_OUTSTANDING_ACTIVITIES,
            max_outstanding_nexus_tasks: defaults::MAX_OUTSTANDING_NEXUS_TASKS,
            max_concurrent_workflow_task_polls: defaults::MAX_CONCURRENT_WORKFLOW_TASK_POLLS,
            max_concurrent_activity_task_polls: defaults::MAX_CONCURRENT_ACTIVITY_TASK_POLLS,
            nonsticky_to_sticky_poll_ratio: defaults::NONSTICKY_TO_STICKY_POLL_RATIO,
            graceful_shutdown_period: Duration::from_millis(defaults::GRACEFUL_SHUTDOWN_MS),
            no_remote_activities: defaults::NO_REMOTE_ACTIVITIES,
        }
    }

    // Builder methods

    pub fn task_queue(mut self, queue: impl Into<String>) -> Self {
        self.task_queue = queue.into();
        self
    }

    pub fn build_id(mut self, id: impl Into<String>) -> Self {
        self.build_id = id.into();
        self
    }

    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn max_cached_workflows(mut self, n: u32) -> Self {
        self.max_cached_workflows = n;
        self
    }

    pub fn max_outstanding_workflow_tasks(mut self, n: u32) -> Self {
        self.max_outstanding_workflow_tasks = n;
        self
    }

    pub fn max_outstanding_activities(mut self, n: u32) -> Self {
        self.max_outstanding_activities = n;
        self
    }

    pub fn max_outstanding_nexus_tasks(mut self, n: u32) -> Self {
        self.max_outstanding_nexus_tasks = n;
        self
    }

    pub fn max_concurrent_workflow_task_polls(mut self, n: u32) -> Self {
        self.max_concurrent_workflow_task_polls = n;
        self
    }

    pub fn max_concurrent_activity_task_polls(mut self, n: u32) -> Self {
        self.max_concurrent_activity_task_polls = n;
        self
    }

    pub fn nonsticky_to_sticky_poll_ratio(mut self, ratio: f32) -> Self {
        self.nonsticky_to_sticky_poll_ratio = ratio;
        self
    }

    pub fn graceful_shutdown_period(mut self, d: Duration) -> Self {
        self.graceful_shutdown_period = d;
        self
    }

    pub fn no_remote_activities(mut self, enable: bool) -> Self {
        self.no_remote_activities = enable;
        self
    }

    /// Reject settings the engine would refuse, before any native call.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.task_queue.is_empty() {
            return Err(BridgeError::InvalidConfig("task_queue must not be empty".into()));
        }
        if self.max_concurrent_workflow_task_polls == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_concurrent_workflow_task_polls must be at least 1".into(),
            ));
        }
        if !self.no_remote_activities && self.max_concurrent_activity_task_polls == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_concurrent_activity_task_polls must be at least 1".into(),
            ));
        }
        let ratio = self.nonsticky_to_sticky_poll_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(BridgeError::InvalidConfig(format!(
                "nonsticky_to_sticky_poll_ratio must be within 0..=1, got {}",
                ratio
            )));
        }
        Ok(())
    }

    /// Flatten into the engine's option struct, pinning strings into `scope`.
    pub fn to_native(&self, scope: &mut Scope, namespace: &str) -> WorkerOptions {
        let millis = u64::try_from(self.graceful_shutdown_period.as_millis()).unwrap_or(u64::MAX);
        WorkerOptions {
            namespace: scope.str(namespace),
            task_queue: scope.str(&self.task_queue),
            build_id: scope.str(&self.build_id),
            identity_override: pin_optional(scope, &self.identity),
            max_cached_workflows: self.max_cached_workflows,
            max_outstanding_workflow_tasks: self.max_outstanding_workflow_tasks,
            max_outstanding_activities: self.max_outstanding_activities,
            max_outstanding_nexus_tasks: self.max_outstanding_nexus_tasks,
            max_concurrent_workflow_task_polls: self.max_concurrent_workflow_task_polls,
            max_concurrent_activity_task_polls: self.max_concurrent_activity_task_polls,
            nonsticky_to_sticky_poll_ratio: self.nonsticky_to_sticky_poll_ratio,
            graceful_shutdown_period_millis: millis,
            no_remote_activities: self.no_remote_activities,
        }
    }
}
