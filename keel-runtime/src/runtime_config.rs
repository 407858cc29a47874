use std::time::Duration;

/// Default time a statement waits for a conflicting row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on nested trigger activations.
pub const DEFAULT_MAX_TRIGGER_DEPTH: usize = 32;

/// Engine-wide tuning knobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a statement waits for a conflicting row lock before failing
    /// with `LockTimeout`.
    pub lock_timeout: Duration,
    /// Maximum nesting of trigger activations. A handler whose writes fire
    /// further handlers counts one level per activation.
    pub max_trigger_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_trigger_depth: DEFAULT_MAX_TRIGGER_DEPTH,
        }
    }
}

impl EngineConfig {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_max_trigger_depth(mut self, depth: usize) -> Self {
        self.max_trigger_depth = depth;
        self
    }
}
