use std::time::Duration;

/// Connection pool limits applied by [`Handle::open_with`](crate::Handle::open_with).
///
/// Both bundled drivers keep idle connections up to `max_open`, so the idle
/// limit always equals the open limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of open connections
    pub max_open: u32,
    /// Connections older than this are closed instead of reused; zero
    /// disables the limit
    pub max_lifetime: Duration,
    /// How long a caller may wait for a free connection
    pub acquire_timeout: Duration,
    /// Bound on the connectivity check performed when opening
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 50,
            max_lifetime: Duration::from_secs(5 * 60),
            acquire_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_open(mut self, max_open: u32) -> Self {
        self.max_open = max_open.max(1);
        self
    }

    pub fn with_max_lifetime(mut self, max_lifetime: Duration) -> Self {
        self.max_lifetime = max_lifetime;
        self
    }

    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// `max_lifetime` as a limit, `None` when it is zero.
    pub fn lifetime_limit(&self) -> Option<Duration> {
        Some(self.max_lifetime).filter(|lifetime| !lifetime.is_zero())
    }
}

/// Retry behaviour for serialization failures.
///
/// The first retry waits `initial_backoff`, every later one `multiplier`
/// times longer than the previous.
///
/// # Example
/// ```
/// use postgres_tx_retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts, 3);
/// assert_eq!(policy.delay_for(0), Duration::from_millis(150));
/// assert_eq!(policy.delay_for(1), Duration::from_millis(300));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Growth factor applied to the delay after each retry
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(150),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Set the attempt budget; at least one attempt is always made.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay after the failed attempt with zero-based index `retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.checked_pow(retry).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor)
    }
}
