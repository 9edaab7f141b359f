use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::time::Duration;

/// Pipeline configuration, supplied to the core as an opaque object.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HookwiseConfig {
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub cascade: CascadeConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

impl HookwiseConfig {
    /// Load configuration from a file, filling unset keys with defaults
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Self::with_defaults(Config::builder())?.add_source(File::with_name(path));

        let config = builder.build()?;
        config.try_deserialize()
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("webhook.secret", "")?
            .set_default("idempotency.ttl_seconds", default_ttl_seconds())?
            .set_default("idempotency.sweep_interval_seconds", default_sweep_interval_seconds())?
            .set_default("idempotency.key_prefix", default_key_prefix())?
            .set_default("replay.max_attempts", default_max_attempts())?
            .set_default("replay.base_delay_ms", default_base_delay_ms())?
            .set_default("replay.max_delay_ms", default_max_delay_ms())?
            .set_default("replay.poll_interval_ms", default_poll_interval_ms())?
            .set_default("replay.queue_capacity", default_queue_capacity() as u64)?
            .set_default("cascade.max_extends_depth", default_max_extends_depth() as u64)?
            .set_default("cascade.array_merge", "replace")?
            .set_default("cascade.shared_config_repo", default_shared_config_repo())?
            .set_default("cascade.config_dir", default_config_dir())
    }

    pub fn with_webhook(mut self, webhook: WebhookConfig) -> Self {
        self.webhook = webhook;
        self
    }

    pub fn with_idempotency(mut self, idempotency: IdempotencyConfig) -> Self {
        self.idempotency = idempotency;
        self
    }

    pub fn with_replay(mut self, replay: ReplayConfig) -> Self {
        self.replay = replay;
        self
    }

    pub fn with_cascade(mut self, cascade: CascadeConfig) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn with_redis(mut self, redis: RedisConfig) -> Self {
        self.redis = Some(redis);
        self
    }
}

/// Inbound webhook settings
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WebhookConfig {
    /// Shared secret used for HMAC verification
    #[serde(default)]
    pub secret: String,
}

impl WebhookConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

/// Duplicate detection settings
#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl IdempotencyConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_seconds = ttl.as_secs();
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.sweep_interval_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_ttl_seconds() -> u64 {
    86_400 // 24 hours
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

fn default_key_prefix() -> String {
    "hookwise:idempotency:".to_string()
}

/// Replay and dead-letter settings
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    /// Failures allowed before a task is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound for the in-memory replay queue (0 for unbounded)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl ReplayConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = saturating_millis(delay);
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = saturating_millis(delay);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = saturating_millis(interval);
        self
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    3_600_000 // 1 hour
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_queue_capacity() -> usize {
    10_000
}

/// How array fields combine when a document extends another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayMergeStrategy {
    /// The child's array replaces the parent's
    #[default]
    Replace,
    /// Parent elements followed by child elements
    Concatenate,
}

/// Repository configuration cascade settings
#[derive(Debug, Clone, Deserialize)]
pub struct CascadeConfig {
    #[serde(default = "default_max_extends_depth")]
    pub max_extends_depth: usize,
    #[serde(default)]
    pub array_merge: ArrayMergeStrategy,
    /// Organization repository holding shared configuration
    #[serde(default = "default_shared_config_repo")]
    pub shared_config_repo: String,
    /// Conventional subdirectory checked after the plain path
    #[serde(default = "default_config_dir")]
    pub config_dir: String,
}

impl CascadeConfig {
    pub fn with_max_extends_depth(mut self, depth: usize) -> Self {
        self.max_extends_depth = depth;
        self
    }

    pub fn with_array_merge(mut self, strategy: ArrayMergeStrategy) -> Self {
        self.array_merge = strategy;
        self
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            max_extends_depth: default_max_extends_depth(),
            array_merge: ArrayMergeStrategy::default(),
            shared_config_repo: default_shared_config_repo(),
            config_dir: default_config_dir(),
        }
    }
}

fn default_max_extends_depth() -> usize {
    5
}

fn default_shared_config_repo() -> String {
    ".github".to_string()
}

fn default_config_dir() -> String {
    ".github".to_string()
}

/// Redis configuration for the external idempotency backend
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}
