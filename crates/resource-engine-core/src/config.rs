//! Engine-wide configuration.
//!
//! `EngineConfig` carries the settings that apply to every resource unless a
//! resource (or an individual call, via `Prefer`-style overrides) overrides
//! them. Precedence is always: call override → resource default → engine
//! default, realized here by [`Tiered::resolve`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    // ========================================================================
    // Database settings
    // ========================================================================
    /// Database connection URI for the concrete storage backend.
    #[serde(default = "default_db_uri")]
    pub db_uri: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub db_pool_size: u32,

    /// Pool acquisition timeout in seconds.
    #[serde(default = "default_pool_timeout")]
    pub db_pool_timeout: u64,

    // ========================================================================
    // Server settings
    // ========================================================================
    /// Server host to bind.
    #[serde(default = "default_host")]
    pub server_host: String,

    /// Server port.
    #[serde(default = "default_port")]
    pub server_port: u16,

    // ========================================================================
    // JWT settings
    // ========================================================================
    /// JWT secret key (HS256).
    pub jwt_secret: Option<String>,

    /// JWT secret provided as base64.
    #[serde(default)]
    pub jwt_secret_is_base64: bool,

    /// JWT audience claim to validate.
    pub jwt_aud: Option<String>,

    // ========================================================================
    // Logging settings
    // ========================================================================
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    // ========================================================================
    // Engine defaults (§3 "engine options", resolved via Tiered)
    // ========================================================================
    /// Default page size for collection reads, used when a resource does not
    /// override it and the client does not supply `page[size]`/`page[limit]`.
    #[serde(default = "default_page_size")]
    pub default_page_size: i64,

    /// Hard cap on page size regardless of resource or client request.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,

    /// Hard cap on `include=` tree depth.
    #[serde(default = "default_include_depth_limit")]
    pub include_depth_limit: u32,

    /// Whether belongs-to foreign keys sent directly in `attributes` (rather
    /// than via `relationships`) are rejected (`true`, the safer default) or
    /// tolerated.
    #[serde(default = "default_true")]
    pub strict_foreign_keys: bool,

    /// Whether a many-to-many write skips the pre-check that each target id
    /// exists before inserting a pivot row (§4.6, §9 open question). `false`
    /// is the safer engine default; a resource may override it.
    #[serde(default)]
    pub skip_pivot_existence_check: bool,

    /// App-level settings exposed to hooks/permission gate implementations.
    #[serde(default)]
    pub app_settings: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_uri: default_db_uri(),
            db_pool_size: default_pool_size(),
            db_pool_timeout: default_pool_timeout(),
            server_host: default_host(),
            server_port: default_port(),
            jwt_secret: None,
            jwt_secret_is_base64: false,
            jwt_aud: None,
            log_level: default_log_level(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            include_depth_limit: default_include_depth_limit(),
            strict_foreign_keys: true,
            skip_pivot_existence_check: false,
            app_settings: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(uri) = std::env::var("RESOURCE_ENGINE_DB_URI") {
            config.db_uri = uri;
        }
        if let Ok(uri) = std::env::var("DATABASE_URL") {
            config.db_uri = uri;
        }
        if let Ok(size) = std::env::var("RESOURCE_ENGINE_DB_POOL") {
            if let Ok(n) = size.parse() {
                config.db_pool_size = n;
            }
        }
        if let Ok(secret) = std::env::var("RESOURCE_ENGINE_JWT_SECRET") {
            config.jwt_secret = Some(secret);
        }
        if let Ok(aud) = std::env::var("RESOURCE_ENGINE_JWT_AUD") {
            config.jwt_aud = Some(aud);
        }
        if let Ok(host) = std::env::var("RESOURCE_ENGINE_HOST") {
            config.server_host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.server_port = p;
            }
        }
        if let Ok(port) = std::env::var("RESOURCE_ENGINE_PORT") {
            if let Ok(p) = port.parse() {
                config.server_port = p;
            }
        }
        if let Ok(limit) = std::env::var("RESOURCE_ENGINE_INCLUDE_DEPTH_LIMIT") {
            if let Ok(n) = limit.parse() {
                config.include_depth_limit = n;
            }
        }

        config
    }
}

/// A setting resolved across three precedence tiers: a per-call override
/// (e.g. a `Prefer` header value), a per-resource default declared at
/// registration, and the engine-wide default. This is the concrete
/// realization of the "ad-hoc config merging becomes a typed settings
/// struct with explicit precedence" redesign note.
#[derive(Clone, Copy, Debug, Default)]
pub struct Tiered<T> {
    pub call_override: Option<T>,
    pub resource_default: Option<T>,
    pub engine_default: T,
}

impl<T: Clone> Tiered<T> {
    pub fn new(engine_default: T) -> Self {
        Self {
            call_override: None,
            resource_default: None,
            engine_default,
        }
    }

    pub fn with_resource_default(mut self, value: T) -> Self {
        self.resource_default = Some(value);
        self
    }

    pub fn with_call_override(mut self, value: T) -> Self {
        self.call_override = Some(value);
        self
    }

    /// Resolve the effective value: call override wins, then resource
    /// default, then engine default.
    pub fn resolve(&self) -> T {
        self.call_override
            .clone()
            .or_else(|| self.resource_default.clone())
            .unwrap_or_else(|| self.engine_default.clone())
    }
}

/// Log levels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Crit,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn to_tracing(&self) -> tracing::Level {
        match self {
            Self::Crit | Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
        }
    }
}

fn default_db_uri() -> String {
    "postgresql://localhost/postgres".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_pool_timeout() -> u64 {
    10
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> LogLevel {
    LogLevel::Error
}

fn default_page_size() -> i64 {
    25
}

fn default_max_page_size() -> i64 {
    1000
}

fn default_include_depth_limit() -> u32 {
    3
}

fn default_true() -> bool {
    true
}
