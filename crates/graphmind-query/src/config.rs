//! Configuration sections for the query pipeline.
//!
//! Loaded from `graphmind.toml` or `GRAPHMIND__<SECTION>__<KEY>` environment
//! variables through [`graphmind_core::config`].

use graphmind_core::config::{layered, load_section};
use graphmind_core::{GraphmindError, MAX_RESULT_LIMIT};
use graphmind_graph::PoolConfig;
use serde::Deserialize;

/// Every section the CLI reads.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub falkordb: PoolConfig,
    pub cache: CacheConfig,
    pub generator: GeneratorConfig,
    pub resolver: ResolverConfig,
    pub history: HistoryConfig,
    pub directory: DirectoryConfig,
}

impl AppConfig {
    pub fn load(file_prefix: &str) -> Result<Self, GraphmindError> {
        let cfg = layered(file_prefix)?;
        Ok(Self {
            falkordb: load_section(&cfg, "falkordb")?,
            cache: load_section(&cfg, "cache")?,
            generator: load_section(&cfg, "generator")?,
            resolver: load_section(&cfg, "resolver")?,
            history: load_section(&cfg, "history")?,
            directory: load_section(&cfg, "directory")?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    /// Redis-compatible server (FalkorDB itself works).
    Redis,
}

/// `[cache]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    #[serde(default)]
    pub redis_password: Option<String>,

    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            redis_password: None,
            ttl_secs: default_ttl_secs(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// `[generator]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    /// LIMIT rendered into templates other than `list_query`.
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    #[serde(default = "default_list_limit")]
    pub list_limit: u32,

    /// Upper bound for any caller-supplied `limit` parameter.
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,

    /// Below this classification confidence the generative fallback runs.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    #[serde(default)]
    pub model: ModelConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            list_limit: default_list_limit(),
            max_limit: default_max_limit(),
            confidence_threshold: default_confidence_threshold(),
            model: ModelConfig::default(),
        }
    }
}

impl GeneratorConfig {
    /// `max_limit`, never above the system maximum.
    pub fn effective_max_limit(&self) -> u32 {
        self.max_limit.clamp(1, MAX_RESULT_LIMIT)
    }
}

/// `[generator.model]`: generative fallback. Empty `api_key` disables it.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl ModelConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// `[resolver]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    /// Minimum similarity (0..1) for a fuzzy match to be accepted.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

/// `[history]` section. No `dir` keeps history in memory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub dir: Option<String>,
}

/// `[directory]` section: JSON file of canonical entities per namespace.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub path: Option<String>,
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_key_prefix() -> String {
    "graphmind:query".to_string()
}

fn default_limit() -> u32 {
    50
}

fn default_list_limit() -> u32 {
    100
}

fn default_max_limit() -> u32 {
    MAX_RESULT_LIMIT
}

fn default_confidence_threshold() -> f64 {
    0.6
}

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_tokens() -> u32 {
    512
}

fn default_threshold() -> f64 {
    0.82
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.cache.ttl_secs, 3600);
        assert_eq!(cfg.cache.key_prefix, "graphmind:query");
        assert_eq!(cfg.cache.backend, CacheBackend::Memory);
        assert_eq!(cfg.generator.default_limit, 50);
        assert_eq!(cfg.generator.effective_max_limit(), 200);
        assert!(!cfg.generator.model.is_configured());
        assert!((cfg.resolver.threshold - 0.82).abs() < f64::EPSILON);
    }

    #[test]
    fn test_max_limit_is_clamped() {
        let cfg = GeneratorConfig {
            max_limit: 10_000,
            ..GeneratorConfig::default()
        };
        assert_eq!(cfg.effective_max_limit(), MAX_RESULT_LIMIT);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[cache]\nbackend = \"redis\"\nttl_secs = 60\n\n[resolver]\nthreshold = 0.9\n\n[generator.model]\napi_key = \"k\""
        )
        .unwrap();

        let prefix = dir.path().join("app");
        let cfg = AppConfig::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(cfg.cache.backend, CacheBackend::Redis);
        assert_eq!(cfg.cache.ttl_secs, 60);
        assert_eq!(cfg.cache.key_prefix, "graphmind:query");
        assert!((cfg.resolver.threshold - 0.9).abs() < f64::EPSILON);
        assert!(cfg.generator.model.is_configured());
        assert_eq!(cfg.falkordb.port, 6379);
    }
}
