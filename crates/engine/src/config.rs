//! Application configuration loaded from environment

use std::env;

use crate::error::EngineError;

/// Application configuration loaded from environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// World genre seed, e.g. "Cyberpunk/Lovecraftian"
    pub genre: String,
    /// Narrative tone, e.g. "Dark & Gritty"
    pub tone: String,
    /// The main-crisis seed the AI director hints at
    pub final_conflict: String,

    pub llm: LlmConfig,
    pub storage: StorageConfig,
    pub kv: KvConfig,
}

/// LLM gateway configuration (OpenAI-compatible endpoint)
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Per-stage token caps
    pub stages: StageTokens,
}

/// Token caps per generation stage
#[derive(Debug, Clone)]
pub struct StageTokens {
    pub genesis: u32,
    pub narrator: u32,
    pub map_gen: u32,
    pub cognition: u32,
}

/// Blob storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Local,
    Minio,
}

/// Cold-tier (save archive) storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub kind: StorageKind,
    /// Base directory for the local backend
    pub base_path: String,
    /// Endpoint/credentials for the object-store backend
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

/// KV backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvBackend {
    /// In-process store; state lives only as long as the process.
    Memory,
    Redis,
}

/// Hot-tier (KV) configuration
#[derive(Debug, Clone)]
pub struct KvConfig {
    pub backend: KvBackend,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u32,
    /// Default TTL for session keys, in seconds
    pub ttl_secs: u64,
}

impl KvConfig {
    /// Connection URL for the redis backend.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => {
                format!("redis://:{}@{}:{}/{}", password, self.host, self.port, self.db)
            }
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, EngineError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| EngineError::config(format!("{key} must be a valid number, got '{raw}'"))),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Every value has a default except where noted; a present but
    /// malformed value is a fatal `Config` error.
    pub fn from_env() -> Result<Self, EngineError> {
        let storage_kind = match env_or("TALESPIN_STORAGE_TYPE", "local").to_lowercase().as_str() {
            "local" => StorageKind::Local,
            "minio" => StorageKind::Minio,
            other => {
                return Err(EngineError::config(format!(
                    "TALESPIN_STORAGE_TYPE must be 'local' or 'minio', got '{other}'"
                )))
            }
        };

        Ok(Self {
            genre: env_or("TALESPIN_GENRE", "Cyberpunk/Lovecraftian"),
            tone: env_or("TALESPIN_TONE", "Dark & Gritty"),
            final_conflict: env_or("TALESPIN_FINAL_CONFLICT", "The Awakening of the Old Ones"),

            llm: LlmConfig {
                base_url: env_or("TALESPIN_LLM_BASE_URL", "http://localhost:11434/v1"),
                api_key: env_or("TALESPIN_LLM_API_KEY", "sk-local"),
                model: env_or("TALESPIN_LLM_MODEL", "qwen3:30b"),
                temperature: env_parse("TALESPIN_LLM_TEMPERATURE", 0.2)?,
                max_tokens: env_parse("TALESPIN_LLM_MAX_TOKENS", 8000)?,
                timeout_secs: env_parse("TALESPIN_LLM_TIMEOUT_SECS", 120)?,
                stages: StageTokens {
                    genesis: env_parse("TALESPIN_STAGE_GENESIS_TOKENS", 8000)?,
                    narrator: env_parse("TALESPIN_STAGE_NARRATOR_TOKENS", 4000)?,
                    map_gen: env_parse("TALESPIN_STAGE_MAP_TOKENS", 2000)?,
                    cognition: env_parse("TALESPIN_STAGE_COGNITION_TOKENS", 2000)?,
                },
            },

            storage: StorageConfig {
                kind: storage_kind,
                base_path: env_or("TALESPIN_STORAGE_PATH", "./saves"),
                endpoint: env_or("TALESPIN_MINIO_ENDPOINT", "http://localhost:9000"),
                access_key: env_or("TALESPIN_MINIO_ACCESS_KEY", "minioadmin"),
                secret_key: env_or("TALESPIN_MINIO_SECRET_KEY", "minioadmin"),
                bucket: env_or("TALESPIN_MINIO_BUCKET", "talespin-world-data"),
            },

            kv: KvConfig {
                backend: match env_or("TALESPIN_KV_BACKEND", "memory").to_lowercase().as_str() {
                    "memory" => KvBackend::Memory,
                    "redis" => KvBackend::Redis,
                    other => {
                        return Err(EngineError::config(format!(
                            "TALESPIN_KV_BACKEND must be 'memory' or 'redis', got '{other}'"
                        )))
                    }
                },
                host: env_or("TALESPIN_KV_HOST", "localhost"),
                port: env_parse("TALESPIN_KV_PORT", 6379)?,
                password: env::var("TALESPIN_KV_PASSWORD").ok(),
                db: env_parse("TALESPIN_KV_DB", 0)?,
                ttl_secs: env_parse("TALESPIN_KV_TTL", 3600 * 24)?,
            },
        })
    }
}

impl Default for AppConfig {
    /// Defaults without consulting the environment (tests).
    fn default() -> Self {
        Self {
            genre: "Cyberpunk/Lovecraftian".to_string(),
            tone: "Dark & Gritty".to_string(),
            final_conflict: "The Awakening of the Old Ones".to_string(),
            llm: LlmConfig {
                base_url: "http://localhost:11434/v1".to_string(),
                api_key: "sk-local".to_string(),
                model: "qwen3:30b".to_string(),
                temperature: 0.2,
                max_tokens: 8000,
                timeout_secs: 120,
                stages: StageTokens {
                    genesis: 8000,
                    narrator: 4000,
                    map_gen: 2000,
                    cognition: 2000,
                },
            },
            storage: StorageConfig {
                kind: StorageKind::Local,
                base_path: "./saves".to_string(),
                endpoint: "http://localhost:9000".to_string(),
                access_key: "minioadmin".to_string(),
                secret_key: "minioadmin".to_string(),
                bucket: "talespin-world-data".to_string(),
            },
            kv: KvConfig {
                backend: KvBackend::Memory,
                host: "localhost".to_string(),
                port: 6379,
                password: None,
                db: 0,
                ttl_secs: 3600 * 24,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_url_without_password() {
        let config = AppConfig::default();
        assert_eq!(config.kv.url(), "redis://localhost:6379/0");
    }

    #[test]
    fn kv_url_with_password() {
        let mut config = AppConfig::default();
        config.kv.password = Some("secret".to_string());
        config.kv.db = 2;
        assert_eq!(config.kv.url(), "redis://:secret@localhost:6379/2");
    }

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.storage.kind, StorageKind::Local);
        assert_eq!(config.llm.timeout_secs, 120);
        assert_eq!(config.kv.ttl_secs, 86400);
    }
}
