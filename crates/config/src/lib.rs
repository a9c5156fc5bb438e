//! 统一配置中心
//!
//! 加载顺序：内置默认值 → `APP_CONFIG_FILE` 指向的文件（toml / yaml / json）
//! → `APP_` 前缀的环境变量（`__` 分隔层级，例如 `APP_SERVER__PORT`）。

use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,
    #[serde(default)]
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    #[validate(nested)]
    pub jwt: JwtConfig,
    #[serde(default)]
    #[validate(nested)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

/// 数据库配置，只在 `storage.backend = "postgres"` 时使用
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[validate(range(min = 1))]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,
    /// 启动时写入存储的用户。用户注册不在本服务内，内存后端只能靠它获得可登录的用户
    #[serde(default)]
    pub seed_users: Vec<SeedUser>,
}

/// 预置用户，token 由外部用同一个 JWT 密钥签发，`sub` 为这里的 `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedUser {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JwtConfig {
    pub secret: String,
    #[validate(range(min = 1))]
    pub expiration_hours: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expiration_hours: 24,
        }
    }
}

/// 实时通道配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RealtimeConfig {
    /// 等待凭证并完成校验的上限（毫秒）
    #[validate(range(min = 1))]
    pub handshake_timeout_ms: u64,
    /// 每条连接的出站队列长度，满了就丢弃该连接的这一条
    #[validate(range(min = 1))]
    pub outbound_buffer: usize,
    /// 加入房间前是否校验会话成员资格
    pub verify_room_membership: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            outbound_buffer: 256,
            verify_room_membership: true,
        }
    }
}

impl RealtimeConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `RUST_LOG` 未设置时使用的过滤规则
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
        }
    }
}

impl AppConfig {
    /// 按优先级合并各个来源并校验
    pub fn load() -> Result<Self, ConfigError> {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig = fig.merge(Env::prefixed("APP_").split("__"));

        let cfg: AppConfig = fig.extract().map_err(Box::new)?;
        cfg.validate_all()?;
        Ok(cfg)
    }

    /// 校验配置有效性
    pub fn validate_all(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;

        if self.jwt.secret.trim().is_empty() {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret cannot be empty".to_string(),
            ));
        }
        if let Some(user) = self
            .storage
            .seed_users
            .iter()
            .find(|user| user.username.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "seed user {} needs a username",
                user.id
            )));
        }
        if self.storage.backend == StorageBackend::Postgres && self.database.url.trim().is_empty()
        {
            return Err(ConfigError::InvalidDatabaseUrl(
                "postgres backend needs database.url".to_string(),
            ));
        }
        Ok(())
    }

    /// 用于日志输出，隐藏密钥和数据库地址
    pub fn sanitize(&self) -> String {
        let mut redacted = self.clone();
        if !redacted.jwt.secret.is_empty() {
            redacted.jwt.secret = "[REDACTED]".into();
        }
        if !redacted.database.url.is_empty() {
            redacted.database.url = "[REDACTED]".into();
        }
        format!("{redacted:?}")
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
}
