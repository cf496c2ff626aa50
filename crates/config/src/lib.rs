//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - 数据库连接（可选，缺省时使用内存存储）
//! - 限流参数
//! - 在线状态对账周期

use serde::{Deserialize, Serialize};
use std::env;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 限流配置
    pub rate_limit: RateLimitConfig,
    /// 在线状态配置
    pub presence: PresenceConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// 数据库配置
///
/// url 为 None 时进程只使用内存存储；设置了 url 但
/// require_database 为 false 时，连接失败会降级到内存存储
/// 而不是直接退出。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub require_database: bool,
}

/// 限流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// 滑动窗口长度（秒）
    pub window_secs: u64,
    /// 窗口内单连接单事件类型的最大事件数
    pub max_events: u32,
}

/// 在线状态配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// 对账周期（秒），决定丢失断连通知后状态最多滞后多久
    pub reconcile_interval_secs: u64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// 从环境变量加载配置，所有项都有可用的默认值。
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: env_parse("PORT", 3000),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok(),
                max_connections: env_parse("DB_MAX_CONNECTIONS", 5),
                require_database: env_parse("REQUIRE_DATABASE", false),
            },
            rate_limit: RateLimitConfig {
                window_secs: env_parse("RATE_LIMIT_WINDOW_SECS", 30),
                max_events: env_parse("RATE_LIMIT_MAX_EVENTS", 25),
            },
            presence: PresenceConfig {
                reconcile_interval_secs: env_parse("RECONCILE_INTERVAL_SECS", 10),
            },
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
                require_database: false,
            },
            rate_limit: RateLimitConfig {
                window_secs: 30,
                max_events: 25,
            },
            presence: PresenceConfig {
                reconcile_interval_secs: 10,
            },
        }
    }
}
