use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::db::DbTarget;

/// Agent 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub model: String,
    pub base_url: String,
    /// Groq API key 只从环境变量或 /key 命令获取，永远不写入配置文件
    #[serde(skip)]
    pub api_key: Option<String>,
    pub max_iterations: usize,
    pub max_llm_retries: usize,
    pub max_tool_calls: usize,
    /// 提示里要求模型单次最多返回的记录数
    pub top_k: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            model: std::env::var("GROQ_MODEL").unwrap_or_else(|_| "llama3-8b-8192".to_string()),
            base_url: std::env::var("GROQ_BASE_URL")
                .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string()),
            api_key: std::env::var("GROQ_API_KEY").ok(),
            max_iterations: 10,
            max_llm_retries: 3,
            max_tool_calls: 5,
            top_k: 10,
        }
    }
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// "local"（本地 SQLite，只读）或 "mysql"
    pub mode: String,
    pub sqlite_path: PathBuf,
    pub mysql_host: String,
    pub mysql_user: String,
    /// MySQL 密码只从环境变量或 /db 命令获取，永远不写入配置文件
    #[serde(skip)]
    pub mysql_password: String,
    pub mysql_database: String,
    /// 数据库句柄在缓存里的存活时间（秒）
    pub cache_ttl_secs: u64,
    /// 单次查询最多返回给模型的行数
    pub max_rows: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            mode: "local".to_string(),
            sqlite_path: PathBuf::from("student.db"),
            mysql_host: String::new(),
            mysql_user: String::new(),
            mysql_password: std::env::var("DBQ_MYSQL_PASSWORD").unwrap_or_default(),
            mysql_database: String::new(),
            cache_ttl_secs: 7200,
            max_rows: 50,
        }
    }
}

impl DatabaseConfig {
    /// 把配置翻译成显式的数据库目标。mode 不认识时按本地模式处理
    pub fn target(&self) -> DbTarget {
        if self.mode.eq_ignore_ascii_case("mysql") {
            DbTarget::MySql {
                host: self.mysql_host.clone(),
                user: self.mysql_user.clone(),
                password: self.mysql_password.clone(),
                database: self.mysql_database.clone(),
            }
        } else {
            DbTarget::Local {
                path: self.sqlite_path.clone(),
            }
        }
    }
}

/// 统一配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub agent: AgentConfig,
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            agent: AgentConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// 从文件加载配置。密钥类字段被 serde 跳过，加载后从环境变量补上
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("解析配置文件失败：{}", path.display()))?;

        config.agent.api_key = std::env::var("GROQ_API_KEY").ok();
        config.database.mysql_password = std::env::var("DBQ_MYSQL_PASSWORD").unwrap_or_default();

        Ok(config)
    }

    /// 保存配置到文件（不含任何密钥）
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 从默认位置加载配置
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_path())
    }

    /// 默认配置文件路径：~/.dbq/config.toml
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dbq")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_database_is_local_sqlite() {
        let config = DatabaseConfig::default();
        assert_eq!(config.mode, "local");
        assert_eq!(config.cache_ttl_secs, 7200);
        assert!(matches!(config.target(), DbTarget::Local { .. }));
    }

    #[test]
    fn mysql_mode_builds_remote_target() {
        let mut config = DatabaseConfig::default();
        config.mode = "MySQL".to_string();
        config.mysql_host = "db.example.com".to_string();
        config.mysql_user = "reader".to_string();
        config.mysql_password = "pw".to_string();
        config.mysql_database = "school".to_string();

        match config.target() {
            DbTarget::MySql { host, user, password, database } => {
                assert_eq!(host, "db.example.com");
                assert_eq!(user, "reader");
                assert_eq!(password, "pw");
                assert_eq!(database, "school");
            }
            other => panic!("期望 MySQL 目标，得到 {:?}", other),
        }
    }

    #[test]
    fn save_never_writes_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.agent.api_key = Some("gsk_super_secret".to_string());
        config.database.mysql_password = "hunter2".to_string();
        config.save(&path).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(!written.contains("gsk_super_secret"));
        assert!(!written.contains("hunter2"));
        assert!(!written.contains("api_key"));
        assert!(!written.contains("mysql_password"));
    }

    #[test]
    fn load_round_trips_non_secret_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.database.mode = "mysql".to_string();
        config.database.mysql_host = "10.0.0.7".to_string();
        config.database.max_rows = 25;
        config.agent.max_iterations = 4;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.database.mode, "mysql");
        assert_eq!(loaded.database.mysql_host, "10.0.0.7");
        assert_eq!(loaded.database.max_rows, 25);
        assert_eq!(loaded.agent.max_iterations, 4);
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.database.mode, "local");
        assert_eq!(config.agent.max_tool_calls, 5);
    }
}
