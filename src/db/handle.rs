use anyhow::{anyhow, bail, Context, Result};
use mysql_async::prelude::*;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::{OpenFlags, OptionalExtension};
use std::path::PathBuf;

use crate::error::ConfigError;

/// 表名只允许普通标识符，防止模型把 SQL 片段塞进表名参数
static IDENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").unwrap());

/// 数据库目标：模式加全部连接参数，同时充当句柄缓存的键。
/// 任何一个字段变化都指向另一个数据库，必须拿到新句柄
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DbTarget {
    Local {
        path: PathBuf,
    },
    MySql {
        host: String,
        user: String,
        password: String,
        database: String,
    },
}

impl DbTarget {
    /// 纯参数校验，不做任何 IO。本地模式总是通过；
    /// MySQL 模式要求四个字段全部非空，缺一个就报配置错误
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            DbTarget::Local { .. } => Ok(()),
            DbTarget::MySql {
                host,
                user,
                password,
                database,
            } => {
                if host.trim().is_empty() {
                    return Err(ConfigError::MissingField("mysql_host"));
                }
                if user.trim().is_empty() {
                    return Err(ConfigError::MissingField("mysql_user"));
                }
                if password.is_empty() {
                    return Err(ConfigError::MissingField("mysql_password"));
                }
                if database.trim().is_empty() {
                    return Err(ConfigError::MissingField("mysql_database"));
                }
                Ok(())
            }
        }
    }

    /// SQL 方言名，注入系统提示用
    pub fn dialect(&self) -> &'static str {
        match self {
            DbTarget::Local { .. } => "sqlite",
            DbTarget::MySql { .. } => "mysql",
        }
    }

    /// 用于展示的连接描述，永远不包含密码
    pub fn describe(&self) -> String {
        match self {
            DbTarget::Local { path } => format!("SQLite（只读）：{}", path.display()),
            DbTarget::MySql {
                host,
                user,
                database,
                ..
            } => format!("MySQL：{}@{}/{}", user, host, database),
        }
    }
}

/// 一次查询的结果：列名 + 字符串化的行
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub truncated: bool,
}

/// 行数封顶的结果收集器，两种后端共用同一套截断语义：
/// 第 max_rows + 1 行到来时标记截断并让调用方停止读取
struct RowCollector {
    rows: Vec<Vec<String>>,
    max_rows: usize,
    truncated: bool,
}

impl RowCollector {
    fn new(max_rows: usize) -> Self {
        RowCollector {
            rows: Vec::new(),
            max_rows,
            truncated: false,
        }
    }

    /// 到达上限后丢弃该行并返回 false，调用方应停止继续读取
    fn push(&mut self, record: Vec<String>) -> bool {
        if self.rows.len() >= self.max_rows {
            self.truncated = true;
            return false;
        }
        self.rows.push(record);
        true
    }

    fn into_output(self, columns: Vec<String>) -> QueryOutput {
        QueryOutput {
            columns,
            rows: self.rows,
            truncated: self.truncated,
        }
    }
}

/// 已经建立的数据库连接。SQLite 以只读方式打开，
/// MySQL 走连接池。两种句柄都可以安全地跨任务共享
pub enum DatabaseHandle {
    Sqlite { conn: Mutex<rusqlite::Connection> },
    MySql { pool: mysql_async::Pool },
}

impl DatabaseHandle {
    /// 按目标建立连接。先过一遍参数校验，再做实际 IO，
    /// 这样配置错误永远不会以连接失败的面目出现
    pub async fn connect(target: &DbTarget) -> Result<Self> {
        target.validate()?;

        match target {
            DbTarget::Local { path } => {
                let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
                let conn = rusqlite::Connection::open_with_flags(path, flags)
                    .with_context(|| format!("打开 SQLite 数据库失败：{}", path.display()))?;
                Ok(DatabaseHandle::Sqlite {
                    conn: Mutex::new(conn),
                })
            }
            DbTarget::MySql {
                host,
                user,
                password,
                database,
            } => {
                // host 里可以带端口，形如 db.example.com:3307
                let (hostname, port) = match host.rsplit_once(':') {
                    Some((h, p)) => match p.parse::<u16>() {
                        Ok(port) => (h.to_string(), Some(port)),
                        Err(_) => (host.clone(), None),
                    },
                    None => (host.clone(), None),
                };

                let mut opts = mysql_async::OptsBuilder::default()
                    .ip_or_hostname(hostname)
                    .user(Some(user.clone()))
                    .pass(Some(password.clone()))
                    .db_name(Some(database.clone()));
                if let Some(port) = port {
                    opts = opts.tcp_port(port);
                }

                let pool = mysql_async::Pool::new(opts);
                // 立刻拿一个连接验证参数，连不上就尽早报错
                let mut conn = pool
                    .get_conn()
                    .await
                    .with_context(|| format!("连接 MySQL 失败：{}@{}", user, host))?;
                conn.ping().await.context("MySQL ping 失败")?;
                drop(conn);

                Ok(DatabaseHandle::MySql { pool })
            }
        }
    }

    /// 列出所有表名（SQLite 跳过内部表）
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        match self {
            DatabaseHandle::Sqlite { conn } => {
                let conn = conn.lock();
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master \
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(names)
            }
            DatabaseHandle::MySql { pool } => {
                let mut conn = pool.get_conn().await.context("获取 MySQL 连接失败")?;
                let names: Vec<String> = conn.query("SHOW TABLES").await.context("SHOW TABLES 失败")?;
                Ok(names)
            }
        }
    }

    /// 表结构：建表语句加最多 3 行示例数据，给模型看的格式
    pub async fn table_schema(&self, table: &str) -> Result<String> {
        if !IDENT_REGEX.is_match(table) {
            bail!("非法表名：{}", table);
        }

        let ddl = match self {
            DatabaseHandle::Sqlite { conn } => {
                let conn = conn.lock();
                sqlite_ddl(&conn, table)?
            }
            DatabaseHandle::MySql { pool } => mysql_ddl(pool, table).await?,
        };

        let sample_sql = format!("SELECT * FROM {} LIMIT 3", self.quote_ident(table));
        let sample = match self.run_query(&sample_sql, 3).await {
            Ok(output) if output.rows.is_empty() => "（表为空）".to_string(),
            Ok(output) => {
                let mut lines = vec![output.columns.join(" | ")];
                for row in &output.rows {
                    lines.push(row.join(" | "));
                }
                lines.join("\n")
            }
            Err(e) => format!("（示例数据读取失败：{}）", e),
        };

        Ok(format!(
            "{}\n\n/*\n{} 表的 3 行示例：\n{}\n*/",
            ddl, table, sample
        ))
    }

    /// 执行查询并把结果字符串化，最多返回 max_rows 行。
    /// 这里不做只读检查，调用方负责先把语句过一遍守卫
    pub async fn run_query(&self, sql: &str, max_rows: usize) -> Result<QueryOutput> {
        match self {
            DatabaseHandle::Sqlite { conn } => {
                let conn = conn.lock();
                let mut stmt = conn
                    .prepare(sql)
                    .with_context(|| format!("SQL 语句无法解析：{}", sql))?;
                let columns: Vec<String> =
                    stmt.column_names().into_iter().map(String::from).collect();
                let column_count = columns.len();

                let mut collector = RowCollector::new(max_rows);
                let mut rows = stmt.query([]).context("执行查询失败")?;
                while let Some(row) = rows.next().context("读取查询结果失败")? {
                    let mut record = Vec::with_capacity(column_count);
                    for i in 0..column_count {
                        record.push(sqlite_value_to_string(row.get_ref(i)?));
                    }
                    if !collector.push(record) {
                        break;
                    }
                }

                Ok(collector.into_output(columns))
            }
            DatabaseHandle::MySql { pool } => {
                let mut conn = pool.get_conn().await.context("获取 MySQL 连接失败")?;
                // 逐行读取，到上限就停，不整包收集结果集
                let mut result = conn
                    .query_iter(sql)
                    .await
                    .with_context(|| format!("执行查询失败：{}", sql))?;

                let mut columns: Vec<String> = Vec::new();
                let mut collector = RowCollector::new(max_rows);
                while let Some(row) = result.next().await.context("读取查询结果失败")? {
                    if columns.is_empty() {
                        columns = row
                            .columns_ref()
                            .iter()
                            .map(|c| c.name_str().to_string())
                            .collect();
                    }
                    let mut record = Vec::with_capacity(row.columns_ref().len());
                    for i in 0..row.columns_ref().len() {
                        record.push(
                            row.as_ref(i)
                                .map(mysql_value_to_string)
                                .unwrap_or_else(|| "NULL".to_string()),
                        );
                    }
                    if !collector.push(record) {
                        break;
                    }
                }

                Ok(collector.into_output(columns))
            }
        }
    }

    fn quote_ident(&self, name: &str) -> String {
        match self {
            DatabaseHandle::Sqlite { .. } => format!("\"{}\"", name),
            DatabaseHandle::MySql { .. } => format!("`{}`", name),
        }
    }
}

fn sqlite_ddl(conn: &rusqlite::Connection, table: &str) -> Result<String> {
    let ddl: Option<Option<String>> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            rusqlite::params![table],
            |row| row.get(0),
        )
        .optional()?;
    ddl.flatten().ok_or_else(|| anyhow!("表不存在：{}", table))
}

async fn mysql_ddl(pool: &mysql_async::Pool, table: &str) -> Result<String> {
    let mut conn = pool.get_conn().await.context("获取 MySQL 连接失败")?;
    let row: Option<(String, String)> = conn
        .query_first(format!("SHOW CREATE TABLE `{}`", table))
        .await
        .with_context(|| format!("读取表结构失败：{}", table))?;
    row.map(|(_, ddl)| ddl)
        .ok_or_else(|| anyhow!("表不存在：{}", table))
}

fn sqlite_value_to_string(value: rusqlite::types::ValueRef<'_>) -> String {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).to_string(),
        ValueRef::Blob(b) => format!("<{} 字节二进制>", b.len()),
    }
}

fn mysql_value_to_string(value: &mysql_async::Value) -> String {
    use mysql_async::Value;
    match value {
        Value::NULL => "NULL".to_string(),
        Value::Bytes(b) => String::from_utf8_lossy(b).to_string(),
        Value::Int(i) => i.to_string(),
        Value::UInt(u) => u.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Double(d) => d.to_string(),
        Value::Date(y, mo, d, h, mi, s, _) => {
            format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, mo, d, h, mi, s)
        }
        Value::Time(neg, days, h, mi, s, _) => {
            let sign = if *neg { "-" } else { "" };
            format!("{}{:02}:{:02}:{:02}", sign, *days * 24 + u32::from(*h), mi, s)
        }
    }
}
