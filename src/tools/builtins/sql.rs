use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use crate::agent::llm::ChatModel;
use crate::db::{DatabaseHandle, QueryOutput};
use crate::types::Message;

/// 模型经常把 SQL 包在 markdown 代码围栏里，执行前要剥掉
static FENCE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```(?:sql)?\s*(.*?)\s*```\s*$").unwrap());

/// 只读语句白名单：第一个关键字必须在这个列表里
static READONLY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(select|with|show|describe|desc|explain|pragma)\b").unwrap()
});

/// MySQL 和 SQLite 都接受 WITH ... INSERT/UPDATE/DELETE 这种 CTE 写法，
/// 所以 WITH 开头的语句还要单独扫一遍写操作关键字
static CTE_DML_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(insert|update|delete|replace|merge)\b").unwrap());

/// 数据库工具集：列表、看结构、查错、执行，和模型侧的
/// sql_db_* 工具一一对应。查错工具自己会再调一次模型
pub struct SqlTools {
    db: Arc<DatabaseHandle>,
    checker: Arc<dyn ChatModel>,
    dialect: &'static str,
    max_rows: usize,
}

impl SqlTools {
    pub fn new(
        db: Arc<DatabaseHandle>,
        checker: Arc<dyn ChatModel>,
        dialect: &'static str,
        max_rows: usize,
    ) -> Self {
        SqlTools {
            db,
            checker,
            dialect,
            max_rows,
        }
    }

    /// sql_db_list_tables：所有表名，逗号分隔
    pub async fn list_tables(&self) -> Result<String> {
        let tables = self.db.list_tables().await?;
        if tables.is_empty() {
            Ok("（数据库中没有表）".to_string())
        } else {
            Ok(tables.join(", "))
        }
    }

    /// sql_db_schema：逗号分隔的表名 → 每个表的建表语句和示例数据
    pub async fn table_schema(&self, tables: &str) -> Result<String> {
        let mut sections = Vec::new();
        for name in tables.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            sections.push(self.db.table_schema(name).await?);
        }
        if sections.is_empty() {
            bail!("请提供至少一个表名");
        }
        Ok(sections.join("\n\n"))
    }

    /// sql_db_query：过只读守卫后执行，返回格式化的结果
    pub async fn run_query(&self, query: &str) -> Result<String> {
        let cleaned = strip_fences(query);
        if cleaned.is_empty() {
            bail!("查询为空");
        }
        ensure_read_only(&cleaned)?;
        let output = self.db.run_query(&cleaned, self.max_rows).await?;
        Ok(format_output(&output))
    }

    /// sql_db_query_checker：让模型复查一遍查询，返回（可能改写后的）语句
    pub async fn check_query(&self, query: &str) -> Result<String> {
        let cleaned = strip_fences(query);
        if cleaned.is_empty() {
            bail!("查询为空");
        }

        let prompt = format!(
            "请检查下面的 {} 查询是否存在常见错误，包括：\n\
             - NOT IN 和 NULL 值一起使用\n\
             - 该用 UNION ALL 的地方用了 UNION\n\
             - BETWEEN 的边界取舍错误\n\
             - 谓词两侧数据类型不匹配\n\
             - 标识符没有正确引用\n\
             - 函数参数个数错误\n\
             - 类型转换错误\n\
             - JOIN 用错了列\n\n\
             有错误就输出改写后的查询，没有错误就原样输出。\n\
             只输出最终的 SQL，不要任何解释。\n\n\
             ```sql\n{}\n```",
            self.dialect, cleaned
        );

        let messages = vec![Message::user(prompt)];
        let reply = self.checker.chat(&messages, None).await?;
        let text = reply.content.unwrap_or_default();
        let checked = strip_fences(&text);
        if checked.is_empty() {
            Ok(cleaned)
        } else {
            Ok(checked)
        }
    }
}

/// 剥掉 ```sql ... ``` 围栏，顺带去掉首尾空白
fn strip_fences(query: &str) -> String {
    let trimmed = query.trim();
    if let Some(caps) = FENCE_REGEX.captures(trimmed) {
        caps.get(1)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    } else {
        trimmed.to_string()
    }
}

/// 只读守卫：拒绝修改语句和多条语句。分号和写操作关键字只在
/// 引号与注释之外才算数，字面量里出现不会误伤
fn ensure_read_only(query: &str) -> Result<()> {
    let body = query.trim().trim_end_matches(';').trim();
    let bare = strip_quoted_and_comments(body);
    if bare.contains(';') {
        bail!("已拒绝执行：不允许一次执行多条语句");
    }
    let first_keyword = READONLY_REGEX
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase());
    match first_keyword {
        None => bail!(
            "已拒绝执行：只允许只读查询（SELECT / SHOW / DESCRIBE / EXPLAIN 等），收到：{}",
            body
        ),
        Some(keyword) if keyword == "with" && CTE_DML_REGEX.is_match(&bare) => {
            bail!("已拒绝执行：WITH 查询中携带了写操作（INSERT/UPDATE/DELETE 等）")
        }
        Some(_) => Ok(()),
    }
}

/// 挖掉引号内容（'' "" `` 三种引号，双写视为转义）和 SQL 注释，
/// 留下裸的语句骨架供守卫检查。不是完整的 SQL 解析器，
/// 解析不了的输入会往"拒绝"方向偏
fn strip_quoted_and_comments(sql: &str) -> String {
    let mut bare = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;
    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == q {
                if chars.peek() == Some(&q) {
                    chars.next();
                } else {
                    quote = None;
                    bare.push(' ');
                }
            }
        } else if c == '\'' || c == '"' || c == '`' {
            quote = Some(c);
        } else if c == '-' && chars.peek() == Some(&'-') {
            // 行注释吞到行尾
            for next in chars.by_ref() {
                if next == '\n' {
                    break;
                }
            }
            bare.push(' ');
        } else if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            let mut prev = ' ';
            for next in chars.by_ref() {
                if prev == '*' && next == '/' {
                    break;
                }
                prev = next;
            }
            bare.push(' ');
        } else {
            bare.push(c);
        }
    }
    bare
}

/// 把查询结果渲染成模型可读的文本表格
fn format_output(output: &QueryOutput) -> String {
    if output.rows.is_empty() {
        return "（查询没有返回任何行）".to_string();
    }
    let mut lines = Vec::with_capacity(output.rows.len() + 2);
    if !output.columns.is_empty() {
        lines.push(output.columns.join(" | "));
    }
    for row in &output.rows {
        lines.push(row.join(" | "));
    }
    if output.truncated {
        lines.push(format!("（结果已截断，最多显示 {} 行）", output.rows.len()));
    }
    lines.join("\n")
}
