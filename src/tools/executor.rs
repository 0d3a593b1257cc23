use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;

use crate::types::Tool;

use super::builtins::sql::SqlTools;
use super::registry::get_tools_static;

/// 工具执行器 - 直接持有 SqlTools，避免不必要的抽象层
pub struct ToolExecutor {
    sql_tools: SqlTools,
}

impl ToolExecutor {
    pub fn new(sql_tools: SqlTools) -> Self {
        ToolExecutor { sql_tools }
    }

    /// 获取所有工具定义
    pub fn get_tools(&self) -> &[Tool] {
        get_tools_static()
    }

    pub async fn execute(&self, name: &str, args: &HashMap<String, Value>) -> Result<String> {
        match name {
            "sql_db_list_tables" => self.sql_tools.list_tables().await,
            "sql_db_schema" => {
                let tables = args
                    .get("tables")
                    .and_then(|v| v.as_str())
                    .context("缺少 tables 参数")?;
                self.sql_tools.table_schema(tables).await
            }
            "sql_db_query_checker" => {
                let query = args
                    .get("query")
                    .and_then(|v| v.as_str())
                    .context("缺少 query 参数")?;
                self.sql_tools.check_query(query).await
            }
            "sql_db_query" => {
                let query = args
                    .get("query")
                    .and_then(|v| v.as_str())
                    .context("缺少 query 参数")?;
                self.sql_tools.run_query(query).await
            }
            _ => Err(anyhow::anyhow!("未知工具：{}", name)),
        }
    }
}
