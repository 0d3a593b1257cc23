use once_cell::sync::Lazy;

use crate::types::{FunctionDefinition, Tool};

/// 获取静态工具列表
pub fn get_tools_static() -> &'static [Tool] {
    &TOOLS
}

/// 暴露给模型的四个数据库工具（懒加载，只初始化一次）
static TOOLS: Lazy<Vec<Tool>> = Lazy::new(|| {
    vec![
        Tool {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: "sql_db_list_tables".to_string(),
                description: "列出数据库中的所有表名，逗号分隔。不需要参数".to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
            },
        },
        Tool {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: "sql_db_schema".to_string(),
                description: "查看指定表的建表语句和示例数据。先用 sql_db_list_tables 确认表存在"
                    .to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "tables": {
                            "type": "string",
                            "description": "逗号分隔的表名列表"
                        }
                    },
                    "required": ["tables"]
                }),
            },
        },
        Tool {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: "sql_db_query_checker".to_string(),
                description: "执行前先用这个工具复查查询是否正确，返回可直接执行的查询"
                    .to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "待检查的 SQL 查询"
                        }
                    },
                    "required": ["query"]
                }),
            },
        },
        Tool {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: "sql_db_query".to_string(),
                description: "执行一条只读 SQL 查询并返回结果。执行出错时改写查询后重试"
                    .to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "要执行的 SQL 查询"
                        }
                    },
                    "required": ["query"]
                }),
            },
        },
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_the_four_sql_tools() {
        let names: Vec<&str> = get_tools_static()
            .iter()
            .map(|t| t.function.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "sql_db_list_tables",
                "sql_db_schema",
                "sql_db_query_checker",
                "sql_db_query"
            ]
        );
        assert!(get_tools_static().iter().all(|t| t.tool_type == "function"));
    }
}
