use crate::types::{Message, ToolCall};

/// 单次提问的模型上下文 - 系统提示加消息序列。
/// 每个问题都从干净的上下文开始，不在问题之间携带记忆
pub struct Context {
    system_prompt: String,
    messages: Vec<Message>,
}

impl Context {
    pub fn new(system_prompt: String) -> Self {
        Context {
            system_prompt,
            messages: Vec::new(),
        }
    }

    /// 构造 SQL agent 的系统提示，注入方言和行数上限
    pub fn for_sql_agent(dialect: &str, top_k: usize) -> Self {
        let prompt = format!(
            "你是一个与 SQL 数据库交互的智能助手。当前数据库方言：{dialect}。\n\
             收到用户问题后，按以下步骤工作：\n\
             1. 先调用 sql_db_list_tables 查看有哪些表；\n\
             2. 再调用 sql_db_schema 查看相关表的结构和示例数据；\n\
             3. 构造语法正确的 {dialect} 查询，先用 sql_db_query_checker 检查，再用 sql_db_query 执行；\n\
             4. 根据查询结果用中文回答用户的问题，不要编造数据。\n\
             规则：\n\
             - 除非用户明确要求更多，单次查询最多返回 {top_k} 条记录；\n\
             - 只查询回答问题需要的列，不要 SELECT *；\n\
             - 严禁 INSERT、UPDATE、DELETE、DROP 等任何修改语句，数据库是只读的；\n\
             - 查询报错时，重写查询再试。"
        );
        Context::new(prompt)
    }

    /// 添加用户消息
    pub fn add_user(&mut self, content: &str) {
        self.messages.push(Message::user(content));
    }

    /// 添加助手消息（带或不带工具调用）
    pub fn add_assistant(&mut self, content: Option<String>, tool_calls: Option<Vec<ToolCall>>) {
        self.messages.push(Message::assistant(content, tool_calls));
    }

    /// 添加工具结果
    pub fn add_tool_result(&mut self, tool_call_id: &str, content: &str) {
        self.messages.push(Message::tool_result(tool_call_id, content));
    }

    /// 获取所有消息（系统提示在最前）
    pub fn messages(&self) -> Vec<Message> {
        let mut all = Vec::with_capacity(self.messages.len() + 1);
        all.push(Message::system(self.system_prompt.clone()));
        all.extend(self.messages.iter().cloned());
        all
    }

    /// 清空对话历史（保留系统提示）
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// 获取系统提示
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 消息数量（不含系统提示）
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
