use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::db::{DatabaseHandle, DbTarget, HandleCache};
use crate::error::ConfigError;
use crate::tools::{SqlTools, ToolExecutor};

use super::core::{Agent, AgentReply};
use super::llm::{ChatModel, GroqClient};
use super::trace::StepObserver;

/// 开场问候，也是清空后台账里唯一的一条
pub const GREETING: &str = "你好，我可以帮你查询数据库。想知道什么？";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
}

/// 屏幕上显示的对话台账。只记用户和助手的话，
/// 不含工具消息，不落盘，只在显式清空时重置
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    /// 新台账以一条助手问候开场
    pub fn new() -> Self {
        Transcript {
            entries: vec![greeting_entry()],
        }
    }

    pub fn push_user(&mut self, content: &str) {
        self.entries.push(TranscriptEntry {
            role: Role::User,
            content: content.to_string(),
        });
    }

    pub fn push_assistant(&mut self, content: &str) {
        self.entries.push(TranscriptEntry {
            role: Role::Assistant,
            content: content.to_string(),
        });
    }

    /// 清空到只剩开场问候
    pub fn reset(&mut self) {
        self.entries.clear();
        self.entries.push(greeting_entry());
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Transcript::new()
    }
}

fn greeting_entry() -> TranscriptEntry {
    TranscriptEntry {
        role: Role::Assistant,
        content: GREETING.to_string(),
    }
}

/// 会话控制器：持有配置、当前数据库目标、句柄缓存和台账。
/// 提问前先查 API key，再过参数校验，都过了才碰网络和数据库
pub struct ChatSession {
    id: String,
    started_at: DateTime<Utc>,
    config: Config,
    target: DbTarget,
    api_key: Option<String>,
    cache: HandleCache,
    transcript: Transcript,
}

impl ChatSession {
    pub fn new(config: Config) -> Self {
        let target = config.database.target();
        let ttl = Duration::from_secs(config.database.cache_ttl_secs);
        ChatSession {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            api_key: config.agent.api_key.clone(),
            target,
            cache: HandleCache::new(ttl),
            transcript: Transcript::new(),
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn target(&self) -> &DbTarget {
        &self.target
    }

    pub fn model_name(&self) -> &str {
        &self.config.agent.model
    }

    pub fn api_key_set(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }

    /// 设置本次会话的 API key（只存内存）
    pub fn set_api_key(&mut self, key: &str) {
        self.api_key = Some(key.trim().to_string());
    }

    /// 切换数据库目标。参数不完整直接拒绝，目标保持不变；
    /// 旧目标的句柄留在缓存里，切回来还能复用
    pub fn set_target(&mut self, target: DbTarget) -> Result<(), ConfigError> {
        target.validate()?;
        self.target = target;
        Ok(())
    }

    /// 当前目标是否已有未过期的缓存连接
    pub fn is_target_cached(&self) -> bool {
        self.cache.is_cached(&self.target)
    }

    /// 校验并取得当前目标的句柄，缓存命中就复用
    pub async fn configure(&mut self) -> Result<Arc<DatabaseHandle>> {
        self.target.validate()?;
        self.cache.resolve(&self.target).await
    }

    /// 提问。成功时台账追加一对 user/assistant 条目；
    /// 失败时只保留 user 条目，错误交给调用方展示
    pub async fn ask(
        &mut self,
        question: &str,
        observer: Option<&dyn StepObserver>,
    ) -> Result<AgentReply> {
        let api_key = match self.api_key.as_deref() {
            Some(k) if !k.trim().is_empty() => k.to_string(),
            _ => return Err(ConfigError::MissingApiKey.into()),
        };
        let llm: Arc<dyn ChatModel> = Arc::new(GroqClient::new(api_key, self.config.agent.clone()));
        self.ask_with_model(question, llm, observer).await
    }

    /// 和 ask 相同，但由调用方提供模型实现
    pub async fn ask_with_model(
        &mut self,
        question: &str,
        llm: Arc<dyn ChatModel>,
        observer: Option<&dyn StepObserver>,
    ) -> Result<AgentReply> {
        if !self.api_key_set() {
            return Err(ConfigError::MissingApiKey.into());
        }

        self.transcript.push_user(question);
        match self.run_agent(question, llm, observer).await {
            Ok(reply) => {
                self.transcript.push_assistant(&reply.answer);
                Ok(reply)
            }
            Err(e) => Err(e),
        }
    }

    /// 清空台账
    pub fn reset(&mut self) {
        self.transcript.reset();
    }

    async fn run_agent(
        &mut self,
        question: &str,
        llm: Arc<dyn ChatModel>,
        observer: Option<&dyn StepObserver>,
    ) -> Result<AgentReply> {
        let handle = self.configure().await?;
        let dialect = self.target.dialect();
        let sql_tools = SqlTools::new(
            handle,
            Arc::clone(&llm),
            dialect,
            self.config.database.max_rows,
        );
        let agent = Agent::new(
            llm,
            ToolExecutor::new(sql_tools),
            self.config.agent.clone(),
            dialect,
        );
        agent.ask(question, observer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FunctionCall, Message, Tool, ToolCall};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};

    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<Message>>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<Message>>) -> Self {
            ScriptedModel {
                replies: Mutex::new(replies.into()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn chat(&self, _messages: &[Message], _tools: Option<&[Tool]>) -> Result<Message> {
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("脚本里没有更多回复了")))
        }
    }

    fn seed_db(path: &Path) {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE STUDENT (NAME VARCHAR(25), CLASS VARCHAR(25), SECTION VARCHAR(25), MARKS INT);
             INSERT INTO STUDENT VALUES ('Krish', 'Data Science', 'A', 90);",
        )
        .unwrap();
    }

    fn session_over(path: PathBuf) -> ChatSession {
        let mut config = Config::default();
        config.agent.api_key = None;
        config.database.mode = "local".to_string();
        config.database.sqlite_path = path;
        ChatSession::new(config)
    }

    #[test]
    fn transcript_starts_with_single_greeting() {
        let transcript = Transcript::new();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.entries()[0].role, Role::Assistant);
        assert_eq!(transcript.entries()[0].content, GREETING);
    }

    #[test]
    fn transcript_grows_by_pairs_in_order() {
        let mut transcript = Transcript::new();
        for i in 0..3 {
            transcript.push_user(&format!("问题 {}", i));
            transcript.push_assistant(&format!("回答 {}", i));
        }
        assert_eq!(transcript.len(), 1 + 2 * 3);
        for i in 0..3 {
            assert_eq!(transcript.entries()[1 + 2 * i].role, Role::User);
            assert_eq!(transcript.entries()[2 + 2 * i].role, Role::Assistant);
        }
    }

    #[test]
    fn reset_restores_single_greeting() {
        let mut transcript = Transcript::new();
        transcript.push_user("问题");
        transcript.push_assistant("回答");
        transcript.reset();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.entries()[0].content, GREETING);
    }

    #[tokio::test]
    async fn missing_api_key_rejects_before_anything_happens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("school.db");
        seed_db(&path);

        let mut session = session_over(path);
        assert!(!session.api_key_set());

        let err = session.ask("有多少学生？", None).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::MissingApiKey)
        );
        // 没调 agent，台账也不能动
        assert_eq!(session.transcript().len(), 1);
    }

    #[tokio::test]
    async fn successful_ask_appends_a_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("school.db");
        seed_db(&path);

        let mut session = session_over(path);
        session.set_api_key("test-key");

        let llm: Arc<dyn ChatModel> =
            Arc::new(ScriptedModel::new(vec![Ok(Message::assistant(
                Some("共有 1 名学生。".to_string()),
                None,
            ))]));
        let reply = session.ask_with_model("有多少学生？", llm, None).await.unwrap();

        assert_eq!(reply.answer, "共有 1 名学生。");
        let entries = session.transcript().entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].role, Role::User);
        assert_eq!(entries[1].content, "有多少学生？");
        assert_eq!(entries[2].role, Role::Assistant);
        assert_eq!(entries[2].content, "共有 1 名学生。");
    }

    #[tokio::test]
    async fn failed_ask_keeps_user_entry_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("school.db");
        seed_db(&path);

        let mut session = session_over(path);
        session.set_api_key("test-key");

        let llm: Arc<dyn ChatModel> =
            Arc::new(ScriptedModel::new(vec![Err(anyhow!("上游挂了"))]));
        let err = session
            .ask_with_model("有多少学生？", llm, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("上游挂了"));

        let entries = session.transcript().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].role, Role::User);

        // 会话没死，下一问照常工作
        let llm: Arc<dyn ChatModel> =
            Arc::new(ScriptedModel::new(vec![Ok(Message::assistant(
                Some("恢复了。".to_string()),
                None,
            ))]));
        session.ask_with_model("还在吗？", llm, None).await.unwrap();
        assert_eq!(session.transcript().len(), 4);
    }

    #[tokio::test]
    async fn ask_runs_tools_against_the_configured_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("school.db");
        seed_db(&path);

        let mut session = session_over(path);
        session.set_api_key("test-key");

        let replies = vec![
            Ok(Message::assistant(
                None,
                Some(vec![ToolCall {
                    id: "call_1".to_string(),
                    tool_type: Some("function".to_string()),
                    function: FunctionCall {
                        name: "sql_db_query".to_string(),
                        arguments: serde_json::json!({"query": "SELECT COUNT(*) FROM STUDENT"}),
                    },
                }]),
            )),
            Ok(Message::assistant(Some("共 1 条记录。".to_string()), None)),
        ];
        let llm: Arc<dyn ChatModel> = Arc::new(ScriptedModel::new(replies));
        let reply = session.ask_with_model("数一下", llm, None).await.unwrap();

        assert_eq!(reply.steps.len(), 1);
        assert!(reply.steps[0].is_success());
        // 第一次提问之后目标已有缓存连接
        assert!(session.is_target_cached());
    }

    #[tokio::test]
    async fn set_target_rejects_incomplete_mysql() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("school.db");
        seed_db(&path);

        let mut session = session_over(path.clone());
        let before = session.target().clone();

        let err = session
            .set_target(DbTarget::MySql {
                host: "h".to_string(),
                user: String::new(),
                password: "p".to_string(),
                database: "d".to_string(),
            })
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingField("mysql_user"));
        assert_eq!(session.target(), &before);

        // 完整参数可以切换
        session
            .set_target(DbTarget::MySql {
                host: "h".to_string(),
                user: "u".to_string(),
                password: "p".to_string(),
                database: "d".to_string(),
            })
            .unwrap();
        assert_eq!(session.target().dialect(), "mysql");
    }

    #[tokio::test]
    async fn configure_fails_fast_on_incomplete_target_from_config() {
        let mut config = Config::default();
        config.database.mode = "mysql".to_string();
        config.database.mysql_host = "db.example.com".to_string();
        // 用户名、密码、库名都空着
        let mut session = ChatSession::new(config);

        let err = session
            .configure()
            .await
            .err()
            .expect("不完整的 MySQL 配置必须在连接前被拒绝");
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::MissingField("mysql_user"))
        );
    }
}
