use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::config::AgentConfig;
use crate::types::{ChatRequest, ChatResponse, Message, Tool};

/// 聊天模型的统一入口。生产路径是 Groq API，
/// 测试里用脚本化的替身驱动同一条 agent 循环
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, messages: &[Message], tools: Option<&[Tool]>) -> Result<Message>;
}

/// Groq API 客户端（OpenAI 兼容的 chat/completions 接口）
pub struct GroqClient {
    client: Client,
    api_key: String,
    config: AgentConfig,
}

impl GroqClient {
    pub fn new(api_key: String, config: AgentConfig) -> Self {
        GroqClient {
            client: Client::new(),
            api_key,
            config,
        }
    }

    pub async fn chat_with_retry(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
    ) -> Result<Message> {
        let mut last_error = None;

        for attempt in 1..=self.config.max_llm_retries {
            match self.chat_once(messages, tools).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.config.max_llm_retries {
                        println!(
                            "⚠️ 模型调用失败 (尝试 {}/{})，正在重试...",
                            attempt, self.config.max_llm_retries
                        );
                        tokio::time::sleep(tokio::time::Duration::from_millis(
                            100 * (1 << attempt),
                        ))
                        .await;
                    }
                }
            }
        }

        Err(anyhow::anyhow!(
            "模型调用在 {} 次尝试后仍然失败：{:?}",
            self.config.max_llm_retries,
            last_error
        ))
    }

    async fn chat_once(&self, messages: &[Message], tools: Option<&[Tool]>) -> Result<Message> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()),
            stream: false,
        };

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("调用 Groq API 失败")?;

        let status = response.status();
        let text = response.text().await.context("读取响应失败")?;

        if !status.is_success() {
            return Err(anyhow::anyhow!("Groq API 错误：{} - {}", status, text));
        }

        let mut chat_response: ChatResponse = serde_json::from_str(&text)
            .with_context(|| format!("解析 Groq 响应失败，原始内容：{}", text))?;

        if chat_response.choices.is_empty() {
            return Err(anyhow::anyhow!("Groq 返回了空的 choices"));
        }

        Ok(chat_response.choices.remove(0).message)
    }
}

#[async_trait]
impl ChatModel for GroqClient {
    async fn chat(&self, messages: &[Message], tools: Option<&[Tool]>) -> Result<Message> {
        self.chat_with_retry(messages, tools).await
    }
}
