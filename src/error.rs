use thiserror::Error;

/// 配置错误：连接参数不完整。在任何 IO 发生之前就会被拦下，
/// 和运行期的上游错误（网络、SQL、模型调用）分开处理
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("缺少必需的连接参数：{0}")]
    MissingField(&'static str),
    #[error("未设置 Groq API key，请用 /key 命令或 GROQ_API_KEY 环境变量提供")]
    MissingApiKey,
}
