use serde_json::Value;

/// Agent 的一个中间步骤：一次工具调用及其结果
#[derive(Debug, Clone)]
pub struct AgentStep {
    pub tool: String,
    pub arguments: String,
    pub outcome: StepOutcome,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone)]
pub enum StepOutcome {
    Success(String),
    Failure(String),
}

impl AgentStep {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, StepOutcome::Success(_))
    }
}

/// 中间步骤的观察者。REPL 用它把每一步实时打到屏幕上，
/// 最终回答之前用户就能看到 agent 在做什么
pub trait StepObserver {
    fn on_step(&self, step: &AgentStep);
}

/// 控制台观察者：一步一行
pub struct ConsoleObserver;

impl StepObserver for ConsoleObserver {
    fn on_step(&self, step: &AgentStep) {
        match &step.outcome {
            StepOutcome::Success(result) => {
                println!(
                    "🔧 {}({}) → {} ({} ms)",
                    step.tool,
                    step.arguments,
                    preview(result, 80),
                    step.elapsed_ms
                );
            }
            StepOutcome::Failure(error) => {
                println!("❌ {}({}) 失败：{}", step.tool, step.arguments, error);
            }
        }
    }
}

/// 把工具参数压成单行短文本，方便打印
pub fn condense_arguments(arguments: &Value) -> String {
    let text = match arguments {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    preview(&text, 60)
}

/// 取第一行并截断到 max_chars 个字符
pub fn preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("");
    let mut out: String = first_line.chars().take(max_chars).collect();
    if out.chars().count() < first_line.chars().count() || text.lines().count() > 1 {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_lines() {
        let text = "a".repeat(100);
        let shown = preview(&text, 80);
        assert_eq!(shown.chars().count(), 81);
        assert!(shown.ends_with('…'));
    }

    #[test]
    fn preview_marks_multiline_results() {
        let shown = preview("第一行\n第二行", 80);
        assert_eq!(shown, "第一行…");
    }

    #[test]
    fn condense_unwraps_string_arguments() {
        let args = Value::String("{\"query\": \"SELECT 1\"}".to_string());
        assert!(condense_arguments(&args).contains("SELECT 1"));
    }
}
