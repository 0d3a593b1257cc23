use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::AgentConfig;
use crate::tools::ToolExecutor;
use crate::types::ToolCall;

use super::context::Context;
use super::llm::ChatModel;
use super::trace::{condense_arguments, AgentStep, StepObserver, StepOutcome};

/// 一次提问的结果：最终回答加走过的中间步骤
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub answer: String,
    pub steps: Vec<AgentStep>,
}

/// SQL agent：在模型和数据库工具之间来回传话，
/// 直到模型不再要求调工具、给出最终回答为止
pub struct Agent {
    llm: Arc<dyn ChatModel>,
    tool_executor: ToolExecutor,
    config: AgentConfig,
    dialect: &'static str,
}

impl Agent {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        tool_executor: ToolExecutor,
        config: AgentConfig,
        dialect: &'static str,
    ) -> Self {
        Agent {
            llm,
            tool_executor,
            config,
            dialect,
        }
    }

    /// 处理一个自然语言问题。每次提问都是全新的上下文，
    /// 模型调用失败会原样抛给调用方，不会吞掉
    pub async fn ask(
        &self,
        question: &str,
        observer: Option<&dyn StepObserver>,
    ) -> Result<AgentReply> {
        let mut context = Context::for_sql_agent(self.dialect, self.config.top_k);
        context.add_user(question);

        let mut steps: Vec<AgentStep> = Vec::new();

        for iteration in 1..=self.config.max_iterations {
            println!("🔄 迭代 {}/{}", iteration, self.config.max_iterations);

            let messages = context.messages();
            let tools = self.tool_executor.get_tools();
            let response = self.llm.chat(&messages, Some(tools)).await?;

            let content = response.content;
            match response.tool_calls {
                Some(tool_calls) if !tool_calls.is_empty() => {
                    if tool_calls.len() > self.config.max_tool_calls {
                        let warning =
                            format!("检测到过多的工具调用 ({}个)，已跳过本轮", tool_calls.len());
                        println!("⚠️ {}", warning);
                        context.add_assistant(Some(warning), None);
                        continue;
                    }

                    // 先把模型的 tool_call 响应放进上下文，再补工具结果
                    context.add_assistant(content, Some(tool_calls.clone()));

                    let results = self
                        .execute_tool_calls(&tool_calls, &mut steps, observer)
                        .await;
                    for (tool_call_id, result) in results {
                        context.add_tool_result(&tool_call_id, &result);
                    }
                }
                _ => {
                    println!("✅ 获得最终回答");
                    let answer = content.unwrap_or_default();
                    return Ok(AgentReply { answer, steps });
                }
            }
        }

        Ok(AgentReply {
            answer: "这个问题的处理步骤太多了，请简化问题或分步提问。".to_string(),
            steps,
        })
    }

    async fn execute_tool_calls(
        &self,
        tool_calls: &[ToolCall],
        steps: &mut Vec<AgentStep>,
        observer: Option<&dyn StepObserver>,
    ) -> Vec<(String, String)> {
        let mut results = Vec::new();

        for tool_call in tool_calls {
            let arguments = condense_arguments(&tool_call.function.arguments);

            let args: HashMap<String, Value> = match parse_arguments(&tool_call.function.arguments)
            {
                Ok(args) => args,
                Err(e) => {
                    let error_msg = format!("工具参数解析失败：{}", e);
                    record_step(
                        steps,
                        observer,
                        AgentStep {
                            tool: tool_call.function.name.clone(),
                            arguments,
                            outcome: StepOutcome::Failure(error_msg.clone()),
                            elapsed_ms: 0,
                        },
                    );
                    results.push((tool_call.id.clone(), error_msg));
                    continue;
                }
            };

            let started = Instant::now();
            let (outcome, result) = match self
                .tool_executor
                .execute(&tool_call.function.name, &args)
                .await
            {
                Ok(res) => (StepOutcome::Success(res.clone()), res),
                Err(e) => {
                    let error_msg = format!("工具执行失败：{}", e);
                    (StepOutcome::Failure(error_msg.clone()), error_msg)
                }
            };

            record_step(
                steps,
                observer,
                AgentStep {
                    tool: tool_call.function.name.clone(),
                    arguments,
                    outcome,
                    elapsed_ms: started.elapsed().as_millis(),
                },
            );
            results.push((tool_call.id.clone(), result));
        }

        results
    }
}

/// 工具参数兼容两种形态：JSON 对象，或编码成字符串的 JSON 对象
fn parse_arguments(arguments: &Value) -> Result<HashMap<String, Value>> {
    if arguments.is_object() {
        Ok(serde_json::from_value(arguments.clone())?)
    } else {
        let args_str = arguments.as_str().unwrap_or("{}");
        Ok(serde_json::from_str(args_str)?)
    }
}

fn record_step(steps: &mut Vec<AgentStep>, observer: Option<&dyn StepObserver>, step: AgentStep) {
    if let Some(obs) = observer {
        obs.on_step(&step);
    }
    steps.push(step);
}
