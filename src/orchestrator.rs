//! The bounded tool-calling loop.
//!
//! ```text
//! AwaitingModel ──tool calls──▶ ToolExecution ──▶ AwaitingModel
//!       │                            │
//!       ├─final content─▶ Completed  └─a tool said stop─▶ Stopped
//!       └─max_iterations model calls used─▶ IterationLimit
//! ```
//!
//! Tool calls of one model response run one after another in the order the
//! model emitted them. Every call gets exactly one `tool` turn, carrying the
//! error text when the tool failed. Only model-call failures end a run with
//! an error.

use std::sync::Arc;
use std::time::Instant;

use helpdesk_agent_core::conversation::{ConversationTurn, ToolResult};
use helpdesk_agent_core::retrieval::Retriever;

use crate::agents::AgentProfile;
use crate::config::LlmConfig;
use crate::error::OrchestratorError;
use crate::llm::{ChatClient, ChatRequest};
use crate::support::{Client, Sender, StoredMessage, SupportStore};
use crate::tools::{AgentContext, HttpToolRunner, ToolRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// The model answered without calling tools.
    Completed,
    /// A tool ended the conversation for the bot.
    Stopped,
    /// `max_iterations` model calls were made without an answer.
    IterationLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub state: RunState,
    /// Text to deliver to the customer, if any.
    pub reply: Option<String>,
    /// Full history as sent to and extended by the run.
    pub turns: Vec<ConversationTurn>,
    pub model_calls: usize,
    pub tool_calls: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_iterations: usize,
}

impl ModelSettings {
    /// `[llm]` defaults overridden by the agent profile.
    pub fn for_agent(llm: &LlmConfig, profile: &AgentProfile) -> Self {
        Self {
            model: profile.model.clone().unwrap_or_else(|| llm.model.clone()),
            max_tokens: profile.max_tokens.unwrap_or(llm.max_tokens),
            temperature: profile.temperature.unwrap_or(llm.temperature),
            max_iterations: profile.max_iterations,
        }
    }
}

pub struct Orchestrator {
    llm: Arc<dyn ChatClient>,
    tools: ToolRegistry,
    settings: ModelSettings,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn ChatClient>, tools: ToolRegistry, settings: ModelSettings) -> Self {
        Self {
            llm,
            tools,
            settings,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Drive `turns` to a final answer, a stop, or the iteration cap.
    pub async fn run(
        &self,
        ctx: &mut AgentContext,
        mut turns: Vec<ConversationTurn>,
    ) -> Result<RunOutcome, OrchestratorError> {
        let specs = self.tools.specs();
        let mut model_calls = 0;
        let mut tool_calls = 0;

        for iteration in 1..=self.settings.max_iterations {
            tracing::debug!(
                conversation_id = %ctx.conversation.id,
                iteration,
                messages = turns.len(),
                tools = specs.len(),
                "calling model"
            );
            let request = ChatRequest {
                model: self.settings.model.clone(),
                messages: turns.clone(),
                tools: specs.clone(),
                max_tokens: self.settings.max_tokens,
                temperature: self.settings.temperature,
            };
            let response = self.llm.complete(&request).await.inspect_err(|e| {
                tracing::error!(
                    conversation_id = %ctx.conversation.id,
                    iteration,
                    error = %e,
                    "model call failed"
                );
            })?;
            model_calls += 1;

            if !response.tool_calls.is_empty() {
                turns.push(ConversationTurn::assistant_with_tools(
                    response.content.clone(),
                    response.tool_calls.clone(),
                ));

                let mut stop = false;
                for call in &response.tool_calls {
                    let started = Instant::now();
                    let result = self.tools.execute(ctx, call).await;
                    tool_calls += 1;
                    let elapsed_ms = started.elapsed().as_millis() as u64;

                    let content = match result {
                        Ok(outcome) => {
                            tracing::info!(
                                conversation_id = %ctx.conversation.id,
                                tool = %call.name,
                                elapsed_ms,
                                stop = outcome.stop,
                                "tool executed"
                            );
                            stop |= outcome.stop;
                            outcome.content
                        }
                        Err(e) => {
                            tracing::warn!(
                                conversation_id = %ctx.conversation.id,
                                tool = %call.name,
                                elapsed_ms,
                                error = %e,
                                "tool failed"
                            );
                            format!("Error: {}", e)
                        }
                    };
                    turns.push(
                        ToolResult {
                            tool_call_id: call.id.clone(),
                            content,
                        }
                        .into_turn(),
                    );
                }

                if stop {
                    tracing::info!(conversation_id = %ctx.conversation.id, iteration, "run stopped by tool");
                    return Ok(RunOutcome {
                        state: RunState::Stopped,
                        reply: None,
                        turns,
                        model_calls,
                        tool_calls,
                    });
                }
                continue;
            }

            let content = response.content.trim();
            let reply = if content.is_empty() {
                None
            } else {
                turns.push(ConversationTurn::assistant(content));
                Some(content.to_string())
            };
            return Ok(RunOutcome {
                state: RunState::Completed,
                reply,
                turns,
                model_calls,
                tool_calls,
            });
        }

        tracing::warn!(
            conversation_id = %ctx.conversation.id,
            max_iterations = self.settings.max_iterations,
            "iteration limit reached without a reply"
        );
        Ok(RunOutcome {
            state: RunState::IterationLimit,
            reply: None,
            turns,
            model_calls,
            tool_calls,
        })
    }
}

/// One agent profile answering customer messages.
pub struct SupportAgent {
    profile: AgentProfile,
    store: Arc<dyn SupportStore>,
    orchestrator: Orchestrator,
}

impl SupportAgent {
    pub fn new(
        profile: AgentProfile,
        llm_config: &LlmConfig,
        llm: Arc<dyn ChatClient>,
        store: Arc<dyn SupportStore>,
        retriever: Option<Arc<Retriever>>,
        http: HttpToolRunner,
    ) -> Self {
        let tools = ToolRegistry::build_for_agent(&profile, retriever, http);
        let settings = ModelSettings::for_agent(llm_config, &profile);
        Self {
            profile,
            store,
            orchestrator: Orchestrator::new(llm, tools, settings),
        }
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    /// Answer `text` from the client of `conversation_id`.
    ///
    /// The user message is stored before the run and the reply, when there
    /// is one, after it.
    pub async fn handle_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<RunOutcome, OrchestratorError> {
        let mut ctx = AgentContext::load(self.store.clone(), conversation_id, self.profile.clone())
            .await
            .map_err(|e| OrchestratorError::Context(format!("{:#}", e)))?;
        let history = self
            .store
            .recent_messages(conversation_id, self.profile.history_limit)
            .await
            .map_err(|e| OrchestratorError::Context(format!("{:#}", e)))?;

        self.store
            .post_message(
                conversation_id,
                Sender::Client,
                Some(ctx.client.id.as_str()),
                text,
            )
            .await
            .map_err(|e| OrchestratorError::Persist(format!("{:#}", e)))?;

        let mut turns = Vec::with_capacity(history.len() + 2);
        turns.push(ConversationTurn::system(system_prompt(
            &self.profile,
            &ctx.client,
        )));
        turns.extend(history_turns(&history));
        turns.push(ConversationTurn::user(text));

        let outcome = self.orchestrator.run(&mut ctx, turns).await?;

        if let Some(reply) = &outcome.reply {
            self.store
                .post_message(conversation_id, Sender::Bot, Some(ctx.bot_id()), reply)
                .await
                .map_err(|e| OrchestratorError::Persist(format!("{:#}", e)))?;
        }
        tracing::info!(
            conversation_id,
            state = ?outcome.state,
            model_calls = outcome.model_calls,
            tool_calls = outcome.tool_calls,
            replied = outcome.reply.is_some(),
            "message handled"
        );
        Ok(outcome)
    }
}

fn system_prompt(profile: &AgentProfile, client: &Client) -> String {
    format!(
        "{}\n\nYour name is {}. You are talking to {}. Reply in the language with code '{}' unless the customer writes in another one.",
        profile.system_prompt.trim(),
        profile.bot_name,
        client.name,
        client.language
    )
}

/// Stored messages as model turns. System notices are left out.
fn history_turns(messages: &[StoredMessage]) -> impl Iterator<Item = ConversationTurn> + '_ {
    messages.iter().filter_map(|m| match m.sender {
        Sender::Client => Some(ConversationTurn::user(m.content.clone())),
        Sender::Bot => Some(ConversationTurn::assistant(m.content.clone())),
        Sender::System => None,
    })
}
