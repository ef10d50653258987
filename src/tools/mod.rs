//! Tools the model can call during an orchestration run.
//!
//! A tool is either one of the fixed [`BuiltinTool`]s, switched on by
//! flags on the agent profile, or an operator-declared HTTP endpoint.
//! Both are held as a [`ToolKind`] and dispatched by a single match in
//! [`ToolRegistry::execute`].
//!
//! Tools never see the conversation history. Built-in tools act on the
//! support records behind an [`AgentContext`]; HTTP tools only read it to
//! resolve `variable` parameters.

pub mod builtin;
pub mod http;

use anyhow::{Context, Result};
use helpdesk_agent_core::conversation::{ToolInvocation, ToolSpec};
use helpdesk_agent_core::retrieval::Retriever;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::agents::{AgentProfile, HttpToolConfig};
use crate::error::ToolError;
use crate::support::{Client, Conversation, SupportStore};

pub use http::HttpToolRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTool {
    Handover,
    SearchKnowledgeBase,
    SetUserInfo,
    SetPriority,
    SetTag,
}

impl BuiltinTool {
    pub const ALL: [BuiltinTool; 5] = [
        BuiltinTool::Handover,
        BuiltinTool::SearchKnowledgeBase,
        BuiltinTool::SetUserInfo,
        BuiltinTool::SetPriority,
        BuiltinTool::SetTag,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinTool::Handover => "handover",
            BuiltinTool::SearchKnowledgeBase => "search_knowledge_base",
            BuiltinTool::SetUserInfo => "set_user_info",
            BuiltinTool::SetPriority => "set_priority",
            BuiltinTool::SetTag => "set_tag",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    fn enabled_in(&self, profile: &AgentProfile) -> bool {
        match self {
            BuiltinTool::Handover => profile.handover_enabled,
            BuiltinTool::SearchKnowledgeBase => profile.knowledge_base_enabled,
            BuiltinTool::SetUserInfo => profile.set_user_info_enabled,
            BuiltinTool::SetPriority => profile.set_priority_enabled,
            BuiltinTool::SetTag => profile.set_tag_enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolKind {
    Builtin(BuiltinTool),
    Declarative(HttpToolConfig),
}

impl ToolKind {
    pub fn name(&self) -> &str {
        match self {
            ToolKind::Builtin(tool) => tool.name(),
            ToolKind::Declarative(tool) => &tool.name,
        }
    }

    pub fn definition(&self) -> ToolSpec {
        match self {
            ToolKind::Builtin(tool) => builtin::definition(*tool),
            ToolKind::Declarative(tool) => ToolSpec {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: http::parameters_schema(tool),
            },
        }
    }
}

/// Result of a tool that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub content: String,
    /// End the run after this batch without another model call.
    pub stop: bool,
}

impl ToolOutcome {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            stop: false,
        }
    }

    pub fn stop(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            stop: true,
        }
    }
}

/// The records one orchestration run acts on.
pub struct AgentContext {
    pub conversation: Conversation,
    pub client: Client,
    pub profile: AgentProfile,
    store: Arc<dyn SupportStore>,
}

impl AgentContext {
    pub fn new(
        conversation: Conversation,
        client: Client,
        profile: AgentProfile,
        store: Arc<dyn SupportStore>,
    ) -> Self {
        Self {
            conversation,
            client,
            profile,
            store,
        }
    }

    /// Load the conversation and its client.
    pub async fn load(
        store: Arc<dyn SupportStore>,
        conversation_id: &str,
        profile: AgentProfile,
    ) -> Result<Self> {
        let conversation = store
            .conversation(conversation_id)
            .await?
            .with_context(|| format!("conversation {} not found", conversation_id))?;
        let client = store
            .client(&conversation.client_id)
            .await?
            .with_context(|| format!("client {} not found", conversation.client_id))?;
        Ok(Self::new(conversation, client, profile, store))
    }

    pub fn store(&self) -> &dyn SupportStore {
        self.store.as_ref()
    }

    pub fn bot_id(&self) -> &str {
        &self.profile.bot_id
    }

    /// Re-read the conversation and client after a tool changed them.
    pub async fn refresh(&mut self) -> Result<(), ToolError> {
        let store_err = |e: anyhow::Error| ToolError::Store(format!("{:#}", e));
        if let Some(conversation) = self
            .store
            .conversation(&self.conversation.id)
            .await
            .map_err(store_err)?
        {
            self.conversation = conversation;
        }
        if let Some(client) = self.store.client(&self.client.id).await.map_err(store_err)? {
            self.client = client;
        }
        Ok(())
    }
}

/// The tools enabled for one agent, with what they need to run.
pub struct ToolRegistry {
    tools: Vec<ToolKind>,
    retriever: Option<Arc<Retriever>>,
    search_limit: usize,
    http: HttpToolRunner,
}

impl ToolRegistry {
    /// Built-in tools switched on in `profile`, in fixed order, followed by
    /// its HTTP tools in declaration order.
    pub fn build_for_agent(
        profile: &AgentProfile,
        retriever: Option<Arc<Retriever>>,
        http: HttpToolRunner,
    ) -> Self {
        let search_limit = profile
            .search_limit
            .or_else(|| retriever.as_ref().map(|r| r.settings().limit))
            .unwrap_or(5);
        Self {
            tools: tool_kinds(profile),
            retriever,
            search_limit,
            http,
        }
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(ToolKind::definition).collect()
    }

    pub fn find(&self, name: &str) -> Option<&ToolKind> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub async fn execute(
        &self,
        ctx: &mut AgentContext,
        call: &ToolInvocation,
    ) -> Result<ToolOutcome, ToolError> {
        let Some(tool) = self.find(&call.name) else {
            return Err(ToolError::Unknown(call.name.clone()));
        };
        let args = parse_arguments(&call.arguments)?;

        match tool {
            ToolKind::Builtin(BuiltinTool::Handover) => builtin::handover(ctx, &args).await,
            ToolKind::Builtin(BuiltinTool::SearchKnowledgeBase) => {
                builtin::search_knowledge_base(self.retriever.as_deref(), self.search_limit, &args)
                    .await
            }
            ToolKind::Builtin(BuiltinTool::SetUserInfo) => builtin::set_user_info(ctx, &args).await,
            ToolKind::Builtin(BuiltinTool::SetPriority) => builtin::set_priority(ctx, &args).await,
            ToolKind::Builtin(BuiltinTool::SetTag) => builtin::set_tag(ctx, &args).await,
            ToolKind::Declarative(tool) => self
                .http
                .call(tool, ctx, &args)
                .await
                .map(ToolOutcome::text),
        }
    }
}

fn tool_kinds(profile: &AgentProfile) -> Vec<ToolKind> {
    BuiltinTool::ALL
        .into_iter()
        .filter(|t| t.enabled_in(profile))
        .map(ToolKind::Builtin)
        .chain(profile.tools.iter().cloned().map(ToolKind::Declarative))
        .collect()
}

/// Tool specs advertised to the model for `profile`.
pub fn build_tools_for_agent(profile: &AgentProfile) -> Vec<ToolSpec> {
    tool_kinds(profile).iter().map(ToolKind::definition).collect()
}

/// Decode a tool call's JSON arguments. Blank arguments are an empty object.
pub fn parse_arguments(raw: &str) -> Result<Map<String, Value>, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ToolError::InvalidArguments(format!("not valid JSON: {}", e))),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
