//! Agent profiles.
//!
//! An agent profile is a named persona configured under `[agents.<name>]`:
//! a system prompt, model settings, which built-in tools are switched on,
//! and any number of operator-declared HTTP tools.
//!
//! ```toml
//! [agents.support]
//! system_prompt = "You are the Acme support assistant."
//! handover_enabled = true
//! knowledge_base_enabled = true
//!
//! [[agents.support.tools]]
//! name = "order_status"
//! description = "Look up the status of an order"
//! method = "GET"
//! url = "https://shop.example.com/api/orders"
//!
//! [[agents.support.tools.params]]
//! name = "order_id"
//! description = "Order number given by the customer"
//! location = "query"
//! required = true
//! value_type = "by_model"
//!
//! [[agents.support.tools.params]]
//! name = "conversation"
//! location = "header"
//! value_type = "variable"
//! variable = "conversation_id"
//! ```

use anyhow::{bail, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::Config;

#[derive(Debug, Deserialize, Clone)]
pub struct AgentProfile {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Overrides `[llm].model`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_bot_id")]
    pub bot_id: String,
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    #[serde(default)]
    pub handover_enabled: bool,
    #[serde(default)]
    pub knowledge_base_enabled: bool,
    #[serde(default)]
    pub set_user_info_enabled: bool,
    #[serde(default)]
    pub set_priority_enabled: bool,
    #[serde(default)]
    pub set_tag_enabled: bool,
    #[serde(default)]
    pub handover_department_id: Option<String>,
    /// Replaces the translated handover notice.
    #[serde(default)]
    pub handover_message: Option<String>,
    /// Overrides `[retrieval].limit` for `search_knowledge_base`.
    #[serde(default)]
    pub search_limit: Option<usize>,
    #[serde(default)]
    pub tools: Vec<HttpToolConfig>,
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            model: None,
            temperature: None,
            max_tokens: None,
            max_iterations: default_max_iterations(),
            history_limit: default_history_limit(),
            bot_id: default_bot_id(),
            bot_name: default_bot_name(),
            handover_enabled: false,
            knowledge_base_enabled: false,
            set_user_info_enabled: false,
            set_priority_enabled: false,
            set_tag_enabled: false,
            handover_department_id: None,
            handover_message: None,
            search_limit: None,
            tools: Vec::new(),
        }
    }
}

fn default_system_prompt() -> String {
    "You are a helpful customer support assistant.".to_string()
}
fn default_max_iterations() -> usize {
    5
}
fn default_history_limit() -> usize {
    20
}
fn default_bot_id() -> String {
    "bot".to_string()
}
fn default_bot_name() -> String {
    "Assistant".to_string()
}

/// An operator-declared HTTP endpoint exposed to the model as a tool.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HttpToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub body_type: BodyType,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Appended to the response body before it is handed to the model.
    #[serde(default)]
    pub response_instructions: Option<String>,
    #[serde(default)]
    pub params: Vec<HttpToolParam>,
}

impl HttpToolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            bail!(
                "tool name '{}' must be non-empty and use only letters, digits, '_' or '-'",
                self.name
            );
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            bail!("tool '{}' url must start with http:// or https://", self.name);
        }
        let mut seen = BTreeSet::new();
        for p in &self.params {
            if p.name.trim().is_empty() {
                bail!("tool '{}' has a param without a name", self.name);
            }
            // Header names are case-insensitive, so all names are compared that way
            if !seen.insert(p.name.to_ascii_lowercase()) {
                bail!("tool '{}' declares param '{}' more than once", self.name, p.name);
            }
            match p.value_type {
                ValueType::Constant if p.value.is_none() => {
                    bail!("tool '{}' param '{}' is constant but has no value", self.name, p.name)
                }
                ValueType::Variable if p.variable.is_none() => bail!(
                    "tool '{}' param '{}' is variable but names no variable",
                    self.name,
                    p.name
                ),
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn sends_body(&self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Delete)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    #[default]
    Json,
    Form,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    ApiKey {
        #[serde(default = "default_api_key_header")]
        header: String,
        key: String,
    },
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HttpToolParam {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: ParamLocation,
    #[serde(default, rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    pub value_type: ValueType,
    /// Fixed value for `constant` params.
    #[serde(default)]
    pub value: Option<Value>,
    /// Source for `variable` params.
    #[serde(default)]
    pub variable: Option<ContextVariable>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    #[default]
    Query,
    Body,
    Header,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Number,
    Integer,
    Boolean,
}

impl ParamType {
    pub fn json_type(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Constant,
    Variable,
    ByModel,
}

/// Conversation facts a `variable` param can be bound to.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContextVariable {
    ConversationId,
    ClientId,
    ClientName,
    DepartmentId,
    ChannelId,
}

/// Agent profiles by name.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentProfile>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every `[agents.<name>]` profile.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for (name, profile) in &config.agents {
            registry.register(name.clone(), profile.clone());
        }
        registry
    }

    pub fn register(&mut self, name: String, profile: AgentProfile) {
        self.agents.insert(name, profile);
    }

    pub fn find(&self, name: &str) -> Option<&AgentProfile> {
        self.agents.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }
}
