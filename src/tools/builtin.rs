//! Built-in tool handlers.

use helpdesk_agent_core::conversation::ToolSpec;
use helpdesk_agent_core::retrieval::Retriever;
use serde_json::{json, Map, Value};

use super::{AgentContext, BuiltinTool, ToolOutcome};
use crate::error::ToolError;
use crate::support::{Priority, Sender};

pub const NO_RESULTS: &str = "No relevant information found in the knowledge base.";

pub fn definition(tool: BuiltinTool) -> ToolSpec {
    let (description, parameters) = match tool {
        BuiltinTool::Handover => (
            "Transfer the conversation to a human support agent. Use when the customer asks for a person or the request cannot be resolved here.",
            json!({
                "type": "object",
                "properties": {
                    "reason": { "type": "string", "description": "Why a human is needed" }
                },
                "required": []
            }),
        ),
        BuiltinTool::SearchKnowledgeBase => (
            "Search the knowledge base for articles relevant to the customer's question.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "What to search for" }
                },
                "required": ["query"]
            }),
        ),
        BuiltinTool::SetUserInfo => (
            "Save details the customer shared about themselves, such as name, email or phone.",
            json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "email": { "type": "string" },
                    "phone": { "type": "string" }
                },
                "additionalProperties": true
            }),
        ),
        BuiltinTool::SetPriority => (
            "Set the priority of the conversation.",
            json!({
                "type": "object",
                "properties": {
                    "priority": {
                        "type": "string",
                        "enum": Priority::ALL.iter().map(|p| p.as_str()).collect::<Vec<_>>()
                    }
                },
                "required": ["priority"]
            }),
        ),
        BuiltinTool::SetTag => (
            "Attach a tag to the conversation.",
            json!({
                "type": "object",
                "properties": {
                    "tag": { "type": "string", "description": "Tag name" }
                },
                "required": ["tag"]
            }),
        ),
    };
    ToolSpec {
        name: tool.name().to_string(),
        description: description.to_string(),
        parameters,
    }
}

/// Handover notice in the client's language, English when unknown.
pub fn handover_notice(language: &str) -> &'static str {
    let primary = language
        .split(['-', '_'])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    match primary.as_str() {
        "es" => "Te estamos transfiriendo a un agente humano. Alguien de nuestro equipo te responderá en breve.",
        "de" => "Sie werden an einen Mitarbeiter weitergeleitet. Jemand aus unserem Team meldet sich in Kürze.",
        "fr" => "Vous êtes transféré vers un conseiller. Un membre de notre équipe vous répondra sous peu.",
        "pt" => "Você está sendo transferido para um atendente humano. Alguém da nossa equipe responderá em breve.",
        "ru" => "Мы передаём ваш запрос сотруднику поддержки. Вам скоро ответят.",
        _ => "You are being transferred to a human agent. Someone from our team will reply shortly.",
    }
}

fn store_err(e: anyhow::Error) -> ToolError {
    ToolError::Store(format!("{:#}", e))
}

fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("'{}' is required", key)))
}

pub async fn handover(
    ctx: &mut AgentContext,
    args: &Map<String, Value>,
) -> Result<ToolOutcome, ToolError> {
    let reason = args.get("reason").and_then(Value::as_str).unwrap_or("");
    let department = ctx.profile.handover_department_id.clone();
    ctx.store()
        .assign_to_human(&ctx.conversation.id, department.as_deref())
        .await
        .map_err(store_err)?;

    let notice = match &ctx.profile.handover_message {
        Some(message) if !message.trim().is_empty() => message.clone(),
        _ => handover_notice(&ctx.client.language).to_string(),
    };
    ctx.store()
        .post_message(&ctx.conversation.id, Sender::Bot, Some(ctx.bot_id()), &notice)
        .await
        .map_err(store_err)?;
    ctx.refresh().await?;

    tracing::info!(
        conversation_id = %ctx.conversation.id,
        department_id = ?department,
        reason,
        "conversation handed over"
    );
    Ok(ToolOutcome::stop(
        "The conversation was transferred to a human agent and the customer was notified.",
    ))
}

pub async fn search_knowledge_base(
    retriever: Option<&Retriever>,
    limit: usize,
    args: &Map<String, Value>,
) -> Result<ToolOutcome, ToolError> {
    let query = required_str(args, "query")?;
    let Some(retriever) = retriever else {
        return Ok(ToolOutcome::text(NO_RESULTS));
    };

    let found = retriever
        .search_with_context(query, limit)
        .await
        .map_err(|e| ToolError::Retrieval(format!("{:#}", e)))?;
    if found.is_empty() {
        return Ok(ToolOutcome::text(NO_RESULTS));
    }
    tracing::debug!(query, results = found.results.len(), sources = found.sources.len(), "knowledge base hit");
    Ok(ToolOutcome::text(found.context))
}

pub async fn set_user_info(
    ctx: &mut AgentContext,
    args: &Map<String, Value>,
) -> Result<ToolOutcome, ToolError> {
    let fields: Map<String, Value> = args
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if fields.is_empty() {
        return Err(ToolError::InvalidArguments(
            "no user information given".to_string(),
        ));
    }

    ctx.store()
        .save_user_info(&ctx.client.id, &ctx.conversation.id, &fields)
        .await
        .map_err(store_err)?;
    ctx.refresh().await?;

    let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
    Ok(ToolOutcome::text(format!(
        "User information saved: {}.",
        keys.join(", ")
    )))
}

pub async fn set_priority(
    ctx: &mut AgentContext,
    args: &Map<String, Value>,
) -> Result<ToolOutcome, ToolError> {
    let raw = required_str(args, "priority")?;
    let Ok(priority) = raw.parse::<Priority>() else {
        let valid: Vec<&str> = Priority::ALL.iter().map(|p| p.as_str()).collect();
        return Ok(ToolOutcome::text(format!(
            "Invalid priority '{}'. Valid values: {}.",
            raw,
            valid.join(", ")
        )));
    };

    ctx.store()
        .set_priority(&ctx.conversation.id, priority)
        .await
        .map_err(store_err)?;
    ctx.refresh().await?;
    Ok(ToolOutcome::text(format!("Priority set to {}.", priority)))
}

pub async fn set_tag(
    ctx: &mut AgentContext,
    args: &Map<String, Value>,
) -> Result<ToolOutcome, ToolError> {
    let tag = required_str(args, "tag")?;
    let added = ctx
        .store()
        .tag_conversation(&ctx.conversation.id, tag)
        .await
        .map_err(store_err)?;
    Ok(ToolOutcome::text(if added {
        format!("Tag '{}' added.", tag)
    } else {
        format!("Conversation already tagged '{}'.", tag)
    }))
}
