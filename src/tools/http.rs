//! Operator-declared HTTP tools.
//!
//! Only `by_model` parameters appear in the advertised schema and only
//! they are read from the model's arguments. `constant` and `variable`
//! parameters are filled here and cannot be overridden by the model.

use anyhow::{Context, Result};
use base64::Engine;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::time::Duration;

use super::AgentContext;
use crate::agents::{
    AuthConfig, BodyType, ContextVariable, HttpMethod, HttpToolConfig, HttpToolParam,
    ParamLocation, ParamType, ValueType,
};
use crate::error::ToolError;

/// JSON Schema for the model-filled parameters of `tool`.
pub fn parameters_schema(tool: &HttpToolConfig) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for p in tool.params.iter().filter(|p| p.value_type == ValueType::ByModel) {
        let mut prop = json!({ "type": p.param_type.json_type() });
        if !p.description.is_empty() {
            prop["description"] = Value::String(p.description.clone());
        }
        properties.insert(p.name.clone(), prop);
        if p.required {
            required.push(Value::String(p.name.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Parameter values split by where they go in the request.
#[derive(Debug, Default, PartialEq)]
pub struct ResolvedParams {
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Map<String, Value>,
}

/// Resolve every parameter of `tool` against the conversation and the
/// model's arguments. A `by_model` parameter never replaces a `constant` or
/// `variable` one of the same name.
pub fn resolve_params(
    tool: &HttpToolConfig,
    ctx: &AgentContext,
    args: &Map<String, Value>,
) -> Result<ResolvedParams, ToolError> {
    let fixed: HashSet<String> = tool
        .params
        .iter()
        .filter(|p| p.value_type != ValueType::ByModel)
        .map(|p| p.name.to_ascii_lowercase())
        .collect();

    let mut resolved = ResolvedParams::default();
    // fixed params first, then whatever the model may fill
    let ordered = tool
        .params
        .iter()
        .filter(|p| p.value_type != ValueType::ByModel)
        .chain(tool.params.iter().filter(|p| {
            p.value_type == ValueType::ByModel && !fixed.contains(&p.name.to_ascii_lowercase())
        }));
    for p in ordered {
        let Some(value) = param_value(p, ctx, args)? else {
            continue;
        };
        match p.location {
            ParamLocation::Query => resolved.query.push((p.name.clone(), scalar_text(&value))),
            ParamLocation::Header => resolved.headers.push((p.name.clone(), scalar_text(&value))),
            ParamLocation::Body => {
                resolved.body.entry(p.name.clone()).or_insert(value);
            }
        }
    }
    Ok(resolved)
}

fn param_value(
    p: &HttpToolParam,
    ctx: &AgentContext,
    args: &Map<String, Value>,
) -> Result<Option<Value>, ToolError> {
    match p.value_type {
        ValueType::Constant => Ok(p.value.clone()),
        ValueType::Variable => Ok(p.variable.and_then(|v| variable_value(v, ctx)).map(Value::String)),
        ValueType::ByModel => match args.get(&p.name).filter(|v| !v.is_null()) {
            Some(v) => coerce(v, p.param_type)
                .map(Some)
                .ok_or_else(|| {
                    ToolError::InvalidArguments(format!(
                        "'{}' must be a {}",
                        p.name,
                        p.param_type.json_type()
                    ))
                }),
            None if p.required => Err(ToolError::InvalidArguments(format!(
                "'{}' is required",
                p.name
            ))),
            None => Ok(None),
        },
    }
}

fn variable_value(var: ContextVariable, ctx: &AgentContext) -> Option<String> {
    match var {
        ContextVariable::ConversationId => Some(ctx.conversation.id.clone()),
        ContextVariable::ClientId => Some(ctx.client.id.clone()),
        ContextVariable::ClientName => Some(ctx.client.name.clone()),
        ContextVariable::DepartmentId => ctx.conversation.department_id.clone(),
        ContextVariable::ChannelId => Some(ctx.conversation.channel_id.clone()),
    }
}

/// Bring a model-supplied value to the declared type. Models often send
/// numbers and booleans as strings.
fn coerce(v: &Value, ty: ParamType) -> Option<Value> {
    match ty {
        ParamType::String => Some(match v {
            Value::String(_) => v.clone(),
            other => Value::String(other.to_string()),
        }),
        ParamType::Number => match v {
            Value::Number(_) => Some(v.clone()),
            Value::String(s) => s.trim().parse::<f64>().ok().map(|n| json!(n)),
            _ => None,
        },
        ParamType::Integer => match v {
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(v.clone()),
            Value::String(s) => s.trim().parse::<i64>().ok().map(|n| json!(n)),
            _ => None,
        },
        ParamType::Boolean => match v {
            Value::Bool(_) => Some(v.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
    }
}

fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Executes HTTP tools with a shared client and a fixed timeout.
#[derive(Clone)]
pub struct HttpToolRunner {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpToolRunner {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP tool client")?;
        Ok(Self { client, timeout })
    }

    /// Call the endpoint and return its body, suffixed with the tool's
    /// response instructions when set.
    pub async fn call(
        &self,
        tool: &HttpToolConfig,
        ctx: &AgentContext,
        args: &Map<String, Value>,
    ) -> Result<String, ToolError> {
        let mut params = resolve_params(tool, ctx, args)?;

        // body params on GET/DELETE travel in the query string
        if !tool.method.sends_body() {
            for (k, v) in std::mem::take(&mut params.body) {
                params.query.push((k, scalar_text(&v)));
            }
        }

        let method = match tool.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let mut request = self.client.request(method, &tool.url);
        if !params.query.is_empty() {
            request = request.query(&params.query);
        }
        for (name, value) in &params.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request = match &tool.auth {
            AuthConfig::None => request,
            AuthConfig::Bearer { token } => request.bearer_auth(token),
            AuthConfig::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                request.header("Authorization", format!("Basic {}", encoded))
            }
            AuthConfig::ApiKey { header, key } => request.header(header.as_str(), key.as_str()),
        };
        if tool.method.sends_body() && !params.body.is_empty() {
            request = match tool.body_type {
                BodyType::Json => request.json(&params.body),
                BodyType::Form => {
                    let form: Vec<(String, String)> = params
                        .body
                        .iter()
                        .map(|(k, v)| (k.clone(), scalar_text(v)))
                        .collect();
                    request.form(&form)
                }
            };
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::Transport(format!("timed out after {}s", self.timeout.as_secs()))
            } else {
                ToolError::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(ToolError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(match &tool.response_instructions {
            Some(instructions) if !instructions.trim().is_empty() => {
                format!("{}\n\n{}", body, instructions.trim())
            }
            _ => body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentProfile;
    use crate::support::{Assignee, Client, Conversation, SupportStore};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NoStore;

    #[async_trait]
    impl SupportStore for NoStore {
        async fn conversation(&self, _: &str) -> Result<Option<Conversation>> {
            Ok(None)
        }
        async fn client(&self, _: &str) -> Result<Option<Client>> {
            Ok(None)
        }
        async fn recent_messages(
            &self,
            _: &str,
            _: usize,
        ) -> Result<Vec<crate::support::StoredMessage>> {
            Ok(Vec::new())
        }
        async fn post_message(
            &self,
            _: &str,
            _: crate::support::Sender,
            _: Option<&str>,
            _: &str,
        ) -> Result<crate::support::StoredMessage> {
            anyhow::bail!("read-only")
        }
        async fn assign_to_human(&self, _: &str, _: Option<&str>) -> Result<()> {
            Ok(())
        }
        async fn merge_client_data(&self, _: &str, _: &Map<String, Value>) -> Result<()> {
            Ok(())
        }
        async fn merge_custom_fields(&self, _: &str, _: &Map<String, Value>) -> Result<()> {
            Ok(())
        }
        async fn save_user_info(&self, _: &str, _: &str, _: &Map<String, Value>) -> Result<()> {
            Ok(())
        }
        async fn set_priority(&self, _: &str, _: crate::support::Priority) -> Result<()> {
            Ok(())
        }
        async fn tag_conversation(&self, _: &str, _: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn context() -> AgentContext {
        AgentContext::new(
            Conversation {
                id: "conv-1".into(),
                client_id: "client-1".into(),
                channel_id: "web".into(),
                department_id: None,
                assignee: Assignee::Bot,
                priority: None,
                custom_fields: Map::new(),
            },
            Client {
                id: "client-1".into(),
                name: "Ada".into(),
                email: None,
                phone: None,
                language: "en".into(),
                data: Map::new(),
            },
            AgentProfile::default(),
            Arc::new(NoStore),
        )
    }

    fn param(name: &str, location: ParamLocation, value_type: ValueType) -> HttpToolParam {
        HttpToolParam {
            name: name.into(),
            description: String::new(),
            location,
            param_type: ParamType::String,
            required: false,
            value_type,
            value: None,
            variable: None,
        }
    }

    fn tool(params: Vec<HttpToolParam>) -> HttpToolConfig {
        HttpToolConfig {
            name: "lookup".into(),
            description: String::new(),
            method: HttpMethod::Post,
            url: "http://127.0.0.1:1/lookup".into(),
            body_type: BodyType::Json,
            auth: AuthConfig::None,
            response_instructions: None,
            params,
        }
    }

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_schema_exposes_only_model_params() {
        let mut order = param("order_id", ParamLocation::Query, ValueType::ByModel);
        order.required = true;
        let mut qty = param("qty", ParamLocation::Body, ValueType::ByModel);
        qty.param_type = ParamType::Integer;
        let mut secret = param("shop", ParamLocation::Query, ValueType::Constant);
        secret.value = Some(json!("acme"));
        let mut conv = param("conv", ParamLocation::Header, ValueType::Variable);
        conv.variable = Some(ContextVariable::ConversationId);

        let schema = parameters_schema(&tool(vec![order, qty, secret, conv]));
        let props = schema["properties"].as_object().unwrap();
        assert_eq!(props.len(), 2);
        assert_eq!(props["qty"]["type"], "integer");
        assert_eq!(schema["required"], json!(["order_id"]));
    }

    #[test]
    fn test_model_cannot_override_constants_or_variables() {
        let mut shop = param("shop", ParamLocation::Query, ValueType::Constant);
        shop.value = Some(json!("acme"));
        let mut conv = param("conversation", ParamLocation::Body, ValueType::Variable);
        conv.variable = Some(ContextVariable::ConversationId);
        let t = tool(vec![shop, conv]);

        let resolved = resolve_params(
            &t,
            &context(),
            &args(json!({"shop": "evil", "conversation": "someone-else"})),
        )
        .unwrap();
        assert_eq!(resolved.query, vec![("shop".to_string(), "acme".to_string())]);
        assert_eq!(resolved.body["conversation"], "conv-1");
    }

    #[test]
    fn test_model_param_cannot_shadow_fixed_param() {
        let mut conv = param("conversation_id", ParamLocation::Body, ValueType::Variable);
        conv.variable = Some(ContextVariable::ConversationId);
        let shadow = param("conversation_id", ParamLocation::Body, ValueType::ByModel);
        let mut shop = param("shop", ParamLocation::Query, ValueType::Constant);
        shop.value = Some(json!("acme"));
        let shop_shadow = param("Shop", ParamLocation::Query, ValueType::ByModel);
        let t = tool(vec![shadow, conv, shop_shadow, shop]);

        let resolved = resolve_params(
            &t,
            &context(),
            &args(json!({"conversation_id": "someone-else", "Shop": "evil"})),
        )
        .unwrap();
        assert_eq!(resolved.body["conversation_id"], "conv-1");
        assert_eq!(resolved.query, vec![("shop".to_string(), "acme".to_string())]);
    }

    #[test]
    fn test_variables_resolve_from_context() {
        let mut name = param("name", ParamLocation::Header, ValueType::Variable);
        name.variable = Some(ContextVariable::ClientName);
        let mut dept = param("dept", ParamLocation::Query, ValueType::Variable);
        dept.variable = Some(ContextVariable::DepartmentId);

        let resolved = resolve_params(&tool(vec![name, dept]), &context(), &Map::new()).unwrap();
        assert_eq!(resolved.headers, vec![("name".to_string(), "Ada".to_string())]);
        // no department on the conversation, so the param is omitted
        assert!(resolved.query.is_empty());
    }

    #[test]
    fn test_missing_required_model_param() {
        let mut order = param("order_id", ParamLocation::Query, ValueType::ByModel);
        order.required = true;
        let err = resolve_params(&tool(vec![order]), &context(), &Map::new()).unwrap_err();
        assert_eq!(err, ToolError::InvalidArguments("'order_id' is required".into()));
    }

    #[test]
    fn test_model_values_are_coerced() {
        let mut qty = param("qty", ParamLocation::Body, ValueType::ByModel);
        qty.param_type = ParamType::Integer;
        let mut gift = param("gift", ParamLocation::Body, ValueType::ByModel);
        gift.param_type = ParamType::Boolean;
        let t = tool(vec![qty, gift]);

        let resolved =
            resolve_params(&t, &context(), &args(json!({"qty": "3", "gift": "TRUE"}))).unwrap();
        assert_eq!(resolved.body["qty"], 3);
        assert_eq!(resolved.body["gift"], true);

        let err = resolve_params(&t, &context(), &args(json!({"qty": "three"}))).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(msg) if msg.contains("integer")));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let runner = HttpToolRunner::new(Duration::from_secs(2)).unwrap();
        let err = runner
            .call(&tool(Vec::new()), &context(), &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Transport(_)));
    }
}
