// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Custom-Tool Proxy (C4, spec §4.4): executes synthetic tools by calling
//! third-party HTTP workflow APIs. Validation, credential resolution, and
//! response interpretation all happen here; the service manager only
//! knows this component as "the thing that owns `customMCP`-namespaced
//! tools".

use std::time::Duration;

use jsonschema::Validator;
use serde_json::Value;
use tracing::warn;

use crate::domain::config::{CustomTool, PlatformCredentials};
use crate::domain::errors::GatewayError;

/// Default timeout for the outbound HTTP call (spec §4.4, §5).
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(30);

/// Validate `args` against `tool.input_schema` (draft 2020-12 subset: type,
/// properties, required, enum, additionalProperties — spec §4.4 step 1).
/// On failure returns `InvalidArguments` carrying one human-readable
/// violation per schema error.
pub fn validate_arguments(tool: &CustomTool, args: &Value) -> Result<(), GatewayError> {
    let validator = Validator::new(&tool.input_schema)
        .map_err(|e| GatewayError::ConfigurationError(format!("invalid inputSchema for `{}`: {e}", tool.name)))?;

    let violations: Vec<String> = validator
        .iter_errors(args)
        .map(|e| format!("{}: {}", e.instance_path, e))
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::InvalidArguments(violations.join("; ")))
    }
}

/// Render a JSON body template, substituting every `{{var}}` placeholder
/// with the corresponding value from `args` (spec §4.4 step 3). A
/// placeholder with no matching argument renders as an empty string.
pub fn render_body_template(template: &Value, args: &Value) -> Value {
    match template {
        Value::String(s) => Value::String(substitute_placeholders(s, args)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_body_template(v, args)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_body_template(v, args)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_placeholders(template: &str, args: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var_name = after[..end].trim();
        let replacement = args
            .get(var_name)
            .map(value_to_template_string)
            .unwrap_or_default();
        out.push_str(&replacement);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn value_to_template_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Pull the platform-specific result field out of a 2xx response body
/// (spec §4.4 step 4), e.g. `result_field = "data.result"` walks
/// `body["data"]["result"]`.
pub fn extract_result_field(body: &Value, result_field: &str) -> Result<Value, GatewayError> {
    let mut current = body;
    for segment in result_field.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => {
                return Err(GatewayError::ExternalApiError {
                    status: 200,
                    body_excerpt: format!(
                        "response missing expected field `{result_field}` (stopped at `{segment}`)"
                    ),
                });
            }
        }
    }
    Ok(current.clone())
}

/// Executes custom tools via HTTP (spec §4.4). Stateless aside from the
/// shared `reqwest::Client` connection pool.
#[derive(Clone)]
pub struct CustomToolProxy {
    client: reqwest::Client,
}

impl CustomToolProxy {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Run the full four-step contract from spec §4.4. `credentials` is
    /// resolved by the caller (the service manager, via the config store's
    /// `getPlatformCredentials`) so this component never reaches into
    /// config state directly.
    pub async fn invoke(
        &self,
        tool: &CustomTool,
        args: Value,
        credentials: Option<PlatformCredentials>,
    ) -> Result<Value, GatewayError> {
        validate_arguments(tool, &args)?;

        let creds = credentials.ok_or_else(|| {
            GatewayError::ConfigurationError(format!(
                "no credentials configured for platform `{}`",
                tool.handler.platform
            ))
        })?;
        let token = creds.0.get("token").ok_or_else(|| {
            GatewayError::ConfigurationError(format!(
                "platform `{}` credentials missing `token`",
                tool.handler.platform
            ))
        })?;

        let body = render_body_template(&tool.handler.config.body_template, &args);

        let mut request = self
            .client
            .post(&tool.handler.config.url)
            .bearer_auth(token)
            .json(&body)
            .timeout(DEFAULT_PROXY_TIMEOUT);

        for (key, value) in &tool.handler.config.headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::CallTimeout(DEFAULT_PROXY_TIMEOUT)
            } else {
                GatewayError::internal(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            warn!(platform = %tool.handler.platform, %status, "custom tool external API call failed");
            return Err(GatewayError::ExternalApiError {
                status: status.as_u16(),
                body_excerpt: body_text.chars().take(500).collect(),
            });
        }

        let body: Value = response.json().await.map_err(GatewayError::internal)?;
        extract_result_field(&body, &tool.handler.config.result_field)
    }
}

impl Default for CustomToolProxy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{CustomToolHandler, CustomToolHandlerConfig};
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_tool() -> CustomTool {
        sample_tool_with_url("https://api.coze.com/v1/workflow/run")
    }

    fn sample_tool_with_url(url: &str) -> CustomTool {
        CustomTool {
            name: "search_web".to_string(),
            description: "Search the web".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"],
                "additionalProperties": false
            }),
            handler: CustomToolHandler {
                platform: "coze".to_string(),
                config: CustomToolHandlerConfig {
                    url: url.to_string(),
                    result_field: "data.result".to_string(),
                    body_template: json!({ "query": "{{query}}" }),
                    headers: HashMap::new(),
                },
            },
        }
    }

    #[test]
    fn validation_rejects_wrong_type() {
        let tool = sample_tool();
        let err = validate_arguments(&tool, &json!({ "query": 42 })).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArguments(_)));
    }

    #[test]
    fn validation_accepts_matching_schema() {
        let tool = sample_tool();
        assert!(validate_arguments(&tool, &json!({ "query": "rust" })).is_ok());
    }

    #[test]
    fn validation_rejects_missing_required_field() {
        let tool = sample_tool();
        assert!(validate_arguments(&tool, &json!({})).is_err());
    }

    #[test]
    fn body_template_substitutes_nested_placeholders() {
        let template = json!({ "q": "{{query}}", "nested": { "x": "{{query}}-suffix" } });
        let rendered = render_body_template(&template, &json!({ "query": "rust" }));
        assert_eq!(rendered["q"], "rust");
        assert_eq!(rendered["nested"]["x"], "rust-suffix");
    }

    #[test]
    fn result_field_walks_dotted_path() {
        let body = json!({ "data": { "result": "ok" } });
        assert_eq!(extract_result_field(&body, "data.result").unwrap(), json!("ok"));
    }

    #[test]
    fn result_field_missing_is_external_api_error() {
        let body = json!({ "data": {} });
        assert!(extract_result_field(&body, "data.result").is_err());
    }

    #[tokio::test]
    async fn invoke_fails_without_credentials_and_makes_no_request() {
        let proxy = CustomToolProxy::new();
        let tool = sample_tool();
        let err = proxy.invoke(&tool, json!({ "query": "rust" }), None).await.unwrap_err();
        assert!(matches!(err, GatewayError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn invoke_rejects_invalid_arguments_before_any_http_call() {
        let proxy = CustomToolProxy::new();
        let tool = sample_tool();
        let mut creds = HashMap::new();
        creds.insert("token".to_string(), "secret".to_string());
        let err = proxy
            .invoke(&tool, json!({ "query": 42 }), Some(PlatformCredentials(creds)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn invoke_maps_non_2xx_to_external_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/workflow/run"))
            .and(bearer_token("secret"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let proxy = CustomToolProxy::new();
        let tool = sample_tool_with_url(&format!("{}/v1/workflow/run", server.uri()));
        let mut creds = HashMap::new();
        creds.insert("token".to_string(), "secret".to_string());

        let err = proxy
            .invoke(&tool, json!({ "query": "rust" }), Some(PlatformCredentials(creds)))
            .await
            .unwrap_err();
        match err {
            GatewayError::ExternalApiError { status, body_excerpt } => {
                assert_eq!(status, 500);
                assert!(body_excerpt.contains("boom"));
            }
            other => panic!("expected ExternalApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invoke_extracts_result_field_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/workflow/run"))
            .and(bearer_token("secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "result": "42 results found" }
            })))
            .mount(&server)
            .await;

        let proxy = CustomToolProxy::new();
        let tool = sample_tool_with_url(&format!("{}/v1/workflow/run", server.uri()));
        let mut creds = HashMap::new();
        creds.insert("token".to_string(), "secret".to_string());

        let result = proxy
            .invoke(&tool, json!({ "query": "rust" }), Some(PlatformCredentials(creds)))
            .await
            .unwrap();
        assert_eq!(result, json!("42 results found"));
    }
}
