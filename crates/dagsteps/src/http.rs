use async_trait::async_trait;
use dagcore::{Context, Input, Step, StepError, StepId, StepSpec, Value};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method.to_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }

    /// Only these methods send the JSON body
    pub fn has_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }

    fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_reqwest().as_str())
    }
}

/// HTTP request step
///
/// Url, headers and body are inputs resolved against the context before the
/// request is sent. The result is `{status, headers, body}` plus `json` when
/// the body parses as JSON. Non-2xx statuses are returned, not raised.
pub struct WebhookStep {
    pub(crate) spec: StepSpec,
    url: Input,
    method: String,
    headers: HashMap<String, Input>,
    body: Option<Input>,
    output_key: Option<String>,
    client: reqwest::Client,
}

impl WebhookStep {
    pub fn new(id: impl Into<StepId>, url: impl Into<Input>) -> Self {
        Self {
            spec: StepSpec::new(id),
            url: url.into(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: None,
            output_key: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Input>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Input>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn output_key(&self) -> &str {
        self.output_key.as_deref().unwrap_or(&self.spec.id)
    }

    fn method(&self) -> Result<HttpMethod, StepError> {
        HttpMethod::parse(&self.method)
            .ok_or_else(|| StepError::Configuration(format!("Unsupported method: {}", self.method)))
    }
}

#[async_trait]
impl Step for WebhookStep {
    fn spec(&self) -> &StepSpec {
        &self.spec
    }

    fn kind(&self) -> &str {
        "webhook"
    }

    async fn execute(&self, ctx: &Context) -> Result<Value, StepError> {
        let method = self.method()?;
        let url = match self.url.resolve(ctx) {
            Value::String(url) => url,
            other => {
                return Err(StepError::InvalidInputType {
                    field: "url".to_string(),
                    expected: "string".to_string(),
                    actual: other.type_name().to_string(),
                })
            }
        };

        tracing::info!(step_id = %self.spec.id, %method, %url, "Sending webhook");

        let mut request = self.client.request(method.as_reqwest(), &url);
        for (name, input) in &self.headers {
            match input.resolve(ctx) {
                Value::Null => {}
                Value::String(value) => request = request.header(name.as_str(), value),
                other => request = request.header(name.as_str(), other.to_string()),
            }
        }
        if method.has_body() {
            if let Some(body) = &self.body {
                request = request.json(&body.resolve(ctx).to_json());
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| StepError::failed(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers: HashMap<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(v.to_str().unwrap_or(""))))
            .collect();

        let body = response
            .text()
            .await
            .map_err(|e| StepError::failed(format!("Failed to read response: {}", e)))?;

        tracing::debug!(step_id = %self.spec.id, status, "Webhook responded");

        let mut result = HashMap::new();
        result.insert("status".to_string(), Value::from(status as i64));
        result.insert("headers".to_string(), Value::Object(headers));
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) {
            result.insert("json".to_string(), Value::from(json));
        }
        result.insert("body".to_string(), Value::String(body));

        let result = Value::Object(result);
        ctx.set(self.output_key(), result.clone());
        Ok(result)
    }

    fn validate_config(&self) -> Result<(), StepError> {
        self.method().map(|_| ())
    }
}
