//! Network calls as an effect.
//!
//! Actions describe a request as data ([`HttpRequest`]) and get the
//! response back as data ([`HttpResponse`]); the [`HttpEffect`] that runs
//! it lives on the worker side.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use statebus_core::Value;
use tracing::debug;
use url::Url;

use crate::effect::{Effect, EffectScope, EffectSpec};
use crate::error::{Result, StateError};

/// Effect kind of [`HttpEffect`].
pub const HTTP_EFFECT_KIND: &str = "http";

const HTTP_EFFECT_SIGNATURE: &str = "(HttpRequest) -> HttpResponse";

/// HTTP method for requests
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
}

impl From<Method> for http::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => http::Method::GET,
            Method::Post => http::Method::POST,
            Method::Put => http::Method::PUT,
            Method::Delete => http::Method::DELETE,
            Method::Patch => http::Method::PATCH,
            Method::Head => http::Method::HEAD,
        }
    }
}

/// A request an action asks [`HttpEffect`] to perform.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HttpRequest {
    #[serde(default)]
    pub method: Method,

    /// Joined onto the effect's base URL when it has one; otherwise a full
    /// URL.
    #[serde(default)]
    pub path: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Sent as a JSON body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }
}

/// What [`HttpEffect`] hands back to the action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpResponse {
    pub status: u16,

    pub headers: HashMap<String, String>,

    /// Parsed JSON body, or null when the body is empty or not JSON.
    pub body: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,
}

impl HttpResponse {
    /// Check if the response status indicates success (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// Effect performing HTTP requests with reqwest.
#[derive(Debug, Clone)]
pub struct HttpEffect {
    client: Client,
    base_url: Option<Url>,
}

impl HttpEffect {
    /// An effect for absolute URLs.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| http_error(e.to_string()))?;
        Ok(Self {
            client,
            base_url: None,
        })
    }

    /// An effect resolving request paths against `base_url`.
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| StateError::InvalidArgument(format!("invalid base URL: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url: Some(base_url),
            ..Self::new(timeout)?
        })
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        let resolved = match &self.base_url {
            Some(base) => base.join(path.trim_start_matches('/')),
            None => Url::parse(path),
        };
        resolved.map_err(|e| StateError::InvalidArgument(format!("invalid URL '{path}': {e}")))
    }

    /// Perform `request`.
    pub async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let url = self.resolve(&request.path)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| StateError::InvalidArgument(e.to_string()))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| StateError::InvalidArgument(e.to_string()))?;
            headers.insert(name, value);
        }

        let mut builder = self
            .client
            .request(request.method.into(), url.clone())
            .headers(headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = ?request.method, %url, "performing http effect");
        let response = builder.send().await.map_err(|e| http_error(e.to_string()))?;

        let status = response.status().as_u16();
        let mut response_headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                response_headers.insert(name.to_string(), v.to_string());
            }
        }

        let body_text = response.text().await.map_err(|e| http_error(e.to_string()))?;
        let body = serde_json::from_str(&body_text).unwrap_or(Value::Null);

        Ok(HttpResponse {
            status,
            headers: response_headers,
            body,
            body_text: Some(body_text),
        })
    }
}

fn http_error(message: String) -> StateError {
    StateError::Effect {
        locate: HTTP_EFFECT_KIND.to_string(),
        message,
    }
}

#[async_trait]
impl Effect for HttpEffect {
    fn spec(&self) -> EffectSpec {
        EffectSpec::new(HTTP_EFFECT_KIND, HTTP_EFFECT_SIGNATURE)
    }

    async fn invoke(&self, _scope: &EffectScope, args: Value) -> Result<Value> {
        let request: HttpRequest = serde_json::from_value(args)?;
        let response = self.execute(&request).await?;
        Ok(serde_json::to_value(response)?)
    }
}

/// The spec to implant an [`HttpEffect`] with.
pub fn http_effect_spec() -> EffectSpec {
    EffectSpec::new(HTTP_EFFECT_KIND, HTTP_EFFECT_SIGNATURE)
}
