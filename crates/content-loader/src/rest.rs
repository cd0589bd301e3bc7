use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use reqwest::{Method, Request, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Applied to every exchange unless the caller asks for something shorter.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// How much of a failed response body is echoed in error messages.
const FAILED_BODY_PREVIEW: usize = 100;

/// Errors produced by a single [`RestClient::exchange`].
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("unsupported combination of request content and type")]
    UnsupportedBody,

    #[error("unsupported combination of response slot and type")]
    UnsupportedResponse,

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed response: {0}")]
    FailedResponse(FailedResponse),
}

impl RestError {
    /// The HTTP status of a failed response, if the server answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::FailedResponse(failed) => Some(failed.status_code),
            _ => None,
        }
    }
}

/// The server responded, but with a status code of 300 or above.
#[derive(Debug, Clone)]
pub struct FailedResponse {
    pub status_code: u16,
    pub status: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl std::fmt::Display for FailedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.body.is_empty() {
            return write!(f, "{}", self.status);
        }
        let end = self.body.len().min(FAILED_BODY_PREVIEW);
        write!(
            f,
            "{} body=[{}]",
            self.status,
            String::from_utf8_lossy(&self.body[..end])
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MimeType {
    Json,
    Other(String),
}

impl MimeType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Json => "application/json",
            Self::Other(s) => s,
        }
    }
}

/// Request payload. `Empty` stands in for "no content at all".
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Empty,
    Bytes(Vec<u8>),
    Json(Value),
}

/// A request body tagged with its MIME type.
#[derive(Debug, Clone, PartialEq)]
pub struct RestEntity {
    pub content_type: Option<MimeType>,
    pub content: Content,
}

impl RestEntity {
    pub fn json(value: Value) -> Self {
        Self {
            content_type: Some(MimeType::Json),
            content: Content::Json(value),
        }
    }

    pub fn bytes(content_type: Option<MimeType>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type,
            content: Content::Bytes(bytes.into()),
        }
    }

    /// Raw bytes go out verbatim; JSON is encoded only when tagged as JSON.
    fn encode(&self) -> Result<Vec<u8>, RestError> {
        match (&self.content, &self.content_type) {
            (Content::Bytes(bytes), _) => Ok(bytes.clone()),
            (Content::Json(value), Some(MimeType::Json)) => {
                serde_json::to_vec(value).map_err(|e| RestError::Encoding(e.to_string()))
            }
            _ => Err(RestError::UnsupportedBody),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseForm {
    Json,
    Text,
    Bytes,
}

/// Where and how a successful response body should be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSlot {
    pub content_type: Option<MimeType>,
    pub form: ResponseForm,
}

impl ResponseSlot {
    pub fn json() -> Self {
        Self {
            content_type: Some(MimeType::Json),
            form: ResponseForm::Json,
        }
    }

    pub fn text() -> Self {
        Self {
            content_type: None,
            form: ResponseForm::Text,
        }
    }

    pub fn bytes() -> Self {
        Self {
            content_type: None,
            form: ResponseForm::Bytes,
        }
    }

    fn validate(&self) -> Result<(), RestError> {
        match (self.form, &self.content_type) {
            (ResponseForm::Json, Some(MimeType::Json)) => Ok(()),
            (ResponseForm::Json, _) => Err(RestError::UnsupportedResponse),
            (ResponseForm::Text | ResponseForm::Bytes, _) => Ok(()),
        }
    }

    fn decode(&self, body: Vec<u8>) -> Result<ResponseContent, RestError> {
        match self.form {
            ResponseForm::Json => serde_json::from_slice(&body)
                .map(ResponseContent::Json)
                .map_err(|e| RestError::Encoding(format!("failed to decode response: {e}"))),
            ResponseForm::Text => String::from_utf8(body)
                .map(ResponseContent::Text)
                .map_err(|e| RestError::Encoding(format!("response is not UTF-8: {e}"))),
            ResponseForm::Bytes => Ok(ResponseContent::Bytes(body)),
        }
    }
}

/// A decoded response body, shaped by the [`ResponseSlot`] that asked for it.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseContent {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl ResponseContent {
    /// Deserialize a JSON response into a concrete type.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, RestError> {
        match self {
            Self::Json(value) => serde_json::from_value(value)
                .map_err(|e| RestError::Encoding(format!("failed to decode response: {e}"))),
            Self::Text(text) => serde_json::from_str(&text)
                .map_err(|e| RestError::Encoding(format!("failed to decode response: {e}"))),
            Self::Bytes(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| RestError::Encoding(format!("failed to decode response: {e}"))),
        }
    }
}

/// One request to be issued by [`RestClient::exchange`].
#[derive(Debug, Clone)]
pub struct Exchange {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<RestEntity>,
    response: Option<ResponseSlot>,
    timeout: Option<Duration>,
}

impl Exchange {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            response: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, entity: RestEntity) -> Self {
        self.body = Some(entity);
        self
    }

    pub fn response(mut self, slot: ResponseSlot) -> Self {
        self.response = Some(slot);
        self
    }

    /// Only takes effect when shorter than the client's own timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Middleware around the network send.
///
/// An implementation either calls `next.run(request)` (after rewriting the
/// request, if it wants to) or short-circuits by returning its own result.
#[async_trait::async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, request: Request, next: Next<'_>) -> Result<Response, RestError>;
}

/// The remainder of the interceptor chain, ending in the actual send.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    client: &'a reqwest::Client,
    interceptors: &'a [Arc<dyn Interceptor>],
}

impl<'a> Next<'a> {
    fn new(client: &'a reqwest::Client, interceptors: &'a [Arc<dyn Interceptor>]) -> Self {
        Self {
            client,
            interceptors,
        }
    }

    pub fn run(mut self, request: Request) -> BoxFuture<'a, Result<Response, RestError>> {
        match self.interceptors.split_first() {
            Some((current, rest)) => {
                self.interceptors = rest;
                current.intercept(request, self)
            }
            None => {
                let client = self.client;
                Box::pin(async move { client.execute(request).await.map_err(RestError::Transport) })
            }
        }
    }
}

/// HTTP client with base-URL resolution, timeouts, JSON encoding and
/// decoding, non-2xx handling, and an interceptor chain.
#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: Option<Url>,
    timeout: Duration,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Default for RestClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RestClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            interceptors: Vec::new(),
        }
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, RestError> {
        let mut client = Self::new();
        client.set_base_url(base_url)?;
        Ok(client)
    }

    pub fn set_base_url(&mut self, base_url: &str) -> Result<(), RestError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| RestError::InvalidUrl(format!("failed to parse base url {base_url}: {e}")))?;
        self.base_url = Some(parsed);
        Ok(())
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Interceptors run in the order they were added.
    pub fn add_interceptor(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Issue one request and deliver its body according to the response slot.
    ///
    /// Returns `Ok(None)` when no response slot was given. A status of 300 or
    /// above is always a [`RestError::FailedResponse`] and the body is never
    /// interpreted as data.
    pub async fn exchange(&self, exchange: Exchange) -> Result<Option<ResponseContent>, RestError> {
        let url = self.build_url(&exchange.path, &exchange.query)?;

        if let Some(slot) = &exchange.response {
            slot.validate()?;
        }

        let mut request = Request::new(exchange.method, url);
        *request.timeout_mut() = Some(self.effective_timeout(exchange.timeout));

        if let Some(entity) = &exchange.body {
            *request.body_mut() = Some(entity.encode()?.into());
            if let Some(content_type) = &entity.content_type {
                request
                    .headers_mut()
                    .insert(CONTENT_TYPE, header_value(content_type.as_str())?);
            }
        }
        if let Some(content_type) = exchange.response.as_ref().and_then(|s| s.content_type.as_ref()) {
            request
                .headers_mut()
                .insert(ACCEPT, header_value(content_type.as_str())?);
        }

        tracing::debug!(method = %request.method(), url = %request.url(), "sending request");

        let response = Next::new(&self.client, &self.interceptors)
            .run(request)
            .await?;

        if response.status().as_u16() >= 300 {
            return Err(failed_response(response).await);
        }

        match exchange.response {
            Some(slot) => {
                let body = response.bytes().await?;
                slot.decode(body.to_vec()).map(Some)
            }
            None => Ok(None),
        }
    }

    /// GET a resource and decode its JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RestError> {
        let mut exchange = Exchange::get(path).response(ResponseSlot::json());
        for (key, value) in query {
            exchange = exchange.query(*key, value.clone());
        }
        match self.exchange(exchange).await? {
            Some(content) => content.into_json(),
            None => Err(RestError::UnsupportedResponse),
        }
    }

    /// POST a JSON document, ignoring whatever the server sends back.
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<(), RestError> {
        self.exchange(Exchange::post(path).body(RestEntity::json(body.clone())))
            .await
            .map(|_| ())
    }

    fn build_url(&self, path: &str, query: &[(String, String)]) -> Result<Url, RestError> {
        let mut url = match &self.base_url {
            Some(base) => base.join(path).map_err(|e| {
                RestError::InvalidUrl(format!("failed to parse {path} relative to {base}: {e}"))
            })?,
            None => Url::parse(path)
                .map_err(|e| RestError::InvalidUrl(format!("failed to parse {path}: {e}")))?,
        };
        if !query.is_empty() {
            url.query_pairs_mut().clear().extend_pairs(query);
        }
        Ok(url)
    }

    fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested.map_or(self.timeout, |t| t.min(self.timeout))
    }
}

fn header_value(value: &str) -> Result<HeaderValue, RestError> {
    HeaderValue::from_str(value)
        .map_err(|e| RestError::Encoding(format!("invalid header value {value:?}: {e}")))
}

/// Drain the body of a non-2xx response into an error. Consumes the response.
async fn failed_response(response: Response) -> RestError {
    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = response.bytes().await.map(|b| b.to_vec()).unwrap_or_default();

    RestError::FailedResponse(FailedResponse {
        status_code: status.as_u16(),
        status: status.to_string(),
        content_type,
        body,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn raw_bytes_are_sent_verbatim_regardless_of_type() {
        let entity = RestEntity::bytes(None, b"not json".to_vec());
        assert_eq!(entity.encode().unwrap(), b"not json");
    }

    #[test]
    fn json_content_requires_json_tag() {
        let entity = RestEntity {
            content_type: Some(MimeType::Other("text/plain".into())),
            content: Content::Json(json!({"a": 1})),
        };
        assert!(matches!(entity.encode(), Err(RestError::UnsupportedBody)));
    }

    #[test]
    fn empty_content_is_unsupported() {
        let entity = RestEntity {
            content_type: Some(MimeType::Json),
            content: Content::Empty,
        };
        assert!(matches!(entity.encode(), Err(RestError::UnsupportedBody)));
    }

    #[test]
    fn json_slot_without_json_tag_is_unsupported() {
        let slot = ResponseSlot {
            content_type: None,
            form: ResponseForm::Json,
        };
        assert!(matches!(slot.validate(), Err(RestError::UnsupportedResponse)));
        assert!(ResponseSlot::text().validate().is_ok());
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        let client = RestClient::with_base_url("http://admin.example.com/").unwrap();
        let url = client
            .build_url("/api/agent-releases", &[("page".into(), "3".into())])
            .unwrap();
        assert_eq!(url.as_str(), "http://admin.example.com/api/agent-releases?page=3");
    }

    #[test]
    fn absolute_paths_pass_through() {
        let client = RestClient::with_base_url("http://admin.example.com/").unwrap();
        let url = client.build_url("https://other.example.com/x", &[]).unwrap();
        assert_eq!(url.as_str(), "https://other.example.com/x");
    }

    #[test]
    fn relative_path_without_base_is_invalid() {
        let client = RestClient::new();
        assert!(matches!(
            client.build_url("/api/x", &[]),
            Err(RestError::InvalidUrl(_))
        ));
    }

    #[test]
    fn caller_timeout_only_shortens() {
        let client = RestClient::new().with_timeout(Duration::from_secs(10));
        assert_eq!(
            client.effective_timeout(Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            client.effective_timeout(Some(Duration::from_secs(30))),
            Duration::from_secs(10)
        );
        assert_eq!(client.effective_timeout(None), Duration::from_secs(10));
    }

    #[test]
    fn failed_response_display_truncates_body() {
        let failed = FailedResponse {
            status_code: 500,
            status: "500 Internal Server Error".into(),
            content_type: None,
            body: vec![b'x'; 250],
        };
        let shown = failed.to_string();
        assert!(shown.starts_with("500 Internal Server Error body=["));
        assert_eq!(shown.matches('x').count(), FAILED_BODY_PREVIEW);
    }
}
