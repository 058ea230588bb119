//! HTTP Transport
//!
//! HTTP client interface and implementations for upstream calls.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::{NetworkError, ProtocolError, SessionAuthError};

/// HTTP request definition.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<String>,
    /// Request timeout.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Create a request without headers or body.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Attach a JSON body and content type.
    pub fn json_body(mut self, body: String) -> Self {
        self.headers
            .insert("content-type".to_string(), "application/json".to_string());
        self.body = Some(body);
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Whether the method may change upstream state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Get)
    }
}

/// HTTP response definition.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Response with a status and body.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// JSON response.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        let mut response = Self::new(status, body.to_string());
        response
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        response
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP transport interface (for dependency injection).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SessionAuthError>;
}

/// Default reqwest-based HTTP transport.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
    max_response_size: usize,
}

impl ReqwestHttpTransport {
    /// Create new transport with default settings.
    pub fn new() -> Result<Self, SessionAuthError> {
        Self::with_options(Duration::from_secs(30), 4 * 1024 * 1024)
    }

    /// Create transport with custom options.
    pub fn with_options(
        timeout: Duration,
        max_response_size: usize,
    ) -> Result<Self, SessionAuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                SessionAuthError::Network(NetworkError::ConnectionFailed {
                    message: format!("failed to build HTTP client: {}", e),
                })
            })?;

        Ok(Self {
            client,
            default_timeout: timeout,
            max_response_size,
        })
    }

    fn map_send_error(error: reqwest::Error, timeout: Duration) -> SessionAuthError {
        if error.is_timeout() {
            return SessionAuthError::Network(NetworkError::Timeout { timeout });
        }

        let message = error.to_string();
        if error.is_connect() && message.contains("dns") {
            let host = error
                .url()
                .and_then(|u| u.host_str())
                .unwrap_or_default()
                .to_string();
            return SessionAuthError::Network(NetworkError::DnsResolutionFailed { host });
        }

        SessionAuthError::Network(NetworkError::ConnectionFailed { message })
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SessionAuthError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut req_builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        req_builder = req_builder.timeout(timeout);

        let response = req_builder
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, timeout))?;

        let status = response.status().as_u16();

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.to_string().to_lowercase(), v.to_string());
            }
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_response_size {
                return Err(SessionAuthError::Protocol(ProtocolError::ResponseTooLarge {
                    size: len as usize,
                }));
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| Self::map_send_error(e, timeout))?;

        if body.len() > self.max_response_size {
            return Err(SessionAuthError::Protocol(ProtocolError::ResponseTooLarge {
                size: body.len(),
            }));
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Mock HTTP transport for testing.
///
/// Responses are served first from routes whose URL fragment matches the
/// request, then from the shared FIFO queue, then from the default response.
#[derive(Default)]
pub struct MockHttpTransport {
    routes: Mutex<Vec<(String, VecDeque<Result<HttpResponse, SessionAuthError>>)>>,
    responses: Mutex<VecDeque<Result<HttpResponse, SessionAuthError>>>,
    request_history: Mutex<Vec<HttpRequest>>,
    default_response: Mutex<Option<HttpResponse>>,
    latency: Mutex<Option<Duration>>,
}

impl MockHttpTransport {
    /// Create new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to return.
    pub fn queue_response(&self, response: HttpResponse) -> &Self {
        lock(&self.responses).push_back(Ok(response));
        self
    }

    /// Queue a JSON response.
    pub fn queue_json_response(&self, status: u16, body: &serde_json::Value) -> &Self {
        self.queue_response(HttpResponse::json(status, body))
    }

    /// Queue an error to return.
    pub fn queue_error(&self, error: SessionAuthError) -> &Self {
        lock(&self.responses).push_back(Err(error));
        self
    }

    /// Queue a response for requests whose URL contains `url_fragment`.
    pub fn route_response(&self, url_fragment: &str, response: HttpResponse) -> &Self {
        self.push_route(url_fragment, Ok(response));
        self
    }

    /// Queue an error for requests whose URL contains `url_fragment`.
    pub fn route_error(&self, url_fragment: &str, error: SessionAuthError) -> &Self {
        self.push_route(url_fragment, Err(error));
        self
    }

    /// Set default response when queue is empty.
    pub fn set_default_response(&self, response: HttpResponse) -> &Self {
        *lock(&self.default_response) = Some(response);
        self
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Duration) -> &Self {
        *lock(&self.latency) = Some(latency);
        self
    }

    /// Get request history.
    pub fn get_requests(&self) -> Vec<HttpRequest> {
        lock(&self.request_history).clone()
    }

    /// Count requests whose URL contains `url_fragment`.
    pub fn count_requests(&self, url_fragment: &str) -> usize {
        lock(&self.request_history)
            .iter()
            .filter(|r| r.url.contains(url_fragment))
            .count()
    }

    /// Get last request.
    pub fn get_last_request(&self) -> Option<HttpRequest> {
        lock(&self.request_history).last().cloned()
    }

    /// Clear request history.
    pub fn clear_history(&self) {
        lock(&self.request_history).clear();
    }

    fn push_route(&self, url_fragment: &str, entry: Result<HttpResponse, SessionAuthError>) {
        let mut routes = lock(&self.routes);
        match routes.iter_mut().find(|(fragment, _)| fragment == url_fragment) {
            Some((_, queue)) => queue.push_back(entry),
            None => routes.push((url_fragment.to_string(), VecDeque::from([entry]))),
        }
    }

    fn next_for(&self, url: &str) -> Option<Result<HttpResponse, SessionAuthError>> {
        let routed = lock(&self.routes)
            .iter_mut()
            .filter(|(fragment, _)| url.contains(fragment.as_str()))
            .find_map(|(_, queue)| queue.pop_front());

        routed
            .or_else(|| lock(&self.responses).pop_front())
            .or_else(|| lock(&self.default_response).clone().map(Ok))
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SessionAuthError> {
        let url = request.url.clone();
        lock(&self.request_history).push(request);

        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.next_for(&url).unwrap_or_else(|| {
            Err(SessionAuthError::Network(NetworkError::ConnectionFailed {
                message: "No mock response available".to_string(),
            }))
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create production HTTP transport.
pub fn create_transport(timeout: Option<Duration>) -> Result<ReqwestHttpTransport, SessionAuthError> {
    match timeout {
        Some(t) => ReqwestHttpTransport::with_options(t, 4 * 1024 * 1024),
        None => ReqwestHttpTransport::new(),
    }
}

/// Create mock HTTP transport for testing.
pub fn create_mock_transport() -> MockHttpTransport {
    MockHttpTransport::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_fifo() {
        let transport = MockHttpTransport::new();
        transport.queue_json_response(200, &serde_json::json!({"n": 1}));
        transport.queue_json_response(200, &serde_json::json!({"n": 2}));

        let first = transport
            .send(HttpRequest::new(HttpMethod::Get, "https://example.com/a"))
            .await
            .unwrap();
        let second = transport
            .send(HttpRequest::new(HttpMethod::Get, "https://example.com/b"))
            .await
            .unwrap();

        assert!(first.body.contains("1"));
        assert!(second.body.contains("2"));
        assert_eq!(transport.get_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_transport_routes() {
        let transport = MockHttpTransport::new();
        transport.set_default_response(HttpResponse::new(200, "default"));
        transport.route_response("/login", HttpResponse::new(200, "login"));

        let login = transport
            .send(HttpRequest::new(HttpMethod::Post, "https://example.com/login"))
            .await
            .unwrap();
        let other = transport
            .send(HttpRequest::new(HttpMethod::Get, "https://example.com/data"))
            .await
            .unwrap();
        let login_again = transport
            .send(HttpRequest::new(HttpMethod::Post, "https://example.com/login"))
            .await
            .unwrap();

        assert_eq!(login.body, "login");
        assert_eq!(other.body, "default");
        assert_eq!(login_again.body, "default");
        assert_eq!(transport.count_requests("/login"), 2);
    }

    #[tokio::test]
    async fn test_mock_transport_empty_is_error() {
        let transport = MockHttpTransport::new();
        let result = transport
            .send(HttpRequest::new(HttpMethod::Get, "https://example.com"))
            .await;
        assert!(matches!(
            result,
            Err(SessionAuthError::Network(NetworkError::ConnectionFailed { .. }))
        ));
    }

    #[test]
    fn test_http_method() {
        assert_eq!(HttpMethod::Get.as_str(), "GET");
        assert_eq!(HttpMethod::Delete.as_str(), "DELETE");
        assert!(!HttpMethod::Get.is_mutating());
        assert!(HttpMethod::Post.is_mutating());
    }
}
