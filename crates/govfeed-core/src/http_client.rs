use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// HTTP request envelope produced by source adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Full URL with percent-encoded query string.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }

        let query = self
            .query
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{separator}{query}", self.url)
    }

    /// Same as [`full_url`](Self::full_url) with `api_key` values masked, for logs.
    pub fn redacted_url(&self) -> String {
        let mut redacted = self.clone();
        for (name, value) in &mut redacted.query {
            if name == "api_key" {
                *value = String::from("***");
            }
        }
        redacted.full_url()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    Timeout,
    Connect,
    Other,
}

/// Transport-level HTTP error. Status codes are not errors at this layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    kind: HttpErrorKind,
    message: String,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Other,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Connect,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> HttpErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

/// Transport contract used by the collector engine.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;
}

/// Answers every request with an empty JSON object.
#[derive(Debug, Default)]
pub struct NoopHttpClient;

impl HttpClient for NoopHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        let _ = request;
        Box::pin(async move { Ok(HttpResponse::ok_json("{}")) })
    }
}

type ScriptedReply = Result<HttpResponse, HttpError>;

#[derive(Debug)]
struct ScriptedRoute {
    needles: Vec<String>,
    replies: Vec<ScriptedReply>,
}

/// Offline transport that answers from scripted routes.
///
/// A route matches when every needle is a substring of the request's full
/// URL. The first matching route wins; its replies are served in order and the
/// last one repeats. Unmatched requests get a 404. Every request is recorded.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    routes: Mutex<Vec<ScriptedRoute>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, needle: &str, reply: ScriptedReply) -> Self {
        self.route_all(&[needle], vec![reply])
    }

    pub fn route_json(self, needle: &str, status: u16, body: &str) -> Self {
        self.route(needle, Ok(HttpResponse::new(status, body)))
    }

    /// Route matched on several substrings with a reply sequence.
    pub fn route_all(self, needles: &[&str], replies: Vec<ScriptedReply>) -> Self {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ScriptedRoute {
                needles: needles.iter().map(|needle| (*needle).to_owned()).collect(),
                replies,
            });
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn reply_for(&self, request: &HttpRequest) -> ScriptedReply {
        let url = request.full_url();
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let route = routes.iter_mut().find(|route| {
            route
                .needles
                .iter()
                .all(|needle| url.contains(needle.as_str()))
        });

        match route {
            Some(route) if route.replies.len() > 1 => route.replies.remove(0),
            Some(route) => route
                .replies
                .first()
                .cloned()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, "{}"))),
            None => Ok(HttpResponse::new(404, r#"{"error":"not found"}"#)),
        }
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        let reply = self.reply_for(&request);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        Box::pin(async move { reply })
    }
}

/// Production transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent("govfeed/0.1.0")
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = self
                .client
                .get(&request.url)
                .query(&request.query)
                .timeout(request.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    HttpError::timeout(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    HttpError::connect(format!("connection failed: {e}"))
                } else {
                    HttpError::new(format!("request failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let body = response.text().await.map_err(|e| {
                if e.is_timeout() {
                    HttpError::timeout(format!("timed out reading response body: {e}"))
                } else {
                    HttpError::new(format!("failed to read response body: {e}"))
                }
            })?;

            Ok(HttpResponse { status, body })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_on<F: Future>(future: F) -> F::Output {
        use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

        fn noop_raw_waker() -> RawWaker {
            fn clone(_: *const ()) -> RawWaker {
                noop_raw_waker()
            }
            fn noop(_: *const ()) {}
            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
            RawWaker::new(std::ptr::null(), &VTABLE)
        }

        let waker = unsafe { Waker::from_raw(noop_raw_waker()) };
        let mut context = Context::from_waker(&waker);
        let mut future = std::pin::pin!(future);
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut context) {
                return output;
            }
        }
    }

    #[test]
    fn full_url_encodes_query_values() {
        let request = HttpRequest::get("https://api.example.test/v1/records")
            .with_query("filter", "record_date:gte:2024-01-01,maturity:eq:10 Yr")
            .with_query("page[size]", "100");

        assert_eq!(
            request.full_url(),
            "https://api.example.test/v1/records?filter=record_date%3Agte%3A2024-01-01%2Cmaturity%3Aeq%3A10%20Yr&page%5Bsize%5D=100"
        );
    }

    #[test]
    fn redacted_url_masks_api_key() {
        let request = HttpRequest::get("https://api.example.test/series")
            .with_query("series_id", "GDP")
            .with_query("api_key", "secret-key");

        let redacted = request.redacted_url();
        assert!(redacted.contains("api_key=%2A%2A%2A"));
        assert!(!redacted.contains("secret-key"));
    }

    #[test]
    fn scripted_client_serves_replies_in_order_and_repeats_last() {
        let client = ScriptedHttpClient::new().route_all(
            &["/series"],
            vec![
                Err(HttpError::timeout("slow")),
                Ok(HttpResponse::ok_json("{}")),
            ],
        );

        let first = block_on(client.execute(HttpRequest::get("https://x.test/series")));
        let second = block_on(client.execute(HttpRequest::get("https://x.test/series")));
        let third = block_on(client.execute(HttpRequest::get("https://x.test/series")));
        let unmatched = block_on(client.execute(HttpRequest::get("https://x.test/other")));

        assert_eq!(first.map_err(|e| e.kind()), Err(HttpErrorKind::Timeout));
        assert_eq!(second.map(|r| r.status), Ok(200));
        assert_eq!(third.map(|r| r.status), Ok(200));
        assert_eq!(unmatched.map(|r| r.status), Ok(404));
        assert_eq!(client.request_count(), 4);
    }

    #[test]
    fn header_names_are_lowercased() {
        let request = HttpRequest::get("https://data.example.test").with_header("User-Agent", "govfeed");
        assert_eq!(
            request.headers.get("user-agent").map(String::as_str),
            Some("govfeed")
        );
    }
}
