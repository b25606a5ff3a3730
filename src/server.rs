//! HTTP listener.
//!
//! Every method and path is handed to the [`MockEngine`]. The delay the
//! engine reports is awaited on the request's own task before the response
//! is written, so slow routes never hold up other requests.

use crate::engine::{MockEngine, MockRequest, MockResponse};
use crate::loader::TemplateLoader;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Application state injected into the handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MockEngine>,
}

/// Build the router. A fallback catches every method and path.
pub fn router(engine: Arc<MockEngine>) -> Router {
    Router::new()
        .fallback(handle_request)
        .with_state(AppState { engine })
}

/// Serve until Ctrl-C.
pub async fn serve(engine: Arc<MockEngine>, listener: TcpListener) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(address = %addr, "Mock server listening");

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Mock server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Reload templates from disk whenever the process receives `SIGHUP`.
#[cfg(unix)]
pub fn spawn_reload_on_hangup(engine: Arc<MockEngine>, loader: TemplateLoader) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Template reload on SIGHUP unavailable");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            info!(path = %loader.root().display(), "SIGHUP received, reloading templates");
            let loader = loader.clone();
            match tokio::task::spawn_blocking(move || loader.load()).await {
                Ok(outcome) => engine.reload(outcome.templates),
                Err(e) => error!(error = %e, "Template reload failed"),
            }
        }
    });
}

#[cfg(not(unix))]
pub fn spawn_reload_on_hangup(_engine: Arc<MockEngine>, _loader: TemplateLoader) {
    debug!("Template reload on SIGHUP is only available on Unix");
}

async fn handle_request(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let request = MockRequest {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        body: String::from_utf8_lossy(&body).into_owned(),
        headers: flatten_headers(&headers),
        query: parse_query_string(uri.query().unwrap_or("")),
    };

    let response = {
        let mut rng = rand::thread_rng();
        state.engine.handle_since(started, &request, &mut rng)
    };

    if !response.delay.is_zero() {
        debug!(delay_ms = response.delay.as_millis() as u64, "Waiting before response");
        tokio::time::sleep(response.delay).await;
    }

    into_http_response(response)
}

fn into_http_response(response: MockResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut http = (status, response.body).into_response();
    let out = http.headers_mut();
    out.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));

    for (name, value) in &response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                out.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid response header"),
        }
    }

    http
}

/// Flatten headers to a single value per name (the first one wins).
fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut flat = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            flat.entry(name.as_str().to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    flat
}

/// Parse a query string into key-value pairs.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        params.insert(urlencoding_decode(key), urlencoding_decode(value));
    }

    params
}

/// Percent-decoding with `+` as space.
fn urlencoding_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        decoded.push(byte);
                        i += 3;
                    }
                    None => {
                        decoded.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            other => {
                decoded.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TemplateSet;
    use crate::template::Template;
    use std::time::Duration;

    fn test_state(docs: &[&str]) -> AppState {
        let templates =
            TemplateSet::from_templates(docs.iter().map(|d| Template::parse(d).unwrap())).unwrap();
        AppState {
            engine: Arc::new(MockEngine::new(templates)),
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_handler_serves_template() {
        let state = test_state(&[r#"POST /users/:id
Additional Headers:
  X-Mock: fixed; yes
Vars:
  id: reqPath; id
  page: reqParam; page
  name: jsonParse; name
Success body:
  {"id": "$id$", "page": "$page$", "name": "$name$"}
"#]);

        let response = handle_request(
            State(state.clone()),
            Method::POST,
            Uri::from_static("/users/7?page=2"),
            HeaderMap::new(),
            Bytes::from_static(br#"{"name":"Ann"}"#),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], JSON_CONTENT_TYPE);
        assert_eq!(response.headers()["x-mock"], "auto");
        assert_eq!(
            body_text(response).await,
            r#"{"id": "7", "page": "2", "name": "Ann"}"#
        );
        assert_eq!(state.engine.total_matched(), 1);
    }

    #[tokio::test]
    async fn test_handler_not_found() {
        let state = test_state(&[]);
        let response = handle_request(
            State(state),
            Method::GET,
            Uri::from_static("/missing"),
            HeaderMap::new(),
            Bytes::new(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, r#"{"error":"template not found"}"#);
    }

    #[tokio::test]
    async fn test_handler_waits_for_response_time() {
        let state = test_state(&["GET /slow\nSuccess body:\nok\nResponse time:\n80"]);
        let started = Instant::now();
        let response = handle_request(
            State(state),
            Method::GET,
            Uri::from_static("/slow"),
            HeaderMap::new(),
            Bytes::new(),
        )
        .await;

        assert!(started.elapsed() >= Duration::from_millis(70));
        assert_eq!(body_text(response).await, "ok");
    }

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string("foo=bar&baz=qux&flag");
        assert_eq!(params.get("foo"), Some(&"bar".to_string()));
        assert_eq!(params.get("baz"), Some(&"qux".to_string()));
        assert_eq!(params.get("flag"), Some(&String::new()));

        let params = parse_query_string("name=John%20Doe&city=S%C3%A3o+Paulo&bad=%zz%");
        assert_eq!(params["name"], "John Doe");
        assert_eq!(params["city"], "São Paulo");
        assert_eq!(params["bad"], "%zz%");
    }

    #[test]
    fn test_flatten_headers_keeps_first_value() {
        let mut headers = HeaderMap::new();
        headers.append("x-multi", HeaderValue::from_static("one"));
        headers.append("x-multi", HeaderValue::from_static("two"));
        headers.insert("user-agent", HeaderValue::from_static("test"));

        let flat = flatten_headers(&headers);
        assert_eq!(flat["x-multi"], "one");
        assert_eq!(flat["user-agent"], "test");
    }

    #[test]
    fn test_invalid_template_header_is_skipped() {
        let response = into_http_response(MockResponse {
            status: 200,
            body: String::new(),
            headers: HashMap::from([
                ("bad header".to_string(), "auto".to_string()),
                ("X-Good".to_string(), "auto".to_string()),
            ]),
            delay: Duration::ZERO,
        });
        assert_eq!(response.headers()["x-good"], "auto");
        assert_eq!(response.headers().len(), 2);
    }
}
