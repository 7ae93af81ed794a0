//! Development server implementation.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use sluice_pipeline::config::ServerConfig;

use crate::livereload::{
    client_script, inject_script, LiveReloadHub, ReloadMessage, SCRIPT_PATH, SOCKET_PATH,
};

/// Configuration for the development server.
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    /// Directory served as the site root
    pub root: PathBuf,

    /// Port to listen on
    pub port: u16,

    /// Host to bind to
    pub host: String,

    /// Open browser on start
    pub open: bool,
}

impl DevServerConfig {
    pub fn new(root: impl Into<PathBuf>, server: &ServerConfig) -> Self {
        Self {
            root: root.into(),
            port: server.port,
            host: server.host.clone(),
            open: server.open,
        }
    }
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("tmp"),
            port: 3000,
            host: "127.0.0.1".to_string(),
            open: false,
        }
    }
}

/// Errors that can occur with the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid address {0}")]
    AddrError(String),

    #[error("Failed to bind to {0}: {1}")]
    BindError(SocketAddr, String),

    #[error("File watch error: {0}")]
    WatchError(String),
}

/// Shared server state.
struct ServerState {
    root: PathBuf,
    hub: LiveReloadHub,
}

/// Development server.
pub struct DevServer {
    config: DevServerConfig,
    hub: LiveReloadHub,
}

impl DevServer {
    /// Create a server broadcasting through `hub`.
    pub fn new(config: DevServerConfig, hub: LiveReloadHub) -> Self {
        Self { config, hub }
    }

    pub fn addr(&self) -> Result<SocketAddr, ServerError> {
        format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|_| ServerError::AddrError(format!("{}:{}", self.config.host, self.config.port)))
    }

    /// Routes: the live-reload socket and script, then static files with the
    /// client injected into HTML.
    pub fn router(&self) -> Router {
        let state = Arc::new(ServerState {
            root: self.config.root.clone(),
            hub: self.hub.clone(),
        });

        Router::new()
            .route(SOCKET_PATH, get(ws_handler))
            .route(SCRIPT_PATH, get(script_handler))
            .fallback(static_handler)
            .with_state(state)
    }

    /// Serve until the process exits.
    pub async fn start(self) -> Result<(), ServerError> {
        let addr = self.addr()?;
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(addr, e.to_string()))?;

        tracing::info!(
            "Serving {} at http://{}",
            self.config.root.display(),
            addr
        );

        if self.config.open {
            let url = format!("http://{}", addr);
            if let Err(e) = open::that(&url) {
                tracing::warn!("Failed to open browser: {}", e);
            }
        }

        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::BindError(addr, e.to_string()))?;

        Ok(())
    }
}

/// Serve a file from the root, injecting the client into HTML documents.
async fn static_handler(State(state): State<Arc<ServerState>>, req: Request) -> Response {
    // ServeDir never fails; errors become responses.
    let res = match ServeDir::new(&state.root).oneshot(req).await {
        Ok(res) => res,
        Err(never) => match never {},
    };
    let res = res.map(Body::new);

    if res.status() != StatusCode::OK || !is_html(&res) {
        return res;
    }

    let (mut parts, body) = res.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Failed to read response body: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let html = inject_script(&String::from_utf8_lossy(&bytes));
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.remove(header::ETAG);
    parts.headers.remove(header::LAST_MODIFIED);
    Response::from_parts(parts, Body::from(html))
}

fn is_html(res: &Response) -> bool {
    res.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"))
}

/// Handler for the live-reload WebSocket endpoint.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Forward hub messages to one client.
async fn handle_ws(mut socket: WebSocket, state: Arc<ServerState>) {
    let mut rx = state.hub.subscribe();

    if send_message(&mut socket, &ReloadMessage::Connected)
        .await
        .is_err()
    {
        return;
    }

    loop {
        match rx.recv().await {
            Ok(msg) => {
                if send_message(&mut socket, &msg).await.is_err() {
                    break;
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Live reload client lagged by {} messages", skipped);
                if send_message(&mut socket, &ReloadMessage::Reload)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn send_message(socket: &mut WebSocket, msg: &ReloadMessage) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("Failed to encode live reload message: {}", e);
            return Ok(());
        }
    };
    socket.send(Message::Text(json.into())).await
}

/// Handler for the live-reload client script.
async fn script_handler() -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/javascript"),
        )],
        client_script(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;
    use futures::StreamExt;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::net::TcpStream;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn server(root: &std::path::Path) -> DevServer {
        let config = DevServerConfig {
            root: root.to_path_buf(),
            ..DevServerConfig::default()
        };
        DevServer::new(config, LiveReloadHub::new())
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let res = app
            .oneshot(HttpRequest::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let content_type = res
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn default_config_matches_project_defaults() {
        let config = DevServerConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "127.0.0.1");
        assert!(!config.open);
    }

    #[test]
    fn rejects_invalid_address() {
        let config = DevServerConfig {
            host: "not a host".to_string(),
            ..DevServerConfig::default()
        };
        let server = DevServer::new(config, LiveReloadHub::new());
        assert!(matches!(server.addr(), Err(ServerError::AddrError(_))));
    }

    #[tokio::test]
    async fn injects_client_into_html() {
        let temp = tempdir().unwrap();
        fs::write(
            temp.path().join("index.html"),
            "<html><body><h1>Hi</h1></body></html>",
        )
        .unwrap();

        let (status, _, body) = get_body(server(temp.path()).router(), "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            r#"<html><body><h1>Hi</h1><script src="/__livereload.js"></script></body></html>"#
        );
    }

    #[tokio::test]
    async fn serves_other_files_untouched() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("css")).unwrap();
        fs::write(temp.path().join("css/styles.css"), "body{margin:0}").unwrap();

        let (status, _, body) = get_body(server(temp.path()).router(), "/css/styles.css").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "body{margin:0}");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let temp = tempdir().unwrap();

        let (status, _, _) = get_body(server(temp.path()).router(), "/nope.html").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn serves_client_script() {
        let temp = tempdir().unwrap();

        let (status, content_type, body) =
            get_body(server(temp.path()).router(), "/__livereload.js").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("application/javascript"));
        assert!(body.contains("/__livereload"));
    }

    /// Serve on an ephemeral port and connect a client to the socket.
    async fn connect(hub: LiveReloadHub) -> Client {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = DevServer::new(DevServerConfig::default(), hub).router();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (client, _) = connect_async(format!("ws://{}{}", addr, SOCKET_PATH))
            .await
            .unwrap();
        client
    }

    async fn next_text(client: &mut Client) -> String {
        let msg = tokio::time::timeout(Duration::from_secs(3), client.next())
            .await
            .expect("timeout waiting for frame")
            .unwrap()
            .unwrap();
        msg.to_text().unwrap().to_string()
    }

    #[tokio::test]
    async fn socket_greets_and_forwards_hub_messages() {
        let hub = LiveReloadHub::new();
        let mut client = connect(hub.clone()).await;

        assert_eq!(next_text(&mut client).await, r#"{"type":"connected"}"#);
        assert_eq!(hub.subscriber_count(), 1);

        hub.send(ReloadMessage::InjectCss {
            path: "/css/styles.css".to_string(),
        });
        assert_eq!(
            next_text(&mut client).await,
            r#"{"type":"inject_css","path":"/css/styles.css"}"#
        );

        hub.send(ReloadMessage::Reload);
        assert_eq!(next_text(&mut client).await, r#"{"type":"reload"}"#);
    }

    #[tokio::test]
    async fn lagging_socket_gets_a_full_reload() {
        let hub = LiveReloadHub::with_capacity(1);
        let mut client = connect(hub.clone()).await;
        assert_eq!(next_text(&mut client).await, r#"{"type":"connected"}"#);

        // Both sends happen before the socket task runs again, so the first
        // is overwritten.
        hub.send(ReloadMessage::InjectCss {
            path: "/css/a.css".to_string(),
        });
        hub.send(ReloadMessage::InjectCss {
            path: "/css/b.css".to_string(),
        });

        assert_eq!(next_text(&mut client).await, r#"{"type":"reload"}"#);
        assert_eq!(
            next_text(&mut client).await,
            r#"{"type":"inject_css","path":"/css/b.css"}"#
        );
    }
}
