//! Connection handler
//!
//! Routes an accepted TCP connection by its request line:
//! - `/v1/ws` is upgraded to a WebSocket and handed to a new `Client`
//! - `GET /v1/healthcheck` answers with a JSON status document
//! - anything else gets a 404

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::WebSocketStream;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::client::Client;
use crate::config::{ClientConfig, Environment, HANDSHAKE_TIMEOUT};
use crate::error::AppError;
use crate::room::RoomHandle;

/// Path of the chat upgrade
pub const WS_PATH: &str = "/v1/ws";

/// Path of the health document
pub const HEALTHCHECK_PATH: &str = "/v1/healthcheck";

const NOT_FOUND_BODY: &str = r#"{"error":"the requested resource could not be found"}"#;

type Upgraded = WebSocketStream<BufReader<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Upgrade,
    HealthCheck,
    NotFound,
}

#[derive(Debug, Serialize)]
struct HealthCheck {
    status: &'static str,
    system_info: SystemInfo,
}

#[derive(Debug, Serialize)]
struct SystemInfo {
    environment: String,
}

impl HealthCheck {
    fn new(env: Environment) -> Self {
        Self {
            status: "available",
            system_info: SystemInfo {
                environment: env.to_string(),
            },
        }
    }
}

/// Handle a new TCP connection
///
/// Returns once the client's loops are spawned on `tracker`; the connection
/// lives on in those tasks. Health and 404 responses are written here and
/// the connection is closed. A room shutdown abandons a pending upgrade.
pub async fn handle_connection(
    stream: TcpStream,
    room: RoomHandle,
    config: ClientConfig,
    env: Environment,
    tracker: TaskTracker,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    let shutdown = room.child_token();
    let accepted = tokio::select! {
        () = shutdown.cancelled() => None,
        result = time::timeout(HANDSHAKE_TIMEOUT, accept(stream, &config, env)) => Some(result),
    };

    let Some(result) = accepted else {
        debug!("Relay shutting down, dropping {} before upgrade", peer_addr);
        return Ok(());
    };
    let Some(ws_stream) = result.map_err(|_| AppError::HandshakeTimeout)?? else {
        return Ok(());
    };

    let client = Client::new(room, ws_stream, config)?;
    info!(client = %client.id(), peer = %peer_addr, "Client connected");

    client.start(&tracker).await;

    Ok(())
}

/// Answer plain HTTP routes, or complete the WebSocket handshake
async fn accept(
    stream: TcpStream,
    config: &ClientConfig,
    env: Environment,
) -> Result<Option<Upgraded>, AppError> {
    let mut stream = BufReader::new(stream);

    let head = stream.fill_buf().await?;
    if head.is_empty() {
        return Ok(None);
    }

    match route(head) {
        Route::HealthCheck => {
            let body = serde_json::to_string(&HealthCheck::new(env))?;
            respond(&mut stream, StatusCode::OK, &body).await?;
            Ok(None)
        }
        Route::NotFound => {
            respond(&mut stream, StatusCode::NOT_FOUND, NOT_FOUND_BODY).await?;
            Ok(None)
        }
        Route::Upgrade => {
            // The buffered request bytes stay in the reader for the handshake
            let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
                stream,
                check_path,
                Some(config.websocket_config()),
            )
            .await?;
            Ok(Some(ws_stream))
        }
    }
}

/// Pick a route from the request line at the start of `head`
///
/// A request line that has not fully arrived goes to the handshake, which
/// checks the path again in `check_path`.
fn route(head: &[u8]) -> Route {
    let Some(end) = head.windows(2).position(|pair| pair == b"\r\n") else {
        return Route::Upgrade;
    };

    let line = String::from_utf8_lossy(&head[..end]);
    let mut parts = line.split_whitespace();
    let method = parts.next();
    let path = parts
        .next()
        .map(|target| target.split_once('?').map_or(target, |(path, _)| path));

    match (method, path) {
        (_, Some(WS_PATH)) => Route::Upgrade,
        (Some("GET"), Some(HEALTHCHECK_PATH)) => Route::HealthCheck,
        _ => Route::NotFound,
    }
}

/// Handshake callback refusing every path but the chat upgrade
fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == WS_PATH {
        return Ok(response);
    }

    let mut error = ErrorResponse::new(Some(NOT_FOUND_BODY.to_string()));
    *error.status_mut() = StatusCode::NOT_FOUND;
    Err(error)
}

async fn respond(
    stream: &mut BufReader<TcpStream>,
    status: StatusCode,
    body: &str,
) -> Result<(), AppError> {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    );

    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body.as_bytes()).await?;
    stream.shutdown().await?;

    debug!(status = status.as_u16(), "Answered plain HTTP request");
    Ok(())
}
