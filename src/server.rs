//! Relay server bootstrap
//!
//! Owns the listener, the room task and every connection task. On a
//! shutdown signal it stops accepting, shuts the room down and waits for
//! connections to drain. Past the configured deadline `serve` returns
//! without them; whatever is still running is dropped with the runtime.

use std::future::Future;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::handler::handle_connection;
use crate::room::Room;

/// Bind the configured address and serve until SIGINT/SIGTERM
pub async fn run(config: Config) -> Result<(), AppError> {
    let listener = TcpListener::bind(&config.bind_address).await?;
    serve(listener, config, shutdown_signal()).await
}

/// Serve connections on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, config: Config, shutdown: F) -> Result<(), AppError>
where
    F: Future<Output = ()>,
{
    info!(
        addr = %listener.local_addr()?,
        env = %config.env,
        room = %config.room_name,
        "WebSocket chat relay listening"
    );

    let tracker = TaskTracker::new();

    let (room, room_handle) = Room::new(
        config.room_name.clone(),
        config.self_suppress,
        &CancellationToken::new(),
    );
    tracker.spawn(room.run());

    tokio::pin!(shutdown);

    // Connection accept loop
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("New connection from {}", addr);
                    let room = room_handle.clone();
                    let client_config = config.client.clone();
                    let env = config.env;
                    let conn_tracker = tracker.clone();

                    tracker.spawn(async move {
                        if let Err(e) = handle_connection(stream, room, client_config, env, conn_tracker).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
        }
    }

    drop(listener);
    info!("Shutting down relay");

    room_handle.shutdown();
    tracker.close();

    if time::timeout(config.shutdown_timeout, tracker.wait())
        .await
        .is_err()
    {
        warn!(
            remaining = tracker.len(),
            "Shutdown deadline exceeded, abandoning remaining tasks"
        );
    }

    info!("Relay stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown"),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
