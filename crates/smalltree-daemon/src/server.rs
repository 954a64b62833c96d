use anyhow::{Context, Result};
use smalltree_protocol::{methods, JsonRpcRequest, JsonRpcResponse, RequestId, PARSE_ERROR};
use smalltree_providers::Orchestrator;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::handler::RequestHandler;

/// The main daemon server.
pub struct Server {
    config: Arc<Config>,
    handler: Arc<RequestHandler>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        let orchestrator = config.orchestrator();
        Self::with_orchestrator(config, orchestrator)
    }

    /// Build a server around an already-constructed orchestrator.
    pub fn with_orchestrator(config: Config, orchestrator: Orchestrator) -> Self {
        let config = Arc::new(config);
        let cache = Arc::new(Mutex::new(ResponseCache::new(
            config.daemon.cache_size,
            Duration::from_secs(config.daemon.cache_ttl_secs),
        )));
        let handler = Arc::new(RequestHandler::new(
            config.clone(),
            cache,
            Arc::new(orchestrator),
        ));

        Self { config, handler }
    }

    /// Run the daemon server, listening on Unix socket.
    pub async fn run(&self) -> Result<()> {
        let socket_path = &self.config.daemon.socket_path;

        // Clean up stale socket file
        if std::path::Path::new(socket_path).exists() {
            std::fs::remove_file(socket_path)
                .with_context(|| format!("Failed to remove stale socket {socket_path}"))?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind {socket_path}"))?;
        info!(socket = %socket_path, "SmallTree daemon listening");

        let pid = std::process::id();
        let pid_path = self.config.pid_path();
        std::fs::write(&pid_path, pid.to_string())
            .with_context(|| format!("Failed to write PID file {}", pid_path.display()))?;
        info!(pid = pid, path = %pid_path.display(), "PID file written");

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let handler = self.handler.clone();
                    let pid_path = pid_path.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, handler, &pid_path).await {
                            error!(error = %e, "Connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

async fn handle_connection(
    stream: tokio::net::UnixStream,
    handler: Arc<RequestHandler>,
    pid_path: &Path,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            line.clear();
            continue;
        }

        let (response, is_shutdown) = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
            Ok(request) => {
                let is_shutdown = request.method == methods::SHUTDOWN;
                (handler.handle(request).await, is_shutdown)
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse request");
                let response = JsonRpcResponse::error(
                    PARSE_ERROR,
                    format!("Parse error: {e}"),
                    RequestId::Number(0),
                );
                (response, false)
            }
        };

        let json = serde_json::to_string(&response)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        if is_shutdown {
            info!("Shutting down");
            let _ = std::fs::remove_file(pid_path);
            std::process::exit(0);
        }

        line.clear();
    }

    Ok(())
}

/// Initialize tracing subscriber.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
