use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use smalltree_daemon::config::Config;
use smalltree_daemon::server::{self, Server};
use smalltree_protocol::{
    methods, GenerateRequest, GenerationOutcome, JsonRpcRequest, JsonRpcResponse,
    ProviderStatusMap, RequestId,
};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "smalltree",
    about = "AI content generation gateway with multi-provider failover"
)]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the SmallTree daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
    /// Show per-provider model and quota status
    Providers,
    /// Mark a provider (or all providers) active again
    Reset {
        /// Provider name; omit to reset every provider
        name: Option<String>,
    },
    /// Probe every configured provider directly, bypassing the daemon
    Check,
    /// Generate text for a prompt
    Generate {
        prompt: String,
        /// Maximum number of providers to attempt
        #[arg(long)]
        max_attempts: Option<usize>,
        /// Ignore cached results
        #[arg(long)]
        no_cache: bool,
        /// Run the failover in-process instead of asking the daemon
        #[arg(long)]
        local: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config;

    match cli.command {
        Commands::Start { foreground } => cmd_start(foreground, config_path).await,
        Commands::Stop => cmd_stop(config_path.as_deref()).await,
        Commands::Status => cmd_status(config_path.as_deref()).await,
        Commands::Providers => cmd_providers(config_path.as_deref()).await,
        Commands::Reset { name } => cmd_reset(config_path.as_deref(), name).await,
        Commands::Check => cmd_check(config_path.as_deref()).await,
        Commands::Generate {
            prompt,
            max_attempts,
            no_cache,
            local,
        } => {
            let request = GenerateRequest {
                prompt,
                max_attempts,
                use_cache: !no_cache,
            };
            cmd_generate(config_path.as_deref(), request, local).await
        }
    }
}

fn load_config(config_path: Option<&str>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load_from(Path::new(path))
            .with_context(|| format!("Failed to load config from {path}")),
        None => Config::load(),
    }
}

async fn cmd_start(foreground: bool, config_path: Option<String>) -> Result<()> {
    let config = load_config(config_path.as_deref())?;

    // Check if already running
    if is_daemon_running(&config) {
        println!("SmallTree daemon is already running.");
        return Ok(());
    }

    if foreground {
        server::init_tracing(&config.daemon.log_level);
        println!("Starting SmallTree daemon (foreground)...");
        let server = Server::new(config);
        server.run().await?;
    } else {
        // Spawn as background process
        let exe = std::env::current_exe()?;
        let mut args = vec!["start".to_string(), "--foreground".to_string()];
        if let Some(path) = config_path {
            args.push("--config".to_string());
            args.push(path);
        }

        let child = std::process::Command::new(exe)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .context("Failed to spawn daemon process")?;

        println!("SmallTree daemon started (PID: {})", child.id());
    }

    Ok(())
}

async fn cmd_stop(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path).unwrap_or_default();
    if !is_daemon_running(&config) {
        println!("SmallTree daemon is not running.");
        return Ok(());
    }

    // Send shutdown via socket
    match send_request(&config.daemon.socket_path, methods::SHUTDOWN, None).await {
        Ok(_) => println!("SmallTree daemon stopped."),
        Err(_) => {
            // Fallback: kill via PID
            if let Some(pid) = read_pid(&config) {
                unsafe {
                    libc::kill(pid, libc::SIGTERM);
                }
                let _ = std::fs::remove_file(config.pid_path());
                println!("SmallTree daemon stopped (via signal).");
            }
        }
    }

    Ok(())
}

async fn cmd_status(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path).unwrap_or_default();
    if !is_daemon_running(&config) {
        println!("SmallTree daemon is not running.");
        return Ok(());
    }

    match send_request(&config.daemon.socket_path, methods::STATUS, None).await {
        Ok(response) => {
            if let Some(result) = response.result {
                println!("SmallTree daemon status:");
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
        Err(e) => {
            println!("Failed to get status: {e}");
        }
    }

    Ok(())
}

async fn cmd_providers(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let response = send_request(&config.daemon.socket_path, methods::PROVIDERS_STATUS, None)
        .await
        .context("Is the daemon running? Try `smalltree start`")?;
    let status: ProviderStatusMap = serde_json::from_value(into_result(response)?)?;

    if status.is_empty() {
        println!("No providers registered. Set <PROVIDER>_API_KEY or edit the config file.");
        return Ok(());
    }
    for (name, report) in &status {
        println!("{name:<10} {:<16} {}", report.status, report.model);
    }
    Ok(())
}

async fn cmd_reset(config_path: Option<&str>, name: Option<String>) -> Result<()> {
    let config = load_config(config_path)?;
    let params = serde_json::json!({ "name": name });
    let response = send_request(
        &config.daemon.socket_path,
        methods::PROVIDERS_RESET,
        Some(params),
    )
    .await
    .context("Is the daemon running? Try `smalltree start`")?;
    let result = into_result(response)?;
    println!("Reset: {}", result["reset"]);
    Ok(())
}

async fn cmd_check(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    server::init_tracing("warn");
    let orchestrator = config.orchestrator();
    let registry = orchestrator.registry();

    if registry.is_empty() {
        bail!("No providers registered. Set <PROVIDER>_API_KEY or edit the config file.");
    }

    let mut healthy = 0;
    for name in registry.names() {
        let Some(handle) = registry.get(&name) else {
            continue;
        };
        match handle.provider().health_check().await {
            Ok(()) => {
                healthy += 1;
                println!("{name:<10} ok      {}", handle.model());
            }
            Err(e) => println!("{name:<10} FAILED  {e}"),
        }
    }

    if healthy == 0 {
        bail!("No provider passed the health check");
    }
    Ok(())
}

async fn cmd_generate(
    config_path: Option<&str>,
    request: GenerateRequest,
    local: bool,
) -> Result<()> {
    let config = load_config(config_path)?;

    let outcome: GenerationOutcome = if local {
        server::init_tracing("warn");
        let orchestrator = config.orchestrator();
        match request.max_attempts {
            Some(max) => orchestrator.generate_with_budget(&request.prompt, max).await,
            None => orchestrator.generate(&request.prompt).await,
        }
    } else {
        let params = serde_json::to_value(&request)?;
        let response = send_request(&config.daemon.socket_path, methods::GENERATE, Some(params))
            .await
            .context("Is the daemon running? Try `smalltree start` or pass --local")?;
        serde_json::from_value(into_result(response)?)?
    };

    if outcome.success {
        eprintln!(
            "[{} / {}, {} ms{}]",
            outcome.provider.as_deref().unwrap_or("?"),
            outcome.model.as_deref().unwrap_or("?"),
            outcome.latency_ms,
            if outcome.cached { ", cached" } else { "" }
        );
        println!("{}", outcome.user_message());
        Ok(())
    } else {
        eprintln!("{}", outcome.user_message());
        bail!(
            "{} (tried: {:?})",
            outcome.error.as_deref().unwrap_or("generation failed"),
            outcome.tried_providers
        )
    }
}

fn into_result(response: JsonRpcResponse) -> Result<serde_json::Value> {
    if let Some(error) = response.error {
        bail!("Daemon error {}: {}", error.code, error.message);
    }
    response.result.context("Daemon returned an empty result")
}

/// Send a JSON-RPC request to the daemon and return the response.
async fn send_request(
    socket_path: &str,
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<JsonRpcResponse> {
    debug!(socket = socket_path, method, "Sending request");
    let stream = UnixStream::connect(socket_path).await?;
    let (reader, mut writer) = stream.into_split();

    let request = JsonRpcRequest::new(method, params, RequestId::Number(1));
    let json = serde_json::to_string(&request)?;

    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: JsonRpcResponse = serde_json::from_str(&line)?;
    Ok(response)
}

fn read_pid(config: &Config) -> Option<i32> {
    let pid_str = std::fs::read_to_string(config.pid_path()).ok()?;
    pid_str.trim().parse::<i32>().ok()
}

fn is_daemon_running(config: &Config) -> bool {
    match read_pid(config) {
        // Check if process is alive
        Some(pid) => unsafe { libc::kill(pid, 0) == 0 },
        None => false,
    }
}
