//! searchagent HTTP server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use searchagent::agent::LlmClient;
use searchagent::config::{
    apply_env_overrides, load_config, load_config_from_path, validate_config, LogConfig,
};
use searchagent::server::{build_router, AppState};
use searchagent::Config;

// ---- CLI ----

#[derive(Parser)]
#[command(name = "searchagent-server", about = "Search-augmented chat API", version)]
struct Args {
    /// Config file (JSON5 or TOML); defaults to the user config directory
    #[arg(long, short, env = "SEARCHAGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(long)]
    host: Option<String>,

    /// Port
    #[arg(long, short)]
    port: Option<u16>,
}

// ---- Setup ----

fn load(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = load_config_from_path(path)?;
            apply_env_overrides(&mut config);
            config
        }
        None => load_config()?,
    };

    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    Ok(config)
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{},tower_http=info", log.level).into());

    if log.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

// ---- Main ----

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load(&args)?;

    init_tracing(&config.log);

    let report = validate_config(&config);
    for issue in &report.warnings {
        warn!("Config: {}", issue);
    }
    if !report.valid {
        let errors: Vec<String> = report.errors.iter().map(ToString::to_string).collect();
        anyhow::bail!("Invalid configuration:\n  {}", errors.join("\n  "));
    }

    let llm = LlmClient::new(config.llm.clone())?;
    info!(model = %config.llm.model, base_url = %config.llm.base_url, "LLM client ready");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let sweep_interval = config.session.sweep_interval;
    let idle_ttl = config.session.idle_ttl;

    let state = AppState::new(config, Arc::new(llm))?;

    // Idle session sweeper
    let sessions = state.sessions.clone();
    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = sessions.evict_idle(idle_ttl).await;
            if evicted > 0 {
                info!(evicted, "Evicted idle sessions");
            } else {
                debug!("No idle sessions to evict");
            }
            limiter.retain_recent();
        }
    });

    let app = build_router(state);

    info!("searchagent listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}
