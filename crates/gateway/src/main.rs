use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use clap::{Parser, Subcommand};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use vb_clients::ClientPool;
use vb_domain::config::{Config, ConfigSeverity};
use vb_gateway::api;
use vb_gateway::runtime::{AgentRegistry, PipelineDeps, ToolRegistry};
use vb_gateway::state::{ActiveSessions, AppState, ChatClientFactory, HealthRegistry};
use vb_gateway::telephony::TelephonyClient;
use vb_sessions::{MemoryCache, SessionStore, SharedCache};

/// Daemon exit codes: 0 normal, 1 config error, 2 upstream credentials
/// missing at startup, 3 shared cache unreachable at startup.
const EXIT_CONFIG: i32 = 1;
const EXIT_CREDENTIALS: i32 = 2;
const EXIT_CACHE: i32 = 3;

#[derive(Parser)]
#[command(name = "voicebridge", version, about = "Real-time voice-to-agent bridge")]
struct Cli {
    /// Config file path (falls back to $VB_CONFIG, then voicebridge.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (default when no subcommand is given).
    Serve,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate the config file and report issues.
    Validate,
    /// Print the effective configuration.
    Show,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = match load_config(cli.config.as_deref()) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("config error: {e}");
                    std::process::exit(EXIT_CONFIG);
                }
            };
            if let Err(e) = run_server(Arc::new(config)).await {
                tracing::error!(error = %e, "startup failed");
                std::process::exit(e.exit_code());
            }
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = match load_config(cli.config.as_deref()) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("config error: {e}");
                    std::process::exit(EXIT_CONFIG);
                }
            };
            let issues = config.validate();
            for issue in &issues {
                println!("{issue}");
            }
            let errors = issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count();
            if errors > 0 {
                std::process::exit(EXIT_CONFIG);
            }
            println!("configuration OK ({} warnings)", issues.len());
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            match load_config(cli.config.as_deref()) {
                Ok(config) => match toml::to_string_pretty(&config) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(e) => {
                        eprintln!("failed to render config: {e}");
                        std::process::exit(EXIT_CONFIG);
                    }
                },
                Err(e) => {
                    eprintln!("config error: {e}");
                    std::process::exit(EXIT_CONFIG);
                }
            }
        }
        Some(Command::Version) => {
            println!("voicebridge {}", env!("CARGO_PKG_VERSION"));
        }
    }
}

/// Structured JSON tracing for the daemon.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vb_gateway=debug")),
        )
        .json()
        .init();
}

/// Load the config file, or defaults when none exists.
fn load_config(path: Option<&Path>) -> Result<Config, String> {
    let path: PathBuf = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("VB_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("voicebridge.toml"));

    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }

    let raw = std::fs::read_to_string(&path)
        .map_err(|e| format!("reading {}: {e}", path.display()))?;
    toml::from_str(&raw).map_err(|e| format!("parsing {}: {e}", path.display()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Startup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
enum StartupError {
    Config(String),
    Credentials(String),
    Cache(String),
    Serve(String),
}

impl StartupError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Serve(_) => EXIT_CONFIG,
            Self::Credentials(_) => EXIT_CREDENTIALS,
            Self::Cache(_) => EXIT_CACHE,
        }
    }
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(m) => write!(f, "config: {m}"),
            Self::Credentials(m) => write!(f, "credentials: {m}"),
            Self::Cache(m) => write!(f, "shared cache: {m}"),
            Self::Serve(m) => write!(f, "serve: {m}"),
        }
    }
}

/// Resolve one upstream credential. An empty env-var name in config
/// means the endpoint is unauthenticated; a configured but unset
/// variable is fatal (exit 2).
fn resolve_api_key(component: &str, env_name: &str) -> Result<Option<String>, StartupError> {
    if env_name.is_empty() {
        return Ok(None);
    }
    match std::env::var(env_name) {
        Ok(value) if !value.is_empty() => Ok(Some(value)),
        _ => Err(StartupError::Credentials(format!(
            "{component}: environment variable {env_name} is not set"
        ))),
    }
}

async fn run_server(config: Arc<Config>) -> Result<(), StartupError> {
    tracing::info!("VoiceBridge starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        return Err(StartupError::Config(format!(
            "validation failed with {errors} error(s)"
        )));
    }

    // ── Upstream credentials ─────────────────────────────────────────
    let stt_key = resolve_api_key("stt", &config.stt.api_key_env)?;
    let tts_key = resolve_api_key("tts", &config.tts.api_key_env)?;
    let llm_key = resolve_api_key("llm", &config.llm.api_key_env)?;
    let telephony_key = resolve_api_key("telephony", &config.telephony.api_key_env)?;

    // ── Shared cache + session store ─────────────────────────────────
    let cache = Arc::new(MemoryCache::new());
    {
        // Round-trip probe: an unreachable or broken cache is fatal.
        let probe_key = "startup:probe";
        cache
            .insert_new(probe_key, b"ok".to_vec(), Duration::from_secs(5))
            .await
            .map_err(|e| StartupError::Cache(e.to_string()))?;
        cache
            .get(probe_key)
            .await
            .map_err(|e| StartupError::Cache(e.to_string()))?
            .ok_or_else(|| StartupError::Cache("probe write not readable".into()))?;
        cache
            .remove(probe_key)
            .await
            .map_err(|e| StartupError::Cache(e.to_string()))?;
    }

    let worker_id = config
        .session
        .worker_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let store = Arc::new(SessionStore::new(
        cache.clone(),
        worker_id.clone(),
        Duration::from_secs(config.session.ttl_seconds),
    ));
    tracing::info!(worker_id = %worker_id, ttl_s = config.session.ttl_seconds, "session store ready");

    // ── Client pools ─────────────────────────────────────────────────
    let stt = ClientPool::new(
        Arc::new(vb_clients::WsRecognizerFactory::new(
            config.stt.endpoint.clone(),
            stt_key,
        )),
        config.pool_sizes.stt,
    );
    let tts = ClientPool::new(
        Arc::new(vb_clients::WsSynthesizerFactory::new(
            config.tts.endpoint.clone(),
            tts_key,
            config.tts.sample_rate,
        )),
        config.pool_sizes.tts,
    );
    let llm = ClientPool::new(
        Arc::new(ChatClientFactory::new(
            config.llm.base_url.clone(),
            llm_key.clone(),
            config.llm.model.clone(),
        )),
        config.pool_sizes.llm,
    );
    tracing::info!(
        stt = config.pool_sizes.stt,
        tts = config.pool_sizes.tts,
        llm = config.pool_sizes.llm,
        "client pools ready"
    );

    let realtime: Option<Arc<dyn vb_clients::RealtimeVoice>> =
        config.llm.realtime_endpoint.as_ref().map(|endpoint| {
            Arc::new(vb_clients::WsRealtimeVoice::new(
                endpoint.clone(),
                llm_key.clone(),
            )) as Arc<dyn vb_clients::RealtimeVoice>
        });

    // ── Registries ───────────────────────────────────────────────────
    let registry = Arc::new(AgentRegistry::from_config(&config));
    tracing::info!(agents = registry.len(), "agent registry ready");

    let tools = Arc::new(
        ToolRegistry::from_config(&config).map_err(|e| StartupError::Config(e.to_string()))?,
    );
    tracing::info!(tools = tools.len(), "tool registry ready");

    // ── App state ────────────────────────────────────────────────────
    let health = Arc::new(HealthRegistry::new());
    let deps = Arc::new(PipelineDeps {
        config: config.clone(),
        store: store.clone(),
        stt,
        tts,
        llm,
        registry,
        tools,
        realtime,
        health: health.clone(),
    });

    let telephony = Arc::new(
        TelephonyClient::new(config.telephony.base_url.clone(), telephony_key)
            .map_err(|e| StartupError::Config(e.to_string()))?,
    );
    let active = Arc::new(ActiveSessions::new());

    let state = AppState {
        config: config.clone(),
        deps,
        telephony,
        active: active.clone(),
        health,
    };

    // ── Periodic expired-record sweep ────────────────────────────────
    {
        let cache = cache.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let evicted = cache.evict_expired();
                if evicted > 0 {
                    tracing::debug!(evicted, "expired session records evicted");
                }
            }
        });
    }

    // ── Router + layers ──────────────────────────────────────────────
    let app = api::router()
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(build_cors_layer(&config.server.cors_allowed_origins))
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_concurrent,
        ))
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| StartupError::Serve(format!("binding to {addr}: {e}")))?;
    tracing::info!(addr = %addr, "VoiceBridge listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StartupError::Serve(e.to_string()))?;

    // ── Drain: let sessions end naturally, then force ────────────────
    let drain_started = std::time::Instant::now();
    while active.count() > 0 && drain_started.elapsed() < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let remaining = active.count();
    if remaining > 0 {
        tracing::warn!(remaining, "forcing cancellation of remaining sessions");
        active.cancel_all();
    }
    tracing::info!("VoiceBridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received");
}

/// Permissive CORS for a wildcard config, otherwise the exact origin list.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    use axum::http::Method;

    if allowed_origins.len() == 1 && allowed_origins[0] == "*" {
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([axum::http::header::CONTENT_TYPE]);
    }

    let exact: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(exact))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE])
}
