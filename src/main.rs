use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gantry_config::logging::{
    config_dir, ensure_log_dir, log_level_to_filter, rotate_log_files, DEFAULT_MAX_LOG_FILES,
    DEFAULT_MAX_LOG_SIZE,
};
use gantry_config::{load_config, Config, SeqModeSetting};
use gantry_dap::{
    serve_connection, CargoBuilder, LaunchOrchestrator, SeqMode, Server, ServerOptions,
    SessionEnv, SessionOptions,
};
use gantry_native::NativeBackend;

/// Debug Adapter Protocol server for native programs.
#[derive(Parser, Debug)]
#[command(name = "gantry", version)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "GANTRY_LISTEN")]
    listen: Option<String>,

    /// Config file merged over the global one.
    #[arg(long, env = "GANTRY_CONFIG")]
    config: Option<PathBuf>,

    /// trace, debug, info, warn or error.
    #[arg(long)]
    log_level: Option<String>,

    /// Write logs here instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// `monotonic` or `fixed`.
    #[arg(long)]
    seq_mode: Option<SeqMode>,

    /// Exit after the first client disconnects.
    #[arg(long)]
    single_client: bool,

    /// Serve one session over stdin/stdout instead of TCP.
    #[arg(long)]
    stdio: bool,
}

fn load(cli: &Cli) -> Result<Config> {
    let global_dir = config_dir().unwrap_or_else(|| PathBuf::from(".gantry"));
    let mut config = load_config(&global_dir, cli.config.as_deref())
        .context("failed to load configuration")?;

    if let Some(listen) = &cli.listen {
        config.server.listen = listen.clone();
    }
    if let Some(file) = &cli.log_file {
        config.log.file = Some(file.clone());
    }
    if cli.single_client {
        config.server.accept_multi_client = false;
    }
    if let Some(mode) = cli.seq_mode {
        config.session.seq_mode = match mode {
            SeqMode::Monotonic => SeqModeSetting::Monotonic,
            SeqMode::Fixed => SeqModeSetting::Fixed,
        };
    }
    Ok(config)
}

fn init_logging(config: &Config, level_override: Option<&str>) -> Result<()> {
    let level = log_level_to_filter(level_override.unwrap_or(config.log.level.as_str()));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &config.log.file {
        Some(path) => {
            ensure_log_dir(path)
                .with_context(|| format!("cannot create log directory for {}", path.display()))?;
            rotate_log_files(path, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_LOG_FILES)
                .with_context(|| format!("cannot rotate {}", path.display()))?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn server_options(config: &Config) -> ServerOptions {
    ServerOptions {
        session: SessionOptions {
            seq_mode: match config.session.seq_mode {
                SeqModeSetting::Monotonic => SeqMode::Monotonic,
                SeqModeSetting::Fixed => SeqMode::Fixed,
            },
            terminate_grace: Duration::from_millis(config.session.terminate_grace_ms),
        },
        default_output: config.build.default_output.clone(),
        accept_multi_client: config.server.accept_multi_client,
    }
}

async fn serve(config: Config, stdio: bool) -> Result<()> {
    let options = server_options(&config);
    let backend = Arc::new(NativeBackend::new());
    let builder = Arc::new(CargoBuilder::new(
        config.build.cargo.clone(),
        config.build.extra_args.clone(),
    ));

    if stdio {
        info!("serving a single session on stdio");
        let (_stop, shutdown) = watch::channel(false);
        let env = SessionEnv {
            options: options.session.clone(),
            orchestrator: Arc::new(
                LaunchOrchestrator::new(backend, builder)
                    .with_default_output(options.default_output.clone()),
            ),
            shutdown,
        };
        serve_connection(tokio::io::stdin(), tokio::io::stdout(), env).await;
        return Ok(());
    }

    let server = Server::bind(config.server.listen.as_str(), options, backend, builder)
        .await
        .with_context(|| format!("cannot listen on {}", config.server.listen))?;
    let handle = server.handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupted; shutting down");
                handle.stop();
            }
            Err(e) => warn!("cannot watch for ctrl-c: {e}"),
        }
    });
    server.run().await.context("server failed")
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load(&cli)?;
    init_logging(&config, cli.log_level.as_deref())?;
    info!(version = env!("CARGO_PKG_VERSION"), "gantry starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(serve(config, cli.stdio))
}

fn main() {
    if let Err(e) = run() {
        eprintln!("gantry: {e:#}");
        std::process::exit(1);
    }
}
