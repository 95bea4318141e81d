use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use usb_gadgetd::config::GadgetConfig;
use usb_gadgetd::state::AppState;
use usb_gadgetd::web;

/// Log level for the daemon
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// usb-gadgetd command line arguments
#[derive(Parser, Debug)]
#[command(name = "usb-gadgetd")]
#[command(version, about = "USB gadget configuration daemon", long_about = None)]
struct CliArgs {
    /// Listen address for the control plane
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// Listen port for the control plane
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Board configuration file (JSON); defaults apply when omitted
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting usb-gadgetd v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => GadgetConfig::load(path)?,
        None => GadgetConfig::default(),
    };
    if let Some(addr) = args.address {
        config.web.bind_address = addr;
    }
    if let Some(port) = args.port {
        config.web.port = port;
    }

    let gadget_path = config.configfs.gadget_path();
    if !gadget_path.exists() {
        tracing::warn!(
            "ConfigFS gadget tree not found at {} - applies will fail until init creates it",
            gadget_path.display()
        );
    }

    let state = Arc::new(AppState::new(config.clone()));
    let router = web::create_router(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.web.bind_address, config.web.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Control plane listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("usb-gadgetd stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "usb_gadgetd=error,tower_http=error",
        LogLevel::Warn => "usb_gadgetd=warn,tower_http=warn",
        LogLevel::Info => "usb_gadgetd=info,tower_http=info",
        LogLevel::Verbose => "usb_gadgetd=debug,tower_http=info",
        LogLevel::Debug => "usb_gadgetd=debug,tower_http=debug",
        LogLevel::Trace => "usb_gadgetd=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
