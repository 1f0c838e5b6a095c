//! troxy - CLI entry point

// Use mimalloc as global allocator for better p99 latency
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use troxy::{App, Config, VERSION};

#[derive(Parser, Debug)]
#[command(name = "troxy")]
#[command(version = VERSION)]
#[command(about = "Local SOCKS5 proxy relaying through a Trojan-over-TLS server")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", default_value = "config.yaml")]
    config: PathBuf,

    /// Validate configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,
}

fn main() -> anyhow::Result<()> {
    // Install aws-lc-rs as the default crypto provider for rustls
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .enable_all()
        .thread_name("troxy-worker")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Config first: the log level comes from it
    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config)?;
    info!("troxy v{}", VERSION);
    info!("Configuration loaded from {}", args.config.display());

    if args.test {
        info!("Configuration test passed");
        return Ok(());
    }

    let app = match App::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!("Fatal: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("troxy={}", config.log.tracing_level()).parse()?);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
    Ok(())
}
