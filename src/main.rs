//! UniMock - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use unimock::loader::TemplateLoader;
use unimock::{server, MockEngine, MockServerConfig};

#[derive(Parser, Debug)]
#[command(
    name = "unimock",
    about = "File-driven HTTP mock server - route templates, generated values, error injection and latency simulation",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mock-server.yaml")]
    config: PathBuf,

    /// Templates directory (overrides the configuration file)
    #[arg(short, long)]
    templates: Option<PathBuf>,

    /// Listening port (overrides the configuration file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Load templates, report the result and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print default config if requested
    if args.print_config {
        let default_config = include_str!("../config/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    // Load configuration
    let mut config = if args.validate && args.config.exists() {
        MockServerConfig::from_file(&args.config)?
    } else if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::load_or_default(&args.config)
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!(path = ?args.config, "Configuration file not found, using defaults");
        MockServerConfig::default()
    };
    if let Some(templates) = args.templates {
        config.templates.path = templates;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let loader = TemplateLoader::new(&config.templates)?;
    let outcome = loader.load();

    // Validate and exit if requested
    if args.validate {
        println!(
            "Loaded {} templates from {} ({} skipped)",
            outcome.templates.len(),
            loader.root().display(),
            outcome.failed.len()
        );
        for path in &outcome.failed {
            println!("  skipped: {}", path.display());
        }
        return Ok(());
    }

    let engine = Arc::new(MockEngine::new(outcome.templates));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.threads.min)
        .max_blocking_threads(config.threads.max)
        .thread_keep_alive(config.threads.idle_timeout())
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        server::spawn_reload_on_hangup(Arc::clone(&engine), loader);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(
            port = config.port,
            workers = config.threads.min,
            started_at = %chrono::Utc::now().to_rfc3339(),
            "Mock server started"
        );
        server::serve(engine, listener).await?;
        Ok::<(), anyhow::Error>(())
    })
}
