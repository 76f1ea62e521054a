use clap::Parser;
use socksrelay::config::Config;
use socksrelay::server::SocksServer;
use socksrelay::Result;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "socksrelay")]
#[command(about = "SOCKS5 proxy server with TCP tunneling and single-port UDP relay", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Bind port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Generate example configuration file
    #[arg(long, value_name = "FILE")]
    generate_config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(config_path) = args.generate_config {
        Config::create_example(&config_path)?;
        println!("example configuration written to {:?}", config_path);
        return Ok(());
    }

    init_logging(&args.log_level)?;

    info!("socksrelay v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = if let Some(config_path) = args.config {
        info!("loading configuration from {:?}", config_path);
        Config::from_file(config_path)?
    } else {
        info!("no configuration file specified, using defaults");
        Config::default()
    };

    // Apply CLI overrides
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.server.bind_port = port;
    }

    let server = SocksServer::new(config);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("server error: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            server.stop();
        }
    }

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(level)
        .map_err(|e| socksrelay::SocksError::Config(format!("invalid log level: {}", e)))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    Ok(())
}
