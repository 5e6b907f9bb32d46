//! CLI for pulsewatch: real-time cun/guan/chi pulse acquisition.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pulsewatch")]
#[command(about = "Stream notch-filtered cun/guan/chi pulse waveforms")]
#[command(version = pulsewatch_core::VERSION)]
struct Cli {
    /// JSON config file with optional `pipeline` and `server` sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "pulsewatch_core=trace" (default: RUST_LOG, else info)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP control API and WebSocket sample stream
    Serve {
        /// Bind address
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Connect to this port at startup (e.g. DEBUG_COM1 or /dev/ttyUSB0)
        #[arg(long)]
        connect: Option<String>,

        /// Baud rate for --connect
        #[arg(long)]
        baudrate: Option<u32>,
    },

    /// List serial ports and debug ports
    Ports,

    /// Print filtered samples as JSON lines without starting a server
    Simulate {
        /// Number of samples to print
        #[arg(long, default_value = "20")]
        count: usize,

        /// Fixed seed for the simulator noise
        #[arg(long)]
        seed: Option<u64>,

        /// Source to read from: a DEBUG_* port for the simulator, or a real port
        #[arg(long, default_value = "DEBUG_COM1")]
        port: String,

        /// Baud rate for a real port
        #[arg(long)]
        baudrate: Option<u32>,
    },
}

fn init_logging(filter: Option<&str>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(filter) = filter {
        builder.parse_filters(filter);
    }
    builder.init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());
    let file = commands::FileConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            connect,
            baudrate,
        } => commands::serve::run(commands::serve::ServeOptions {
            file,
            host,
            port,
            connect,
            baudrate,
        }),
        Commands::Ports => commands::ports::run(file.pipeline),
        Commands::Simulate {
            count,
            seed,
            port,
            baudrate,
        } => commands::simulate::run(file.pipeline, count, seed, &port, baudrate),
    }
}
