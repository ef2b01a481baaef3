//! adchoices — cross-frame ad disclosure aggregation
//!
//! Usage:
//!   adchoices simulate scenario.toml          → run a frame-tree scenario, print the report
//!   adchoices simulate s.json --config c.toml → same, with explicit engine config
//!   adchoices encode '[{"title":..}]'         → items to a window-name token
//!   adchoices decode adp-eyJ0aXRsZSI6...      → token or window name back to items
//!   adchoices config                          → print the default config as TOML

use adchoices_core::{codec, AdChoicesConfig, RawItem};
use adchoices_runtime::Scenario;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "adchoices",
    about = "Collect and present ad disclosures across nested frames",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario on a simulated frame tree
    Simulate {
        /// Scenario file (.toml or .json)
        scenario: PathBuf,
        /// Engine config (TOML); overrides the scenario's own
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Encode a JSON item array as a transport token
    Encode {
        /// JSON array, or `-` to read stdin
        items: String,
        /// Print a full window name with this prefix instead of the bare token
        #[arg(short, long)]
        prefix: Option<String>,
    },
    /// Decode a token or `<prefix>-<token>` window name
    Decode {
        token: String,
    },
    /// Print the configuration as TOML
    Config {
        /// Load this file instead of printing defaults
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Commands::Simulate { scenario, config } => {
            let config = config.map(|path| AdChoicesConfig::load(&path));
            let scenario = Scenario::load(&scenario)
                .with_context(|| format!("loading scenario {}", scenario.display()))?;
            let report = scenario.run(config).await?;
            info!(
                "Scenario \"{}\" finished: {} events, {}ms",
                report.name, report.events_dispatched, report.elapsed_ms
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Encode { items, prefix } => {
            let items = if items == "-" {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                items
            };
            let items: Vec<RawItem> = serde_json::from_str(&items).context("items must be a JSON array")?;
            let token = codec::encode(&items)?;
            match prefix {
                Some(prefix) => println!("{}", codec::compose_window_name(&prefix, &token)),
                None => println!("{}", token),
            }
        }

        Commands::Decode { token } => {
            let token = codec::token_from_window_name(&token).unwrap_or(token.as_str());
            let items = codec::try_decode(token)?;
            println!("{}", serde_json::to_string_pretty(&items)?);
        }

        Commands::Config { path } => {
            let config = match path {
                Some(path) => AdChoicesConfig::load(&path),
                None => AdChoicesConfig::default(),
            };
            print!("{}", config.to_toml());
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "adchoices=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
