// Command-line front-end: run SWT, SCA and IC scripts against a loopback card

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::info;

use rust_alf::config::AlfConfig;
use rust_alf::hardware::{CardId, MockBar};
use rust_alf::link::LinkRegistry;
use rust_alf::logging::{init_tracing, LogFormat};
use rust_alf::protocols::{Ic, ScAdapter, Sca, Swt, SwtWordSize};
use rust_alf::sequence::script::{parse_json, parse_script, Script, ScriptOp};
use rust_alf::sequence::{self, RenderStep};

#[derive(Parser)]
#[command(name = "rust_alf", version)]
#[command(about = "Run SWT, SCA and IC sequences on front-end links", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, default_value = "config/alf.toml")]
    config: PathBuf,

    /// Log level (overrides the configuration)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format (overrides the configuration)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,
}

#[derive(Args)]
struct LinkArgs {
    /// Card identifier
    #[arg(long, default_value = "#1")]
    card: String,

    /// Link number on the card
    #[arg(short, long, default_value_t = 0)]
    link: u32,

    /// Channel selected before the sequence runs
    #[arg(long, default_value_t = 0)]
    channel: u32,

    /// Hold the link lock for the whole sequence
    #[arg(long)]
    lock: bool,

    /// Decode the script as a JSON array of operations
    #[arg(long)]
    json: bool,

    /// Script file, `-` for stdin
    script: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an SWT sequence
    Swt {
        #[command(flatten)]
        link: LinkArgs,

        /// SWT word size (overrides the configuration)
        #[arg(long)]
        word_size: Option<SwtWordSize>,
    },

    /// Run an SCA sequence
    Sca {
        #[command(flatten)]
        link: LinkArgs,
    },

    /// Run an IC sequence
    Ic {
        #[command(flatten)]
        link: LinkArgs,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AlfConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.application.log_level.clone());
    let format = match cli.log_format {
        Some(format) => format,
        None => config
            .application
            .log_format
            .parse()
            .map_err(anyhow::Error::msg)?,
    };
    init_tracing(&level, format);

    let bar = Arc::new(MockBar::new());
    let registry = LinkRegistry::from_config(&config, bar);

    let reply = match &cli.command {
        Commands::Swt { link, word_size } => {
            let size = word_size.unwrap_or(config.swt.word_size);
            let swt = Swt::open_with_size(&registry, &CardId::from(link.card.as_str()), link.link, size)?;
            run(swt, link).await?
        }
        Commands::Sca { link } => {
            let sca = Sca::open(&registry, &CardId::from(link.card.as_str()), link.link)?;
            run(sca, link).await?
        }
        Commands::Ic { link } => {
            let ic = Ic::open(&registry, &CardId::from(link.card.as_str()), link.link)?;
            run(ic, link).await?
        }
        Commands::Config => config.to_toml()?,
    };

    print!("{reply}");
    Ok(())
}

async fn run<A>(mut adapter: A, args: &LinkArgs) -> anyhow::Result<String>
where
    A: ScAdapter,
    A::Op: ScriptOp + DeserializeOwned,
    A::Output: RenderStep,
{
    adapter.set_channel(args.channel)?;

    let script: Script<A::Op> = load_script(&args.script, args.json)?;
    let lock = args.lock || script.lock;
    info!(
        protocol = A::PROTOCOL,
        card = %args.card,
        link = args.link,
        channel = args.channel,
        steps = script.ops.len(),
        lock,
        "Running script"
    );

    let results = sequence::execute(&mut adapter, &script.ops, lock).await?;
    Ok(sequence::render(&results)?)
}

fn load_script<T: ScriptOp + DeserializeOwned>(path: &Path, json: bool) -> anyhow::Result<Script<T>> {
    let text = if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("reading script from stdin")?;
        text
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()))?
    };

    if json {
        Ok(Script {
            ops: parse_json(&text)?,
            lock: false,
        })
    } else {
        Ok(parse_script(&text)?)
    }
}
