mod address;
mod backends;
mod config;
mod error;
mod rate;
mod shaping;
mod sync;
mod tc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use crate::address::{AddressRange, HostAddress};
use crate::backends::SystemRunner;
use crate::config::Config;
use crate::error::ShapeError;
use crate::shaping::{Direction, ShapingIntent};
use crate::tc::TrafficControl;
use crate::tc::handle::Handle;

/// tcshaper - per-host bandwidth shaping with tc
#[derive(Parser, Debug)]
#[command(name = "tcshaper")]
#[command(version = "0.3.0")]
#[command(about = "Per-host HTB bandwidth shaping on top of tc", long_about = None)]
struct Args {
    /// Print every issued command (debug logging)
    #[arg(long, global = true)]
    debug: bool,

    /// Config file (default: ~/.config/tcshaper/config.json)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Shape traffic sent by a host
    Egress {
        #[arg(long, default_value = "10.10.10.10")]
        src: String,

        /// Guaranteed rate (e.g. "1mbit", "512kbit")
        #[arg(long, default_value = "1mbit")]
        rate: String,

        /// Ceiling rate (default: same as --rate)
        #[arg(long)]
        ceil: Option<String>,

        #[arg(long, default_value = "eth0")]
        dev: String,
    },

    /// Shape traffic received by a host, via the device's IFB device
    Ingress {
        #[arg(long, default_value = "10.10.10.10")]
        dst: String,

        #[arg(long, default_value = "1mbit")]
        rate: String,

        #[arg(long)]
        ceil: Option<String>,

        #[arg(long, default_value = "eth0")]
        dev: String,
    },

    /// Remove shaping for one host
    Unset {
        #[arg(long, default_value = "10.10.10.10")]
        src: String,

        #[arg(long, default_value = "eth0")]
        dev: String,

        /// Remove the ingress rule from the IFB device instead
        #[arg(long)]
        ingress: bool,
    },

    /// Remove all shaping from a device
    Clear {
        #[arg(long, default_value = "eth0")]
        dev: String,

        /// Tear down ingress redirection and the IFB hierarchy instead
        #[arg(long)]
        ingress: bool,
    },

    /// Show qdiscs, classes and filters of a device
    Stat {
        #[arg(long, default_value = "eth0")]
        dev: String,

        /// Only list classes under this parent (e.g. "1:1")
        #[arg(long, value_name = "HANDLE")]
        parent: Option<Handle>,
    },

    /// Apply every rule from the rule store
    Sync {
        /// Rules file (default: sync.rules_path from the config)
        #[arg(long, value_name = "PATH")]
        rules: Option<PathBuf>,

        /// Only apply rules for addresses inside this range
        #[arg(long, value_name = "CIDR")]
        cidr: Option<String>,

        #[arg(long)]
        dev: Option<String>,

        /// Deadline for the whole pass in seconds
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,
    },
}

fn init_logging(debug: bool) {
    if debug {
        pretty_env_logger::formatted_builder()
            .filter_level(log::LevelFilter::Debug)
            .parse_default_env()
            .init();
    } else if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::formatted_builder()
            .parse_default_env()
            .init();
    }
}

fn run_shaping(config: &Config, command: Command) -> Result<()> {
    let runner = SystemRunner;
    let tc = TrafficControl::new(&runner, config.tc_settings()?)?;

    match command {
        Command::Egress {
            src,
            rate,
            ceil,
            dev,
        } => {
            let intent =
                ShapingIntent::new(&dev, Direction::Egress, &src, &rate, ceil.as_deref())?;
            shaping::reconcile(&tc, &intent)?;
        }
        Command::Ingress {
            dst,
            rate,
            ceil,
            dev,
        } => {
            let intent =
                ShapingIntent::new(&dev, Direction::Ingress, &dst, &rate, ceil.as_deref())?;
            shaping::reconcile(&tc, &intent)?;
        }
        Command::Unset { src, dev, ingress } => {
            let address: HostAddress = src.parse()?;
            let change = shaping::unset(&tc, &dev, direction(ingress), &address)?;
            log::info!("{} {}: {}", dev, address, change);
        }
        Command::Clear { dev, ingress } => {
            let change = shaping::clear(&tc, &dev, direction(ingress))?;
            log::info!("{}: {}", dev, change);
        }
        Command::Stat { dev, parent } => {
            print!("{}", shaping::stat(&tc, &dev, parent)?);
        }
        Command::Sync { .. } => return Err(anyhow!("sync is not a shaping command")),
    }

    Ok(())
}

async fn run_sync_command(
    config: &Config,
    rules: Option<PathBuf>,
    cidr: Option<String>,
    dev: Option<String>,
    timeout: Option<u64>,
) -> Result<()> {
    let rules_path = rules
        .or_else(|| config.sync.rules_path.clone())
        .context("No rules file given (use --rules or sync.rules_path in the config)")?;
    let cidr = cidr.unwrap_or_else(|| config.sync.cidr.clone());
    let range: AddressRange = cidr.parse()?;
    let device = dev.unwrap_or_else(|| config.sync.device.clone());
    let deadline = Duration::from_secs(timeout.unwrap_or(config.sync.timeout_secs));

    let report = sync::run_sync(config.tc_settings()?, rules_path, range, device, deadline).await?;
    if report.failed > 0 {
        return Err(anyhow!("{} rule(s) failed to apply", report.failed));
    }

    Ok(())
}

fn direction(ingress: bool) -> Direction {
    if ingress {
        Direction::Ingress
    } else {
        Direction::Egress
    }
}

/// Exit status for a failed run: 2 when the input was rejected before any
/// command was issued, 1 otherwise
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ShapeError>() {
        Some(e) if e.is_validation() => 2,
        _ => 1,
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Sync {
            rules,
            cidr,
            dev,
            timeout,
        } => run_sync_command(&config, rules, cidr, dev, timeout).await,
        command => run_shaping(&config, command),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(args));

    // A sync worker that hit its deadline may still be blocked in tc
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}
