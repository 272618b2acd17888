use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::{fs, time::Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

mod browser;
mod config;
mod convert;
mod download;
mod error;
#[cfg(test)]
mod fake;
mod language;
mod logging;
mod lotsawa;
mod observe;
mod placement;
mod poller;
mod run;
mod util;

use browser::{ChromiumSession, Session, SessionConfig};
use config::{Overrides, ScrapeConfig};
use download::Timing;
use observe::TracingObserver;

#[derive(Parser, Debug)]
#[command(version, about = "Download Lotsawa House prayers as EPUBs, sorted by topic")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    scrape: ScrapeArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download every prayer listed on the topic page (default)
    Scrape(ScrapeArgs),
    /// Copy every .epub under INPUT to a .zip under OUTPUT
    EpubToZip(ConvertArgs),
    /// Unpack every .zip under INPUT into a folder under OUTPUT
    Extract(ConvertArgs),
    /// Turn extracted EPUB folders into JSON files
    HtmlToJson(ConvertArgs),
    /// Turn JSON files into folders of bo.txt / en.txt
    JsonToFolder(ConvertArgs),
}

#[derive(Args, Debug)]
struct ScrapeArgs {
    /// Topic landing page
    #[arg(long)]
    base_url: Option<String>,

    /// Output directory, also used as the download directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Seconds to wait between page actions and documents
    #[arg(long)]
    delay: Option<f64>,

    /// Run the browser without a window
    #[arg(long)]
    headless: bool,

    /// TOML file with scraper settings
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    input: PathBuf,
    output: PathBuf,
}

#[async_std::main]
async fn main() -> Result<()> {
    let start = Instant::now();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Scrape(cli.scrape)) {
        Command::Scrape(args) => scrape(args).await?,
        Command::EpubToZip(args) => run_converter(convert::epub_zip::convert, args)?,
        Command::Extract(args) => run_converter(convert::extract::extract_all, args)?,
        Command::HtmlToJson(args) => run_converter(convert::html_json::convert, args)?,
        Command::JsonToFolder(args) => run_converter(convert::json_folder::convert, args)?,
    }

    info!("Done in {:.2?}", start.elapsed());
    Ok(())
}

fn run_converter(
    converter: fn(&Path, &Path) -> Result<convert::Summary>,
    args: ConvertArgs,
) -> Result<()> {
    logging::init_logging(&ScrapeConfig::default().log_dir)?;
    let summary = converter(&args.input, &args.output)?;
    info!("{}/{} item(s) converted", summary.converted, summary.found);
    Ok(())
}

async fn scrape(args: ScrapeArgs) -> Result<()> {
    let overrides = Overrides {
        base_url: args.base_url,
        output_dir: args.output_dir,
        delay_secs: args.delay,
        headless: args.headless,
    };
    let mut config = ScrapeConfig::load(args.config.as_deref(), overrides)?;
    logging::init_logging(&config.log_dir)?;

    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;
    config.output_dir = config.output_dir.canonicalize()?;
    info!("Download directory: {}", config.output_dir.display());

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        if run::request_cancel(&flag) {
            warn!("Interrupted twice; exiting now");
            std::process::exit(130);
        }
        warn!("Interrupt received; stopping after the current document (Ctrl-C again to force)");
    })
    .context("failed to install Ctrl-C handler")?;

    let mut session = ChromiumSession::start(&SessionConfig {
        headless: config.headless,
        download_dir: config.output_dir.clone(),
        action_delay: config.delay(),
    })
    .await
    .context("failed to start the browser")?;

    let result = run::scrape(
        &mut session,
        &config.base_url,
        &config.output_dir,
        Timing::from(&config),
        &cancel,
        &TracingObserver,
    )
    .await;

    if let Err(e) = session.close().await {
        warn!("Error closing browser: {}", e);
    }

    match result {
        Ok(stats) => {
            info!("{} of {} texts downloaded", stats.succeeded, stats.total);
            Ok(())
        }
        Err(e) => {
            error!("Scraping stopped: {}", e);
            Err(e.into())
        }
    }
}
