mod archiver;
mod error;
mod fetcher;
mod logging;
mod models;
mod parser;
mod pipeline;
mod settings;
mod sheets;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use crate::archiver::{ExcelSink, ExportSink};
use crate::fetcher::{ChromeFetcher, HttpFetcher, PageFetcher};
use crate::pipeline::{PipelineRunner, PipelineState};
use crate::settings::{FetcherKind, GoogleSettings, Settings};
use crate::sheets::GoogleSheetsSink;

#[derive(Parser)]
#[command(name = "listing_monitor", about = "Brand listing price monitor")]
struct Cli {
    /// Settings file (default: ./monitor.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Listing page to check; repeat to replace the configured list
    #[arg(short, long = "url")]
    urls: Vec<String>,
    /// Service-account key for the remote spreadsheet
    #[arg(long)]
    credentials: Option<PathBuf>,
    /// Target spreadsheet id
    #[arg(long)]
    spreadsheet_id: Option<String>,
}

fn main() -> Result<()> {
    logging::init()?;
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    apply_overrides(&mut settings, cli)?;

    let runner = PipelineRunner::new(build_fetcher(&settings)?, build_sinks(&settings))
        .with_html_dump(settings.dump_html_dir.clone());

    let reports = runner.run_all(&settings.urls);

    for report in &reports {
        if let Some(e) = &report.fetch_error {
            warn!(url = %report.url, error = %e, "url skipped");
            continue;
        }
        for failure in &report.export_failures {
            warn!(url = %report.url, sink = %failure.sink, error = %failure.error, "not exported");
        }
        info!(
            url = %report.url,
            state = ?report.state,
            records = report.records,
            skipped_blocks = report.missing.len(),
            exported_to = ?report.exported_to,
            "url summary"
        );
    }

    let done = reports
        .iter()
        .filter(|r| r.state == PipelineState::Done)
        .count();
    let records: usize = reports.iter().map(|r| r.records).sum();
    info!(urls = reports.len(), done, records, "run finished");
    Ok(())
}

fn apply_overrides(settings: &mut Settings, cli: Cli) -> Result<()> {
    if !cli.urls.is_empty() {
        settings.urls = cli.urls;
    }

    if let Some(google) = settings.google.as_mut() {
        if let Some(creds) = cli.credentials {
            google.credentials_file = creds;
        }
        if let Some(id) = cli.spreadsheet_id {
            google.spreadsheet_id = id;
        }
        return Ok(());
    }

    match (cli.credentials, cli.spreadsheet_id) {
        (None, None) => {}
        (Some(credentials_file), Some(spreadsheet_id)) => {
            settings.google = Some(GoogleSettings {
                credentials_file,
                spreadsheet_id,
            });
        }
        _ => anyhow::bail!("--credentials and --spreadsheet-id must be given together"),
    }
    Ok(())
}

fn build_fetcher(settings: &Settings) -> Result<Box<dyn PageFetcher>> {
    let fetcher: Box<dyn PageFetcher> = match settings.fetcher {
        FetcherKind::Chrome => Box::new(ChromeFetcher::new(
            &settings.user_agent,
            &settings.accept_language,
            Duration::from_secs(settings.render_wait_secs),
            settings.headless,
        )),
        FetcherKind::Http => Box::new(
            HttpFetcher::new(&settings.user_agent, &settings.accept_language)
                .context("building http client")?,
        ),
    };
    Ok(fetcher)
}

/// Local workbook first, remote spreadsheet second.
fn build_sinks(settings: &Settings) -> Vec<Box<dyn ExportSink>> {
    let mut sinks: Vec<Box<dyn ExportSink>> = Vec::new();

    if settings.excel.enabled {
        sinks.push(Box::new(ExcelSink::new(
            settings.excel.path.clone(),
            settings.excel.options(),
        )));
    }

    match &settings.google {
        Some(google) => {
            match GoogleSheetsSink::from_key_file(&google.credentials_file, &google.spreadsheet_id) {
                Ok(sink) => sinks.push(Box::new(sink)),
                Err(e) => warn!(error = %format!("{e:#}"), "google sheets export disabled"),
            }
        }
        None => warn!("no google settings, remote export disabled"),
    }

    sinks
}
