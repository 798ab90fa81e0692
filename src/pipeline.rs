use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};
use url::Url;

use crate::archiver::ExportSink;
use crate::error::{ExportError, FetchError, MissingField};
use crate::fetcher::PageFetcher;
use crate::models::ResultSet;
use crate::parser::{ListingPage, extract_blocks};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Fetching,
    Locating,
    Extracting,
    Exporting,
    Done,
    Failed,
}

#[derive(Debug)]
pub struct ExportFailure {
    pub sink: String,
    pub error: ExportError,
}

/// What happened to one listing URL.
#[derive(Debug)]
pub struct UrlReport {
    pub url: String,
    pub state: PipelineState,
    pub records: usize,
    pub missing: Vec<MissingField>,
    pub fetch_error: Option<FetchError>,
    pub exported_to: Vec<String>,
    pub export_failures: Vec<ExportFailure>,
}

impl UrlReport {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            state: PipelineState::Idle,
            records: 0,
            missing: Vec::new(),
            fetch_error: None,
            exported_to: Vec::new(),
            export_failures: Vec::new(),
        }
    }

    fn enter(&mut self, next: PipelineState) {
        debug!(url = %self.url, from = ?self.state, to = ?next, "pipeline state");
        self.state = next;
    }
}

/// Runs fetch, locate, extract and export for each URL in turn.
pub struct PipelineRunner {
    fetcher: Box<dyn PageFetcher>,
    sinks: Vec<Box<dyn ExportSink>>,
    dump_html_dir: Option<PathBuf>,
}

impl PipelineRunner {
    /// Sinks are attempted in the order given.
    pub fn new(fetcher: Box<dyn PageFetcher>, sinks: Vec<Box<dyn ExportSink>>) -> Self {
        Self {
            fetcher,
            sinks,
            dump_html_dir: None,
        }
    }

    pub fn with_html_dump(mut self, dir: Option<PathBuf>) -> Self {
        self.dump_html_dir = dir;
        self
    }

    pub fn run_all(&self, urls: &[String]) -> Vec<UrlReport> {
        urls.iter().map(|url| self.run_url(url)).collect()
    }

    pub fn run_url(&self, url: &str) -> UrlReport {
        let mut report = UrlReport::new(url);

        report.enter(PipelineState::Fetching);
        let html = match self.fetcher.fetch(url) {
            Ok(html) => html,
            Err(e) => {
                error!(url, error = %e, "page load failed");
                report.fetch_error = Some(e);
                report.enter(PipelineState::Failed);
                return report;
            }
        };
        if let Some(dir) = &self.dump_html_dir {
            dump_html(dir, url, &html);
        }

        report.enter(PipelineState::Locating);
        let page = ListingPage::parse(&html);

        report.enter(PipelineState::Extracting);
        let extraction = extract_blocks(page.blocks());
        report.records = extraction.results.len();
        report.missing = extraction.missing;
        info!(url, "Received {} items", report.records);

        report.enter(PipelineState::Exporting);
        self.export(&extraction.results, &mut report);

        report.enter(PipelineState::Done);
        report
    }

    fn export(&self, results: &ResultSet, report: &mut UrlReport) {
        let Some(brand) = results.brand() else {
            warn!(url = %report.url, "nothing extracted, export skipped");
            return;
        };

        for sink in &self.sinks {
            match sink.export(brand, results) {
                Ok(()) => report.exported_to.push(sink.name().to_string()),
                Err(e) => {
                    error!(sink = sink.name(), brand, error = %e, "export failed");
                    report.export_failures.push(ExportFailure {
                        sink: sink.name().to_string(),
                        error: e,
                    });
                }
            }
        }
    }
}

fn dump_html(dir: &Path, url: &str, html: &str) {
    let path = dir.join(format!("{}.html", page_slug(url)));
    let written = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(&path, html));
    match written {
        Ok(()) => debug!(path = %path.display(), "html saved"),
        Err(e) => warn!(path = %path.display(), error = %e, "could not save html"),
    }
}

/// Last non-empty path segment, e.g. `vegagreen` for `/brands/vegagreen`.
fn page_slug(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.rfind(|s| !s.is_empty()).map(str::to_string))
        })
        .unwrap_or_else(|| "page".to_string())
}
