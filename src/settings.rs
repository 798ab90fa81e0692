use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::archiver::ExcelOptions;

const ENV_PREFIX: &str = "MONITOR";
const DEFAULT_CONFIG_FILE: &str = "monitor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    Chrome,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExcelSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_excel_path")]
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub append_if_exists: bool,
    #[serde(default = "default_true")]
    pub replace_sheet_if_exists: bool,
}

impl Default for ExcelSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_excel_path(),
            append_if_exists: true,
            replace_sheet_if_exists: true,
        }
    }
}

impl ExcelSettings {
    pub fn options(&self) -> ExcelOptions {
        ExcelOptions {
            append_if_exists: self.append_if_exists,
            replace_sheet_if_exists: self.replace_sheet_if_exists,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleSettings {
    pub credentials_file: PathBuf,
    pub spreadsheet_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_fetcher")]
    pub fetcher: FetcherKind,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
    #[serde(default = "default_render_wait")]
    pub render_wait_secs: u64,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default)]
    pub dump_html_dir: Option<PathBuf>,
    #[serde(default)]
    pub excel: ExcelSettings,
    #[serde(default)]
    pub google: Option<GoogleSettings>,
}

fn default_true() -> bool {
    true
}

fn default_excel_path() -> PathBuf {
    PathBuf::from("goods.xlsx")
}

fn default_urls() -> Vec<String> {
    [
        "https://www.wildberries.ru/brands/vegagreen",
        "https://www.wildberries.ru/brands/naturalno",
        "https://www.wildberries.ru/brands/prosto-zdorovo",
    ]
    .iter()
    .map(|u| u.to_string())
    .collect()
}

fn default_fetcher() -> FetcherKind {
    FetcherKind::Chrome
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36".to_string()
}

fn default_accept_language() -> String {
    "ru".to_string()
}

fn default_render_wait() -> u64 {
    5
}

impl Settings {
    /// Defaults, then `monitor.toml` (or `path`), then `MONITOR_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("urls"),
            )
            .build()
            .context("loading configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.urls.is_empty() {
            anyhow::bail!("no listing urls configured");
        }
        if let Some(google) = &self.google {
            if google.spreadsheet_id.trim().is_empty() {
                anyhow::bail!("google.spreadsheet_id is empty");
            }
        }
        Ok(())
    }
}
