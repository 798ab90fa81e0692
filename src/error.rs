use std::path::PathBuf;

use thiserror::Error;

/// Failure to obtain the rendered HTML of a listing page.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("browser failed on {url}: {message}")]
    Browser { url: String, message: String },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
}

/// Required field that could not be read from a product block.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    #[error("brand")]
    Brand,
    #[error("catalog_id")]
    CatalogId,
    #[error("name")]
    Name,
    #[error("price")]
    Price,
    #[error("detail_url")]
    DetailUrl,
}

/// A sink could not persist an assembled result set.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("{} is locked by another process, close it and rerun", path.display())]
    FileLocked { path: PathBuf },

    #[error("no worksheet named '{sheet}' in the target spreadsheet")]
    SheetNotFound { sheet: String },

    #[error("sheet '{sheet}' already exists and replacing is disabled")]
    SheetExists { sheet: String },

    #[error("spreadsheet api returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("authorization failed: {0}")]
    Auth(String),

    #[error("workbook error: {0}")]
    Workbook(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_displays_field_name() {
        assert_eq!(MissingField::Brand.to_string(), "brand");
        assert_eq!(MissingField::CatalogId.to_string(), "catalog_id");
        assert_eq!(MissingField::DetailUrl.to_string(), "detail_url");
    }

    #[test]
    fn locked_file_message_names_path() {
        let err = ExportError::FileLocked {
            path: PathBuf::from("goods.xlsx"),
        };
        assert!(err.to_string().contains("goods.xlsx"));
    }
}
