use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Seek, Write};
use std::path::{Path, PathBuf};

use tracing::info;
use umya_spreadsheet::{Worksheet, reader, writer};

use crate::error::ExportError;
use crate::models::{HEADERS, ResultSet};

/// Destination for a finished brand result set.
pub trait ExportSink {
    fn name(&self) -> &str;
    fn export(&self, brand: &str, results: &ResultSet) -> Result<(), ExportError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ExcelOptions {
    /// Keep the other sheets of an existing workbook.
    pub append_if_exists: bool,
    /// Overwrite a sheet that already carries the brand's name.
    pub replace_sheet_if_exists: bool,
}

impl Default for ExcelOptions {
    fn default() -> Self {
        Self {
            append_if_exists: true,
            replace_sheet_if_exists: true,
        }
    }
}

/// Local `.xlsx` workbook with one sheet per brand.
pub struct ExcelSink {
    path: PathBuf,
    options: ExcelOptions,
}

impl ExcelSink {
    pub fn new(path: impl Into<PathBuf>, options: ExcelOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }
}

impl ExportSink for ExcelSink {
    fn name(&self) -> &str {
        "excel"
    }

    fn export(&self, brand: &str, results: &ResultSet) -> Result<(), ExportError> {
        write_sheet(brand, results, &self.path, &self.options)
    }
}

/// Writes `results` into the sheet named after `brand`.
///
/// The destination is held open for the whole read-modify-write cycle and
/// is only truncated once the new workbook has been serialised.
pub fn write_sheet(
    brand: &str,
    results: &ResultSet,
    path: &Path,
    options: &ExcelOptions,
) -> Result<(), ExportError> {
    let sheet_name = sheet_name(brand);
    let mut file = open_destination(path)?;

    let has_content = file.metadata()?.len() > 0;
    let mut book = if has_content && options.append_if_exists {
        reader::xlsx::read_reader(&file, true).map_err(|e| ExportError::Workbook(e.to_string()))?
    } else {
        umya_spreadsheet::new_file_empty_worksheet()
    };

    if book.get_sheet_by_name(&sheet_name).is_some() {
        if !options.replace_sheet_if_exists {
            return Err(ExportError::SheetExists { sheet: sheet_name });
        }
        book.remove_sheet_by_name(&sheet_name)
            .map_err(|e| ExportError::Workbook(e.to_string()))?;
    }

    let sheet = book
        .new_sheet(sheet_name.as_str())
        .map_err(|e| ExportError::Workbook(e.to_string()))?;
    fill_sheet(sheet, results);

    let mut buf = Cursor::new(Vec::new());
    writer::xlsx::write_writer(&book, &mut buf).map_err(|e| ExportError::Workbook(e.to_string()))?;

    file.set_len(0)?;
    file.rewind()?;
    file.write_all(buf.get_ref())?;
    file.sync_all()?;

    info!(path = %path.display(), sheet = %sheet_name, rows = results.len(), "workbook saved");
    Ok(())
}

fn open_destination(path: &Path) -> Result<File, ExportError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| classify_open_error(e, path))
}

/// Permission and sharing violations mean another program holds the file.
fn classify_open_error(err: io::Error, path: &Path) -> ExportError {
    // 32 and 33 are the Windows sharing and lock violation codes.
    let locked = err.kind() == io::ErrorKind::PermissionDenied
        || matches!(err.raw_os_error(), Some(32 | 33));
    if locked {
        ExportError::FileLocked {
            path: path.to_path_buf(),
        }
    } else {
        ExportError::Io(err)
    }
}

fn fill_sheet(sheet: &mut Worksheet, results: &ResultSet) {
    for (col, title) in HEADERS.iter().enumerate() {
        sheet
            .get_cell_mut((col as u32 + 1, 1u32))
            .set_value_string(*title);
    }
    for (row, values) in results.rows().enumerate() {
        for (col, value) in values.iter().enumerate() {
            sheet
                .get_cell_mut((col as u32 + 1, row as u32 + 2))
                .set_value_string(*value);
        }
    }
}

/// Sheet titles may not contain `[]:*?/\` and are capped at 31 characters.
pub fn sheet_name(brand: &str) -> String {
    let cleaned: String = brand
        .trim()
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            c => c,
        })
        .take(31)
        .collect();
    if cleaned.is_empty() {
        "Sheet".to_string()
    } else {
        cleaned
    }
}
