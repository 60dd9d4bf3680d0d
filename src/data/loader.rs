//! Table Loader Module
//! Reads CSV, Parquet, spreadsheet and SQLite sources into Polars DataFrames.

use calamine::{open_workbook_auto, Data, Reader};
use polars::prelude::*;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;

/// Rows sampled when inferring CSV column types.
const INFER_SCHEMA_ROWS: usize = 10_000;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to fetch remote source: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse table: {0}")]
    Parse(#[from] PolarsError),
    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),
    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("Delimiter {0:?} is not a single-byte character")]
    InvalidDelimiter(char),
    #[error("SQL sources require a query")]
    MissingQuery,
    #[error("{0} sources must be local files, got '{1}'")]
    RemoteNotSupported(SourceFormat, String),
}

/// Physical format of a table source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    #[default]
    Csv,
    Parquet,
    Spreadsheet,
    Sql,
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFormat::Csv => write!(f, "CSV"),
            SourceFormat::Parquet => write!(f, "Parquet"),
            SourceFormat::Spreadsheet => write!(f, "Spreadsheet"),
            SourceFormat::Sql => write!(f, "SQL"),
        }
    }
}

/// Text encoding of a CSV source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    #[default]
    Utf8,
    Latin1,
}

fn default_delimiter() -> char {
    ','
}

/// Where a table comes from and how to parse it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Local path or `http(s)://` URL.
    pub location: String,
    #[serde(default)]
    pub format: SourceFormat,
    /// Only used by CSV sources.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub encoding: TextEncoding,
    /// Worksheet name or 0-based index; first sheet when absent.
    #[serde(default)]
    pub sheet: Option<String>,
    /// Query run against SQL sources.
    #[serde(default)]
    pub query: Option<String>,
}

impl SourceDescriptor {
    pub fn csv(location: impl Into<String>, delimiter: char) -> Self {
        Self {
            location: location.into(),
            format: SourceFormat::Csv,
            delimiter,
            encoding: TextEncoding::Utf8,
            sheet: None,
            query: None,
        }
    }

    pub fn parquet(location: impl Into<String>) -> Self {
        Self {
            format: SourceFormat::Parquet,
            ..Self::csv(location, default_delimiter())
        }
    }

    pub fn spreadsheet(location: impl Into<String>, sheet: Option<String>) -> Self {
        Self {
            format: SourceFormat::Spreadsheet,
            sheet,
            ..Self::csv(location, default_delimiter())
        }
    }

    pub fn sql(database: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            format: SourceFormat::Sql,
            query: Some(query.into()),
            ..Self::csv(database, default_delimiter())
        }
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn is_remote(&self) -> bool {
        self.location.starts_with("http://") || self.location.starts_with("https://")
    }

    fn delimiter_byte(&self) -> Result<u8, LoadError> {
        if self.delimiter.is_ascii() {
            Ok(self.delimiter as u8)
        } else {
            Err(LoadError::InvalidDelimiter(self.delimiter))
        }
    }
}

/// Loosely typed cell read from a row-oriented source.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Cell {
    fn from_spreadsheet(value: &Data) -> Self {
        match value {
            Data::Empty | Data::Error(_) => Cell::Null,
            Data::Int(v) => Cell::Int(*v),
            Data::Float(v) => Cell::Float(*v),
            Data::Bool(v) => Cell::Bool(*v),
            Data::String(v) => Cell::Text(v.clone()),
            other => Cell::Text(other.to_string()),
        }
    }

    fn from_sql(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null | ValueRef::Blob(_) => Cell::Null,
            ValueRef::Integer(v) => Cell::Int(v),
            ValueRef::Real(v) => Cell::Float(v),
            ValueRef::Text(bytes) => Cell::Text(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Int(v) => Some(v.to_string()),
            Cell::Float(v) => Some(v.to_string()),
            Cell::Bool(v) => Some(v.to_string()),
            Cell::Text(v) => Some(v.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Int,
    Float,
    Bool,
    Text,
}

/// Stateless loader turning a [`SourceDescriptor`] into a DataFrame.
pub struct DataLoader;

impl DataLoader {
    /// Load a table from any supported source.
    pub fn load(source: &SourceDescriptor) -> Result<DataFrame, LoadError> {
        let started = Instant::now();
        log::info!("Loading {} source '{}'", source.format, source.location);

        let df = match source.format {
            SourceFormat::Csv => Self::read_csv(Self::read_bytes(source)?, source)?,
            SourceFormat::Parquet => ParquetReader::new(Cursor::new(Self::read_bytes(source)?)).finish()?,
            SourceFormat::Spreadsheet => Self::read_spreadsheet(source)?,
            SourceFormat::Sql => Self::read_sql(source)?,
        };
        let df = Self::normalize_categoricals(df)?;

        log::info!(
            "Loaded {} rows x {} columns from '{}' in {:?}",
            df.height(),
            df.width(),
            source.location,
            started.elapsed()
        );
        Ok(df)
    }

    /// Get list of column names of a DataFrame.
    pub fn get_columns(df: &DataFrame) -> Vec<String> {
        df.get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn read_bytes(source: &SourceDescriptor) -> Result<Vec<u8>, LoadError> {
        if source.is_remote() {
            let response = reqwest::blocking::get(&source.location)?.error_for_status()?;
            return Ok(response.bytes()?.to_vec());
        }
        std::fs::read(&source.location).map_err(|e| LoadError::Io {
            path: source.location.clone(),
            source: e,
        })
    }

    fn read_csv(bytes: Vec<u8>, source: &SourceDescriptor) -> Result<DataFrame, LoadError> {
        let separator = source.delimiter_byte()?;
        let bytes = match source.encoding {
            TextEncoding::Utf8 => bytes,
            TextEncoding::Latin1 => latin1_to_utf8(&bytes).into_bytes(),
        };

        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(INFER_SCHEMA_ROWS))
            .map_parse_options(|opts| opts.with_separator(separator))
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish()?;
        Ok(df)
    }

    fn local_path(source: &SourceDescriptor) -> Result<&Path, LoadError> {
        if source.is_remote() {
            return Err(LoadError::RemoteNotSupported(
                source.format,
                source.location.clone(),
            ));
        }
        Ok(Path::new(&source.location))
    }

    fn read_spreadsheet(source: &SourceDescriptor) -> Result<DataFrame, LoadError> {
        let path = Self::local_path(source)?;
        let mut workbook =
            open_workbook_auto(path).map_err(|e| LoadError::Spreadsheet(e.to_string()))?;

        let range = match source.sheet.as_deref() {
            Some(sheet) => match sheet.parse::<usize>() {
                Ok(idx) => workbook
                    .worksheet_range_at(idx)
                    .ok_or_else(|| LoadError::Spreadsheet(format!("no sheet at index {idx}")))?,
                Err(_) => workbook.worksheet_range(sheet),
            },
            None => workbook
                .worksheet_range_at(0)
                .ok_or_else(|| LoadError::Spreadsheet("workbook has no worksheets".into()))?,
        }
        .map_err(|e| LoadError::Spreadsheet(e.to_string()))?;

        let mut rows = range.rows();
        let Some(header_row) = rows.next() else {
            return Ok(DataFrame::empty());
        };
        let headers: Vec<String> = header_row
            .iter()
            .enumerate()
            .map(|(i, cell)| match cell {
                Data::Empty => format!("column_{}", i + 1),
                other => other.to_string(),
            })
            .collect();

        let mut cells: Vec<Vec<Cell>> = vec![Vec::new(); headers.len()];
        for row in rows {
            for (idx, column) in cells.iter_mut().enumerate() {
                column.push(row.get(idx).map(Cell::from_spreadsheet).unwrap_or(Cell::Null));
            }
        }

        Self::build_frame(headers, cells)
    }

    fn read_sql(source: &SourceDescriptor) -> Result<DataFrame, LoadError> {
        let query = source.query.as_deref().ok_or(LoadError::MissingQuery)?;
        let path = Self::local_path(source)?;
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

        let mut stmt = conn.prepare(query)?;
        let headers: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut cells: Vec<Vec<Cell>> = vec![Vec::new(); headers.len()];

        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for (idx, column) in cells.iter_mut().enumerate() {
                column.push(Cell::from_sql(row.get_ref(idx)?));
            }
        }

        Self::build_frame(headers, cells)
    }

    fn build_frame(headers: Vec<String>, cells: Vec<Vec<Cell>>) -> Result<DataFrame, LoadError> {
        let columns = headers
            .iter()
            .zip(cells)
            .map(|(name, values)| cells_to_column(name, &values))
            .collect();
        Ok(DataFrame::new(columns)?)
    }

    /// Categorical and enum columns become plain strings so grouping and
    /// joining compare by value regardless of the source's dictionaries.
    fn normalize_categoricals(df: DataFrame) -> Result<DataFrame, LoadError> {
        let casts: Vec<Expr> = df
            .get_columns()
            .iter()
            .filter(|c| matches!(c.dtype(), DataType::Categorical(..) | DataType::Enum(..)))
            .map(|c| col(c.name().as_str()).cast(DataType::String))
            .collect();

        if casts.is_empty() {
            return Ok(df);
        }
        Ok(df.lazy().with_columns(casts).collect()?)
    }
}

fn latin1_to_utf8(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn infer_kind(cells: &[Cell]) -> CellKind {
    let mut kind: Option<CellKind> = None;
    for cell in cells {
        let current = match cell {
            Cell::Null => continue,
            Cell::Int(_) => CellKind::Int,
            Cell::Float(_) => CellKind::Float,
            Cell::Bool(_) => CellKind::Bool,
            Cell::Text(_) => return CellKind::Text,
        };
        kind = Some(match (kind, current) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(CellKind::Int), CellKind::Float) | (Some(CellKind::Float), CellKind::Int) => {
                CellKind::Float
            }
            _ => return CellKind::Text,
        });
    }
    kind.unwrap_or(CellKind::Text)
}

fn cells_to_column(name: &str, cells: &[Cell]) -> Column {
    match infer_kind(cells) {
        CellKind::Int => {
            let values: Vec<Option<i64>> = cells
                .iter()
                .map(|c| match c {
                    Cell::Int(v) => Some(*v),
                    _ => None,
                })
                .collect();
            Column::new(name.into(), values)
        }
        CellKind::Float => {
            let values: Vec<Option<f64>> = cells
                .iter()
                .map(|c| match c {
                    Cell::Int(v) => Some(*v as f64),
                    Cell::Float(v) => Some(*v),
                    _ => None,
                })
                .collect();
            Column::new(name.into(), values)
        }
        CellKind::Bool => {
            let values: Vec<Option<bool>> = cells
                .iter()
                .map(|c| match c {
                    Cell::Bool(v) => Some(*v),
                    _ => None,
                })
                .collect();
            Column::new(name.into(), values)
        }
        CellKind::Text => {
            let values: Vec<Option<String>> = cells.iter().map(Cell::as_text).collect();
            Column::new(name.into(), values)
        }
    }
}
