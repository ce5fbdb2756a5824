use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("The workbook contains no worksheets")]
    EmptyWorkbook,

    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid exchange rate {0}: must be a positive, finite number")]
    InvalidExchangeRate(f64),

    #[error("Invalid period {year}-{month}: month must be between 1 and 12")]
    InvalidPeriod { year: i32, month: u32 },

    #[error("Invalid account mapping table: {0}")]
    MappingTable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Save rejected: {0}")]
    SaveRejected(String),

    #[error("Row not found: {0}")]
    RowNotFound(String),

    #[error("Workbook error: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConversionError>;
