use datafusion::{arrow::error::ArrowError, error::DataFusionError};
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("DataFusion: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Arrow: {0}")]
    Arrow(#[from] ArrowError),

    #[error("The date supplied '{date}' is invalid")]
    InvalidDate { date: String },

    #[error("The start date: '{start_date}' is greater than the end date: '{end_date}'")]
    StartDateAfterEndDate {
        start_date: String,
        end_date: String,
    },

    #[error("API request failed: {0}")]
    ApiFailure(#[from] reqwest::Error),

    #[error("API responded with {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("Credential store: {message}")]
    Auth { message: String },

    #[error("Row is missing key column '{column}'")]
    MissingKeyColumn { column: String },

    #[error("Historical table is missing columns: {}", .columns.join(", "))]
    MissingColumns { columns: Vec<String> },

    #[error("Historical store {path}: {message}")]
    Persistence { path: String, message: String },

    #[error("Destination responded with {status}: {body}")]
    Publish { status: StatusCode, body: String },

    #[error("{message}")]
    NoData { message: String },
}
