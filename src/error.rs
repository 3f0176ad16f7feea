use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HsaError {
    #[error("invalid sky box: {0}")]
    InvalidBox(String),

    #[error("invalid observation id: {0}")]
    InvalidObservationId(String),

    #[error("malformed footprint: {0}")]
    Footprint(String),

    #[error("missing table column: {0}")]
    MissingColumn(String),

    #[error("non-numeric value in column {column}: {value}")]
    NonNumericValue { column: String, value: String },

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("empty query result for: {0}")]
    EmptyQuery(String),

    #[error("HSA request failed: {0}")]
    HsaHttp(String),

    #[error("HSA returned status {status}: {message}")]
    HsaStatus { status: u16, message: String },

    #[error("MAST request failed: {0}")]
    MastHttp(String),

    #[error("MAST returned status {status}: {message}")]
    MastStatus { status: u16, message: String },

    #[error("MAST bundle response missing download url: {0}")]
    MastBundle(String),

    #[error("IRSA dust request failed: {0}")]
    DustHttp(String),

    #[error("IRSA dust service returned status {status}: {message}")]
    DustStatus { status: u16, message: String },

    #[error("could not parse dust response: {0}")]
    DustParse(String),

    #[error("missing config file hsa-fp.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("plot error: {0}")]
    Plot(String),
}
