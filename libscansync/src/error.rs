use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("Header read failed due to TIFF error: {0}")]
    TiffError(#[from] tiff::TiffError),
    #[error("Header key {key} was found but its value {value:?} is not an integer")]
    BadInteger { key: String, value: String },
    #[error("Header key {key} was found but its value {value:?} is not a number")]
    BadFloat { key: String, value: String },
    #[error("Could not interpret epoch text {0:?} as a date/time")]
    BadEpoch(String),
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Could not open image file because {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Image reader failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Image reader failed due to TIFF error: {0}")]
    TiffError(#[from] tiff::TiffError),
    #[error("Image reader failed due to header error: {0}")]
    HeaderError(#[from] HeaderError),
}

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("Image writer failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Image writer failed due to TIFF error: {0}")]
    TiffError(#[from] tiff::TiffError),
    #[error("No output file has been opened for writing")]
    NotOpened,
    #[error("Frame buffer is empty; nothing to write")]
    EmptyFrame,
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Could not open log file because {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Log file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not parse log line timestamp: {0}")]
    BadTimestamp(#[from] time::error::Parse),
    #[error("Log line {0} carries a rotation token but is missing its value fields")]
    MalformedLine(usize),
    #[error("Log line {line} field {field} is not an integer: {value:?}")]
    BadInteger {
        line: usize,
        field: &'static str,
        value: String,
    },
    #[error("Log line {line} field {field} is not a number: {value:?}")]
    BadFloat {
        line: usize,
        field: &'static str,
        value: String,
    },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No image file is open for reading")]
    NoTiffOpen,
    #[error("No output image file is open for writing")]
    NoWriterOpen,
    #[error("Neither a position log nor a rotary log has been loaded")]
    NoLogLoaded,
    #[error("The log file {0:?} carries no acquisition trigger")]
    NoAcquisition(PathBuf),
    #[error("The image file carries no epoch time in its first directory")]
    MissingEpoch,
    #[error("Requested the last {requested} frames but the file holds only {available}")]
    NotEnoughFrames { requested: usize, available: usize },
    #[error("Synchronization failed due to reader error: {0}")]
    ReaderError(#[from] ReaderError),
    #[error("Synchronization failed due to writer error: {0}")]
    WriterError(#[from] WriterError),
    #[error("Synchronization failed due to header error: {0}")]
    HeaderError(#[from] HeaderError),
    #[error("Synchronization failed due to log error: {0}")]
    LogError(#[from] LogError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}
