//! Error types for the chipset core.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// A configuration value is out of range.
    InvalidOption(String),
    /// A snapshot carries the wrong magic bytes or a newer major version.
    IncompatibleSnapshot(String),
    /// A disk or ROM image is malformed.
    FileFormat(format_adf::ImageError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOption(msg) => write!(f, "invalid option: {msg}"),
            Self::IncompatibleSnapshot(msg) => write!(f, "incompatible snapshot: {msg}"),
            Self::FileFormat(err) => write!(f, "file format: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::FileFormat(err) => Some(err),
            _ => None,
        }
    }
}

impl From<format_adf::ImageError> for Error {
    fn from(err: format_adf::ImageError) -> Self {
        Self::FileFormat(err)
    }
}
