use std::fmt;

use crate::packet::FrameError;

#[derive(Debug)]
pub enum Error {
    Connect { addr: String, source: std::io::Error },
    NotReady(Box<Error>),
    NotConnected,
    PartialWrite { written: usize },
    InvalidFrame(FrameError),
    Encoding { field: &'static str, value: i64 },
    InvalidTemperature(f64),
    UnknownDevice(u32),
    Roster { line: usize, message: String },
    Io(std::io::Error),
}

impl Error {
    /// Whether the caller should retry later rather than give up.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connect { .. } | Error::NotReady(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connect { addr, source } => write!(f, "cannot connect to {addr}: {source}"),
            Error::NotReady(e) => write!(f, "controller not ready: {e}"),
            Error::NotConnected => write!(f, "not connected"),
            Error::PartialWrite { written } => {
                write!(f, "partial write: {written} of 7 bytes sent")
            }
            Error::InvalidFrame(e) => write!(f, "invalid frame: {e}"),
            Error::Encoding { field, value } => {
                write!(f, "{field} out of byte range: {value}")
            }
            Error::InvalidTemperature(t) => write!(f, "invalid temperature: {t}"),
            Error::UnknownDevice(id) => write!(f, "unknown device: {id}"),
            Error::Roster { line, message } => write!(f, "roster line {line}: {message}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connect { source, .. } => Some(source),
            Error::NotReady(e) => Some(e.as_ref()),
            Error::InvalidFrame(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Error::InvalidFrame(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
