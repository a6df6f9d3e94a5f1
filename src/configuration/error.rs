use std::{fmt, io};

use opentelemetry_otlp::ExporterBuildError;
use tracing::debug;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    NotReadable(String),
    ConfigurationFileFormat(String),
    InvalidPattern(String),
    InvalidSetting(String),
    Watch(String),
    ExporterInit(ExporterBuildError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {err}"),
            Error::NotReadable(err) => write!(f, "Configuration not readable: {err}"),
            Error::ConfigurationFileFormat(error) => {
                write!(f, "Configuration file format error: {error}")
            }
            Error::InvalidPattern(error) => write!(f, "Invalid pattern: {error}"),
            Error::InvalidSetting(error) => write!(f, "Invalid setting: {error}"),
            Error::Watch(error) => write!(f, "Configuration watcher error: {error}"),
            Error::ExporterInit(error) => {
                write!(f, "Exporter initialization error: {error}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        debug!("TOML error: {error}");
        Error::ConfigurationFileFormat(error.to_string())
    }
}

impl From<notify::Error> for Error {
    fn from(error: notify::Error) -> Self {
        Error::Watch(error.to_string())
    }
}

impl From<ExporterBuildError> for Error {
    fn from(error: ExporterBuildError) -> Self {
        Error::ExporterInit(error)
    }
}
