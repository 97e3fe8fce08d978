use thiserror::Error;

/// Failures raised by the simulation and search layers.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid method names, malformed grids or bounds, out-of-range settings.
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    /// Malformed or insufficient input series.
    #[error("Invalid data: {0}")]
    Data(String),
    /// Raised by the caller's strategy; passed through untouched.
    #[error(transparent)]
    Strategy(#[from] anyhow::Error),
    #[error("Search cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Error::Configuration(message.into())
    }

    pub fn data<S: Into<String>>(message: S) -> Self {
        Error::Data(message.into())
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Error::Data(_))
    }
}
