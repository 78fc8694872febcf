//! Error types for the simulation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Degenerate point set (fewer than 3 points, or all collinear/coincident)
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// Unknown lattice, division or apoptosis mode string
    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    /// A mode or operation needs a payload that was not supplied
    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Insufficient population: requested {requested} cells, only {available} inner candidates")]
    InsufficientPopulation { requested: usize, available: usize },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
