use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model deserialization error: {0}")]
    Deserialization(#[from] bincode::Error),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Dimension mismatch in {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Appearance basis pseudo-inverse failed: {0}")]
    PseudoInverse(&'static str),

    /// The Gauss-Newton system could not be solved, or produced a
    /// non-finite update.
    #[error("Ill-conditioned Gauss-Newton system at iteration {iteration}")]
    IllConditioned { iteration: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Checks a length against its expected value.
pub(crate) fn ensure_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch {
            what,
            expected,
            actual,
        })
    }
}
