//! Error taxonomy shared by every layer of the crate.

use thiserror::Error;

/// Everything that can go wrong, from backend primitives up to the optimizer.
#[derive(Debug, Error)]
pub enum StatError {
    /// Operands carry different fixed-point scales.
    #[error("scale mismatch: {left} vs {right}")]
    ScaleMismatch {
        /// Scale of the left operand
        left: f64,
        /// Scale of the right operand
        right: f64,
    },

    /// An operation needs more multiplicative depth than the operand has left.
    #[error("insufficient depth: level {level}, need at least {required}")]
    InsufficientDepth {
        /// Level of the operand
        level: usize,
        /// Level the operation needs
        required: usize,
    },

    /// Bootstrapping was requested from a backend without the keys.
    #[error("the backend was not configured with bootstrapping keys")]
    BootstrapUnsupported,

    /// Any other failure reported by the backend.
    #[error("backend failure: {0}")]
    Backend(String),

    /// The adaptive policy has no schedule for the input level.
    #[error("no parameter table entry for level {level}")]
    MissingParameterEntry {
        /// Level that was looked up
        level: usize,
    },

    /// Arguments outside the accepted domain.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A circuit step failed; `step` names it.
    #[error("{step}: {source}")]
    Step {
        /// Name of the failing step
        step: &'static str,
        /// The failure inside that step
        #[source]
        source: Box<StatError>,
    },

    /// Reading or writing a table file failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A table file is not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StatError {
    /// Strips every `Step` annotation and returns the underlying failure.
    pub fn root_cause(&self) -> &StatError {
        let mut err = self;
        while let StatError::Step { source, .. } = err {
            err = source;
        }
        err
    }

    /// Names of the annotated steps, outermost first.
    pub fn steps(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        let mut err = self;
        while let StatError::Step { step, source } = err {
            out.push(*step);
            err = source;
        }
        out
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StatError>;

/// Attaches the failing step's name to an error.
pub(crate) trait StepContext<T> {
    fn step(self, name: &'static str) -> Result<T>;
}

impl<T> StepContext<T> for Result<T> {
    fn step(self, name: &'static str) -> Result<T> {
        self.map_err(|source| StatError::Step {
            step: name,
            source: Box::new(source),
        })
    }
}
