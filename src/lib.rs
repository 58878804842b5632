//! Encrypted statistics over an approximate homomorphic (CKKS-style) backend.
//!
//! Vectors are split into slot-sized blocks; every block carries the same
//! level and scale. Statistic circuits (z-score, skewness, kurtosis, Pearson
//! correlation) need `1/σ`, which is computed by a Chebyshev initial guess
//! followed by Newton refinement. The adaptive policy reads its schedule
//! from a per-level [`ParameterTable`] produced offline by [`optimize`].

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, missing_docs)]

pub mod arith;
pub mod backend;
pub mod chebyshev;
pub mod engine;
pub mod error;
pub mod metric;
pub mod optimizer;
pub mod params;
pub mod sim;
pub mod solver;
pub mod stats;
pub mod table;
pub mod vector;

pub use backend::Backend;
pub use chebyshev::ChebyshevPoly;
pub use engine::{Engine, Vector};
pub use error::{Result, StatError};
pub use optimizer::{optimize, select_table, OptimizerConfig, OptimizerReport};
pub use params::CkksParams;
pub use sim::SimBackend;
pub use solver::{ChebyshevMode, NewtonMode, Solver};
pub use stats::{InvStdPolicy, StatCircuits};
pub use table::{ParameterEntry, ParameterTable, Policy, PreBootstrap};
pub use vector::EncryptedVector;
