//! Error taxonomy shared by every stage of the graph lifecycle.

use thiserror::Error;

use crate::config::ConfigError;
use crate::data::DatasetError;
use crate::ensemble::EnsembleId;
use crate::network::Phase;
use crate::shape::{Index, Shape};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // Precondition violations.
    #[error("invalid shape {rows}x{cols}: both dimensions must be at least 1")]
    InvalidShape { rows: usize, cols: usize },
    #[error("connection {connection} implies a zero-sized parameter buffer")]
    ZeroSizedBuffer { connection: usize },
    #[error("empty input to {0}")]
    EmptyInput(&'static str),
    #[error("invalid window: {0}")]
    InvalidWindow(String),

    // Topology errors.
    #[error("{0} is not owned by this network")]
    UnknownEnsemble(EnsembleId),
    #[error("connection {upstream} -> {downstream} would create a cycle")]
    Cycle {
        upstream: EnsembleId,
        downstream: EnsembleId,
    },
    #[error("connection {upstream} -> {downstream} is already declared")]
    DuplicateConnection {
        upstream: EnsembleId,
        downstream: EnsembleId,
    },
    #[error("{policy} connection cannot map {upstream} onto {downstream}")]
    IncompatibleShapes {
        policy: &'static str,
        upstream: Shape,
        downstream: Shape,
    },
    #[error("index {index} lies outside shape {shape}")]
    IndexOutOfBounds { index: Index, shape: Shape },
    #[error("network declares no connections")]
    EmptyGraph,
    #[error("no {0} ensemble has been designated")]
    MissingEndpoint(&'static str),
    #[error("input {0} must not have incoming connections")]
    InputHasUpstream(EnsembleId),
    #[error("instance has {found} features but the input ensemble holds {expected} neurons")]
    ShapeMismatch { expected: usize, found: usize },
    #[error("label {label} is outside the {classes} output neurons")]
    LabelOutOfRange { label: usize, classes: usize },

    // Lifecycle ordering.
    #[error("cannot {operation} while the network is {phase}")]
    IllegalTransition {
        phase: Phase,
        operation: &'static str,
    },

    // Boundary collaborators.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
