//! # Latte
//!
//! A small computation-graph engine for layered neural networks. A model is
//! declared as ensembles of neurons joined by connection policies, planned
//! into contiguous parameter buffers, seeded with Xavier-uniform weights and
//! trained by stochastic gradient descent.
//!
//! ## Quick Start
//!
//! ```rust
//! use latte::layers::{data_layer, fully_connected_layer, softmax_loss_layer};
//! use latte::{parse_libsvm, Activation, Network, SgdSolver, Shape, Solver, SolverConfig};
//!
//! let data = parse_libsvm("1 1:1.0 2:0.0\n-1 1:0.0 2:1.0\n").unwrap();
//!
//! let mut net = Network::new();
//! let input = data_layer(&mut net, Shape::flat(data.n_features()).unwrap()).unwrap();
//! let hidden = fully_connected_layer(&mut net, input, 4, Activation::Tanh).unwrap();
//! softmax_loss_layer(&mut net, hidden, 2).unwrap();
//!
//! net.fix_topology().unwrap();
//!
//! let solver = SgdSolver::new(SolverConfig::new(100, 0.1, 42)).unwrap();
//! solver.initialize(&mut net).unwrap();
//! let report = solver.solve(&mut net, &data).unwrap();
//! assert_eq!(report.iterations, 100);
//! let evaluation = solver.evaluate(&mut net, &data).unwrap();
//! println!("accuracy: {}", evaluation.accuracy);
//! ```
//!
//! ## Core Modules
//!
//! - [`shape`] - Two-dimensional shapes and indices
//! - [`connection`] - Connection policies mapping neurons between ensembles
//! - [`network`] - Graph declaration, lifecycle and the forward/backward passes
//! - [`planner`] - Parameter buffers allocated once the topology is fixed
//! - [`init`] - Seeded Xavier-uniform initialization
//! - [`solver`] - SGD training loop
//! - [`data`] - Sparse text datasets
//! - [`config`] - Solver and logging configuration via TOML
//! - [`logging`] - JSON line-delimited logging

pub mod config;
pub mod connection;
pub mod data;
pub mod ensemble;
pub mod error;
pub mod init;
pub mod layers;
pub mod logging;
pub mod loss;
pub mod network;
pub mod neuron;
pub mod parallel;
pub mod planner;
pub mod shape;
pub mod solver;

pub use config::{ConfigError, LatteConfig, LoggingConfig, SolverConfig};
pub use connection::{Connection, Link, ParamShape, Topology, WeightLayout, Windowed};
pub use data::{load_libsvm, parse_libsvm, Dataset, DatasetError};
pub use ensemble::{Activation, Ensemble, EnsembleId};
pub use error::{Error, Result};
pub use init::{xavier_limit, xavier_uniform, Initializer};
pub use loss::Loss;
pub use network::{ConnectionId, Edge, Evaluation, Network, Phase};
pub use neuron::Neuron;
pub use planner::{plan, BufferHandle, MemoryPlan, ParamBuffer, PlanSummary};
pub use shape::{Index, Shape};
pub use solver::{SgdSolver, SolveReport, Solver, TrainingObserver};
