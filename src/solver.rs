//! Fixed-iteration stochastic gradient descent over a planned network.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::SolverConfig;
use crate::data::Dataset;
use crate::ensemble::EnsembleId;
use crate::error::{Error, Result};
use crate::init::Initializer;
use crate::logging;
use crate::network::{Evaluation, Network, Phase};

/// Sees every step of a training run. All methods default to doing nothing.
pub trait TrainingObserver {
    fn forward_visited(&mut self, _iteration: usize, _ensemble: EnsembleId) {}

    fn backward_visited(&mut self, _iteration: usize, _ensemble: EnsembleId) {}

    fn iteration_finished(&mut self, _iteration: usize, _loss: f32) {}
}

impl TrainingObserver for () {}

/// Outcome of one [`Solver::solve`] call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SolveReport {
    pub iterations: usize,
    /// Whether the run stopped early on the convergence threshold
    pub converged: bool,
    /// Loss of the last iteration, `0.0` if none ran
    pub final_loss: f32,
    /// Mean loss over every iteration run, `0.0` if none ran
    pub mean_loss: f32,
    pub elapsed: Duration,
}

pub trait Solver {
    /// Trains `network` on `data`, moving it from `Initialized` to `Stopped`.
    fn solve(&self, network: &mut Network, data: &Dataset) -> Result<SolveReport>;

    /// Accuracy and mean loss of `network` on `data`.
    fn evaluate(&self, network: &mut Network, data: &Dataset) -> Result<Evaluation> {
        network.evaluate(data)
    }
}

/// Plain SGD: one instance per iteration, cycling through the dataset.
#[derive(Debug, Clone)]
pub struct SgdSolver {
    config: SolverConfig,
}

impl SgdSolver {
    pub fn new(config: SolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Moves `network` from `TopologyFixed` to `Initialized` with weights
    /// drawn from the configured seed.
    pub fn initialize(&self, network: &mut Network) -> Result<()> {
        network.initialize_with(&mut Initializer::new(self.config.seed))
    }

    /// Like [`Solver::solve`], reporting every ensemble visit to `observer`.
    ///
    /// The dataset is checked before the network enters `Training`, so a
    /// rejected call leaves it `Initialized`.
    pub fn solve_with_observer(
        &self,
        network: &mut Network,
        data: &Dataset,
        observer: &mut dyn TrainingObserver,
    ) -> Result<SolveReport> {
        if network.phase() != Phase::Initialized {
            return Err(Error::IllegalTransition {
                phase: network.phase(),
                operation: "solve",
            });
        }
        let classes = network.check_dataset(data)?;

        network.begin_training()?;
        let started = Instant::now();
        let outcome = self.run(network, data, &classes, observer);
        network.finish_training();

        let mut report = outcome?;
        report.elapsed = started.elapsed();
        if let Err(err) = logging::log_event("solve_complete", &report) {
            eprintln!("failed to log solve_complete: {err}");
        }
        Ok(report)
    }

    fn run(
        &self,
        network: &mut Network,
        data: &Dataset,
        classes: &[usize],
        observer: &mut dyn TrainingObserver,
    ) -> Result<SolveReport> {
        let config = &self.config;
        let mut recent = VecDeque::with_capacity(config.convergence_window);
        let mut total = 0.0f32;
        let mut final_loss = 0.0f32;
        let mut iterations = 0;
        let mut converged = false;

        for iteration in 0..config.iterations {
            let record = iteration % data.len();
            network.bind_instance(data.instance(record), classes[record])?;
            network.forward_pass(&mut |id| observer.forward_visited(iteration, id))?;
            let loss = network.backward_pass(&mut |id| observer.backward_visited(iteration, id))?;
            network.apply_update(config.learning_rate)?;

            iterations += 1;
            total += loss;
            final_loss = loss;
            observer.iteration_finished(iteration, loss);

            if iterations % config.log_every == 0 {
                let event = serde_json::json!({ "iteration": iteration, "loss": loss });
                if let Err(err) = logging::log_event("iteration", &event) {
                    eprintln!("failed to log iteration: {err}");
                }
            }

            if recent.len() == config.convergence_window {
                recent.pop_front();
            }
            recent.push_back(loss);
            if let Some(threshold) = config.convergence_loss {
                let window_mean = recent.iter().sum::<f32>() / recent.len() as f32;
                if recent.len() == config.convergence_window && window_mean < threshold {
                    converged = true;
                    break;
                }
            }
        }

        Ok(SolveReport {
            iterations,
            converged,
            final_loss,
            mean_loss: if iterations == 0 {
                0.0
            } else {
                total / iterations as f32
            },
            elapsed: Duration::ZERO,
        })
    }
}

impl Solver for SgdSolver {
    fn solve(&self, network: &mut Network, data: &Dataset) -> Result<SolveReport> {
        self.solve_with_observer(network, data, &mut ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::Activation;
    use crate::layers::{data_layer, fully_connected_layer, softmax_loss_layer};
    use crate::shape::Shape;

    fn planned_network() -> Network {
        let mut net = Network::new();
        let input = data_layer(&mut net, Shape::flat(2).unwrap()).unwrap();
        let hidden = fully_connected_layer(&mut net, input, 3, Activation::Tanh).unwrap();
        softmax_loss_layer(&mut net, hidden, 2).unwrap();
        net.fix_topology().unwrap();
        net
    }

    fn small_network() -> Network {
        let mut net = planned_network();
        net.initialize(7).unwrap();
        net
    }

    fn all_weights(net: &Network) -> Vec<f32> {
        net.plan()
            .unwrap()
            .buffers()
            .iter()
            .flat_map(|buffer| buffer.weights().to_vec())
            .collect()
    }

    fn separable() -> Dataset {
        Dataset::from_rows(
            vec![1, -1, 1, -1],
            vec![
                vec![1.0, 0.0],
                vec![0.0, 1.0],
                vec![0.9, 0.2],
                vec![0.1, 0.8],
            ],
        )
        .unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        forward: Vec<(usize, EnsembleId)>,
        backward: Vec<(usize, EnsembleId)>,
        finished: Vec<usize>,
    }

    impl TrainingObserver for Recorder {
        fn forward_visited(&mut self, iteration: usize, ensemble: EnsembleId) {
            self.forward.push((iteration, ensemble));
        }

        fn backward_visited(&mut self, iteration: usize, ensemble: EnsembleId) {
            self.backward.push((iteration, ensemble));
        }

        fn iteration_finished(&mut self, iteration: usize, _loss: f32) {
            self.finished.push(iteration);
        }
    }

    #[test]
    fn runs_exactly_the_configured_iterations_in_order() {
        let mut net = small_network();
        let order = net.topological_order().unwrap();
        let solver = SgdSolver::new(SolverConfig::new(5, 0.1, 7)).unwrap();
        let mut recorder = Recorder::default();

        let report = solver
            .solve_with_observer(&mut net, &separable(), &mut recorder)
            .unwrap();

        assert_eq!(report.iterations, 5);
        assert!(!report.converged);
        assert_eq!(net.phase(), Phase::Stopped);
        assert_eq!(recorder.finished, vec![0, 1, 2, 3, 4]);

        let reversed: Vec<_> = order.iter().rev().copied().collect();
        for iteration in 0..5 {
            let forward: Vec<_> = recorder
                .forward
                .iter()
                .filter(|(i, _)| *i == iteration)
                .map(|(_, id)| *id)
                .collect();
            let backward: Vec<_> = recorder
                .backward
                .iter()
                .filter(|(i, _)| *i == iteration)
                .map(|(_, id)| *id)
                .collect();
            assert_eq!(forward, order);
            assert_eq!(backward, reversed);
        }
        assert_eq!(recorder.forward.len(), 5 * order.len());
        assert_eq!(recorder.backward.len(), 5 * order.len());
    }

    #[test]
    fn solve_requires_initialized_network() {
        let mut net = Network::new();
        let input = data_layer(&mut net, Shape::flat(2).unwrap()).unwrap();
        softmax_loss_layer(&mut net, input, 2).unwrap();
        let solver = SgdSolver::new(SolverConfig::new(3, 0.1, 1)).unwrap();

        assert!(matches!(
            solver.solve(&mut net, &separable()),
            Err(Error::IllegalTransition { phase: Phase::Unbuilt, operation: "solve" })
        ));
        net.fix_topology().unwrap();
        assert!(matches!(
            solver.solve(&mut net, &separable()),
            Err(Error::IllegalTransition { phase: Phase::TopologyFixed, .. })
        ));
        net.initialize(1).unwrap();
        solver.solve(&mut net, &separable()).unwrap();
        assert!(matches!(
            solver.solve(&mut net, &separable()),
            Err(Error::IllegalTransition { phase: Phase::Stopped, .. })
        ));
    }

    #[test]
    fn rejected_dataset_leaves_network_initialized() {
        let mut net = small_network();
        let solver = SgdSolver::new(SolverConfig::new(3, 0.1, 1)).unwrap();

        let wide = Dataset::from_rows(vec![0], vec![vec![1.0, 2.0, 3.0]]).unwrap();
        assert!(matches!(
            solver.solve(&mut net, &wide),
            Err(Error::ShapeMismatch { expected: 2, found: 3 })
        ));
        let many_classes =
            Dataset::from_rows(vec![0, 1, 2], vec![vec![0.0, 0.0]; 3]).unwrap();
        assert!(matches!(
            solver.solve(&mut net, &many_classes),
            Err(Error::LabelOutOfRange { .. })
        ));
        let empty = Dataset::from_rows(vec![], vec![]).unwrap();
        assert!(matches!(
            solver.solve(&mut net, &empty),
            Err(Error::EmptyInput(_))
        ));
        assert_eq!(net.phase(), Phase::Initialized);
    }

    #[test]
    fn initialize_draws_from_configured_seed() {
        let solver = SgdSolver::new(SolverConfig::new(10, 0.1, 99)).unwrap();
        let mut first = planned_network();
        let mut second = planned_network();
        solver.initialize(&mut first).unwrap();
        solver.initialize(&mut second).unwrap();

        assert_eq!(first.phase(), Phase::Initialized);
        assert_eq!(all_weights(&first), all_weights(&second));
        assert!(all_weights(&first).iter().any(|w| *w != 0.0));

        let mut reference = planned_network();
        reference.initialize(99).unwrap();
        assert_eq!(all_weights(&first), all_weights(&reference));

        let mut reseeded = planned_network();
        SgdSolver::new(SolverConfig::new(10, 0.1, 100))
            .unwrap()
            .initialize(&mut reseeded)
            .unwrap();
        assert_ne!(all_weights(&first), all_weights(&reseeded));

        assert!(matches!(
            solver.initialize(&mut first),
            Err(Error::IllegalTransition { phase: Phase::Initialized, .. })
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(SgdSolver::new(SolverConfig::new(3, -1.0, 1)).is_err());
    }

    #[test]
    fn stops_early_once_converged() {
        let mut net = small_network();
        let config = SolverConfig::new(100, 0.1, 7).with_convergence(1e6, 3);
        let report = SgdSolver::new(config)
            .unwrap()
            .solve(&mut net, &separable())
            .unwrap();
        assert!(report.converged);
        assert_eq!(report.iterations, 3);
        assert_eq!(net.phase(), Phase::Stopped);
    }

    #[test]
    fn training_reduces_loss() {
        let mut net = small_network();
        let data = separable();
        let solver = SgdSolver::new(SolverConfig::new(400, 0.2, 7)).unwrap();

        let before = solver.evaluate(&mut net, &data).unwrap();
        let report = solver.solve(&mut net, &data).unwrap();
        let after = solver.evaluate(&mut net, &data).unwrap();

        assert!(report.final_loss.is_finite());
        assert!(after.mean_loss < before.mean_loss);
        assert_eq!(after.accuracy, 1.0);
    }
}
