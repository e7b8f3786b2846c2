//! The ensemble graph: declaration, planning, and the forward/backward passes.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;
use serde::Serialize;

use crate::connection::{Connection, Link, WeightLayout};
use crate::data::Dataset;
use crate::ensemble::{Activation, Ensemble, EnsembleId};
use crate::error::{Error, Result};
use crate::init::Initializer;
use crate::logging;
use crate::loss::{argmax, Loss};
use crate::parallel;
use crate::planner::{self, MemoryPlan, ParamBuffer};
use crate::shape::Shape;

static NEXT_NETWORK_ID: AtomicU32 = AtomicU32::new(0);

/// Lifecycle of a network. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// Ensembles and connections may still be declared.
    Unbuilt,
    /// Buffers are planned; the graph is frozen.
    TopologyFixed,
    /// Buffers hold their initial weights.
    Initialized,
    Training,
    Stopped,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Unbuilt => "unbuilt",
            Phase::TopologyFixed => "topology-fixed",
            Phase::Initialized => "initialized",
            Phase::Training => "training",
            Phase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Handle to a connection; also names the buffer planned for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(usize);

impl ConnectionId {
    pub fn position(&self) -> usize {
        self.0
    }
}

/// A declared connection between two ensembles of one network.
#[derive(Debug, Clone)]
pub struct Edge {
    id: ConnectionId,
    upstream: EnsembleId,
    downstream: EnsembleId,
    link: Link,
}

impl Edge {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn upstream(&self) -> EnsembleId {
        self.upstream
    }

    pub fn downstream(&self) -> EnsembleId {
        self.downstream
    }

    pub fn link(&self) -> &Link {
        &self.link
    }
}

/// Accuracy and loss over a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub samples: usize,
    pub accuracy: f32,
    pub mean_loss: f32,
}

/// Owns every ensemble, connection and planned buffer of one model.
///
/// # Examples
///
/// ```
/// use latte::{Connection, Loss, Network, Shape};
///
/// let mut net = Network::new();
/// let input = net.create_ensemble(Shape::flat(4).unwrap()).unwrap();
/// let output = net.create_ensemble(Shape::flat(2).unwrap()).unwrap();
/// net.add_connection(input, output, Connection::fully_connected()).unwrap();
/// net.set_input(input).unwrap();
/// net.set_output(output, Loss::SoftmaxCrossEntropy).unwrap();
///
/// let plan = net.fix_topology().unwrap();
/// assert_eq!(plan.total_parameters(), 8);
/// net.initialize(42).unwrap();
/// let class = net.predict(&[0.1, 0.2, 0.3, 0.4]).unwrap();
/// assert!(class < 2);
/// ```
#[derive(Debug)]
pub struct Network {
    id: u32,
    phase: Phase,
    ensembles: Vec<Ensemble>,
    edges: Vec<Edge>,
    order: Vec<usize>,
    plan: Option<MemoryPlan>,
    input: Option<EnsembleId>,
    output: Option<(EnsembleId, Loss)>,
    target: Option<usize>,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    pub fn new() -> Self {
        Self {
            id: NEXT_NETWORK_ID.fetch_add(1, Ordering::Relaxed),
            phase: Phase::Unbuilt,
            ensembles: Vec::new(),
            edges: Vec::new(),
            order: Vec::new(),
            plan: None,
            input: None,
            output: None,
            target: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub fn ensembles(&self) -> &[Ensemble] {
        &self.ensembles
    }

    pub fn ensemble(&self, id: EnsembleId) -> Result<&Ensemble> {
        Ok(&self.ensembles[self.slot_of(id)?])
    }

    pub fn connections(&self) -> &[Edge] {
        &self.edges
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Edge> {
        self.edges.get(id.0)
    }

    /// The memory plan, once the topology is fixed.
    pub fn plan(&self) -> Option<&MemoryPlan> {
        self.plan.as_ref()
    }

    /// Buffer planned for connection `id`.
    pub fn buffer(&self, id: ConnectionId) -> Option<&ParamBuffer> {
        self.plan.as_ref().and_then(|plan| plan.buffers().get(id.0))
    }

    pub fn input(&self) -> Option<EnsembleId> {
        self.input
    }

    pub fn output(&self) -> Option<EnsembleId> {
        self.output.map(|(id, _)| id)
    }

    /// Values of the output ensemble after the last forward pass.
    pub fn output_values(&self) -> Result<Vec<f32>> {
        let (output, _) = self.output.ok_or(Error::MissingEndpoint("output"))?;
        Ok(self.ensemble(output)?.values())
    }

    fn require(&self, phase: Phase, operation: &'static str) -> Result<()> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(Error::IllegalTransition {
                phase: self.phase,
                operation,
            })
        }
    }

    fn slot_of(&self, id: EnsembleId) -> Result<usize> {
        if id.network == self.id && id.slot < self.ensembles.len() {
            Ok(id.slot)
        } else {
            Err(Error::UnknownEnsemble(id))
        }
    }

    pub fn create_ensemble(&mut self, shape: Shape) -> Result<EnsembleId> {
        self.create_ensemble_with(shape, Activation::Identity)
    }

    pub fn create_ensemble_with(
        &mut self,
        shape: Shape,
        activation: Activation,
    ) -> Result<EnsembleId> {
        self.require(Phase::Unbuilt, "create an ensemble")?;
        let id = EnsembleId {
            network: self.id,
            slot: self.ensembles.len(),
        };
        self.ensembles.push(Ensemble::new(id, shape, activation));
        Ok(id)
    }

    /// Declares that `downstream` reads `upstream` through `policy`.
    ///
    /// Rejected without touching the graph when either ensemble belongs to
    /// another network, the pair is already connected, the shapes do not
    /// suit the policy, or the edge would close a cycle.
    pub fn add_connection(
        &mut self,
        upstream: EnsembleId,
        downstream: EnsembleId,
        policy: Connection,
    ) -> Result<ConnectionId> {
        self.require(Phase::Unbuilt, "add a connection")?;
        let up = self.slot_of(upstream)?;
        let down = self.slot_of(downstream)?;
        if up == down || self.reaches(down, up) {
            return Err(Error::Cycle {
                upstream,
                downstream,
            });
        }
        if self
            .edges
            .iter()
            .any(|edge| edge.upstream == upstream && edge.downstream == downstream)
        {
            return Err(Error::DuplicateConnection {
                upstream,
                downstream,
            });
        }
        let link = Link::new(
            policy,
            self.ensembles[up].shape(),
            self.ensembles[down].shape(),
        )?;
        let id = ConnectionId(self.edges.len());
        self.edges.push(Edge {
            id,
            upstream,
            downstream,
            link,
        });
        Ok(id)
    }

    /// Whether a path of connections leads from slot `from` to slot `to`.
    fn reaches(&self, from: usize, to: usize) -> bool {
        let mut seen = vec![false; self.ensembles.len()];
        let mut stack = vec![from];
        while let Some(slot) = stack.pop() {
            if slot == to {
                return true;
            }
            if std::mem::replace(&mut seen[slot], true) {
                continue;
            }
            stack.extend(
                self.edges
                    .iter()
                    .filter(|edge| edge.upstream.slot == slot)
                    .map(|edge| edge.downstream.slot),
            );
        }
        false
    }

    /// Designates the ensemble that receives bound instances.
    pub fn set_input(&mut self, id: EnsembleId) -> Result<()> {
        self.require(Phase::Unbuilt, "designate the input")?;
        self.slot_of(id)?;
        self.input = Some(id);
        Ok(())
    }

    /// Designates the ensemble whose values feed `loss`.
    pub fn set_output(&mut self, id: EnsembleId, loss: Loss) -> Result<()> {
        self.require(Phase::Unbuilt, "designate the output")?;
        self.slot_of(id)?;
        self.output = Some((id, loss));
        Ok(())
    }

    /// Creation-ordered topological order (Kahn's algorithm, smallest slot first).
    pub fn topological_order(&self) -> Result<Vec<EnsembleId>> {
        Ok(self
            .order_slots()?
            .into_iter()
            .map(|slot| self.ensembles[slot].id())
            .collect())
    }

    fn order_slots(&self) -> Result<Vec<usize>> {
        let mut in_degree = vec![0usize; self.ensembles.len()];
        for edge in &self.edges {
            in_degree[edge.downstream.slot] += 1;
        }
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(slot, _)| Reverse(slot))
            .collect();

        let mut order = Vec::with_capacity(self.ensembles.len());
        while let Some(Reverse(slot)) = ready.pop() {
            order.push(slot);
            for edge in self.edges.iter().filter(|edge| edge.upstream.slot == slot) {
                let degree = &mut in_degree[edge.downstream.slot];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(edge.downstream.slot));
                }
            }
        }

        if order.len() == self.ensembles.len() {
            return Ok(order);
        }
        match self
            .edges
            .iter()
            .find(|edge| in_degree[edge.downstream.slot] > 0)
        {
            Some(edge) => Err(Error::Cycle {
                upstream: edge.upstream,
                downstream: edge.downstream,
            }),
            None => Err(Error::EmptyGraph),
        }
    }

    /// Freezes the graph and runs the memory planner. Happens exactly once.
    pub fn fix_topology(&mut self) -> Result<&MemoryPlan> {
        self.require(Phase::Unbuilt, "fix the topology")?;
        let input = self.input.ok_or(Error::MissingEndpoint("input"))?;
        self.output.ok_or(Error::MissingEndpoint("output"))?;
        if self.edges.iter().any(|edge| edge.downstream == input) {
            return Err(Error::InputHasUpstream(input));
        }
        let order = self.order_slots()?;
        let plan = planner::plan(self)?;

        self.order = order;
        self.phase = Phase::TopologyFixed;
        Ok(self.plan.insert(plan))
    }

    /// Fills every planned buffer with Xavier-uniform weights drawn from `seed`.
    pub fn initialize(&mut self, seed: u64) -> Result<()> {
        self.initialize_with(&mut Initializer::new(seed))
    }

    /// Like [`Network::initialize`], drawing from an existing initializer.
    pub fn initialize_with(&mut self, initializer: &mut Initializer) -> Result<()> {
        self.require(Phase::TopologyFixed, "initialize weights")?;
        let plan = self.plan.as_mut().ok_or(Error::IllegalTransition {
            phase: self.phase,
            operation: "initialize weights",
        })?;
        initializer.fill_plan(plan)?;
        let parameters = plan.total_parameters();
        self.phase = Phase::Initialized;

        if let Err(err) = logging::log_event(
            "initialize",
            &serde_json::json!({ "seed": initializer.seed(), "parameters": parameters }),
        ) {
            eprintln!("failed to log initialize: {err}");
        }
        Ok(())
    }

    /// Enters `Training` with zeroed neurons and gradient buffers.
    pub(crate) fn begin_training(&mut self) -> Result<()> {
        self.require(Phase::Initialized, "solve")?;
        for ensemble in &mut self.ensembles {
            ensemble.reset();
        }
        if let Some(plan) = self.plan.as_mut() {
            plan.clear_gradients();
        }
        self.target = None;
        self.phase = Phase::Training;
        Ok(())
    }

    pub(crate) fn finish_training(&mut self) {
        debug_assert_eq!(self.phase, Phase::Training);
        self.phase = Phase::Stopped;
    }

    /// Weights are usable for inference before and after training, never during.
    fn require_weights(&self, operation: &'static str) -> Result<()> {
        match self.phase {
            Phase::Initialized | Phase::Stopped => Ok(()),
            phase => Err(Error::IllegalTransition { phase, operation }),
        }
    }

    /// Endpoints are settled once the topology is fixed.
    fn require_fixed(&self, operation: &'static str) -> Result<()> {
        match self.phase {
            Phase::Unbuilt => Err(Error::IllegalTransition {
                phase: self.phase,
                operation,
            }),
            _ => Ok(()),
        }
    }

    /// Copies an instance into the input ensemble and records its class.
    pub fn bind_instance(&mut self, features: &[f32], label: usize) -> Result<()> {
        self.require_fixed("bind an instance")?;
        let (output, _) = self.output.ok_or(Error::MissingEndpoint("output"))?;
        let classes = self.ensemble(output)?.size();
        if label >= classes {
            return Err(Error::LabelOutOfRange { label, classes });
        }
        self.load_input(features)?;
        self.target = Some(label);
        Ok(())
    }

    fn load_input(&mut self, features: &[f32]) -> Result<()> {
        let input = self.input.ok_or(Error::MissingEndpoint("input"))?;
        let slot = self.slot_of(input)?;
        let ensemble = &mut self.ensembles[slot];
        if features.len() != ensemble.size() {
            return Err(Error::ShapeMismatch {
                expected: ensemble.size(),
                found: features.len(),
            });
        }
        parallel::for_each_mut(ensemble.neurons_mut(), |position, neuron| {
            neuron.value = features[position];
        });
        Ok(())
    }

    /// Validates `data` against the endpoints and maps its labels to classes.
    pub(crate) fn check_dataset(&self, data: &Dataset) -> Result<Vec<usize>> {
        if data.is_empty() {
            return Err(Error::EmptyInput("dataset"));
        }
        let input = self.input.ok_or(Error::MissingEndpoint("input"))?;
        let expected = self.ensemble(input)?.size();
        if data.n_features() != expected {
            return Err(Error::ShapeMismatch {
                expected,
                found: data.n_features(),
            });
        }
        let (output, _) = self.output.ok_or(Error::MissingEndpoint("output"))?;
        let outputs = self.ensemble(output)?.size();
        let classes = data.classes().len();
        if classes > outputs {
            return Err(Error::LabelOutOfRange {
                label: classes - 1,
                classes: outputs,
            });
        }
        Ok(data.class_indices())
    }

    /// Computes every ensemble in topological order.
    ///
    /// Neurons of one ensemble are computed in parallel; the parallel loop
    /// joins before the next ensemble starts, so every read of an upstream
    /// ensemble sees its finished values.
    pub(crate) fn forward_pass(&mut self, visit: &mut dyn FnMut(EnsembleId)) -> Result<()> {
        let plan = self.plan.as_ref().ok_or(Error::IllegalTransition {
            phase: self.phase,
            operation: "run a forward pass",
        })?;

        for &slot in &self.order {
            let id = self.ensembles[slot].id();
            let incoming: Vec<(&Link, &[f32], usize)> = self
                .edges
                .iter()
                .filter(|edge| edge.downstream.slot == slot)
                .map(|edge| {
                    (
                        &edge.link,
                        plan.buffers()[edge.id.0].weights(),
                        edge.upstream.slot,
                    )
                })
                .collect();

            if !incoming.is_empty() {
                let activation = self.ensembles[slot].activation();
                let mut neurons = self.ensembles[slot].take_neurons();
                let ensembles = &self.ensembles;
                parallel::for_each_mut(&mut neurons, |position, neuron| {
                    let mut sum = 0.0;
                    for (link, weights, up) in &incoming {
                        let upstream = &ensembles[*up];
                        link.each_upstream(position, |u, slot| {
                            sum += weights[slot] * upstream.value_at(u);
                        });
                    }
                    neuron.value = activation.apply(sum);
                });
                self.ensembles[slot].restore(neurons);
            }
            visit(id);
        }
        Ok(())
    }

    /// Propagates the loss gradient in reverse topological order and
    /// accumulates weight gradients into every connection's buffer.
    ///
    /// Each ensemble pulls its value gradient from the ensembles it feeds
    /// through the backward query, so no two tasks write the same neuron.
    /// Weight gradients are written per downstream stripe for per-neuron
    /// layouts and reduced from per-worker partial sums for shared ones.
    pub(crate) fn backward_pass(&mut self, visit: &mut dyn FnMut(EnsembleId)) -> Result<f32> {
        let (output, loss_kind) = self.output.ok_or(Error::MissingEndpoint("output"))?;
        let target = self.target.ok_or(Error::EmptyInput("backward pass target"))?;
        let outputs = self.ensemble(output)?.values();
        let (loss, seed) = loss_kind.evaluate(&outputs, target)?;

        let Some(plan) = self.plan.as_mut() else {
            return Err(Error::IllegalTransition {
                phase: self.phase,
                operation: "run a backward pass",
            });
        };

        for &slot in self.order.iter().rev() {
            let id = self.ensembles[slot].id();

            // Value gradients, pulled from every consumer.
            let outgoing: Vec<(&Link, &[f32], usize)> = self
                .edges
                .iter()
                .filter(|edge| edge.upstream.slot == slot)
                .map(|edge| {
                    (
                        &edge.link,
                        plan.buffers()[edge.id.0].weights(),
                        edge.downstream.slot,
                    )
                })
                .collect();
            let loss_seed = (id == output).then_some(seed.as_slice());
            let mut neurons = self.ensembles[slot].take_neurons();
            let ensembles = &self.ensembles;
            parallel::for_each_mut(&mut neurons, |position, neuron| {
                let mut gradient = loss_seed.map_or(0.0, |seed| seed[position]);
                for (link, weights, down) in &outgoing {
                    let downstream = &ensembles[*down];
                    let activation = downstream.activation();
                    link.each_downstream(position, |d, slot| {
                        let delta = downstream.gradient_at(d)
                            * activation.derivative(downstream.value_at(d));
                        gradient += weights[slot] * delta;
                    });
                }
                neuron.gradient = gradient;
            });
            self.ensembles[slot].restore(neurons);

            // Weight gradients of the connections feeding this ensemble.
            let ensemble = &self.ensembles[slot];
            let activation = ensemble.activation();
            let deltas: Vec<f32> = ensemble
                .neurons()
                .par_iter()
                .map(|neuron| neuron.gradient * activation.derivative(neuron.value))
                .collect();
            for edge in self.edges.iter().filter(|edge| edge.downstream.slot == slot) {
                let upstream = &self.ensembles[edge.upstream.slot];
                let link = &edge.link;
                let buffer = &mut plan.buffers_mut()[edge.id.0];
                match buffer.layout() {
                    WeightLayout::PerNeuron { stride } => {
                        buffer
                            .gradients_mut()
                            .par_chunks_mut(stride)
                            .enumerate()
                            .for_each(|(d, row)| {
                                let base = d * stride;
                                let delta = deltas[d];
                                link.each_upstream(d, |u, slot| {
                                    row[slot - base] += delta * upstream.value_at(u);
                                });
                            });
                    }
                    WeightLayout::Shared { len } => {
                        let partial = (0..deltas.len())
                            .into_par_iter()
                            .fold(
                                || vec![0.0f32; len],
                                |mut acc, d| {
                                    let delta = deltas[d];
                                    link.each_upstream(d, |u, slot| {
                                        acc[slot] += delta * upstream.value_at(u);
                                    });
                                    acc
                                },
                            )
                            .reduce(
                                || vec![0.0f32; len],
                                |mut left, right| {
                                    left.iter_mut().zip(&right).for_each(|(l, r)| *l += r);
                                    left
                                },
                            );
                        buffer
                            .gradients_mut()
                            .iter_mut()
                            .zip(&partial)
                            .for_each(|(g, p)| *g += p);
                    }
                }
            }
            visit(id);
        }
        Ok(loss)
    }

    /// SGD step on every buffer; returns once all buffers are updated.
    pub(crate) fn apply_update(&mut self, learning_rate: f32) -> Result<()> {
        let phase = self.phase;
        let plan = self.plan.as_mut().ok_or(Error::IllegalTransition {
            phase,
            operation: "apply an update",
        })?;
        plan.apply_update(learning_rate);
        Ok(())
    }

    /// Runs one forward pass and returns the most active output position.
    pub fn predict(&mut self, features: &[f32]) -> Result<usize> {
        self.require_weights("predict")?;
        self.load_input(features)?;
        self.forward_pass(&mut |_| {})?;
        argmax(&self.output_values()?)
    }

    /// Accuracy and mean loss over `data`, labels mapped through
    /// [`Dataset::class_indices`].
    pub fn evaluate(&mut self, data: &Dataset) -> Result<Evaluation> {
        self.require_weights("evaluate")?;
        let classes = self.check_dataset(data)?;
        let (_, loss_kind) = self.output.ok_or(Error::MissingEndpoint("output"))?;

        let mut correct = 0usize;
        let mut total_loss = 0.0f32;
        for (record, &class) in classes.iter().enumerate() {
            self.load_input(data.instance(record))?;
            self.forward_pass(&mut |_| {})?;
            let outputs = self.output_values()?;
            let (loss, _) = loss_kind.evaluate(&outputs, class)?;
            total_loss += loss;
            if argmax(&outputs)? == class {
                correct += 1;
            }
        }

        let n = classes.len() as f32;
        let evaluation = Evaluation {
            samples: classes.len(),
            accuracy: correct as f32 / n,
            mean_loss: total_loss / n,
        };
        if let Err(err) = logging::log_event("evaluate", &evaluation) {
            eprintln!("failed to log evaluate: {err}");
        }
        Ok(evaluation)
    }

    #[cfg(test)]
    pub(crate) fn plan_mut(&mut self) -> Option<&mut MemoryPlan> {
        self.plan.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Windowed;

    fn flat(n: usize) -> Shape {
        Shape::flat(n).unwrap()
    }

    #[test]
    fn rejects_cycles_and_leaves_graph_unchanged() {
        let mut net = Network::new();
        let a = net.create_ensemble(flat(2)).unwrap();
        let b = net.create_ensemble(flat(2)).unwrap();
        let c = net.create_ensemble(flat(2)).unwrap();
        net.add_connection(a, b, Connection::fully_connected()).unwrap();
        net.add_connection(b, c, Connection::fully_connected()).unwrap();

        let before = net.topological_order().unwrap();
        assert!(matches!(
            net.add_connection(c, a, Connection::fully_connected()),
            Err(Error::Cycle { .. })
        ));
        assert!(matches!(
            net.add_connection(b, b, Connection::identity()),
            Err(Error::Cycle { .. })
        ));
        assert_eq!(net.connections().len(), 2);
        assert_eq!(net.topological_order().unwrap(), before);
    }

    #[test]
    fn rejects_foreign_ensembles() {
        let mut net = Network::new();
        let mut other = Network::new();
        let a = net.create_ensemble(flat(3)).unwrap();
        let foreign = other.create_ensemble(flat(3)).unwrap();
        assert_eq!(a.slot(), foreign.slot());

        assert!(matches!(
            net.add_connection(a, foreign, Connection::identity()),
            Err(Error::UnknownEnsemble(id)) if id == foreign
        ));
        assert!(net.connections().is_empty());
        assert!(net.ensemble(foreign).is_err());
        assert!(net.set_input(foreign).is_err());
    }

    #[test]
    fn rejects_duplicates_and_bad_shapes() {
        let mut net = Network::new();
        let a = net.create_ensemble(flat(3)).unwrap();
        let b = net.create_ensemble(flat(4)).unwrap();
        net.add_connection(a, b, Connection::fully_connected()).unwrap();
        assert!(matches!(
            net.add_connection(a, b, Connection::fully_connected()),
            Err(Error::DuplicateConnection { .. })
        ));
        let c = net.create_ensemble(flat(5)).unwrap();
        assert!(matches!(
            net.add_connection(b, c, Connection::identity()),
            Err(Error::IncompatibleShapes { .. })
        ));
        assert_eq!(net.connections().len(), 1);
    }

    #[test]
    fn topological_order_follows_edges_then_creation() {
        let mut net = Network::new();
        let late = net.create_ensemble(flat(1)).unwrap();
        let early = net.create_ensemble(flat(1)).unwrap();
        let side = net.create_ensemble(flat(1)).unwrap();
        net.add_connection(early, late, Connection::identity()).unwrap();
        assert_eq!(net.topological_order().unwrap(), vec![early, late, side]);
    }

    #[test]
    fn lifecycle_is_enforced() {
        let mut net = Network::new();
        let a = net.create_ensemble(flat(2)).unwrap();
        let b = net.create_ensemble(flat(2)).unwrap();
        net.add_connection(a, b, Connection::fully_connected()).unwrap();

        assert!(matches!(net.fix_topology(), Err(Error::MissingEndpoint("input"))));
        net.set_input(a).unwrap();
        net.set_output(b, Loss::MeanSquared).unwrap();
        assert!(matches!(
            net.initialize(1),
            Err(Error::IllegalTransition { phase: Phase::Unbuilt, .. })
        ));
        assert!(matches!(
            net.bind_instance(&[0.0, 0.0], 0),
            Err(Error::IllegalTransition {
                phase: Phase::Unbuilt,
                operation: "bind an instance"
            })
        ));

        net.fix_topology().unwrap();
        assert_eq!(net.phase(), Phase::TopologyFixed);
        assert!(matches!(
            net.create_ensemble(flat(1)),
            Err(Error::IllegalTransition { phase: Phase::TopologyFixed, .. })
        ));
        assert!(matches!(
            net.add_connection(b, a, Connection::identity()),
            Err(Error::IllegalTransition { .. })
        ));
        assert!(net.fix_topology().is_err());
        assert!(net.predict(&[0.0, 0.0]).is_err());

        net.initialize(1).unwrap();
        assert_eq!(net.phase(), Phase::Initialized);
        assert!(net.initialize(1).is_err());
        assert!(net.predict(&[1.0, 0.0]).is_ok());
    }

    #[test]
    fn input_may_not_be_computed() {
        let mut net = Network::new();
        let a = net.create_ensemble(flat(2)).unwrap();
        let b = net.create_ensemble(flat(2)).unwrap();
        net.add_connection(a, b, Connection::identity()).unwrap();
        net.set_input(b).unwrap();
        net.set_output(b, Loss::MeanSquared).unwrap();
        assert!(matches!(net.fix_topology(), Err(Error::InputHasUpstream(id)) if id == b));
        assert_eq!(net.phase(), Phase::Unbuilt);
    }

    #[test]
    fn bind_instance_checks_shape_and_label() {
        let mut net = Network::new();
        let a = net.create_ensemble(Shape::new(2, 2).unwrap()).unwrap();
        let b = net.create_ensemble(flat(3)).unwrap();
        net.add_connection(a, b, Connection::fully_connected()).unwrap();
        net.set_input(a).unwrap();
        net.set_output(b, Loss::SoftmaxCrossEntropy).unwrap();
        net.fix_topology().unwrap();
        net.initialize(9).unwrap();

        assert!(matches!(
            net.bind_instance(&[1.0, 2.0, 3.0], 0),
            Err(Error::ShapeMismatch { expected: 4, found: 3 })
        ));
        assert!(matches!(
            net.bind_instance(&[1.0, 2.0, 3.0, 4.0], 3),
            Err(Error::LabelOutOfRange { label: 3, classes: 3 })
        ));
        net.bind_instance(&[1.0, 2.0, 3.0, 4.0], 2).unwrap();
        assert_eq!(net.ensemble(a).unwrap().values(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn forward_sums_weighted_inputs() {
        let mut net = Network::new();
        let a = net.create_ensemble(flat(2)).unwrap();
        let b = net.create_ensemble(flat(2)).unwrap();
        let c = net.create_ensemble(flat(1)).unwrap();
        let ab = net.add_connection(a, b, Connection::identity()).unwrap();
        let bc = net.add_connection(b, c, Connection::fully_connected()).unwrap();
        net.set_input(a).unwrap();
        net.set_output(c, Loss::MeanSquared).unwrap();
        net.fix_topology().unwrap();
        net.initialize(0).unwrap();

        let plan = net.plan_mut().unwrap();
        plan.buffers_mut()[ab.position()]
            .weights_mut()
            .copy_from_slice(&[2.0, 3.0]);
        plan.buffers_mut()[bc.position()]
            .weights_mut()
            .copy_from_slice(&[1.0, -1.0]);

        net.bind_instance(&[1.0, 1.0], 0).unwrap();
        let mut visited = Vec::new();
        net.forward_pass(&mut |id| visited.push(id)).unwrap();
        assert_eq!(visited, vec![a, b, c]);
        assert_eq!(net.ensemble(b).unwrap().values(), vec![2.0, 3.0]);
        assert_eq!(net.output_values().unwrap(), vec![-1.0]);
    }

    fn loss_now(net: &mut Network, target: usize) -> f32 {
        net.forward_pass(&mut |_| {}).unwrap();
        let outputs = net.output_values().unwrap();
        net.output.unwrap().1.evaluate(&outputs, target).unwrap().0
    }

    fn check_gradients(mut net: Network, features: &[f32], target: usize) {
        net.bind_instance(features, target).unwrap();
        net.forward_pass(&mut |_| {}).unwrap();
        net.backward_pass(&mut |_| {}).unwrap();

        let eps = 1e-3;
        let buffers = net.plan().unwrap().buffers().len();
        for b in 0..buffers {
            let analytic = net.plan().unwrap().buffers()[b].gradients().to_vec();
            for (slot, expected) in analytic.iter().enumerate() {
                let original = net.plan().unwrap().buffers()[b].weights()[slot];
                net.plan_mut().unwrap().buffers_mut()[b].weights_mut()[slot] = original + eps;
                let plus = loss_now(&mut net, target);
                net.plan_mut().unwrap().buffers_mut()[b].weights_mut()[slot] = original - eps;
                let minus = loss_now(&mut net, target);
                net.plan_mut().unwrap().buffers_mut()[b].weights_mut()[slot] = original;

                let numeric = (plus - minus) / (2.0 * eps);
                assert!(
                    (numeric - expected).abs() < 5e-3,
                    "buffer {b} slot {slot}: numeric {numeric} analytic {expected}"
                );
            }
        }
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut net = Network::new();
        let input = net.create_ensemble(flat(3)).unwrap();
        let hidden = net
            .create_ensemble_with(flat(4), Activation::Tanh)
            .unwrap();
        let output = net.create_ensemble(flat(2)).unwrap();
        net.add_connection(input, hidden, Connection::fully_connected())
            .unwrap();
        net.add_connection(hidden, output, Connection::fully_connected())
            .unwrap();
        net.set_input(input).unwrap();
        net.set_output(output, Loss::SoftmaxCrossEntropy).unwrap();
        net.fix_topology().unwrap();
        net.initialize(5).unwrap();

        check_gradients(net, &[0.5, -0.3, 0.8], 1);
    }

    #[test]
    fn windowed_backward_matches_finite_differences() {
        let mut net = Network::new();
        let grid = Shape::new(4, 4).unwrap();
        let window = Windowed::square(2, 1).unwrap();
        let input = net.create_ensemble(grid).unwrap();
        let feature = net
            .create_ensemble_with(window.output_shape(grid).unwrap(), Activation::Sigmoid)
            .unwrap();
        let output = net.create_ensemble(flat(2)).unwrap();
        net.add_connection(input, feature, Connection::windowed(window))
            .unwrap();
        net.add_connection(feature, output, Connection::fully_connected())
            .unwrap();
        net.set_input(input).unwrap();
        net.set_output(output, Loss::MeanSquared).unwrap();
        net.fix_topology().unwrap();
        net.initialize(11).unwrap();

        let features: Vec<f32> = (0..16).map(|i| (i as f32 - 8.0) / 8.0).collect();
        check_gradients(net, &features, 0);
    }

    #[test]
    fn update_moves_against_gradient() {
        let mut net = Network::new();
        let a = net.create_ensemble(flat(2)).unwrap();
        let b = net.create_ensemble(flat(2)).unwrap();
        let ab = net.add_connection(a, b, Connection::fully_connected()).unwrap();
        net.set_input(a).unwrap();
        net.set_output(b, Loss::SoftmaxCrossEntropy).unwrap();
        net.fix_topology().unwrap();
        net.initialize(2).unwrap();

        net.bind_instance(&[1.0, -1.0], 0).unwrap();
        net.forward_pass(&mut |_| {}).unwrap();
        let before = net.backward_pass(&mut |_| {}).unwrap();
        let weights = net.buffer(ab).unwrap().weights().to_vec();
        let grads = net.buffer(ab).unwrap().gradients().to_vec();
        net.apply_update(0.5).unwrap();

        let after_weights = net.buffer(ab).unwrap().weights().to_vec();
        for i in 0..weights.len() {
            assert!((after_weights[i] - (weights[i] - 0.5 * grads[i])).abs() < 1e-6);
        }
        assert!(net.buffer(ab).unwrap().gradients().iter().all(|g| *g == 0.0));
        assert!(loss_now(&mut net, 0) < before);
    }
}
