//! Ensembles: fixed-shape grids of neurons forming one layer.

use std::fmt::{self, Display};

use serde::Serialize;

use crate::neuron::Neuron;
use crate::parallel;
use crate::shape::{Index, Shape};

/// Handle to an ensemble inside a specific [`Network`](crate::Network).
///
/// The owning network's id travels with the handle, so an id minted by one
/// network is rejected by every other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EnsembleId {
    pub(crate) network: u32,
    pub(crate) slot: usize,
}

impl EnsembleId {
    /// Creation order inside the owning network.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Display for EnsembleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ensemble #{} of network #{}", self.slot, self.network)
    }
}

/// Nonlinearity applied to a neuron's summed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Activation {
    #[default]
    Identity,
    Relu,
    Sigmoid,
    Tanh,
}

impl Activation {
    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Identity => x,
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
        }
    }

    /// Derivative expressed through the activation's output `y = apply(x)`.
    #[inline]
    pub fn derivative(self, y: f32) -> f32 {
        match self {
            Activation::Identity => 1.0,
            Activation::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => y * (1.0 - y),
            Activation::Tanh => 1.0 - y * y,
        }
    }
}

/// A layer of independent neurons laid out row-major over its [`Shape`].
#[derive(Debug, Clone)]
pub struct Ensemble {
    id: EnsembleId,
    shape: Shape,
    activation: Activation,
    neurons: Vec<Neuron>,
}

impl Ensemble {
    /// Allocates `shape.size()` neurons.
    ///
    /// Each neuron is built from its own position only, so construction runs
    /// through [`parallel::build`] with no coordination between neurons.
    pub(crate) fn new(id: EnsembleId, shape: Shape, activation: Activation) -> Self {
        let neurons = parallel::build(shape.size(), |position| {
            Neuron::new(shape.index_of(position))
        });
        Self {
            id,
            shape,
            activation,
            neurons,
        }
    }

    pub fn id(&self) -> EnsembleId {
        self.id
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// Number of neurons, `rows * cols`.
    pub fn size(&self) -> usize {
        self.neurons.len()
    }

    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    pub fn neuron(&self, index: Index) -> Option<&Neuron> {
        self.shape
            .contains(index)
            .then(|| &self.neurons[self.shape.linear(index)])
    }

    /// Activations in row-major order.
    pub fn values(&self) -> Vec<f32> {
        self.neurons.iter().map(|neuron| neuron.value).collect()
    }

    /// Value gradients in row-major order.
    pub fn gradients(&self) -> Vec<f32> {
        self.neurons.iter().map(|neuron| neuron.gradient).collect()
    }

    #[inline]
    pub(crate) fn value_at(&self, position: usize) -> f32 {
        self.neurons[position].value
    }

    #[inline]
    pub(crate) fn gradient_at(&self, position: usize) -> f32 {
        self.neurons[position].gradient
    }

    pub(crate) fn neurons_mut(&mut self) -> &mut [Neuron] {
        &mut self.neurons
    }

    /// Moves the neuron arena out so the ensemble can be rewritten while the
    /// rest of the graph is read. Must be paired with [`Ensemble::restore`].
    pub(crate) fn take_neurons(&mut self) -> Vec<Neuron> {
        std::mem::take(&mut self.neurons)
    }

    pub(crate) fn restore(&mut self, neurons: Vec<Neuron>) {
        debug_assert_eq!(neurons.len(), self.shape.size());
        self.neurons = neurons;
    }

    pub(crate) fn reset(&mut self) {
        parallel::for_each_mut(&mut self.neurons, |_, neuron| neuron.reset());
    }
}
