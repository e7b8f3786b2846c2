//! Shared-variable analysis: one compact parameter buffer per connection.
//!
//! The planner runs once over a finished graph. It reads every connection's
//! parameter shape and allocates a single weight array plus a gradient array
//! of the same shape for the whole connection. Neurons never own weights; they
//! address slots of these arrays through the connection's mapping. Windowed
//! connections get one kernel-sized array that every output position aliases.

use ndarray::{Array2, ArrayView2, Zip};
use rayon::prelude::*;
use serde::Serialize;

use crate::connection::{Link, ParamShape, WeightLayout};
use crate::error::{Error, Result};
use crate::logging;
use crate::network::Network;

/// Opaque reference to the buffer planned for one connection.
///
/// Only resolves against the plan of the network that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BufferHandle {
    network: u32,
    position: usize,
}

/// Weights and gradients of one connection, stored contiguously.
#[derive(Debug, Clone)]
pub struct ParamBuffer {
    handle: BufferHandle,
    params: ParamShape,
    layout: WeightLayout,
    weights: Array2<f32>,
    grads: Array2<f32>,
}

impl ParamBuffer {
    fn allocate(handle: BufferHandle, link: &Link) -> Result<Self> {
        let params = link.param_shape();
        if params.is_empty() {
            return Err(Error::ZeroSizedBuffer {
                connection: handle.position,
            });
        }
        Ok(Self {
            handle,
            params,
            layout: link.layout(),
            weights: Array2::zeros((params.rows, params.cols)),
            grads: Array2::zeros((params.rows, params.cols)),
        })
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn param_shape(&self) -> ParamShape {
        self.params
    }

    pub fn layout(&self) -> WeightLayout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.weights.view()
    }

    /// Weights in slot order.
    pub fn weights(&self) -> &[f32] {
        self.weights
            .as_slice()
            .expect("planner allocates standard-layout buffers")
    }

    /// Accumulated gradients in slot order.
    pub fn gradients(&self) -> &[f32] {
        self.grads
            .as_slice()
            .expect("planner allocates standard-layout buffers")
    }

    pub(crate) fn weights_mut(&mut self) -> &mut [f32] {
        self.weights
            .as_slice_mut()
            .expect("planner allocates standard-layout buffers")
    }

    pub(crate) fn gradients_mut(&mut self) -> &mut [f32] {
        self.grads
            .as_slice_mut()
            .expect("planner allocates standard-layout buffers")
    }

    /// `weight -= learning_rate * gradient`, then clears the gradient.
    pub(crate) fn apply_update(&mut self, learning_rate: f32) {
        Zip::from(&mut self.weights)
            .and(&mut self.grads)
            .par_for_each(|weight, grad| {
                *weight -= learning_rate * *grad;
                *grad = 0.0;
            });
    }

    pub(crate) fn clear_gradients(&mut self) {
        self.grads.fill(0.0);
    }
}

/// Totals reported after planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub buffers: usize,
    pub shared_buffers: usize,
    pub parameters: usize,
    /// Weights plus gradients.
    pub bytes: usize,
}

/// Every buffer of a network, indexed by connection.
#[derive(Debug, Clone)]
pub struct MemoryPlan {
    network: u32,
    buffers: Vec<ParamBuffer>,
}

impl MemoryPlan {
    pub fn buffers(&self) -> &[ParamBuffer] {
        &self.buffers
    }

    /// `None` for a handle issued by another network's plan.
    pub fn buffer(&self, handle: BufferHandle) -> Option<&ParamBuffer> {
        if handle.network != self.network {
            return None;
        }
        self.buffers.get(handle.position)
    }

    pub fn handles(&self) -> impl Iterator<Item = BufferHandle> + '_ {
        self.buffers.iter().map(ParamBuffer::handle)
    }

    pub fn total_parameters(&self) -> usize {
        self.buffers.iter().map(ParamBuffer::len).sum()
    }

    pub fn summary(&self) -> PlanSummary {
        let parameters = self.total_parameters();
        PlanSummary {
            buffers: self.buffers.len(),
            shared_buffers: self
                .buffers
                .iter()
                .filter(|buffer| matches!(buffer.layout, WeightLayout::Shared { .. }))
                .count(),
            parameters,
            bytes: 2 * parameters * std::mem::size_of::<f32>(),
        }
    }

    pub(crate) fn buffers_mut(&mut self) -> &mut [ParamBuffer] {
        &mut self.buffers
    }

    /// Steps every buffer. Each buffer has a single writer, and the call
    /// returns only once all of them are done.
    pub(crate) fn apply_update(&mut self, learning_rate: f32) {
        self.buffers
            .par_iter_mut()
            .for_each(|buffer| buffer.apply_update(learning_rate));
    }

    pub(crate) fn clear_gradients(&mut self) {
        self.buffers
            .par_iter_mut()
            .for_each(ParamBuffer::clear_gradients);
    }
}

/// Plans storage for a fully declared, acyclic graph.
///
/// Buffer `i` belongs to connection `i`. Fails on a graph without connections,
/// a cyclic graph, or a connection whose parameter shape is empty.
pub fn plan(network: &Network) -> Result<MemoryPlan> {
    if network.connections().is_empty() {
        return Err(Error::EmptyGraph);
    }
    network.topological_order()?;

    let owner = network.id();
    let buffers = network
        .connections()
        .iter()
        .enumerate()
        .map(|(position, edge)| {
            let handle = BufferHandle {
                network: owner,
                position,
            };
            ParamBuffer::allocate(handle, edge.link())
        })
        .collect::<Result<Vec<_>>>()?;
    let plan = MemoryPlan {
        network: owner,
        buffers,
    };

    if let Err(err) = logging::log_event("plan", &plan.summary()) {
        eprintln!("failed to log plan: {err}");
    }
    Ok(plan)
}
