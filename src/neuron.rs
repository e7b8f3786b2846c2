//! Neurons: per-position activation state.

use serde::Serialize;

use crate::shape::Index;

/// One compute unit inside an ensemble.
///
/// A neuron owns no parameters. Its incoming weights live in the buffer the
/// memory planner allocated for each connection, and the neuron's [`Index`]
/// selects which slots of that buffer it reads during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neuron {
    index: Index,
    /// Activation computed by the last forward pass.
    pub value: f32,
    /// Gradient of the loss with respect to `value`, set by the last backward pass.
    pub gradient: f32,
}

impl Neuron {
    /// Fresh neuron at `index`. Touches nothing but the value it returns.
    pub fn new(index: Index) -> Self {
        Self {
            index,
            value: 0.0,
            gradient: 0.0,
        }
    }

    pub fn index(&self) -> Index {
        self.index
    }

    /// Back to the construction state.
    pub fn reset(&mut self) {
        self.value = 0.0;
        self.gradient = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_neuron_is_zeroed() {
        let neuron = Neuron::new(Index::new(2, 5));
        assert_eq!(neuron.index(), Index::new(2, 5));
        assert_eq!(neuron.value, 0.0);
        assert_eq!(neuron.gradient, 0.0);
    }

    #[test]
    fn reset_clears_pass_state() {
        let mut neuron = Neuron::new(Index::new(0, 0));
        neuron.value = 3.0;
        neuron.gradient = -1.5;
        neuron.reset();
        assert_eq!(neuron, Neuron::new(Index::new(0, 0)));
    }
}
