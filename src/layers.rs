//! Builders that declare an ensemble together with the connection feeding it.

use crate::connection::{Connection, Windowed};
use crate::ensemble::{Activation, EnsembleId};
use crate::error::Result;
use crate::loss::Loss;
use crate::network::Network;
use crate::shape::Shape;

/// Declares the input ensemble.
///
/// # Arguments
///
/// * `net` - Network under construction
/// * `shape` - Layout of one instance's features
///
/// # Returns
///
/// The new ensemble, already designated as the network input
pub fn data_layer(net: &mut Network, shape: Shape) -> Result<EnsembleId> {
    let id = net.create_ensemble(shape)?;
    net.set_input(id)?;
    Ok(id)
}

/// Declares a flat ensemble of `outputs` neurons that reads every neuron of `input`.
///
/// # Arguments
///
/// * `net` - Network under construction
/// * `input` - Upstream ensemble
/// * `outputs` - Number of neurons in the new ensemble
/// * `activation` - Nonlinearity of the new ensemble
pub fn fully_connected_layer(
    net: &mut Network,
    input: EnsembleId,
    outputs: usize,
    activation: Activation,
) -> Result<EnsembleId> {
    net.ensemble(input)?;
    let id = net.create_ensemble_with(Shape::flat(outputs)?, activation)?;
    net.add_connection(input, id, Connection::fully_connected())?;
    Ok(id)
}

/// Declares an ensemble with one neuron per window position over `input`.
///
/// All positions share one kernel of weights.
pub fn windowed_layer(
    net: &mut Network,
    input: EnsembleId,
    window: Windowed,
    activation: Activation,
) -> Result<EnsembleId> {
    let shape = window.output_shape(net.ensemble(input)?.shape())?;
    let id = net.create_ensemble_with(shape, activation)?;
    net.add_connection(input, id, Connection::windowed(window))?;
    Ok(id)
}

/// Declares the class-score ensemble and designates it as the output under
/// softmax cross-entropy.
pub fn softmax_loss_layer(
    net: &mut Network,
    input: EnsembleId,
    classes: usize,
) -> Result<EnsembleId> {
    let id = fully_connected_layer(net, input, classes, Activation::Identity)?;
    net.set_output(id, Loss::SoftmaxCrossEntropy)?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn builds_a_small_stack() {
        let mut net = Network::new();
        let input = data_layer(&mut net, Shape::new(5, 5).unwrap()).unwrap();
        let window = Windowed::square(3, 2).unwrap();
        let feature = windowed_layer(&mut net, input, window, Activation::Relu).unwrap();
        let hidden = fully_connected_layer(&mut net, feature, 6, Activation::Tanh).unwrap();
        let output = softmax_loss_layer(&mut net, hidden, 3).unwrap();

        assert_eq!(net.input(), Some(input));
        assert_eq!(net.output(), Some(output));
        assert_eq!(net.ensemble(feature).unwrap().shape(), Shape::new(2, 2).unwrap());
        assert_eq!(net.ensemble(hidden).unwrap().activation(), Activation::Tanh);
        assert_eq!(net.ensemble(output).unwrap().size(), 3);
        assert_eq!(net.connections().len(), 3);

        let summary = net.fix_topology().unwrap().summary();
        assert_eq!(summary.shared_buffers, 1);
        assert_eq!(summary.parameters, 9 + 4 * 6 + 6 * 3);
    }

    #[test]
    fn zero_width_layer_is_rejected() {
        let mut net = Network::new();
        let input = data_layer(&mut net, Shape::flat(2).unwrap()).unwrap();
        assert!(matches!(
            fully_connected_layer(&mut net, input, 0, Activation::Identity),
            Err(Error::InvalidShape { .. })
        ));
        assert_eq!(net.ensembles().len(), 1);
    }

    #[test]
    fn foreign_input_adds_no_ensemble() {
        let mut other = Network::new();
        let foreign = data_layer(&mut other, Shape::flat(2).unwrap()).unwrap();
        let mut net = Network::new();
        data_layer(&mut net, Shape::flat(2).unwrap()).unwrap();

        assert!(matches!(
            fully_connected_layer(&mut net, foreign, 3, Activation::Tanh),
            Err(Error::UnknownEnsemble(id)) if id == foreign
        ));
        assert!(matches!(
            softmax_loss_layer(&mut net, foreign, 2),
            Err(Error::UnknownEnsemble(_))
        ));
        assert_eq!(net.ensembles().len(), 1);
        assert!(net.connections().is_empty());
        assert_eq!(net.output(), None);
    }

    #[test]
    fn window_larger_than_input_is_rejected() {
        let mut net = Network::new();
        let input = data_layer(&mut net, Shape::new(2, 2).unwrap()).unwrap();
        let window = Windowed::square(3, 1).unwrap();
        assert!(windowed_layer(&mut net, input, window, Activation::Identity).is_err());
        assert!(net.connections().is_empty());
    }
}
