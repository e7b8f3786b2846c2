//! Losses that seed the backward pass at the output ensemble.

use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Loss {
    /// Softmax over the output neurons followed by negative log-likelihood.
    #[default]
    SoftmaxCrossEntropy,
    /// Mean squared error against a one-hot target.
    MeanSquared,
}

impl Loss {
    /// Loss value and its gradient with respect to each output.
    pub fn evaluate(self, outputs: &[f32], target: usize) -> Result<(f32, Vec<f32>)> {
        if outputs.is_empty() {
            return Err(Error::EmptyInput("loss"));
        }
        if target >= outputs.len() {
            return Err(Error::LabelOutOfRange {
                label: target,
                classes: outputs.len(),
            });
        }
        Ok(match self {
            Loss::SoftmaxCrossEntropy => {
                let mut grad = softmax(outputs);
                let loss = -grad[target].max(1e-12).ln();
                grad[target] -= 1.0;
                (loss, grad)
            }
            Loss::MeanSquared => {
                let n = outputs.len() as f32;
                let mut loss = 0.0;
                let grad: Vec<f32> = outputs
                    .iter()
                    .enumerate()
                    .map(|(i, &out)| {
                        let diff = out - if i == target { 1.0 } else { 0.0 };
                        loss += diff * diff;
                        2.0 * diff / n
                    })
                    .collect();
                (loss / n, grad)
            }
        })
    }
}

/// Numerically stable softmax.
pub fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Position of the largest value; the first one wins ties.
pub fn argmax(values: &[f32]) -> Result<usize> {
    let (first, rest) = values
        .split_first()
        .ok_or(Error::EmptyInput("argmax"))?;
    let mut best = (0, *first);
    for (i, &value) in rest.iter().enumerate() {
        if value > best.1 {
            best = (i + 1, value);
        }
    }
    Ok(best.0)
}
