//! Dense value network with an eligibility trace.
//!
//! The TD(λ) rule needs raw access to the gradient of the scalar output with
//! respect to every parameter, accumulated into a decayed trace of the same
//! shape. Off-the-shelf autograd stacks do not expose that accumulator, so
//! the forward and backward passes are written out against `ndarray`
//! directly: tanh hidden layers, a linear output layer, and per-layer trace
//! matrices updated by `z ← λγ·z + ∇θ v`.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TrainError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Layer {
    weights: Array2<f64>,
    bias: Array1<f64>,
    weight_trace: Array2<f64>,
    bias_trace: Array1<f64>,
}

impl Layer {
    fn new(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        // Uniform init scaled by fan-in.
        let scale = 1.0 / (inputs as f64).sqrt();
        let weights =
            Array2::from_shape_fn((outputs, inputs), |_| rng.gen_range(-scale..=scale));
        Self {
            weights,
            bias: Array1::zeros(outputs),
            weight_trace: Array2::zeros((outputs, inputs)),
            bias_trace: Array1::zeros(outputs),
        }
    }
}

/// A feed-forward after-state value function `v(features) -> f64` together
/// with its eligibility trace.
///
/// Construction takes the layer widths from input to the single scalar
/// output, e.g. `[32, 64, 32, 1]`. A two-entry dimension list yields a plain
/// linear function of the features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueNet {
    dimensions: Vec<usize>,
    layers: Vec<Layer>,
}

impl ValueNet {
    pub fn new(dimensions: &[usize], rng: &mut StdRng) -> Result<Self, TrainError> {
        if dimensions.len() < 2 {
            return Err(TrainError::AgentMisconfigured(
                "net needs at least an input and an output layer".into(),
            ));
        }
        if dimensions.iter().any(|&d| d == 0) {
            return Err(TrainError::AgentMisconfigured(
                "net layer widths must be positive".into(),
            ));
        }
        if *dimensions.last().unwrap() != 1 {
            return Err(TrainError::AgentMisconfigured(
                "net output layer must be scalar".into(),
            ));
        }

        let layers = dimensions
            .windows(2)
            .map(|pair| Layer::new(pair[0], pair[1], rng))
            .collect();

        Ok(Self { dimensions: dimensions.to_vec(), layers })
    }

    pub fn dimensions(&self) -> &[usize] {
        &self.dimensions
    }

    pub fn input_len(&self) -> usize {
        self.dimensions[0]
    }

    /// Activations of every layer, input included. The last entry is the
    /// one-element output vector.
    fn forward(&self, features: &[f64]) -> Vec<Array1<f64>> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(Array1::from_iter(features.iter().copied()));

        let last = self.layers.len() - 1;
        for (id, layer) in self.layers.iter().enumerate() {
            let mut out = layer.weights.dot(activations.last().unwrap()) + &layer.bias;
            if id != last {
                out.mapv_inplace(f64::tanh);
            }
            activations.push(out);
        }
        activations
    }

    /// Evaluates the after-state. Deterministic for a given parameter vector.
    pub fn eval(&self, features: &[f64]) -> f64 {
        self.forward(features).last().unwrap()[0]
    }

    /// Decays the trace by `decay` (= λγ) and adds the gradient of the value
    /// at `features` with respect to every weight and bias.
    pub fn eligibility_update(&mut self, features: &[f64], decay: f64) {
        let activations = self.forward(features);

        // d v / d z_last is 1 on the scalar output.
        let mut delta = Array1::ones(1);
        for id in (0..self.layers.len()).rev() {
            let input = &activations[id];
            {
                let layer = &mut self.layers[id];
                let grad = delta
                    .view()
                    .insert_axis(Axis(1))
                    .dot(&input.view().insert_axis(Axis(0)));
                layer
                    .weight_trace
                    .zip_mut_with(&grad, |t, g| *t = decay * *t + g);
                layer
                    .bias_trace
                    .zip_mut_with(&delta, |t, g| *t = decay * *t + g);
            }
            if id > 0 {
                // Propagate through the tanh of the previous layer.
                let back = self.layers[id].weights.t().dot(&delta);
                delta = back * activations[id].mapv(|a| 1.0 - a * a);
            }
        }
    }

    /// θ ← θ + α·δ·z.
    pub fn apply_td(&mut self, delta: f64, rate: f64) {
        let step = rate * delta;
        for layer in &mut self.layers {
            layer
                .weights
                .zip_mut_with(&layer.weight_trace, |w, z| *w += step * z);
            layer.bias.zip_mut_with(&layer.bias_trace, |b, z| *b += step * z);
        }
    }

    /// z ← 0.
    pub fn reset_trace(&mut self) {
        for layer in &mut self.layers {
            layer.weight_trace.fill(0.0);
            layer.bias_trace.fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn net(dims: &[usize]) -> ValueNet {
        let mut rng = StdRng::seed_from_u64(7);
        ValueNet::new(dims, &mut rng).unwrap()
    }

    #[test]
    fn test_rejects_bad_dimensions() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(ValueNet::new(&[4], &mut rng).is_err());
        assert!(ValueNet::new(&[4, 0, 1], &mut rng).is_err());
        assert!(ValueNet::new(&[4, 3], &mut rng).is_err());
    }

    #[test]
    fn test_eval_is_deterministic() {
        let a = net(&[4, 8, 1]);
        let b = a.clone();
        let features = [1.0, -1.0, 0.5, 2.0];
        assert_eq!(a.eval(&features), b.eval(&features));
    }

    #[test]
    fn test_zero_delta_leaves_parameters_unchanged() {
        let mut a = net(&[4, 8, 1]);
        let before = a.clone();
        a.reset_trace();
        a.eligibility_update(&[1.0, 0.0, -1.0, 0.5], 0.9);
        a.apply_td(0.0, 0.1);
        assert_eq!(a.eval(&[1.0, 0.0, -1.0, 0.5]), before.eval(&[1.0, 0.0, -1.0, 0.5]));
    }

    #[test]
    fn test_td_step_moves_value_toward_target() {
        let mut a = net(&[3, 6, 1]);
        let features = [1.0, 0.0, -1.0];
        let before = a.eval(&features);
        a.reset_trace();
        a.eligibility_update(&features, 0.0);
        a.apply_td(1.0 - before, 0.05);
        let after = a.eval(&features);
        assert!((after - 1.0).abs() < (before - 1.0).abs());
    }

    #[test]
    fn test_linear_net_gradient_is_the_feature_vector() {
        // A [n, 1] net is v = w·x + b, so one TD step with δ=1, α=1 adds
        // exactly x to the weights and 1 to the bias.
        let mut a = net(&[3, 1]);
        let features = [2.0, -1.0, 0.5];
        let before = a.eval(&features);
        a.eligibility_update(&features, 0.0);
        a.apply_td(1.0, 1.0);
        let after = a.eval(&features);
        let norm_sq: f64 = features.iter().map(|f| f * f).sum::<f64>() + 1.0;
        assert!((after - before - norm_sq).abs() < 1e-9);
    }

    #[test]
    fn test_trace_decay_accumulates() {
        let mut a = net(&[2, 1]);
        a.eligibility_update(&[1.0, 0.0], 0.0);
        a.eligibility_update(&[0.0, 1.0], 0.5);
        // Trace is now 0.5*[1,0] + [0,1]; a unit TD step adds that to w.
        let before = a.clone();
        a.apply_td(1.0, 1.0);
        let base = before.eval(&[1.0, 1.0]);
        // Contribution: w·x grows by (0.5 + 1.0), bias by 0.5*1 + 1.
        assert!((a.eval(&[1.0, 1.0]) - base - 3.0).abs() < 1e-9);
    }
}
