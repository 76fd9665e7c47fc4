use ndarray::{Array4, ArrayView4};

use super::layers::Layer;
use crate::{MlErr, Result};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the gradient with respect to its input.
///
/// Every layer has a name, the activations of any of them can be *tapped* on the forward pass
/// and the backward pass accepts one gradient per tap.
#[derive(Clone, Debug)]
pub struct Sequential {
    names: Vec<String>,
    layers: Vec<Layer>,

    // Forward metadata
    taps: Vec<usize>,
    depth: usize,
    input_dim: Option<(usize, usize, usize, usize)>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The named layers the sequential is composed of, in order.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I, S>(layers: I) -> Self
    where
        I: IntoIterator<Item = (S, Layer)>,
        S: Into<String>,
    {
        let (names, layers) = layers
            .into_iter()
            .map(|(name, layer)| (name.into(), layer))
            .unzip();

        Self {
            names,
            layers,
            taps: Vec::new(),
            depth: 0,
            input_dim: None,
        }
    }

    /// Returns the amount of parameters in the model.
    pub fn size(&self) -> usize {
        self.layers.iter().map(Layer::size).sum()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Returns the position of the layer named `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn name(&self, i: usize) -> Option<&str> {
        self.names.get(i).map(String::as_str)
    }

    /// Returns the `(out, in, k, k)` weight shape of layer `i` if it's a convolution.
    pub fn conv_shape(&self, i: usize) -> Option<[usize; 4]> {
        match self.layers.get(i)? {
            Layer::Conv2d(conv) => Some(conv.weight_shape()),
            _ => None,
        }
    }

    pub fn layer_mut(&mut self, i: usize) -> Option<&mut Layer> {
        self.layers.get_mut(i)
    }

    /// Drops every layer after position `last`.
    pub fn truncate(&mut self, last: usize) {
        self.layers.truncate(last + 1);
        self.names.truncate(last + 1);
    }

    /// Makes a forward pass through the network, stopping after the deepest tapped layer.
    ///
    /// # Arguments
    /// * `x` - The `(N, C, H, W)` input.
    /// * `taps` - The positions of the layers whose activations are requested.
    ///
    /// # Returns
    /// The activations of the tapped layers in the same order as `taps`.
    pub fn forward_taps(&mut self, x: ArrayView4<f32>, taps: &[usize]) -> Result<Vec<Array4<f32>>> {
        let Some(&deepest) = taps.iter().max() else {
            return Err(MlErr::InvalidTaps("no layer was tapped".into()));
        };

        if deepest >= self.layers.len() {
            return Err(MlErr::InvalidTaps(format!(
                "layer {deepest} was tapped but the model has {} layers",
                self.layers.len()
            )));
        }

        let mut outputs: Vec<Option<Array4<f32>>> = vec![None; taps.len()];
        let mut a = x.to_owned();

        for (i, layer) in self.layers[..=deepest].iter_mut().enumerate() {
            a = layer.forward(a.view())?;

            for (slot, _) in outputs.iter_mut().zip(taps).filter(|(_, t)| **t == i) {
                *slot = Some(a.clone());
            }
        }

        self.taps = taps.to_vec();
        self.depth = deepest + 1;
        self.input_dim = Some(x.dim());

        outputs
            .into_iter()
            .map(|a| a.ok_or_else(|| MlErr::InvalidTaps("a tap was never reached".into())))
            .collect()
    }

    /// Makes a backward pass through the layers visited by the last `forward_taps` call.
    ///
    /// # Arguments
    /// * `grads` - The gradient of the loss with respect to each tapped activation, `None`
    ///   whenever the loss doesn't depend on that tap.
    ///
    /// # Returns
    /// The gradient of the loss with respect to the network's input.
    pub fn backward_taps(&mut self, mut grads: Vec<Option<Array4<f32>>>) -> Result<Array4<f32>> {
        let input_dim = self.input_dim.ok_or_else(|| MlErr::MissingForward {
            layer: "sequential".into(),
        })?;

        if grads.len() != self.taps.len() {
            return Err(MlErr::SizeMismatch {
                what: "tap gradients",
                got: grads.len(),
                expected: self.taps.len(),
            });
        }

        let mut d: Option<Array4<f32>> = None;

        for i in (0..self.depth).rev() {
            for (grad, _) in grads.iter_mut().zip(&self.taps).filter(|(_, t)| **t == i) {
                let Some(grad) = grad.take() else {
                    continue;
                };

                d = Some(match d {
                    Some(d) if d.shape() != grad.shape() => {
                        return Err(MlErr::ShapeMismatch {
                            what: format!("gradient of tap {}", self.names[i]),
                            got: grad.shape().to_vec(),
                            expected: d.shape().to_vec(),
                        });
                    }
                    Some(d) => d + grad,
                    None => grad,
                });
            }

            if let Some(delta) = d.take() {
                d = Some(self.layers[i].backward(delta)?);
            }
        }

        Ok(d.unwrap_or_else(|| Array4::zeros(input_dim)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array;

    fn tiny() -> Sequential {
        let mut net = Sequential::new([
            ("conv1", Layer::conv3x3(1, 2)),
            ("relu1", Layer::relu()),
            ("pool1", Layer::max_pool2d(2, 2)),
            ("conv2", Layer::conv3x3(2, 2)),
            ("relu2", Layer::relu()),
        ]);

        let mut k = 0;
        for i in [0, 3] {
            if let Some(Layer::Conv2d(conv)) = net.layer_mut(i) {
                let params: Vec<f32> = (0..conv.size())
                    .map(|j| (((j + k) * 5 % 13) as f32 - 6.) * 0.1)
                    .collect();
                k += 3;
                conv.load_flat(&params).unwrap();
            }
        }

        net
    }

    fn input() -> Array4<f32> {
        Array::from_shape_fn((1, 1, 6, 6), |(_, _, i, j)| ((i * 6 + j) as f32 * 0.7).cos())
    }

    #[test]
    fn taps_are_returned_in_request_order() {
        let mut net = tiny();
        let maps = net.forward_taps(input().view(), &[4, 1]).unwrap();

        assert_eq!(maps[0].dim(), (1, 2, 3, 3));
        assert_eq!(maps[1].dim(), (1, 2, 6, 6));
        assert_eq!(net.position("pool1"), Some(2));
    }

    #[test]
    fn tapping_past_the_end_fails() {
        let mut net = tiny();
        assert!(net.forward_taps(input().view(), &[5]).is_err());
        assert!(net.forward_taps(input().view(), &[]).is_err());
    }

    #[test]
    fn backward_before_forward_fails() {
        let mut net = tiny();
        assert!(net.backward_taps(vec![None]).is_err());
    }

    #[test]
    fn tapped_gradients_match_finite_differences() {
        let mut net = tiny();
        let mut x = input();
        let taps = [1, 4];

        // loss = 0.5 * sum(a1^2) + sum(a4)
        let loss = |net: &mut Sequential, x: &Array4<f32>| {
            let maps = net.forward_taps(x.view(), &taps).unwrap();
            0.5 * maps[0].mapv(|v| v * v).sum() + maps[1].sum()
        };

        let maps = net.forward_taps(x.view(), &taps).unwrap();
        let grads = vec![Some(maps[0].clone()), Some(Array4::ones(maps[1].raw_dim()))];
        let dx = net.backward_taps(grads).unwrap();

        let eps = 1e-2;
        for idx in [[0, 0, 0, 0], [0, 0, 2, 3], [0, 0, 5, 4]] {
            let base = x[idx];
            x[idx] = base + eps;
            let lp = loss(&mut net, &x);
            x[idx] = base - eps;
            let lm = loss(&mut net, &x);
            x[idx] = base;

            assert_relative_eq!(dx[idx], (lp - lm) / (2. * eps), epsilon = 2e-2);
        }
    }

    #[test]
    fn missing_gradients_yield_zeros() {
        let mut net = tiny();
        net.forward_taps(input().view(), &[1]).unwrap();
        let dx = net.backward_taps(vec![None]).unwrap();

        assert_eq!(dx.dim(), (1, 1, 6, 6));
        assert!(dx.iter().all(|&v| v == 0.));
    }
}
