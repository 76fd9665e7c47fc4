use ndarray::{Array4, ArrayView4};

use super::{Sequential, layers::Layer};
use crate::{
    MlErr, Result,
    initialization::ParamGen,
    weights::{self, Tensors},
};

/// A frozen, differentiable network that only exposes some of its intermediate activations.
pub trait FeatureExtractor {
    /// Runs `x` through the network.
    ///
    /// # Returns
    /// One activation per tapped layer, in tap order.
    fn forward(&mut self, x: ArrayView4<f32>) -> Result<Vec<Array4<f32>>>;

    /// Propagates one optional gradient per tap back to the input of the last `forward` call.
    fn backward(&mut self, grads: Vec<Option<Array4<f32>>>) -> Result<Array4<f32>>;

    /// The position, among the taps, of the activation used as content representation.
    fn content_index(&self) -> usize;

    /// The positions, among the taps, of the activations used as style representations.
    fn style_indices(&self) -> &[usize];
}

/// A `Sequential` network with a fixed set of tapped layers.
#[derive(Clone, Debug)]
pub struct FeatureNet {
    net: Sequential,
    taps: Vec<usize>,
    content_index: usize,
    style_indices: Vec<usize>,
}

impl FeatureNet {
    /// Creates a new `FeatureNet`.
    ///
    /// # Arguments
    /// * `net` - The underlying network, layers past the deepest tap are dropped.
    /// * `taps` - The names of the tapped layers.
    /// * `content_index` - Which tap holds the content representation.
    /// * `style_indices` - Which taps hold the style representations.
    ///
    /// # Returns
    /// A new `FeatureNet`, or an error if a tap doesn't name a layer or an index is out of range.
    pub fn new(
        mut net: Sequential,
        taps: &[&str],
        content_index: usize,
        style_indices: Vec<usize>,
    ) -> Result<Self> {
        let taps = taps
            .iter()
            .map(|name| {
                net.position(name)
                    .ok_or_else(|| MlErr::InvalidTaps(format!("there's no layer named {name}")))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(&i) = style_indices
            .iter()
            .chain([&content_index])
            .find(|&&i| i >= taps.len())
        {
            return Err(MlErr::InvalidTaps(format!(
                "tap {i} was requested but there are {} taps",
                taps.len()
            )));
        }

        if let Some(&deepest) = taps.iter().max() {
            net.truncate(deepest);
        }

        Ok(Self {
            net,
            taps,
            content_index,
            style_indices,
        })
    }

    pub fn net(&self) -> &Sequential {
        &self.net
    }

    /// Returns the amount of parameters in the network.
    pub fn size(&self) -> usize {
        self.net.size()
    }

    /// Fills every convolution from `param_gen`, weights before biases, layer by layer.
    pub fn init_params(&mut self, param_gen: &mut dyn ParamGen) -> Result<()> {
        for i in 0..self.net.len() {
            let Some(Layer::Conv2d(conv)) = self.net.layer_mut(i) else {
                continue;
            };

            let params = param_gen.sample(conv.size()).unwrap_or_default();
            if params.len() != conv.size() {
                return Err(MlErr::SizeMismatch {
                    what: "generated parameters",
                    got: params.len(),
                    expected: conv.size(),
                });
            }

            conv.load_flat(&params)?;
        }

        Ok(())
    }

    /// Loads every convolution from `tensors`, using the key layout
    /// `{prefix}.{position}.weight` and `{prefix}.{position}.bias`.
    pub fn load_tensors(&mut self, tensors: &Tensors, prefix: &str) -> Result<()> {
        for i in 0..self.net.len() {
            let Some(Layer::Conv2d(conv)) = self.net.layer_mut(i) else {
                continue;
            };

            let weight = weights::get(tensors, &format!("{prefix}.{i}.weight"))?;
            let bias = weights::get(tensors, &format!("{prefix}.{i}.bias"))?;
            let got = bias.shape().to_vec();
            let bias = bias
                .into_dimensionality()
                .map_err(|_| MlErr::ShapeMismatch {
                    what: format!("{prefix}.{i}.bias"),
                    got,
                    expected: vec![conv.weight_shape()[0]],
                })?;

            conv.set_params(weight, bias)?;
        }

        Ok(())
    }
}

impl FeatureExtractor for FeatureNet {
    fn forward(&mut self, x: ArrayView4<f32>) -> Result<Vec<Array4<f32>>> {
        self.net.forward_taps(x, &self.taps)
    }

    fn backward(&mut self, grads: Vec<Option<Array4<f32>>>) -> Result<Array4<f32>> {
        self.net.backward_taps(grads)
    }

    fn content_index(&self) -> usize {
        self.content_index
    }

    fn style_indices(&self) -> &[usize] {
        &self.style_indices
    }
}
