use machine_learning::initialization::ParamGen;
use ndarray::{Array1, Array5, ArrayView5};

use crate::{
    Result,
    conv3d::{Conv3d, Conv3dSpec},
};

const EPS: f32 = 1e-12;

/// A `Conv3d` whose weights are divided by an estimate of their largest singular value.
///
/// The estimate is refined by one power iteration on every forward pass, the left singular
/// vector estimate `u` persists between calls.
#[derive(Clone, Debug)]
pub struct SpectralNorm {
    conv: Conv3d,
    u: Array1<f32>,
    sigma: f32,
}

impl SpectralNorm {
    /// Creates a new `SpectralNorm` with zeroed weights.
    ///
    /// # Arguments
    /// * `spec` - The wrapped convolution.
    /// * `u` - The initial estimate of the left singular vector, one value per output channel.
    pub fn new(spec: Conv3dSpec, u: Vec<f32>) -> Result<Self> {
        let mut u = Array1::from(u);
        if u.len() != spec.out_channels {
            u = Array1::ones(spec.out_channels);
        }

        Ok(Self {
            conv: Conv3d::new(spec)?,
            u: normalize(u),
            sigma: 1.,
        })
    }

    pub fn spec(&self) -> Conv3dSpec {
        self.conv.spec()
    }

    pub fn weight_len(&self) -> usize {
        self.conv.weight().len()
    }

    pub fn init_params(
        &mut self,
        weights: &mut dyn ParamGen,
        biases: &mut dyn ParamGen,
    ) -> Result<()> {
        self.conv.init_params(weights, biases)
    }

    /// The last estimate of the largest singular value.
    pub fn sigma(&self) -> f32 {
        self.sigma
    }

    pub fn forward(&mut self, x: ArrayView5<f32>) -> Result<Array5<f32>> {
        let w = self.conv.weight();

        let v = normalize(w.t().dot(&self.u));
        let u = normalize(w.dot(&v));
        self.sigma = u.dot(&w.dot(&v));
        self.u = u;

        let weight = &w / self.sigma;
        self.conv.forward_with(x, weight.view())
    }
}

fn normalize(x: Array1<f32>) -> Array1<f32> {
    let norm = x.dot(&x).sqrt().max(EPS);
    x / norm
}
