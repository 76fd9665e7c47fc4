use std::{cell::RefCell, rc::Rc};

use machine_learning::initialization::{ConstParamGen, ParamGen, RandParamGen};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::Normal;

use crate::{Result, conv3d::Conv3d, spectral_norm::SpectralNorm};

/// The standard deviation of the initial convolution weights.
pub const INIT_GAIN: f32 = 0.02;

/// Seeded initialization shared by every layer of a network.
///
/// Weights are drawn from `Normal(0, INIT_GAIN)` and biases start at zero.
pub struct WeightInit {
    rng: Rc<RefCell<StdRng>>,
}

impl WeightInit {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Rc::new(RefCell::new(StdRng::seed_from_u64(seed))),
        }
    }

    pub fn conv(&self, conv: &mut Conv3d) -> Result<()> {
        let (mut weights, mut biases) = self.gens(conv.weight().len(), conv.spec().out_channels)?;
        conv.init_params(&mut weights, &mut biases)
    }

    pub fn conv_spectral(&self, conv: &mut SpectralNorm) -> Result<()> {
        let (mut weights, mut biases) = self.gens(conv.weight_len(), conv.spec().out_channels)?;
        conv.init_params(&mut weights, &mut biases)
    }

    /// Samples a standard normal vector, the power iteration seed of a spectral normalization.
    pub fn unit_normal(&self, n: usize) -> Result<Vec<f32>> {
        let mut param_gen = RandParamGen::normal(self.rng.clone(), n, 0., 1.)?;
        Ok(param_gen.sample(n).unwrap_or_default())
    }

    fn gens(
        &self,
        weights: usize,
        biases: usize,
    ) -> Result<(RandParamGen<StdRng, Normal<f32>>, ConstParamGen)> {
        Ok((
            RandParamGen::normal(self.rng.clone(), weights, 0., INIT_GAIN)?,
            ConstParamGen::new(0., biases),
        ))
    }
}
