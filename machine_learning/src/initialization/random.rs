use std::{cell::RefCell, rc::Rc};

use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::ParamGen;
use crate::Result;

/// Draws a bounded number of values from `D`.
///
/// The rng sits behind an `Rc<RefCell<_>>` so every generator built from the same seed shares a
/// single stream, which keeps whole networks and noise images reproducible.
pub struct RandParamGen<R: Rng, D: Distribution<f32>> {
    rng: Rc<RefCell<R>>,
    distribution: D,
    left: usize,
}

impl<R: Rng, D: Distribution<f32>> RandParamGen<R, D> {
    /// # Arguments
    /// * `rng` - The shared random stream.
    /// * `distribution` - Where the values come from.
    /// * `limit` - How many values are drawn before the generator runs dry.
    pub fn new(rng: Rc<RefCell<R>>, distribution: D, limit: usize) -> Self {
        Self {
            rng,
            distribution,
            left: limit,
        }
    }
}

impl<R: Rng> RandParamGen<R, Normal<f32>> {
    /// Gaussian values with the given `mean` and `std_dev`.
    ///
    /// # Returns
    /// An error if `std_dev` is negative or not finite.
    pub fn normal(rng: Rc<RefCell<R>>, limit: usize, mean: f32, std_dev: f32) -> Result<Self> {
        let distribution = Normal::new(mean, std_dev)?;
        Ok(Self::new(rng, distribution, limit))
    }

    /// He initialization for a layer whose units see `fan_in` inputs, a centered gaussian with
    /// variance `2 / fan_in`.
    pub fn kaiming(rng: Rc<RefCell<R>>, limit: usize, fan_in: usize) -> Result<Self> {
        Self::normal(rng, limit, 0., (2. / fan_in as f32).sqrt())
    }
}

impl<R: Rng, D: Distribution<f32>> ParamGen for RandParamGen<R, D> {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        if self.left == 0 {
            return None;
        }

        let take = n.min(self.left);
        self.left -= take;

        let rng = &mut *self.rng.borrow_mut();
        Some((&self.distribution).sample_iter(rng).take(take).collect())
    }
}
