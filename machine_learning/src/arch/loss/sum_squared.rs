use ndarray::{ArrayD, ArrayViewD};

use super::LossFn;

/// Sum of squared errors, the `sum` reduction of the mean squared error.
#[derive(Default, Clone, Copy, Debug)]
pub struct SumSquared;

impl SumSquared {
    /// Returns a new `SumSquared`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for SumSquared {
    fn loss(&self, y_pred: ArrayViewD<f32>, y: ArrayViewD<f32>) -> f32 {
        (&y_pred - &y).mapv(|x| x.powi(2)).sum()
    }

    fn loss_prime(&self, y_pred: ArrayViewD<f32>, y: ArrayViewD<f32>) -> ArrayD<f32> {
        (&y_pred - &y) * 2.0
    }
}
