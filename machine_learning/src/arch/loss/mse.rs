use ndarray::{ArrayD, ArrayViewD};

use super::LossFn;

/// Mean squared error loss function.
#[derive(Default, Clone, Copy, Debug)]
pub struct Mse;

impl Mse {
    /// Returns a new `Mse`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Mse {
    fn loss(&self, y_pred: ArrayViewD<f32>, y: ArrayViewD<f32>) -> f32 {
        (&y_pred - &y)
            .mapv(|x| x.powi(2))
            .mean()
            .unwrap_or_default()
    }

    fn loss_prime(&self, y_pred: ArrayViewD<f32>, y: ArrayViewD<f32>) -> ArrayD<f32> {
        (&y_pred - &y) * (2.0 / y_pred.len().max(1) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn averages_over_every_element() {
        let y_pred = array![[1., 2.], [3., 4.]].into_dyn();
        let y = array![[1., 0.], [3., 0.]].into_dyn();

        assert_relative_eq!(Mse.loss(y_pred.view(), y.view()), 5.);

        let d = Mse.loss_prime(y_pred.view(), y.view());
        assert_eq!(d, array![[0., 1.], [0., 2.]].into_dyn());
    }

    #[test]
    fn empty_is_zero() {
        let e = ndarray::ArrayD::<f32>::zeros(vec![0]);
        assert_eq!(Mse.loss(e.view(), e.view()), 0.);
    }
}
