use ndarray::{ArrayD, ArrayViewD};

/// A differentiable distance between a prediction and its target.
pub trait LossFn {
    /// Computes the loss of `y_pred` against `y`, both must have the same shape.
    fn loss(&self, y_pred: ArrayViewD<f32>, y: ArrayViewD<f32>) -> f32;

    /// Computes the gradient of the loss with respect to `y_pred`.
    fn loss_prime(&self, y_pred: ArrayViewD<f32>, y: ArrayViewD<f32>) -> ArrayD<f32>;
}
