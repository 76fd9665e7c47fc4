use super::Optimizer;
use crate::{MlErr, Result};

/// The exponential moving averages Adam keeps for one parameter.
#[derive(Clone, Copy, Debug, Default)]
struct Moments {
    mean: f32,
    sq_mean: f32,
}

/// Adam over a flat parameter buffer, with bias corrected moment estimates.
///
/// The denominator is `sqrt(v_hat) + eps`, `eps` being added after the bias correction of the
/// second moment.
#[derive(Debug)]
pub struct Adam {
    lr: f32,
    betas: (f32, f32),
    eps: f32,
    step: i32,
    moments: Vec<Moments>,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The size of the buffers it will update.
    /// * `lr` - The step size.
    /// * `betas` - The decay rates of the first and second moment estimates.
    /// * `eps` - Keeps the denominator away from zero.
    pub fn new(len: usize, lr: f32, betas: (f32, f32), eps: f32) -> Self {
        Self {
            lr,
            betas,
            eps,
            step: 0,
            moments: vec![Moments::default(); len],
        }
    }

    /// `Adam` with `betas = (0.9, 0.999)` and `eps = 1e-8`.
    pub fn with_lr(len: usize, lr: f32) -> Self {
        Self::new(len, lr, (0.9, 0.999), 1e-8)
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        let expected = self.moments.len();
        if got == expected {
            Ok(())
        } else {
            Err(MlErr::SizeMismatch { what, got, expected })
        }
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        self.check_len("adam gradient", grad.len())?;
        self.check_len("adam parameters", params.len())?;

        self.step += 1;
        let (b1, b2) = self.betas;
        let first_fix = 1. - b1.powi(self.step);
        let second_fix = (1. - b2.powi(self.step)).sqrt();
        let lr = self.lr / first_fix;
        let eps = self.eps;

        for ((p, &g), m) in params.iter_mut().zip(grad).zip(&mut self.moments) {
            m.mean = b1 * m.mean + (1. - b1) * g;
            m.sq_mean = b2 * m.sq_mean + (1. - b2) * g * g;
            *p -= lr * m.mean / (m.sq_mean.sqrt() / second_fix + eps);
        }

        Ok(())
    }
}
