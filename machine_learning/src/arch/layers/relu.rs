use ndarray::prelude::*;

use crate::{MlErr, Result};

/// Rectified linear unit, `max(0, x)`.
#[derive(Clone, Debug, Default)]
pub struct Relu {
    a: Option<Array4<f32>>,
}

impl Relu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, x: ArrayView4<f32>) -> Result<Array4<f32>> {
        let a = x.mapv(|x| x.max(0.));
        self.a = Some(a.clone());
        Ok(a)
    }

    pub fn backward(&mut self, mut d: Array4<f32>) -> Result<Array4<f32>> {
        let a = self.a.as_ref().ok_or_else(|| MlErr::MissingForward {
            layer: "relu".into(),
        })?;

        if a.shape() != d.shape() {
            return Err(MlErr::ShapeMismatch {
                what: "relu output gradient".into(),
                got: d.shape().to_vec(),
                expected: a.shape().to_vec(),
            });
        }

        d.zip_mut_with(a, |d, &a| {
            if a <= 0. {
                *d = 0.;
            }
        });

        Ok(d)
    }
}
