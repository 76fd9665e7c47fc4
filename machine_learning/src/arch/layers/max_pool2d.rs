use ndarray::prelude::*;

use crate::{MlErr, Result};

/// Max pooling over non-overlapping square windows.
#[derive(Clone, Debug)]
pub struct MaxPool2d {
    kernel: usize,
    stride: usize,

    // Forward metadata: the flat in-plane position of every window's maximum.
    argmax: Option<Array4<usize>>,
    input_dim: (usize, usize, usize, usize),
}

impl MaxPool2d {
    pub fn new(kernel: usize, stride: usize) -> Self {
        Self {
            kernel: kernel.max(1),
            stride: stride.max(1),
            argmax: None,
            input_dim: (0, 0, 0, 0),
        }
    }

    pub fn forward(&mut self, x: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (n, c, h, w) = x.dim();
        let k = self.kernel;
        if h < k || w < k {
            return Err(MlErr::ShapeMismatch {
                what: "max pool input smaller than its window".into(),
                got: vec![h, w],
                expected: vec![k, k],
            });
        }

        let ho = (h - k) / self.stride + 1;
        let wo = (w - k) / self.stride + 1;

        let mut out = Array4::zeros((n, c, ho, wo));
        let mut argmax = Array4::zeros((n, c, ho, wo));

        for ((b, ch, oi, oj), y) in out.indexed_iter_mut() {
            let mut best = f32::NEG_INFINITY;
            let mut best_pos = 0;

            for ki in 0..k {
                for kj in 0..k {
                    let (i, j) = (oi * self.stride + ki, oj * self.stride + kj);
                    let v = x[[b, ch, i, j]];
                    if v > best || (ki == 0 && kj == 0) {
                        best = v;
                        best_pos = i * w + j;
                    }
                }
            }

            *y = best;
            argmax[[b, ch, oi, oj]] = best_pos;
        }

        self.argmax = Some(argmax);
        self.input_dim = (n, c, h, w);
        Ok(out)
    }

    pub fn backward(&mut self, d: Array4<f32>) -> Result<Array4<f32>> {
        let argmax = self.argmax.as_ref().ok_or_else(|| MlErr::MissingForward {
            layer: "max pool".into(),
        })?;

        if argmax.shape() != d.shape() {
            return Err(MlErr::ShapeMismatch {
                what: "max pool output gradient".into(),
                got: d.shape().to_vec(),
                expected: argmax.shape().to_vec(),
            });
        }

        let (n, c, h, w) = self.input_dim;
        let mut dx = Array4::zeros((n, c, h, w));

        for ((b, ch, oi, oj), &pos) in argmax.indexed_iter() {
            dx[[b, ch, pos / w, pos % w]] += d[[b, ch, oi, oj]];
        }

        Ok(dx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_the_gradient_to_the_window_maximum() {
        let mut pool = MaxPool2d::new(2, 2);
        let x: Array4<f32> = array![[[
            [1., 5., 0., 0.],
            [2., 3., 0., 9.],
            [4., 4., 1., 1.],
            [8., 4., 1., 2.],
        ]]];

        let y = pool.forward(x.view()).unwrap();
        let pooled: Array4<f32> = array![[[[5., 9.], [8., 2.]]]];
        assert_eq!(y, pooled);

        let d = pool.backward(array![[[[1., 2.], [3., 4.]]]]).unwrap();
        let expected: Array4<f32> = array![[[
            [0., 1., 0., 0.],
            [0., 0., 0., 2.],
            [0., 0., 0., 0.],
            [3., 0., 0., 4.],
        ]]];
        assert_eq!(d, expected);
    }

    #[test]
    fn odd_sizes_drop_the_last_row_and_column() {
        let mut pool = MaxPool2d::new(2, 2);
        let y = pool.forward(Array4::<f32>::ones((1, 2, 5, 7)).view()).unwrap();
        assert_eq!(y.dim(), (1, 2, 2, 3));
    }
}
