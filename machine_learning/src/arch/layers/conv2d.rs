use ndarray::{linalg, prelude::*};
use rayon::prelude::*;

use crate::{MlErr, Result};

/// A frozen 2D convolution.
///
/// The forward pass lowers every input plane with `im2col` and multiplies it with the
/// `(out, in * k * k)` weight matrix. The backward pass only propagates the gradient to the
/// input, the weights are never trained.
#[derive(Clone, Debug)]
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    padding: usize,

    weight: Array2<f32>,
    bias: Array1<f32>,

    // Forward metadata
    input_dim: Option<(usize, usize, usize, usize)>,
}

impl Conv2d {
    /// Creates a new `Conv2d` with zeroed weights.
    ///
    /// # Arguments
    /// * `in_channels` - The amount of input channels.
    /// * `out_channels` - The amount of output channels.
    /// * `kernel` - The side of the square kernel.
    /// * `stride` - The step between two kernel applications.
    /// * `padding` - The zero padding added on each side of the input.
    ///
    /// # Returns
    /// A new `Conv2d` instance.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
    ) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel,
            stride: stride.max(1),
            padding,
            weight: Array2::zeros((out_channels, in_channels * kernel * kernel)),
            bias: Array1::zeros(out_channels),
            input_dim: None,
        }
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    /// Returns the shape of the weight tensor, `(out, in, k, k)`.
    pub fn weight_shape(&self) -> [usize; 4] {
        [
            self.out_channels,
            self.in_channels,
            self.kernel,
            self.kernel,
        ]
    }

    /// Replaces the weights and biases of this layer.
    ///
    /// # Arguments
    /// * `weight` - A `(out, in, k, k)` weight tensor in any dimensionality that flattens to it.
    /// * `bias` - The `out` biases.
    ///
    /// # Returns
    /// An error if any of the shapes doesn't match the layer's.
    pub fn set_params(&mut self, weight: ArrayViewD<f32>, bias: ArrayView1<f32>) -> Result<()> {
        let expected = self.weight_shape();
        if weight.shape() != expected {
            return Err(MlErr::ShapeMismatch {
                what: "conv2d weight".into(),
                got: weight.shape().to_vec(),
                expected: expected.to_vec(),
            });
        }

        if bias.len() != self.out_channels {
            return Err(MlErr::SizeMismatch {
                what: "conv2d bias",
                got: bias.len(),
                expected: self.out_channels,
            });
        }

        let flat: Vec<f32> = weight.iter().copied().collect();
        self.weight = Array2::from_shape_vec(self.weight.raw_dim(), flat).map_err(|_| {
            MlErr::SizeMismatch {
                what: "conv2d weight",
                got: weight.len(),
                expected: self.weight.len(),
            }
        })?;
        self.bias.assign(&bias);
        Ok(())
    }

    /// Fills the weights and biases from a flat parameter slice, weights first.
    pub fn load_flat(&mut self, params: &[f32]) -> Result<()> {
        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "conv2d parameters",
                got: params.len(),
                expected: self.size(),
            });
        }

        let (w, b) = params.split_at(self.weight.len());
        let w = ArrayView4::from_shape(self.weight_shape(), w).map_err(|_| MlErr::SizeMismatch {
            what: "conv2d weight",
            got: w.len(),
            expected: self.weight.len(),
        })?;

        self.set_params(w.into_dyn(), ArrayView1::from(b))
    }

    fn out_dim(&self, h: usize, w: usize) -> Result<(usize, usize)> {
        let k = self.kernel;
        let (hp, wp) = (h + 2 * self.padding, w + 2 * self.padding);
        if hp < k || wp < k {
            return Err(MlErr::ShapeMismatch {
                what: "conv2d input smaller than its kernel".into(),
                got: vec![h, w],
                expected: vec![k, k],
            });
        }

        Ok(((hp - k) / self.stride + 1, (wp - k) / self.stride + 1))
    }

    pub fn forward(&mut self, x: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (n, c, h, w) = x.dim();
        if c != self.in_channels {
            return Err(MlErr::SizeMismatch {
                what: "conv2d input channels",
                got: c,
                expected: self.in_channels,
            });
        }

        let (ho, wo) = self.out_dim(h, w)?;
        let mut out = Array4::zeros((n, self.out_channels, ho, wo));
        let bias = self.bias.view().insert_axis(Axis(1));

        for (x, mut y) in x.outer_iter().zip(out.outer_iter_mut()) {
            let cols = im2col(x, self.kernel, self.stride, self.padding, (ho, wo));
            let mut z = Array2::zeros((self.out_channels, ho * wo));
            linalg::general_mat_mul(1.0, &self.weight, &cols, 0.0, &mut z);
            z += &bias;

            let z = z
                .into_shape_with_order((self.out_channels, ho, wo))
                .map_err(|_| MlErr::SizeMismatch {
                    what: "conv2d output",
                    got: self.out_channels * ho * wo,
                    expected: y.len(),
                })?;
            y.assign(&z);
        }

        self.input_dim = Some((n, c, h, w));
        Ok(out)
    }

    pub fn backward(&mut self, d: Array4<f32>) -> Result<Array4<f32>> {
        let (n, c, h, w) = self.input_dim.ok_or_else(|| MlErr::MissingForward {
            layer: "conv2d".into(),
        })?;

        let (ho, wo) = self.out_dim(h, w)?;
        let expected = [n, self.out_channels, ho, wo];
        if d.shape() != expected {
            return Err(MlErr::ShapeMismatch {
                what: "conv2d output gradient".into(),
                got: d.shape().to_vec(),
                expected: expected.to_vec(),
            });
        }

        let mut dx = Array4::zeros((n, c, h, w));
        let mut dcols = Array2::zeros((self.weight.ncols(), ho * wo));

        for (d, mut dx) in d.outer_iter().zip(dx.outer_iter_mut()) {
            let d = d
                .to_shape((self.out_channels, ho * wo))
                .map_err(|_| MlErr::SizeMismatch {
                    what: "conv2d output gradient",
                    got: d.len(),
                    expected: self.out_channels * ho * wo,
                })?;

            linalg::general_mat_mul(1.0, &self.weight.t(), &d, 0.0, &mut dcols);
            col2im(dcols.view(), dx.view_mut(), self.kernel, self.stride, self.padding, (ho, wo));
        }

        Ok(dx)
    }
}

/// Lowers a `(C, H, W)` input to a `(C * k * k, Ho * Wo)` matrix, one column per output pixel.
fn im2col(
    x: ArrayView3<f32>,
    k: usize,
    stride: usize,
    pad: usize,
    (ho, wo): (usize, usize),
) -> Array2<f32> {
    let (c, h, w) = x.dim();
    let mut cols = Array2::zeros((c * k * k, ho * wo));

    cols.axis_chunks_iter_mut(Axis(0), k * k)
        .into_par_iter()
        .enumerate()
        .for_each(|(ch, mut rows)| {
            let plane = x.index_axis(Axis(0), ch);

            for ki in 0..k {
                for kj in 0..k {
                    let mut row = rows.row_mut(ki * k + kj);

                    for oi in 0..ho {
                        let Some(i) = (oi * stride + ki).checked_sub(pad).filter(|&i| i < h) else {
                            continue;
                        };

                        for oj in 0..wo {
                            let Some(j) = (oj * stride + kj).checked_sub(pad).filter(|&j| j < w)
                            else {
                                continue;
                            };

                            row[oi * wo + oj] = plane[[i, j]];
                        }
                    }
                }
            }
        });

    cols
}

/// Scatters (accumulating) a `(C * k * k, Ho * Wo)` column gradient back into `(C, H, W)`.
fn col2im(
    cols: ArrayView2<f32>,
    mut dx: ArrayViewMut3<f32>,
    k: usize,
    stride: usize,
    pad: usize,
    (ho, wo): (usize, usize),
) {
    let (_, h, w) = dx.dim();

    dx.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(ch, mut plane)| {
            for ki in 0..k {
                for kj in 0..k {
                    let row = cols.row(ch * k * k + ki * k + kj);

                    for oi in 0..ho {
                        let Some(i) = (oi * stride + ki).checked_sub(pad).filter(|&i| i < h) else {
                            continue;
                        };

                        for oj in 0..wo {
                            let Some(j) = (oj * stride + kj).checked_sub(pad).filter(|&j| j < w)
                            else {
                                continue;
                            };

                            plane[[i, j]] += row[oi * wo + oj];
                        }
                    }
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(shape: (usize, usize, usize, usize)) -> Array4<f32> {
        let len = shape.0 * shape.1 * shape.2 * shape.3;
        Array4::from_shape_vec(shape, (0..len).map(|i| (i as f32 * 0.37).sin()).collect()).unwrap()
    }

    #[test]
    fn identity_kernel_keeps_the_input() {
        let mut conv = Conv2d::new(1, 1, 3, 1, 1);
        let mut params = vec![0.; conv.size()];
        params[4] = 1.;
        conv.load_flat(&params).unwrap();

        let x = ramp((1, 1, 4, 5));
        let y = conv.forward(x.view()).unwrap();

        assert_eq!(y.dim(), (1, 1, 4, 5));
        for (a, b) in y.iter().zip(x.iter()) {
            assert_relative_eq!(a, b);
        }
    }

    #[test]
    fn output_dims_follow_stride_and_padding() {
        let mut conv = Conv2d::new(2, 3, 4, 2, 1);
        let y = conv.forward(ramp((2, 2, 8, 6)).view()).unwrap();
        assert_eq!(y.dim(), (2, 3, 4, 3));
    }

    #[test]
    fn wrong_channel_count_fails() {
        let mut conv = Conv2d::new(3, 1, 3, 1, 1);
        assert!(conv.forward(ramp((1, 2, 4, 4)).view()).is_err());
    }

    #[test]
    fn backward_without_forward_fails() {
        let mut conv = Conv2d::new(1, 1, 3, 1, 1);
        assert!(conv.backward(Array4::zeros((1, 1, 4, 4))).is_err());
    }

    #[test]
    fn input_gradient_matches_finite_differences() {
        let mut conv = Conv2d::new(2, 3, 3, 1, 1);
        let params: Vec<f32> = (0..conv.size()).map(|i| ((i * 7 % 11) as f32 - 5.) * 0.1).collect();
        conv.load_flat(&params).unwrap();

        let mut x = ramp((1, 2, 4, 4));
        // loss = sum(y * r) for a fixed r, so dL/dy = r
        let r = ramp((1, 3, 4, 4)).mapv(|v| v + 0.5);

        conv.forward(x.view()).unwrap();
        let dx = conv.backward(r.clone()).unwrap();

        let eps = 1e-2;
        for idx in [[0, 0, 0, 0], [0, 1, 2, 3], [0, 0, 3, 1]] {
            let base = x[idx];
            x[idx] = base + eps;
            let lp = (conv.forward(x.view()).unwrap() * &r).sum();
            x[idx] = base - eps;
            let lm = (conv.forward(x.view()).unwrap() * &r).sum();
            x[idx] = base;

            let numerical = (lp - lm) / (2. * eps);
            assert_relative_eq!(dx[idx], numerical, epsilon = 1e-2);
        }
    }
}
