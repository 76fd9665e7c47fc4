use machine_learning::initialization::ParamGen;
use ndarray::{Array1, Array2, Array5, ArrayView2, ArrayView4, ArrayView5, Axis, linalg};
use rayon::prelude::*;

use crate::{InpaintErr, Result};

/// The hyperparameters of a `Conv3d`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Conv3dSpec {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
    pub dilation: usize,
    pub bias: bool,
}

impl Conv3dSpec {
    /// A unit stride, unpadded and undilated convolution with bias.
    pub fn new(in_channels: usize, out_channels: usize, kernel: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel,
            stride: 1,
            padding: 0,
            dilation: 1,
            bias: true,
        }
    }

    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = stride.max(1);
        self
    }

    pub fn padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn dilation(mut self, dilation: usize) -> Self {
        self.dilation = dilation.max(1);
        self
    }

    pub fn without_bias(mut self) -> Self {
        self.bias = false;
        self
    }
}

/// A 3D convolution over `(N, C, D, H, W)` volumes.
#[derive(Clone, Debug)]
pub struct Conv3d {
    spec: Conv3dSpec,
    weight: Array2<f32>,
    bias: Option<Array1<f32>>,
}

impl Conv3d {
    /// Creates a new `Conv3d` with zeroed parameters.
    ///
    /// # Returns
    /// An error if the kernel is empty.
    pub fn new(spec: Conv3dSpec) -> Result<Self> {
        let k = spec.kernel;
        if k == 0 {
            return Err(InpaintErr::InvalidLayer {
                what: "conv3d",
                reason: "the kernel size must be at least 1".into(),
            });
        }

        Ok(Self {
            spec,
            weight: Array2::zeros((spec.out_channels, spec.in_channels * k * k * k)),
            bias: spec.bias.then(|| Array1::zeros(spec.out_channels)),
        })
    }

    pub fn spec(&self) -> Conv3dSpec {
        self.spec
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.weight.len() + self.bias.as_ref().map_or(0, Array1::len)
    }

    /// The weights as an `(out, in * k³)` matrix.
    pub fn weight(&self) -> ArrayView2<'_, f32> {
        self.weight.view()
    }

    /// Fills the weights from `weights` and the biases, if any, from `biases`.
    ///
    /// # Returns
    /// An error if the generator runs out of values.
    pub fn init_params(
        &mut self,
        weights: &mut dyn ParamGen,
        biases: &mut dyn ParamGen,
    ) -> Result<()> {
        fill(self.weight.as_slice_mut(), weights)?;
        if let Some(bias) = self.bias.as_mut() {
            fill(bias.as_slice_mut(), biases)?;
        }

        Ok(())
    }

    /// Returns the spatial size of the output for a `(D, H, W)` input.
    pub fn out_dim(&self, (d, h, w): (usize, usize, usize)) -> Result<(usize, usize, usize)> {
        let Conv3dSpec {
            kernel,
            stride,
            padding,
            dilation,
            ..
        } = self.spec;

        let span = dilation * (kernel - 1) + 1;
        let out = |n: usize| {
            (n + 2 * padding >= span).then(|| (n + 2 * padding - span) / stride + 1)
        };

        match (out(d), out(h), out(w)) {
            (Some(d), Some(h), Some(w)) => Ok((d, h, w)),
            _ => Err(InpaintErr::TooSmall {
                what: "conv3d",
                got: vec![d, h, w],
            }),
        }
    }

    pub fn forward(&self, x: ArrayView5<f32>) -> Result<Array5<f32>> {
        self.forward_with(x, self.weight.view())
    }

    /// Runs the convolution with `weight` in place of the layer's own weights.
    pub fn forward_with(&self, x: ArrayView5<f32>, weight: ArrayView2<f32>) -> Result<Array5<f32>> {
        let (n, c, d, h, w) = x.dim();
        if c != self.spec.in_channels {
            return Err(InpaintErr::ShapeMismatch {
                what: "conv3d input channels",
                got: x.shape().to_vec(),
                expected: vec![n, self.spec.in_channels, d, h, w],
            });
        }

        if weight.dim() != self.weight.dim() {
            return Err(InpaintErr::ShapeMismatch {
                what: "conv3d weight",
                got: weight.shape().to_vec(),
                expected: self.weight.shape().to_vec(),
            });
        }

        let (od, oh, ow) = self.out_dim((d, h, w))?;
        let co = self.spec.out_channels;
        let mut out = Array5::zeros((n, co, od, oh, ow));

        for (x, mut y) in x.outer_iter().zip(out.outer_iter_mut()) {
            let cols = self.im2col(x, (od, oh, ow));
            let mut z = Array2::zeros((co, od * oh * ow));
            linalg::general_mat_mul(1.0, &weight, &cols, 0.0, &mut z);

            if let Some(bias) = &self.bias {
                z += &bias.view().insert_axis(Axis(1));
            }

            y.assign(&z.into_shape_with_order((co, od, oh, ow))?);
        }

        Ok(out)
    }

    /// Lowers a `(C, D, H, W)` volume to a `(C * k³, Do * Ho * Wo)` matrix.
    fn im2col(&self, x: ArrayView4<f32>, (od, oh, ow): (usize, usize, usize)) -> Array2<f32> {
        let Conv3dSpec {
            kernel: k,
            stride,
            padding: pad,
            dilation,
            ..
        } = self.spec;

        let (c, d, h, w) = x.dim();
        let mut cols = Array2::zeros((c * k * k * k, od * oh * ow));
        let at = |o: usize, kk: usize, n: usize| {
            (o * stride + kk * dilation)
                .checked_sub(pad)
                .filter(|&i| i < n)
        };

        cols.axis_chunks_iter_mut(Axis(0), k * k * k)
            .into_par_iter()
            .enumerate()
            .for_each(|(ch, mut rows)| {
                let vol = x.index_axis(Axis(0), ch);

                for (r, mut row) in rows.outer_iter_mut().enumerate() {
                    let (kd, kh, kw) = (r / (k * k), r / k % k, r % k);

                    for zd in 0..od {
                        let Some(i) = at(zd, kd, d) else { continue };
                        for zh in 0..oh {
                            let Some(j) = at(zh, kh, h) else { continue };
                            for zw in 0..ow {
                                let Some(l) = at(zw, kw, w) else { continue };
                                row[(zd * oh + zh) * ow + zw] = vol[[i, j, l]];
                            }
                        }
                    }
                }
            });

        cols
    }
}

fn fill(dst: Option<&mut [f32]>, param_gen: &mut dyn ParamGen) -> Result<()> {
    let Some(dst) = dst else {
        return Ok(());
    };

    let params = param_gen.sample(dst.len()).unwrap_or_default();
    if params.len() != dst.len() {
        return Err(InpaintErr::ShapeMismatch {
            what: "generated parameters",
            got: vec![params.len()],
            expected: vec![dst.len()],
        });
    }

    dst.copy_from_slice(&params);
    Ok(())
}
