use ndarray::{Array5, ArrayView5, Axis, Zip, concatenate};

use crate::{InpaintErr, Result};

/// Pads every spatial axis of a `(N, C, D, H, W)` volume by repeating its border `pad` times.
pub fn replication_pad3d(x: ArrayView5<f32>, pad: usize) -> Array5<f32> {
    let (n, c, d, h, w) = x.dim();
    if pad == 0 || d == 0 || h == 0 || w == 0 {
        return x.to_owned();
    }

    let clamp = |i: usize, len: usize| i.saturating_sub(pad).min(len - 1);

    Array5::from_shape_fn(
        (n, c, d + 2 * pad, h + 2 * pad, w + 2 * pad),
        |(b, ch, i, j, k)| x[[b, ch, clamp(i, d), clamp(j, h), clamp(k, w)]],
    )
}

/// Doubles the spatial size of a `(N, C, D, H, W)` volume with trilinear interpolation, aligning
/// the corners of the input and output grids.
pub fn upsample_trilinear(x: ArrayView5<f32>) -> Array5<f32> {
    let x = upsample_axis(x, Axis(2));
    let x = upsample_axis(x.view(), Axis(3));
    upsample_axis(x.view(), Axis(4))
}

fn upsample_axis(x: ArrayView5<f32>, axis: Axis) -> Array5<f32> {
    let len = x.len_of(axis);
    let out_len = 2 * len;

    let mut shape = x.raw_dim();
    shape[axis.index()] = out_len;
    let mut out = Array5::zeros(shape);

    let scale = if out_len > 1 {
        (len - 1) as f32 / (out_len - 1) as f32
    } else {
        0.
    };

    for (o, mut dst) in out.axis_iter_mut(axis).enumerate() {
        let src = o as f32 * scale;
        let lo = (src.floor() as usize).min(len.saturating_sub(1));
        let hi = (lo + 1).min(len - 1);
        let frac = src - lo as f32;

        let a = x.index_axis(axis, lo);
        let b = x.index_axis(axis, hi);
        Zip::from(&mut dst)
            .and(&a)
            .and(&b)
            .for_each(|y, &a, &b| *y = a + (b - a) * frac);
    }

    out
}

/// Concatenates volumes along the channel axis.
pub fn concat_channels(xs: &[ArrayView5<f32>]) -> Result<Array5<f32>> {
    Ok(concatenate(Axis(1), xs)?)
}

/// Normalizes a `(N, C, D, H, W)` volume over its `D` and `H` axes.
///
/// For every `(n, c, w)` the values are standardized with their mean and unbiased standard
/// deviation and then mapped by `5 * (2 * z - 1)`. With a single value per group the standard
/// deviation is undefined and the result is NaN.
pub fn feature_norm(x: ArrayView5<f32>) -> Array5<f32> {
    let (_, _, d, h, _) = x.dim();
    let count = (d * h) as f32;
    let mut out = x.to_owned();

    for mut volume in out.outer_iter_mut() {
        for mut channel in volume.outer_iter_mut() {
            for mut group in channel.axis_iter_mut(Axis(2)) {
                let mean = group.sum() / count;
                let var = group.fold(0., |acc, &v| acc + (v - mean).powi(2)) / (count - 1.);
                let std = var.sqrt() + 1e-9;

                group.mapv_inplace(|v| 5. * (2. * (v - mean) / std - 1.));
            }
        }
    }

    out
}

pub fn relu(mut x: Array5<f32>) -> Array5<f32> {
    x.mapv_inplace(|v| v.max(0.));
    x
}

pub fn leaky_relu(mut x: Array5<f32>, slope: f32) -> Array5<f32> {
    x.mapv_inplace(|v| if v >= 0. { v } else { v * slope });
    x
}

pub fn sigmoid(mut x: Array5<f32>) -> Array5<f32> {
    x.mapv_inplace(|v| 1. / (1. + (-v).exp()));
    x
}

pub fn tanh(mut x: Array5<f32>) -> Array5<f32> {
    x.mapv_inplace(f32::tanh);
    x
}

/// Checks that `x` has `channels` channels.
pub(crate) fn expect_channels(
    x: &ArrayView5<f32>,
    channels: usize,
    what: &'static str,
) -> Result<()> {
    if x.len_of(Axis(1)) != channels {
        let (n, _, d, h, w) = x.dim();
        return Err(InpaintErr::ShapeMismatch {
            what,
            got: x.shape().to_vec(),
            expected: vec![n, channels, d, h, w],
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array;

    #[test]
    fn replication_pad_repeats_the_border() {
        let x = Array::from_shape_fn((1, 1, 2, 2, 2), |(_, _, i, j, k)| {
            (i * 4 + j * 2 + k) as f32
        });
        let y = replication_pad3d(x.view(), 2);

        assert_eq!(y.dim(), (1, 1, 6, 6, 6));
        assert_eq!(y[[0, 0, 0, 0, 0]], 0.);
        assert_eq!(y[[0, 0, 5, 5, 5]], 7.);
        assert_eq!(y[[0, 0, 1, 3, 4]], x[[0, 0, 0, 1, 1]]);
    }

    #[test]
    fn upsampling_keeps_the_corners() {
        let x = Array::from_shape_fn((1, 2, 2, 3, 2), |(_, c, i, j, k)| {
            (c * 12 + i * 6 + j * 2 + k) as f32
        });
        let y = upsample_trilinear(x.view());

        assert_eq!(y.dim(), (1, 2, 4, 6, 4));
        assert_relative_eq!(y[[0, 1, 0, 0, 0]], x[[0, 1, 0, 0, 0]]);
        assert_relative_eq!(y[[0, 1, 3, 5, 3]], x[[0, 1, 1, 2, 1]]);
    }

    #[test]
    fn upsampling_is_linear_in_between() {
        // a ramp along W: 0, 3 becomes 0, 1, 2, 3
        let x = Array::from_shape_vec((1, 1, 1, 1, 2), vec![0., 3.]).unwrap();
        let y = upsample_trilinear(x.view());

        let row: Vec<f32> = y.iter().copied().take(4).collect();
        for (a, b) in row.iter().zip([0., 1., 2., 3.]) {
            assert_relative_eq!(*a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn feature_norm_standardizes_each_group() {
        let x = Array::from_shape_fn((1, 1, 2, 2, 3), |(_, _, i, j, k)| {
            (i * 2 + j) as f32 * (k + 1) as f32
        });
        let y = feature_norm(x.view());

        for k in 0..3 {
            let group = y.index_axis(Axis(4), k);
            // 5 * (2 * z - 1) has mean -5 when z has mean 0
            assert_relative_eq!(group.mean().unwrap(), -5., epsilon = 1e-4);
        }

        // values 0, 1, 2, 3: mean 1.5, unbiased std sqrt(5 / 3)
        let z = (3. - 1.5) / (5f32 / 3.).sqrt();
        assert_relative_eq!(y[[0, 0, 1, 1, 0]], 5. * (2. * z - 1.), epsilon = 1e-4);
    }

    #[test]
    fn feature_norm_of_a_single_value_is_nan() {
        let x = Array5::from_elem((1, 1, 1, 1, 2), 3.);
        assert!(feature_norm(x.view()).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn activations() {
        let x = Array::from_shape_vec((1, 1, 1, 1, 3), vec![-2., 0., 2.]).unwrap();

        assert_eq!(relu(x.clone()).into_raw_vec_and_offset().0, vec![0., 0., 2.]);
        assert_eq!(leaky_relu(x.clone(), 0.2).into_raw_vec_and_offset().0, vec![-0.4, 0., 2.]);
        assert_relative_eq!(sigmoid(x.clone())[[0, 0, 0, 0, 1]], 0.5);
        assert_relative_eq!(tanh(x)[[0, 0, 0, 0, 2]], 2f32.tanh());
    }

    #[test]
    fn concatenation_checks_spatial_sizes() {
        let a = Array5::<f32>::zeros((1, 2, 2, 2, 2));
        let b = Array5::<f32>::ones((1, 3, 2, 2, 2));
        let c = Array5::<f32>::ones((1, 3, 2, 2, 1));

        assert_eq!(concat_channels(&[a.view(), b.view()]).unwrap().dim(), (1, 5, 2, 2, 2));
        assert!(concat_channels(&[a.view(), c.view()]).is_err());
    }
}
