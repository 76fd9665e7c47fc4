use ndarray::{Array4, ArrayView4, Axis, s};

/// Total variation of a `(N, C, H, W)` image.
///
/// The mean over every position of the squared difference with its right and bottom
/// neighbours. Differences are edge-clamped, the last column and row have no right or bottom
/// neighbour and contribute nothing.
pub fn total_variation(x: ArrayView4<f32>) -> f32 {
    if x.is_empty() {
        return 0.;
    }

    let (dh, dw) = diffs(x);
    let sq = |v: &f32| v * v;
    (dh.iter().map(sq).sum::<f32>() + dw.iter().map(sq).sum::<f32>()) / x.len() as f32
}

/// Gradient of `total_variation` with respect to the image.
pub fn total_variation_prime(x: ArrayView4<f32>) -> Array4<f32> {
    let mut d = Array4::zeros(x.raw_dim());
    if x.is_empty() {
        return d;
    }

    let k = 2. / x.len() as f32;
    let (dh, dw) = diffs(x);

    let (h, w) = (x.len_of(Axis(2)), x.len_of(Axis(3)));

    if h > 1 {
        d.slice_mut(s![.., .., 1.., ..]).scaled_add(k, &dh);
        d.slice_mut(s![.., .., ..h - 1, ..]).scaled_add(-k, &dh);
    }

    if w > 1 {
        d.slice_mut(s![.., .., .., 1..]).scaled_add(k, &dw);
        d.slice_mut(s![.., .., .., ..w - 1]).scaled_add(-k, &dw);
    }

    d
}

fn diffs(x: ArrayView4<f32>) -> (Array4<f32>, Array4<f32>) {
    let dh = &x.slice(s![.., .., 1.., ..]) - &x.slice(s![.., .., ..-1, ..]);
    let dw = &x.slice(s![.., .., .., 1..]) - &x.slice(s![.., .., .., ..-1]);
    (dh, dw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array;

    #[test]
    fn constant_image_has_no_variation() {
        let x = Array4::from_elem((1, 3, 5, 4), 42.);
        assert_eq!(total_variation(x.view()), 0.);
        assert!(total_variation_prime(x.view()).iter().all(|&v| v == 0.));
    }

    #[test]
    fn single_step_is_counted_once_per_pixel() {
        let mut x = Array4::<f32>::zeros((1, 1, 2, 2));
        x[[0, 0, 1, 1]] = 1.;

        // right difference of (1, 0) and bottom difference of (0, 1)
        assert_relative_eq!(total_variation(x.view()), 2. / 4.);
    }

    #[test]
    fn non_constant_image_is_positive() {
        let x = Array::from_shape_fn((1, 3, 4, 4), |(_, c, i, j)| ((c + i * j) % 3) as f32);
        assert!(total_variation(x.view()) > 0.);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let mut x = Array::from_shape_fn((1, 2, 4, 5), |(_, c, i, j)| {
            ((c * 20 + i * 5 + j) as f32 * 0.9).sin()
        });
        let d = total_variation_prime(x.view());

        let eps = 1e-2;
        for idx in [[0, 0, 0, 0], [0, 1, 2, 3], [0, 0, 3, 4], [0, 1, 0, 4]] {
            let base = x[idx];
            x[idx] = base + eps;
            let lp = total_variation(x.view());
            x[idx] = base - eps;
            let lm = total_variation(x.view());
            x[idx] = base;

            assert_relative_eq!(d[idx], (lp - lm) / (2. * eps), epsilon = 1e-3);
        }
    }

    #[test]
    fn single_pixel_image_is_flat() {
        let x = Array4::from_elem((1, 3, 1, 1), 3.);
        assert_eq!(total_variation(x.view()), 0.);
    }
}
