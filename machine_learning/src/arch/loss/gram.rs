use ndarray::{
    Array3, Array4, ArrayBase, ArrayView3, ArrayView4, CowArray, Data, Dimension, Ix2, linalg,
};

use crate::{MlErr, Result};

/// Computes the Gram matrix of every batch entry of a `(N, C, H, W)` activation.
///
/// Each `(C, H * W)` feature matrix `F` becomes `F Fᵀ / (C * H * W)`, a channel by channel
/// correlation that no longer depends on where in the plane a feature fired.
pub fn gram(x: ArrayView4<f32>) -> Result<Array3<f32>> {
    let (n, c, h, w) = x.dim();
    let norm = (c * h * w).max(1) as f32;
    let mut g = Array3::zeros((n, c, c));

    for (x, mut g) in x.outer_iter().zip(g.outer_iter_mut()) {
        let f = features(&x, (c, h * w))?;
        linalg::general_mat_mul(1. / norm, &f, &f.t(), 0., &mut g);
    }

    Ok(g)
}

/// Propagates the gradient of a loss with respect to `gram(x)` back to `x`.
///
/// # Arguments
/// * `x` - The activation the Gram matrices were computed from.
/// * `dg` - The gradient with respect to each `(C, C)` Gram matrix.
///
/// # Returns
/// `(dG + dGᵀ) F / (C * H * W)` reshaped like `x`.
pub fn gram_backward(x: ArrayView4<f32>, dg: ArrayView3<f32>) -> Result<Array4<f32>> {
    let (n, c, h, w) = x.dim();
    if dg.dim() != (n, c, c) {
        return Err(MlErr::ShapeMismatch {
            what: "gram gradient".into(),
            got: dg.shape().to_vec(),
            expected: vec![n, c, c],
        });
    }

    let norm = (c * h * w).max(1) as f32;
    let mut dx = Array4::zeros((n, c, h, w));

    for ((x, dg), mut dx) in x
        .outer_iter()
        .zip(dg.outer_iter())
        .zip(dx.outer_iter_mut())
    {
        let f = features(&x, (c, h * w))?;
        let df = (&dg + &dg.t()).dot(&f) / norm;

        for (mut dx, df) in dx.outer_iter_mut().zip(df.outer_iter()) {
            let df = features(&df, (h, w))?;
            dx.assign(&df);
        }
    }

    Ok(dx)
}

fn features<S, D>(x: &ArrayBase<S, D>, shape: (usize, usize)) -> Result<CowArray<'_, f32, Ix2>>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    let len = x.len();
    x.to_shape(shape).map_err(|_| MlErr::SizeMismatch {
        what: "gram features",
        got: len,
        expected: shape.0 * shape.1,
    })
}
