use machine_learning::{
    MlErr, Result,
    arch::{
        FeatureExtractor,
        loss::{
            LossFn, Mse, SumSquared, gram, gram_backward, total_variation, total_variation_prime,
        },
    },
};
use ndarray::{Array2, Array3, Array4, ArrayView3, ArrayView4, Axis};

use super::representation::{Targets, tap};
use crate::{config::LossWeights, tracking::LossRecord};

/// The unweighted loss terms of an image and their weighted sum.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Losses {
    pub total: f32,
    pub content: f32,
    pub style: f32,
    pub tv: f32,
}

impl Losses {
    /// The record of this evaluation, every term multiplied by its weight.
    pub fn weighted(&self, iteration: usize, weights: &LossWeights) -> LossRecord {
        LossRecord {
            iteration,
            total: self.total,
            content: weights.content * self.content,
            style: weights.style * self.style,
            tv: weights.tv * self.tv,
        }
    }
}

/// Computes the losses of `img` against the targets.
///
/// The content loss is the mean squared error between content activations. The style loss sums
/// the squared errors inside each Gram matrix and averages them over the style layers. The total
/// variation loss penalizes differences between neighbouring pixels.
pub fn build_loss<E: FeatureExtractor + ?Sized>(
    extractor: &mut E,
    img: ArrayView4<f32>,
    targets: &Targets,
    weights: &LossWeights,
) -> Result<Losses> {
    let maps = extractor.forward(img)?;
    assemble(&*extractor, &maps, img, targets, weights)
}

/// Computes the losses of `img` and the gradient of the total loss with respect to `img`.
pub fn loss_and_grad<E: FeatureExtractor + ?Sized>(
    extractor: &mut E,
    img: ArrayView4<f32>,
    targets: &Targets,
    weights: &LossWeights,
) -> Result<(Losses, Array4<f32>)> {
    let maps = extractor.forward(img)?;
    let losses = assemble(&*extractor, &maps, img, targets, weights)?;
    let mut grads: Vec<Option<Array4<f32>>> = vec![None; maps.len()];

    let ci = extractor.content_index();
    let content_map = tap(&maps, ci)?;
    let d = Mse.loss_prime(
        current(content_map)?.into_dyn(),
        targets.content.view().into_dyn(),
    );
    let got = d.shape().to_vec();
    let d: Array3<f32> = d
        .into_dimensionality()
        .map_err(|_| shape_mismatch("content gradient", got, content_map))?;

    let grad = grads[ci].get_or_insert_with(|| Array4::zeros(content_map.raw_dim()));
    grad.index_axis_mut(Axis(0), 0)
        .scaled_add(weights.content, &d);

    let style_indices = extractor.style_indices();
    let style_scale = weights.style / style_indices.len().max(1) as f32;

    for (&i, target) in style_indices.iter().zip(&targets.style) {
        let map = tap(&maps, i)?;
        let g = gram(map.view())?;

        let dg = SumSquared.loss_prime(
            g.index_axis(Axis(0), 0).into_dyn(),
            target.view().into_dyn(),
        );
        let got = dg.shape().to_vec();
        let dg: Array2<f32> = dg
            .into_dimensionality()
            .map_err(|_| shape_mismatch("style gradient", got, map))?;

        // only the first batch entry has a target
        let mut dgs = Array3::zeros(g.raw_dim());
        dgs.index_axis_mut(Axis(0), 0)
            .scaled_add(style_scale, &dg);

        let df = gram_backward(map.view(), dgs.view())?;
        grads[i] = Some(match grads[i].take() {
            Some(d) => d + df,
            None => df,
        });
    }

    let mut dx = extractor.backward(grads)?;
    dx.scaled_add(weights.tv, &total_variation_prime(img));

    Ok((losses, dx))
}

fn assemble<E: FeatureExtractor + ?Sized>(
    extractor: &E,
    maps: &[Array4<f32>],
    img: ArrayView4<f32>,
    targets: &Targets,
    weights: &LossWeights,
) -> Result<Losses> {
    let content = Mse.loss(
        current(tap(maps, extractor.content_index())?)?.into_dyn(),
        targets.content.view().into_dyn(),
    );

    let style_indices = extractor.style_indices();
    if style_indices.len() != targets.style.len() {
        return Err(MlErr::SizeMismatch {
            what: "style layers",
            got: style_indices.len(),
            expected: targets.style.len(),
        });
    }

    let mut style = 0.;
    for (&i, target) in style_indices.iter().zip(&targets.style) {
        let g = gram(tap(maps, i)?.view())?;
        style += SumSquared.loss(g.index_axis(Axis(0), 0).into_dyn(), target.view().into_dyn());
    }

    if !style_indices.is_empty() {
        style /= style_indices.len() as f32;
    }

    let tv = total_variation(img);

    Ok(Losses {
        total: weights.content * content + weights.style * style + weights.tv * tv,
        content,
        style,
        tv,
    })
}

/// The activation of the first batch entry.
fn current(map: &Array4<f32>) -> Result<ArrayView3<'_, f32>> {
    if map.len_of(Axis(0)) == 0 {
        let (_, c, h, w) = map.dim();
        return Err(shape_mismatch("content activation", vec![0, c, h, w], map));
    }

    Ok(map.index_axis(Axis(0), 0))
}

fn shape_mismatch(what: &str, got: Vec<usize>, map: &Array4<f32>) -> MlErr {
    let (_, c, h, w) = map.dim();
    let expected = match got.len() {
        2 => vec![c, c],
        _ => vec![c, h, w],
    };

    MlErr::ShapeMismatch {
        what: what.into(),
        got,
        expected,
    }
}
