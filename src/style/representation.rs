use machine_learning::{
    MlErr, Result,
    arch::{FeatureExtractor, loss::gram},
};
use ndarray::{Array, Array2, Array3, Array4, ArrayView, ArrayView4, Axis, RemoveAxis};

/// The fixed regression targets of a run.
#[derive(Clone, Debug)]
pub struct Targets {
    /// The `(C, H, W)` content activation of the content image.
    pub content: Array3<f32>,
    /// One `(C, C)` Gram matrix per style layer of the style image.
    pub style: Vec<Array2<f32>>,
}

impl Targets {
    /// Extracts the content representation of `content_img` and the style representations of
    /// `style_img`.
    pub fn capture<E: FeatureExtractor + ?Sized>(
        extractor: &mut E,
        content_img: ArrayView4<f32>,
        style_img: ArrayView4<f32>,
    ) -> Result<Self> {
        let maps = extractor.forward(content_img)?;
        let content = content_representation(&maps, extractor.content_index())?;

        let maps = extractor.forward(style_img)?;
        let style = style_representations(&maps, extractor.style_indices())?;

        Ok(Self { content, style })
    }
}

/// The first batch entry of the activation at `index`.
pub fn content_representation(maps: &[Array4<f32>], index: usize) -> Result<Array3<f32>> {
    let map = tap(maps, index)?;
    first_entry(map.view())
}

/// The Gram matrix of the first batch entry of every activation in `indices`.
pub fn style_representations(maps: &[Array4<f32>], indices: &[usize]) -> Result<Vec<Array2<f32>>> {
    indices
        .iter()
        .map(|&i| {
            let g = gram(tap(maps, i)?.view())?;
            first_entry(g.view())
        })
        .collect()
}

pub(super) fn tap(maps: &[Array4<f32>], index: usize) -> Result<&Array4<f32>> {
    maps.get(index).ok_or_else(|| {
        MlErr::InvalidTaps(format!(
            "tap {index} was requested but the extractor returned {}",
            maps.len()
        ))
    })
}

fn first_entry<D: RemoveAxis>(x: ArrayView<f32, D>) -> Result<Array<f32, D::Smaller>> {
    if x.len_of(Axis(0)) == 0 {
        return Err(MlErr::ShapeMismatch {
            what: "feature maps".into(),
            got: x.shape().to_vec(),
            expected: [1].iter().chain(&x.shape()[1..]).copied().collect(),
        });
    }

    Ok(x.index_axis(Axis(0), 0).to_owned())
}
