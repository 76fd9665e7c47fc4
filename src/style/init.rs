use std::{cell::RefCell, path::Path, rc::Rc};

use machine_learning::{
    MlErr,
    initialization::{ParamGen, RandParamGen},
};
use ndarray::{Array4, ArrayView4, Dimension, Ix4};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    Result,
    config::InitMethod,
    image_io::{self, Target},
};

/// The standard deviation of the noise image, on the `[0, 255]` pixel scale.
const NOISE_STD: f32 = 90.;

/// Creates the image the optimization starts from, always shaped like `content_img`.
///
/// # Arguments
/// * `method` - How the image is seeded.
/// * `content_img` - The prepared content image.
/// * `style_path` - The style image file, read again at the content image's size.
/// * `seed` - The seed of the noise.
pub fn init_image(
    method: InitMethod,
    content_img: ArrayView4<f32>,
    style_path: &Path,
    seed: u64,
) -> Result<Array4<f32>> {
    match method {
        InitMethod::Random => noise(content_img.raw_dim(), seed),
        InitMethod::Content => Ok(content_img.to_owned()),
        InitMethod::Style => {
            let (_, _, h, w) = content_img.dim();
            let target = Target::Exact {
                height: h as u32,
                width: w as u32,
            };
            image_io::prepare_img(style_path, target)
        }
    }
}

fn noise(dim: Ix4, seed: u64) -> Result<Array4<f32>> {
    let len = dim.size();
    let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));
    let mut param_gen = RandParamGen::normal(rng, len, 0., NOISE_STD)?;

    let values = param_gen.sample(len).unwrap_or_default();
    if values.len() != len {
        return Err(MlErr::SizeMismatch {
            what: "noise image",
            got: values.len(),
            expected: len,
        }
        .into());
    }

    Ok(Array4::from_shape_vec(dim, values)?)
}
