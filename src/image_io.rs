use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage, imageops::FilterType};
use log::debug;
use ndarray::{Array4, ArrayView4};

use crate::{Result, StyleErr};

/// The per channel ImageNet mean on the `[0, 255]` scale, in RGB order.
pub const IMAGENET_MEAN: [f32; 3] = [123.675, 116.28, 103.53];

/// The spatial size an image is resized to before becoming a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// The given height, the width keeps the aspect ratio.
    Height(u32),
    /// Exactly `(height, width)`.
    Exact { height: u32, width: u32 },
}

/// Reads an image into a `(1, 3, H, W)` tensor normalized like the extractor's training data.
///
/// # Arguments
/// * `path` - The image file.
/// * `target` - The size to resize the image to.
///
/// # Returns
/// The tensor with values in `[0, 255]` minus the ImageNet mean, or an error if the file can't
/// be decoded.
pub fn prepare_img<P: AsRef<Path>>(path: P, target: Target) -> Result<Array4<f32>> {
    let path = path.as_ref();
    let img = image::open(path)?.to_rgb8();
    let (w, h) = img.dimensions();

    let (height, width) = match target {
        Target::Height(height) => {
            let width = (w as f32 * (height as f32 / h as f32)) as u32;
            (height, width.max(1))
        }
        Target::Exact { height, width } => (height, width),
    };

    if height == 0 || width == 0 {
        return Err(StyleErr::InvalidConfig(format!(
            "can't resize {} to {height}x{width}",
            path.display()
        )));
    }

    let img = image::imageops::resize(&img, width, height, FilterType::Triangle);
    debug!(path:? = path, height = height, width = width; "prepared image");

    Ok(Array4::from_shape_fn(
        (1, 3, height as usize, width as usize),
        |(_, c, i, j)| img.get_pixel(j as u32, i as u32)[c] as f32 - IMAGENET_MEAN[c],
    ))
}

/// Writes the first batch entry of a `(N, 3, H, W)` tensor as an RGB image, undoing the
/// normalization of `prepare_img`. The format follows the extension of `path`.
pub fn save_img<P: AsRef<Path>>(img: ArrayView4<f32>, path: P) -> Result<()> {
    let (n, c, h, w) = img.dim();
    if n == 0 || c != 3 {
        return Err(StyleErr::InvalidConfig(format!(
            "can't save a tensor of shape {:?} as an RGB image",
            img.shape()
        )));
    }

    let to_u8 = |v: f32| v.clamp(0., 255.) as u8;
    let out = RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let (i, j) = (y as usize, x as usize);
        Rgb(std::array::from_fn(|ch| {
            to_u8(img[[0, ch, i, j]] + IMAGENET_MEAN[ch])
        }))
    });

    out.save(path)?;
    Ok(())
}

/// The file name of `path` up to its first dot.
pub fn stem<P: AsRef<Path>>(path: P) -> String {
    path.as_ref()
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default()
        .split('.')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// The directory the results of transferring `style` onto `content` are written to.
pub fn dump_dir<P: AsRef<Path>>(output_img_dir: P, content: &str, style: &str) -> PathBuf {
    output_img_dir
        .as_ref()
        .join(format!("combined_{}_{}", stem(content), stem(style)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn write_png(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 200]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn height_target_keeps_the_aspect_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "wide.png", 20, 10);

        let img = prepare_img(&path, Target::Height(5)).unwrap();
        assert_eq!(img.dim(), (1, 3, 5, 10));

        let img = prepare_img(&path, Target::Exact { height: 7, width: 3 }).unwrap();
        assert_eq!(img.dim(), (1, 3, 7, 3));
    }

    #[test]
    fn pixels_are_centered_on_the_imagenet_mean() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "plain.png", 4, 4);

        let img = prepare_img(&path, Target::Height(4)).unwrap();
        assert_relative_eq!(img[[0, 2, 1, 1]], 200. - IMAGENET_MEAN[2]);
        assert_relative_eq!(img[[0, 0, 0, 3]], 30. - IMAGENET_MEAN[0]);
    }

    #[test]
    fn saved_images_read_back_the_same() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "in.png", 6, 4);
        let img = prepare_img(&path, Target::Height(4)).unwrap();

        let out = dir.path().join("out.png");
        save_img(img.view(), &out).unwrap();
        let back = prepare_img(&out, Target::Height(4)).unwrap();

        for (a, b) in img.iter().zip(back.iter()) {
            assert_relative_eq!(a, b, epsilon = 1.);
        }
    }

    #[test]
    fn missing_files_fail() {
        assert!(prepare_img("does/not/exist.jpg", Target::Height(8)).is_err());
    }

    #[test]
    fn dump_dir_joins_both_stems() {
        let dir = dump_dir("out", "figures.jpg", "data/vg_starry_night.v2.jpg");
        assert_eq!(dir, PathBuf::from("out/combined_figures_vg_starry_night"));
    }
}
