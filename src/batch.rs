use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{info, warn};
use machine_learning::arch::FeatureExtractor;

use crate::{
    Result,
    config::TransferConfig,
    image_io::stem,
    style::{TransferOutcome, neural_style_transfer},
};

/// Finds the content images of `content_dir` that have an identically named style image in
/// `style_dir`, sorted by name.
///
/// # Returns
/// The file names of the pairs, or an error if any of the directories can't be read.
pub fn image_pairs<P: AsRef<Path>, Q: AsRef<Path>>(
    content_dir: P,
    style_dir: Q,
) -> Result<Vec<String>> {
    let style_dir = style_dir.as_ref();
    let mut names = Vec::new();

    for entry in fs::read_dir(content_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if style_dir.join(&name).is_file() {
            names.push(name);
        } else {
            warn!(name = name.as_str(); "no style image with the same name, skipping");
        }
    }

    names.sort();
    Ok(names)
}

/// Transfers the style of every pair found by `image_pairs`, one run per pair.
///
/// The content and style directories of `config` are scanned, each run writes into
/// `<output_img_dir>/<content stem>/`. The first failing pair aborts the batch.
pub fn run_batch<E: FeatureExtractor + ?Sized>(
    config: &TransferConfig,
    extractor: &mut E,
) -> Result<Vec<TransferOutcome>> {
    let names = image_pairs(&config.content_images_dir, &config.style_images_dir)?;
    info!(pairs = names.len(); "starting batch");

    names
        .into_iter()
        .map(|name| {
            let pair_config = TransferConfig {
                output_img_dir: pair_dir(&config.output_img_dir, &name),
                content_img_name: name.clone(),
                style_img_name: name,
                ..config.clone()
            };

            neural_style_transfer(&pair_config, &mut *extractor)
        })
        .collect()
}

/// The directory a batch run writes the results of `name` to.
pub fn pair_dir<P: AsRef<Path>>(output_img_dir: P, name: &str) -> PathBuf {
    output_img_dir.as_ref().join(stem(name))
}
