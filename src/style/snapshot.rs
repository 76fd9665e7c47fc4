use std::path::{Path, PathBuf};

use log::{debug, warn};
use ndarray::ArrayView4;

use crate::{
    config::{ImgFormat, TransferConfig},
    image_io::{self, stem},
};

/// Decides which iterations of a run are written to disk and under which name.
#[derive(Clone, Debug)]
pub struct Snapshots {
    dir: PathBuf,
    saving_freq: i64,
    img_format: ImgFormat,
    final_name: String,
}

impl Snapshots {
    /// Creates the snapshot policy of a run writing into `dir`.
    pub fn new<P: AsRef<Path>>(dir: P, config: &TransferConfig) -> Self {
        let w = &config.weights;
        let final_name = format!(
            "{}_{}_o_{}_i_{}_h_{}_m_{}_cw_{:?}_sw_{:?}_tv_{:?}{}",
            stem(&config.content_img_name),
            stem(&config.style_img_name),
            config.optimizer,
            config.init_method,
            config.height,
            config.model,
            w.content,
            w.style,
            w.tv,
            config.img_format.ext
        );

        Self {
            dir: dir.as_ref().to_path_buf(),
            saving_freq: config.saving_freq,
            img_format: config.img_format.clone(),
            final_name,
        }
    }

    /// Whether iteration `i` of an `n` iteration budget is saved: the last one always is, the
    /// others every `saving_freq` iterations.
    pub fn should_save(&self, i: usize, n: usize) -> bool {
        i + 1 == n || (self.saving_freq > 0 && i % self.saving_freq as usize == 0)
    }

    /// The file name of iteration `i`.
    pub fn file_name(&self, i: usize) -> String {
        if self.saving_freq == -1 {
            return self.final_name.clone();
        }

        format!(
            "{i:0width$}{ext}",
            width = self.img_format.digits,
            ext = self.img_format.ext
        )
    }

    /// The file the finished image is written to.
    pub fn final_path(&self) -> PathBuf {
        self.dir.join(format!("final{}", self.img_format.ext))
    }

    /// Saves `img` if iteration `i` is due. Failures are logged and otherwise ignored.
    pub fn save_if_due(&self, img: ArrayView4<f32>, i: usize, n: usize) {
        if !self.should_save(i, n) {
            return;
        }

        let path = self.dir.join(self.file_name(i));
        match image_io::save_img(img, &path) {
            Ok(()) => debug!(path:? = path; "saved snapshot"),
            Err(e) => warn!(path:? = path; "couldn't save snapshot: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LossWeights;

    fn snapshots(saving_freq: i64) -> Snapshots {
        let config = TransferConfig {
            saving_freq,
            ..TransferConfig::default()
        };
        Snapshots::new("out", &config)
    }

    #[test]
    fn saves_every_freq_iterations_and_the_last() {
        let s = snapshots(5);
        let saved: Vec<usize> = (0..12).filter(|&i| s.should_save(i, 12)).collect();
        assert_eq!(saved, vec![0, 5, 10, 11]);
    }

    #[test]
    fn non_positive_frequencies_only_save_the_last() {
        for freq in [0, -1] {
            let s = snapshots(freq);
            let saved: Vec<usize> = (0..12).filter(|&i| s.should_save(i, 12)).collect();
            assert_eq!(saved, vec![11]);
        }
    }

    #[test]
    fn names_are_zero_padded() {
        assert_eq!(snapshots(10).file_name(7), "0007.jpg");
        assert_eq!(snapshots(10).file_name(12345), "12345.jpg");
        assert_eq!(snapshots(10).final_path(), PathBuf::from("out/final.jpg"));
    }

    #[test]
    fn final_only_runs_get_a_descriptive_name() {
        assert_eq!(
            snapshots(-1).file_name(2999),
            "figures_vg_starry_night_o_adam_i_content_h_128_m_vgg19_cw_10000000.0_sw_10000.0_tv_10.0.jpg"
        );
    }

    #[test]
    fn fractional_weights_keep_their_digits() {
        let config = TransferConfig {
            saving_freq: -1,
            weights: LossWeights {
                content: 0.5,
                style: 30000.,
                tv: 1.,
            },
            ..TransferConfig::default()
        };

        let name = Snapshots::new("out", &config).file_name(0);
        assert!(name.ends_with("_cw_0.5_sw_30000.0_tv_1.0.jpg"), "{name}");
    }
}
