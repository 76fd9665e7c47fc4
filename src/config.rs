use std::{fmt, path::PathBuf};

use clap::{Parser, ValueEnum};
use machine_learning::arch::vgg::VggKind;
use serde::Serialize;

use crate::{Result, StyleErr};

const ADAM_ITERATIONS: usize = 3000;
const LBFGS_ITERATIONS: usize = 1000;

/// The strategy used to update the optimizing image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[value(name = "adam")]
    Adam,
    #[value(name = "lbfgs")]
    Lbfgs,
}

impl OptimizerKind {
    /// The default iteration budget of the strategy.
    pub fn iterations(self) -> usize {
        match self {
            OptimizerKind::Adam => ADAM_ITERATIONS,
            OptimizerKind::Lbfgs => LBFGS_ITERATIONS,
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerKind::Adam => write!(f, "adam"),
            OptimizerKind::Lbfgs => write!(f, "lbfgs"),
        }
    }
}

/// The network the features are extracted with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    #[value(name = "vgg16")]
    Vgg16,
    #[value(name = "vgg19")]
    Vgg19,
}

impl From<ModelKind> for VggKind {
    fn from(model: ModelKind) -> Self {
        match model {
            ModelKind::Vgg16 => VggKind::Vgg16,
            ModelKind::Vgg19 => VggKind::Vgg19,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Vgg16 => write!(f, "vgg16"),
            ModelKind::Vgg19 => write!(f, "vgg19"),
        }
    }
}

/// How the optimizing image is seeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InitMethod {
    /// Gaussian noise with the shape of the content image.
    Random,
    /// A copy of the content image.
    Content,
    /// The style image resized to the content image.
    Style,
}

impl fmt::Display for InitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitMethod::Random => write!(f, "random"),
            InitMethod::Content => write!(f, "content"),
            InitMethod::Style => write!(f, "style"),
        }
    }
}

/// Neural style transfer: repaints a content image with the textures of a style image.
#[derive(Parser, Debug)]
#[command(name = "neural-style", version, about, long_about = None)]
pub struct Args {
    /// Content image name
    #[arg(long, default_value = "figures.jpg")]
    pub content_img_name: String,

    /// Style image name
    #[arg(long, default_value = "vg_starry_night.jpg")]
    pub style_img_name: String,

    /// Height of the content and style images
    #[arg(long, default_value_t = 128)]
    pub height: u32,

    /// Content images directory
    #[arg(long, default_value = "data/content-images")]
    pub content_images_dir: PathBuf,

    /// Style images directory
    #[arg(long, default_value = "data/style-images")]
    pub style_images_dir: PathBuf,

    /// Directory the results are written to
    #[arg(long, default_value = "output-images")]
    pub output_img_dir: PathBuf,

    /// Weight factor for the content loss
    #[arg(long, default_value_t = 1e7)]
    pub content_weight: f32,

    /// Weight factor for the style loss
    #[arg(long, default_value_t = 1e4)]
    pub style_weight: f32,

    /// Weight factor for the total variation loss
    #[arg(long, default_value_t = 1e1)]
    pub tv_weight: f32,

    #[arg(long, value_enum, default_value_t = OptimizerKind::Adam)]
    pub optimizer: OptimizerKind,

    #[arg(long, value_enum, default_value_t = ModelKind::Vgg19)]
    pub model: ModelKind,

    #[arg(long, value_enum, default_value_t = InitMethod::Content)]
    pub init_method: InitMethod,

    /// Saving frequency for intermediate images (-1 means only final)
    #[arg(long, default_value_t = 1000, allow_hyphen_values = true)]
    pub saving_freq: i64,

    /// Iteration budget, defaults to 3000 for adam and 1000 for lbfgs
    #[arg(long)]
    pub iterations: Option<usize>,

    /// Pretrained feature extractor weights (safetensors, torchvision key layout)
    #[arg(long)]
    pub weights: Option<PathBuf>,

    /// Seed of the random initializations
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Zero padding of the intermediate image names
    #[arg(long, default_value_t = 4)]
    pub img_format_digits: usize,

    /// Extension of the written images
    #[arg(long, default_value = ".jpg")]
    pub img_format_ext: String,

    /// Transfer every content image onto the identically named style image
    #[arg(long)]
    pub batch: bool,
}

/// The multipliers of each loss term.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LossWeights {
    pub content: f32,
    pub style: f32,
    pub tv: f32,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            content: 1e7,
            style: 1e4,
            tv: 1e1,
        }
    }
}

/// How written images are named: zero padded iteration digits and extension.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImgFormat {
    pub digits: usize,
    pub ext: String,
}

impl Default for ImgFormat {
    fn default() -> Self {
        Self {
            digits: 4,
            ext: ".jpg".into(),
        }
    }
}

/// The validated, immutable configuration of a single style transfer run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransferConfig {
    pub content_img_name: String,
    pub style_img_name: String,
    pub content_images_dir: PathBuf,
    pub style_images_dir: PathBuf,
    pub output_img_dir: PathBuf,
    pub height: u32,
    pub weights: LossWeights,
    pub optimizer: OptimizerKind,
    pub model: ModelKind,
    pub init_method: InitMethod,
    pub saving_freq: i64,
    pub iterations: usize,
    pub extractor_weights: Option<PathBuf>,
    pub seed: u64,
    pub img_format: ImgFormat,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            content_img_name: "figures.jpg".into(),
            style_img_name: "vg_starry_night.jpg".into(),
            content_images_dir: PathBuf::from("data/content-images"),
            style_images_dir: PathBuf::from("data/style-images"),
            output_img_dir: PathBuf::from("output-images"),
            height: 128,
            weights: LossWeights::default(),
            optimizer: OptimizerKind::Adam,
            model: ModelKind::Vgg19,
            init_method: InitMethod::Content,
            saving_freq: 1000,
            iterations: OptimizerKind::Adam.iterations(),
            extractor_weights: None,
            seed: 0,
            img_format: ImgFormat::default(),
        }
    }
}

impl TransferConfig {
    pub fn content_img_path(&self) -> PathBuf {
        self.content_images_dir.join(&self.content_img_name)
    }

    pub fn style_img_path(&self) -> PathBuf {
        self.style_images_dir.join(&self.style_img_name)
    }

    /// Checks the invariants of a run.
    ///
    /// # Returns
    /// An error if a weight is negative or not finite, or if the height, the iteration budget or
    /// the image name digits are zero.
    pub fn validate(&self) -> Result<()> {
        let LossWeights { content, style, tv } = self.weights;
        for (name, w) in [("content", content), ("style", style), ("tv", tv)] {
            if !w.is_finite() || w < 0. {
                return Err(StyleErr::InvalidConfig(format!(
                    "the {name} weight must be a non negative number, got {w}"
                )));
            }
        }

        if self.height == 0 {
            return Err(StyleErr::InvalidConfig("the height must be positive".into()));
        }

        if self.iterations == 0 {
            return Err(StyleErr::InvalidConfig(
                "the iteration budget must be positive".into(),
            ));
        }

        if self.saving_freq < -1 {
            return Err(StyleErr::InvalidConfig(format!(
                "the saving frequency must be -1 or non negative, got {}",
                self.saving_freq
            )));
        }

        if self.img_format.digits == 0 {
            return Err(StyleErr::InvalidConfig(
                "images need at least one digit in their name".into(),
            ));
        }

        Ok(())
    }
}

impl TryFrom<Args> for TransferConfig {
    type Error = StyleErr;

    fn try_from(args: Args) -> Result<Self> {
        let config = Self {
            content_img_name: args.content_img_name,
            style_img_name: args.style_img_name,
            content_images_dir: args.content_images_dir,
            style_images_dir: args.style_images_dir,
            output_img_dir: args.output_img_dir,
            height: args.height,
            weights: LossWeights {
                content: args.content_weight,
                style: args.style_weight,
                tv: args.tv_weight,
            },
            optimizer: args.optimizer,
            model: args.model,
            init_method: args.init_method,
            saving_freq: args.saving_freq,
            iterations: args
                .iterations
                .unwrap_or_else(|| args.optimizer.iterations()),
            extractor_weights: args.weights,
            seed: args.seed,
            img_format: ImgFormat {
                digits: args.img_format_digits,
                ext: args.img_format_ext,
            },
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> std::result::Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("neural-style").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_follow_the_adam_budget() {
        let config = TransferConfig::try_from(parse(&[]).unwrap()).unwrap();

        assert_eq!(config.optimizer, OptimizerKind::Adam);
        assert_eq!(config.model, ModelKind::Vgg19);
        assert_eq!(config.init_method, InitMethod::Content);
        assert_eq!(config.iterations, 3000);
        assert_eq!(config.saving_freq, 1000);
        assert_eq!(config.img_format, ImgFormat::default());
    }

    #[test]
    fn lbfgs_gets_its_own_budget_unless_overridden() {
        let config = TransferConfig::try_from(parse(&["--optimizer", "lbfgs"]).unwrap()).unwrap();
        assert_eq!(config.iterations, 1000);

        let args = parse(&["--optimizer", "lbfgs", "--iterations", "7"]).unwrap();
        assert_eq!(TransferConfig::try_from(args).unwrap().iterations, 7);
    }

    #[test]
    fn unknown_choices_are_rejected_while_parsing() {
        assert!(parse(&["--optimizer", "sgd"]).is_err());
        assert!(parse(&["--model", "resnet"]).is_err());
        assert!(parse(&["--init-method", "zeros"]).is_err());
        assert!(parse(&["--model", "vgg16", "--init-method", "style"]).is_ok());
    }

    #[test]
    fn only_final_saving_is_accepted() {
        let args = parse(&["--saving-freq", "-1"]).unwrap();
        assert_eq!(TransferConfig::try_from(args).unwrap().saving_freq, -1);
    }

    #[test]
    fn invalid_values_fail_validation() {
        for args in [
            &["--content-weight=-1"][..],
            &["--tv-weight", "NaN"],
            &["--height", "0"],
            &["--iterations", "0"],
            &["--saving-freq=-2"],
        ] {
            let args = parse(args).unwrap();
            assert!(TransferConfig::try_from(args).is_err());
        }
    }

    #[test]
    fn config_serializes_choices_in_lowercase() {
        let json = serde_json::to_value(TransferConfig::default()).unwrap();
        assert_eq!(json["optimizer"], "adam");
        assert_eq!(json["model"], "vgg19");
        assert_eq!(json["init_method"], "content");
    }
}
