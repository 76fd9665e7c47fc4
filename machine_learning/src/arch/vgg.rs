use std::{cell::RefCell, path::Path, rc::Rc};

use log::{info, warn};
use rand::{SeedableRng, rngs::StdRng};

use super::{FeatureNet, Sequential, layers::Layer};
use crate::{
    Result,
    initialization::{ChainedParamGen, ConstParamGen, ParamGen, RandParamGen},
    weights,
};

#[rustfmt::skip]
const VGG16: &[Option<usize>] = &[
    Some(64), Some(64), None,
    Some(128), Some(128), None,
    Some(256), Some(256), Some(256), None,
    Some(512), Some(512), Some(512), None,
    Some(512), Some(512), Some(512), None,
];

#[rustfmt::skip]
const VGG19: &[Option<usize>] = &[
    Some(64), Some(64), None,
    Some(128), Some(128), None,
    Some(256), Some(256), Some(256), Some(256), None,
    Some(512), Some(512), Some(512), Some(512), None,
    Some(512), Some(512), Some(512), Some(512), None,
];

/// The VGG variants usable as feature extractors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VggKind {
    Vgg16,
    Vgg19,
}

impl VggKind {
    /// The feature blocks, a convolution's output channels or `None` for a max pooling.
    fn config(self) -> &'static [Option<usize>] {
        match self {
            VggKind::Vgg16 => VGG16,
            VggKind::Vgg19 => VGG19,
        }
    }

    /// The names of the tapped layers.
    pub fn taps(self) -> &'static [&'static str] {
        match self {
            VggKind::Vgg16 => &["relu1_2", "relu2_2", "relu3_3", "relu4_3"],
            VggKind::Vgg19 => &["relu1_1", "relu2_1", "relu3_1", "relu4_1", "conv4_2", "relu5_1"],
        }
    }

    pub fn content_index(self) -> usize {
        match self {
            VggKind::Vgg16 => 1,
            VggKind::Vgg19 => 4,
        }
    }

    pub fn style_indices(self) -> Vec<usize> {
        let content = self.content_index();
        match self {
            VggKind::Vgg16 => (0..self.taps().len()).collect(),
            VggKind::Vgg19 => (0..self.taps().len()).filter(|&i| i != content).collect(),
        }
    }

    /// Builds the whole feature stack of the network, named `convB_L`, `reluB_L` and `poolB`.
    ///
    /// Layer positions match the ones of the usual `features.{i}` checkpoint layout.
    pub fn sequential(self) -> Sequential {
        let mut layers = Vec::new();
        let (mut block, mut conv) = (1, 1);
        let mut channels = 3;

        for entry in self.config() {
            match *entry {
                Some(out) => {
                    layers.push((format!("conv{block}_{conv}"), Layer::conv3x3(channels, out)));
                    layers.push((format!("relu{block}_{conv}"), Layer::relu()));
                    channels = out;
                    conv += 1;
                }
                None => {
                    layers.push((format!("pool{block}"), Layer::max_pool2d(2, 2)));
                    block += 1;
                    conv = 1;
                }
            }
        }

        Sequential::new(layers)
    }

    /// Builds the feature extractor with zeroed parameters.
    pub fn features(self) -> Result<FeatureNet> {
        FeatureNet::new(
            self.sequential(),
            self.taps(),
            self.content_index(),
            self.style_indices(),
        )
    }
}

/// Builds a VGG feature extractor with its parameters ready for use.
///
/// # Arguments
/// * `kind` - The VGG variant.
/// * `weights` - A safetensors checkpoint with `features.{i}.weight` and `features.{i}.bias` keys.
/// * `seed` - The seed of the Kaiming initialization used when there's no checkpoint.
///
/// # Returns
/// The feature extractor, or an error if the checkpoint can't be read or doesn't fit the network.
pub fn vgg(kind: VggKind, weights: Option<&Path>, seed: u64) -> Result<FeatureNet> {
    let mut features = kind.features()?;

    match weights {
        Some(path) => {
            let tensors = weights::load_safetensors(path)?;
            features.load_tensors(&tensors, "features")?;
            info!(model:? = kind, path:? = path; "loaded pretrained weights");
        }
        None => {
            warn!(
                "no weights given for {kind:?}, using a Kaiming initialized network: \
                 the features are not pretrained"
            );
            features.init_params(&mut kaiming(&features, seed)?)?;
        }
    }

    Ok(features)
}

fn kaiming(features: &FeatureNet, seed: u64) -> Result<ChainedParamGen> {
    let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));
    let mut param_gens: Vec<Box<dyn ParamGen>> = Vec::new();
    let net = features.net();

    for i in 0..net.len() {
        if let Some([out, fan_in, k, _]) = net.conv_shape(i) {
            let fan_in = fan_in * k * k;
            param_gens.push(Box::new(RandParamGen::kaiming(rng.clone(), out * fan_in, fan_in)?));
            param_gens.push(Box::new(ConstParamGen::new(0., out)));
        }
    }

    Ok(ChainedParamGen::new(param_gens))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_follow_the_checkpoint_layout() {
        let net = VggKind::Vgg19.sequential();

        assert_eq!(net.len(), 37);
        assert_eq!(net.position("relu1_1"), Some(1));
        assert_eq!(net.position("relu4_1"), Some(20));
        assert_eq!(net.position("conv4_2"), Some(21));
        assert_eq!(net.position("relu5_1"), Some(29));

        let net = VggKind::Vgg16.sequential();
        assert_eq!(net.len(), 31);
        assert_eq!(net.position("relu2_2"), Some(8));
        assert_eq!(net.position("relu4_3"), Some(22));
    }

    #[test]
    fn content_is_not_a_style_tap_in_vgg19() {
        let kind = VggKind::Vgg19;
        assert_eq!(kind.taps()[kind.content_index()], "conv4_2");
        assert_eq!(kind.style_indices(), vec![0, 1, 2, 3, 5]);

        let kind = VggKind::Vgg16;
        assert_eq!(kind.taps()[kind.content_index()], "relu2_2");
        assert_eq!(kind.style_indices(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn extractor_stops_at_the_deepest_tap() {
        assert_eq!(VggKind::Vgg19.features().unwrap().net().len(), 30);
        assert_eq!(VggKind::Vgg16.features().unwrap().net().len(), 23);
    }

    #[test]
    fn fallback_initialization_is_seeded() {
        use super::super::FeatureExtractor;
        use ndarray::Array4;

        let x = Array4::from_shape_fn((1, 3, 8, 8), |(_, c, i, j)| (c + i * j) as f32 - 10.);
        let run = |seed| {
            let mut features = vgg(VggKind::Vgg16, None, seed).unwrap();
            features.forward(x.view()).unwrap()
        };

        let (a, b, c) = (run(7), run(7), run(8));
        assert_eq!(a, b);
        assert_ne!(a[1], c[1]);
    }
}
