use log::debug;
use ndarray::{Array5, ArrayView5};

use crate::{
    InpaintErr, Result,
    aot::AotBlock,
    conv3d::{Conv3d, Conv3dSpec},
    init::WeightInit,
    ops::{self, concat_channels, replication_pad3d, upsample_trilinear},
};

/// The shape of an `InpaintGenerator`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// The channels of the image, the mask adds one more to the input.
    pub channels: usize,
    /// The output channels of the three encoder convolutions.
    pub widths: [usize; 3],
    pub block_num: usize,
    pub rates: Vec<usize>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            widths: [64, 128, 256],
            block_num: 8,
            rates: vec![1, 2, 4, 8],
        }
    }
}

/// Trilinear x2 upsampling followed by a 3x3x3 convolution.
#[derive(Clone, Debug)]
struct UpConv {
    conv: Conv3d,
}

impl UpConv {
    fn new(in_channels: usize, out_channels: usize) -> Result<Self> {
        Ok(Self {
            conv: Conv3d::new(Conv3dSpec::new(in_channels, out_channels, 3).padding(1))?,
        })
    }

    fn forward(&self, x: ArrayView5<f32>) -> Result<Array5<f32>> {
        self.conv.forward(upsample_trilinear(x).view())
    }
}

/// The generator of a 3D AOT-GAN: an encoder that downsamples by 4, a stack of `AotBlock`s and
/// a decoder back to the input resolution.
#[derive(Clone, Debug)]
pub struct InpaintGenerator {
    config: GeneratorConfig,
    encoder: [Conv3d; 3],
    middle: Vec<AotBlock>,
    up: [UpConv; 2],
    head: Conv3d,
}

impl InpaintGenerator {
    /// Creates a new `InpaintGenerator` with seeded random weights.
    ///
    /// # Arguments
    /// * `config` - The shape of the network.
    /// * `seed` - The seed of the weight initialization.
    ///
    /// # Returns
    /// The generator, or an error if the weights can't be initialized.
    pub fn new(config: GeneratorConfig, seed: u64) -> Result<Self> {
        let [w0, w1, w2] = config.widths;
        let channels = config.channels;

        let mut generator = Self {
            encoder: [
                Conv3d::new(Conv3dSpec::new(channels + 1, w0, 7))?,
                Conv3d::new(Conv3dSpec::new(w0, w1, 4).stride(2).padding(1))?,
                Conv3d::new(Conv3dSpec::new(w1, w2, 4).stride(2).padding(1))?,
            ],
            middle: (0..config.block_num)
                .map(|_| AotBlock::new(w2, &config.rates))
                .collect::<Result<_>>()?,
            up: [UpConv::new(w2, w1)?, UpConv::new(w1, w0)?],
            head: Conv3d::new(Conv3dSpec::new(w0, channels, 3).padding(1))?,
            config,
        };

        let init = WeightInit::new(seed);
        for conv in &mut generator.encoder {
            init.conv(conv)?;
        }
        for block in &mut generator.middle {
            block.init_weights(&init)?;
        }
        for up in &mut generator.up {
            init.conv(&mut up.conv)?;
        }
        init.conv(&mut generator.head)?;

        Ok(generator)
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn blocks(&self) -> &[AotBlock] {
        &self.middle
    }

    /// Fills the masked region of `x`.
    ///
    /// # Arguments
    /// * `x` - The `(N, channels, D, H, W)` volume.
    /// * `mask` - The `(N, 1, D, H, W)` mask of the region to fill.
    ///
    /// # Returns
    /// The generated volume in `[-1, 1]`, with the shape of `x` when every spatial size is a
    /// multiple of 4.
    pub fn forward(&self, x: ArrayView5<f32>, mask: ArrayView5<f32>) -> Result<Array5<f32>> {
        ops::expect_channels(&x, self.config.channels, "generator input")?;

        let (n, _, d, h, w) = x.dim();
        if mask.dim() != (n, 1, d, h, w) {
            return Err(InpaintErr::ShapeMismatch {
                what: "generator mask",
                got: mask.shape().to_vec(),
                expected: vec![n, 1, d, h, w],
            });
        }

        let x = concat_channels(&[x, mask])?;

        let [e0, e1, e2] = &self.encoder;
        let x = ops::relu(e0.forward(replication_pad3d(x.view(), 3).view())?);
        let x = ops::relu(e1.forward(x.view())?);
        let mut x = ops::relu(e2.forward(x.view())?);
        debug!(shape:? = x.shape(); "encoded");

        for block in &self.middle {
            x = block.forward(x.view())?;
        }

        let [u0, u1] = &self.up;
        let x = ops::relu(u0.forward(x.view())?);
        let x = ops::relu(u1.forward(x.view())?);
        let x = self.head.forward(x.view())?;

        Ok(ops::tanh(x))
    }
}
