use ndarray::{Array5, ArrayView5};

use crate::{
    Result,
    conv3d::{Conv3d, Conv3dSpec},
    init::WeightInit,
    ops,
    spectral_norm::SpectralNorm,
};

const SLOPE: f32 = 0.2;

/// A patch discriminator over `(N, channels, D, H, W)` volumes.
///
/// Four spectral normalized, bias free 4x4x4 convolutions (the first three with stride 2), each
/// followed by a leaky ReLU, and a final convolution down to a single channel of patch scores.
#[derive(Clone, Debug)]
pub struct Discriminator {
    channels: usize,
    convs: Vec<SpectralNorm>,
    head: Conv3d,
}

impl Discriminator {
    /// Creates a new `Discriminator` with seeded random weights.
    ///
    /// # Arguments
    /// * `channels` - The channels of the input volume.
    /// * `widths` - The output channels of the four normalized convolutions, `[64, 128, 256, 512]`
    ///   in the published network.
    /// * `seed` - The seed of the weight initialization.
    pub fn new(channels: usize, widths: [usize; 4], seed: u64) -> Result<Self> {
        let init = WeightInit::new(seed);
        let mut convs = Vec::with_capacity(widths.len());
        let mut in_channels = channels;

        for (i, &out) in widths.iter().enumerate() {
            let stride = if i < 3 { 2 } else { 1 };
            let spec = Conv3dSpec::new(in_channels, out, 4)
                .stride(stride)
                .padding(1)
                .without_bias();

            let mut conv = SpectralNorm::new(spec, init.unit_normal(out)?)?;
            init.conv_spectral(&mut conv)?;
            convs.push(conv);
            in_channels = out;
        }

        let mut head = Conv3d::new(Conv3dSpec::new(in_channels, 1, 4).padding(1))?;
        init.conv(&mut head)?;

        Ok(Self {
            channels,
            convs,
            head,
        })
    }

    /// Scores every patch of `x`, updating the spectral norm estimates on the way.
    pub fn forward(&mut self, x: ArrayView5<f32>) -> Result<Array5<f32>> {
        ops::expect_channels(&x, self.channels, "discriminator input")?;

        let mut x = x.to_owned();
        for conv in &mut self.convs {
            x = ops::leaky_relu(conv.forward(x.view())?, SLOPE);
        }

        self.head.forward(x.view())
    }
}
