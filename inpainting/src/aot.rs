use ndarray::{Array5, ArrayView5};

use crate::{
    Result,
    conv3d::{Conv3d, Conv3dSpec},
    init::WeightInit,
    ops::{self, concat_channels, feature_norm, replication_pad3d},
};

/// One dilated branch of an `AotBlock`: replication padding, a dilated 3x3x3 convolution and a
/// ReLU.
#[derive(Clone, Debug)]
pub struct Branch {
    name: String,
    rate: usize,
    conv: Conv3d,
}

impl Branch {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rate(&self) -> usize {
        self.rate
    }

    pub fn forward(&self, x: ArrayView5<f32>) -> Result<Array5<f32>> {
        let x = replication_pad3d(x, self.rate);
        Ok(ops::relu(self.conv.forward(x.view())?))
    }
}

/// Aggregated contextual transformations: dilated branches at several rates whose fused output
/// is blended with the input through a learned gate.
#[derive(Clone, Debug)]
pub struct AotBlock {
    dim: usize,
    branches: Vec<Branch>,
    fuse: Conv3d,
    gate: Conv3d,
}

impl AotBlock {
    /// Creates a new `AotBlock` with zeroed parameters.
    ///
    /// # Arguments
    /// * `dim` - The amount of input and output channels.
    /// * `rates` - The dilation rate of each branch, every branch outputs `dim / 4` channels.
    ///
    /// # Returns
    /// A new `AotBlock` instance.
    pub fn new(dim: usize, rates: &[usize]) -> Result<Self> {
        let branch_dim = dim / 4;

        let branches = rates
            .iter()
            .enumerate()
            .map(|(i, &rate)| -> Result<Branch> {
                Ok(Branch {
                    name: format!("block{i:02}"),
                    rate,
                    conv: Conv3d::new(Conv3dSpec::new(dim, branch_dim, 3).dilation(rate))?,
                })
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            dim,
            branches,
            fuse: Conv3d::new(Conv3dSpec::new(branch_dim * rates.len(), dim, 3))?,
            gate: Conv3d::new(Conv3dSpec::new(dim, dim, 3))?,
        })
    }

    pub fn init_weights(&mut self, init: &WeightInit) -> Result<()> {
        for branch in &mut self.branches {
            init.conv(&mut branch.conv)?;
        }

        init.conv(&mut self.fuse)?;
        init.conv(&mut self.gate)
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// Returns the branch at position `i`.
    pub fn branch(&self, i: usize) -> Option<&Branch> {
        self.branches.get(i)
    }

    pub fn forward(&self, x: ArrayView5<f32>) -> Result<Array5<f32>> {
        ops::expect_channels(&x, self.dim, "aot block input")?;

        let outs = self
            .branches
            .iter()
            .map(|branch| branch.forward(x))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<_> = outs.iter().map(|o| o.view()).collect();
        let out = concat_channels(&views)?;

        let out = self.fuse.forward(replication_pad3d(out.view(), 1).view())?;

        let gate = self.gate.forward(replication_pad3d(x, 1).view())?;
        let mask = ops::sigmoid(feature_norm(gate.view()));

        Ok(&x * &mask.mapv(|m| 1. - m) + out * &mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array;

    #[test]
    fn branches_are_named_by_position() {
        let block = AotBlock::new(8, &[1, 2, 4, 8]).unwrap();
        let names: Vec<_> = block.branches().iter().map(Branch::name).collect();

        assert_eq!(names, ["block00", "block01", "block02", "block03"]);
        assert_eq!(block.branch(2).map(Branch::rate), Some(4));
        assert!(block.branch(4).is_none());
    }

    #[test]
    fn keeps_the_input_shape() {
        let mut block = AotBlock::new(8, &[1, 2]).unwrap();
        block.init_weights(&WeightInit::new(3)).unwrap();

        let x = Array::from_shape_fn((1, 8, 3, 4, 5), |(_, c, i, j, k)| {
            ((c + i * 3 + j * 5 + k * 7) as f32 * 0.1).cos()
        });
        let y = block.forward(x.view()).unwrap();

        assert_eq!(y.dim(), x.dim());
        assert!(y.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn zero_weights_blend_input_and_fuse_evenly() {
        // zero gate weights give a zero pre-activation, a constant group has zero deviation and
        // the normalization maps it to 5 * (2 * 0 - 1) = -5
        let block = AotBlock::new(4, &[1, 2]).unwrap();
        let x = Array5::from_elem((1, 4, 2, 2, 2), 2.);
        let y = block.forward(x.view()).unwrap();

        let mask = 1. / (1. + 5f32.exp());
        assert_relative_eq!(y[[0, 0, 0, 0, 0]], 2. * (1. - mask), epsilon = 1e-5);
    }

    #[test]
    fn wrong_channel_count_fails() {
        let block = AotBlock::new(8, &[1]).unwrap();
        assert!(block.forward(Array5::zeros((1, 4, 2, 2, 2)).view()).is_err());
    }
}
