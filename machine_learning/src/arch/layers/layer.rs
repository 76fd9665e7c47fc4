use ndarray::{Array4, ArrayView4};

use super::{conv2d, max_pool2d, relu};
use crate::Result;

/// A layer of a feature network.
#[derive(Clone, Debug)]
pub enum Layer {
    Conv2d(conv2d::Conv2d),
    Relu(relu::Relu),
    MaxPool2d(max_pool2d::MaxPool2d),
}

impl Layer {
    /// A 3x3 convolution with unit stride and padding, the only kind VGG uses.
    pub fn conv3x3(in_channels: usize, out_channels: usize) -> Self {
        Self::conv2d(in_channels, out_channels, 3, 1, 1)
    }

    pub fn conv2d(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
    ) -> Self {
        Self::Conv2d(conv2d::Conv2d::new(
            in_channels,
            out_channels,
            kernel,
            stride,
            padding,
        ))
    }

    pub fn relu() -> Self {
        Self::Relu(relu::Relu::new())
    }

    pub fn max_pool2d(kernel: usize, stride: usize) -> Self {
        Self::MaxPool2d(max_pool2d::MaxPool2d::new(kernel, stride))
    }

    /// Returns the amount of parameters in this layer.
    pub fn size(&self) -> usize {
        match self {
            Self::Conv2d(l) => l.size(),
            Self::Relu(_) | Self::MaxPool2d(_) => 0,
        }
    }

    pub fn forward(&mut self, x: ArrayView4<f32>) -> Result<Array4<f32>> {
        match self {
            Self::Conv2d(l) => l.forward(x),
            Self::Relu(l) => l.forward(x),
            Self::MaxPool2d(l) => l.forward(x),
        }
    }

    pub fn backward(&mut self, d: Array4<f32>) -> Result<Array4<f32>> {
        match self {
            Self::Conv2d(l) => l.backward(d),
            Self::Relu(l) => l.backward(d),
            Self::MaxPool2d(l) => l.backward(d),
        }
    }
}
