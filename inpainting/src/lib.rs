//! Forward definitions of the 3D AOT-GAN inpainting networks over `(N, C, D, H, W)` volumes.

pub mod aot;
pub mod conv3d;
pub mod discriminator;
pub mod error;
pub mod generator;
pub mod init;
pub mod ops;
pub mod spectral_norm;

pub use aot::AotBlock;
pub use discriminator::Discriminator;
pub use error::{InpaintErr, Result};
pub use generator::{GeneratorConfig, InpaintGenerator};
