mod extractor;
pub mod layers;
pub mod loss;
mod sequential;
pub mod vgg;

pub use extractor::{FeatureExtractor, FeatureNet};
pub use sequential::Sequential;
