mod conv2d;
mod layer;
mod max_pool2d;
mod relu;

pub use conv2d::Conv2d;
pub use layer::Layer;
pub use max_pool2d::MaxPool2d;
pub use relu::Relu;
