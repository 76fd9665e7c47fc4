use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use image::ImageError;
use machine_learning::MlErr;
use ndarray::ShapeError;

/// The result type used in the entire style transfer crate.
pub type Result<T> = std::result::Result<T, StyleErr>;

/// The style transfer crate's error type.
#[derive(Debug)]
pub enum StyleErr {
    InvalidConfig(String),
    Ml(MlErr),
    Image(ImageError),
    Shape(ShapeError),
    Json(serde_json::Error),
    Io(io::Error),
}

impl Display for StyleErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StyleErr::InvalidConfig(msg) => write!(f, "Invalid configuration: {msg}"),
            StyleErr::Ml(e) => write!(f, "{e}"),
            StyleErr::Image(e) => write!(f, "Image error: {e}"),
            StyleErr::Shape(e) => write!(f, "Shape error: {e}"),
            StyleErr::Json(e) => write!(f, "Json error: {e}"),
            StyleErr::Io(e) => write!(f, "Io error: {e}"),
        }
    }
}

impl Error for StyleErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StyleErr::Ml(e) => Some(e),
            StyleErr::Image(e) => Some(e),
            StyleErr::Shape(e) => Some(e),
            StyleErr::Json(e) => Some(e),
            StyleErr::Io(e) => Some(e),
            StyleErr::InvalidConfig(_) => None,
        }
    }
}

impl From<MlErr> for StyleErr {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<ImageError> for StyleErr {
    fn from(e: ImageError) -> Self {
        Self::Image(e)
    }
}

impl From<ShapeError> for StyleErr {
    fn from(e: ShapeError) -> Self {
        Self::Shape(e)
    }
}

impl From<serde_json::Error> for StyleErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<io::Error> for StyleErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
