use std::{
    error::Error,
    fmt::{self, Display},
};

use machine_learning::MlErr;
use ndarray::ShapeError;

/// The result type used in the entire inpainting module.
pub type Result<T> = std::result::Result<T, InpaintErr>;

/// The inpainting module's error type.
#[derive(Debug)]
pub enum InpaintErr {
    ShapeMismatch {
        what: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    /// The input is too small for a layer of the network.
    TooSmall {
        what: &'static str,
        got: Vec<usize>,
    },
    /// A layer was configured with hyperparameters it can't run with.
    InvalidLayer {
        what: &'static str,
        reason: String,
    },
    Shape(ShapeError),
    Ml(MlErr),
}

impl Display for InpaintErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InpaintErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a shape mismatch in {what}, got {got:?} and expected {expected:?}"
            ),
            InpaintErr::TooSmall { what, got } => {
                write!(f, "The input of {what} is too small: {got:?}")
            }
            InpaintErr::InvalidLayer { what, reason } => write!(f, "Invalid {what}: {reason}"),
            InpaintErr::Shape(e) => write!(f, "shape error: {e}"),
            InpaintErr::Ml(e) => write!(f, "{e}"),
        }
    }
}

impl Error for InpaintErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            InpaintErr::Shape(e) => Some(e),
            InpaintErr::Ml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for InpaintErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<MlErr> for InpaintErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}
