use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use rand_distr::NormalError;
use safetensors::SafeTensorError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        what: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    MissingForward {
        layer: String,
    },
    InvalidTaps(String),
    MissingWeights(String),
    UnsupportedDtype {
        tensor: String,
        dtype: String,
    },
    InvalidDistribution(String),
    Solver(String),
    Safetensors(SafeTensorError),
    Io(io::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a shape mismatch in {what}, got {got:?} and expected {expected:?}"
            ),
            MlErr::MissingForward { layer } => write!(
                f,
                "Tried to run the backward pass of {layer} without a previous forward pass"
            ),
            MlErr::InvalidTaps(msg) => write!(f, "Invalid feature taps: {msg}"),
            MlErr::MissingWeights(name) => write!(f, "The weight file has no tensor named {name}"),
            MlErr::UnsupportedDtype { tensor, dtype } => write!(
                f,
                "The tensor {tensor} has dtype {dtype}, only F32 tensors are supported"
            ),
            MlErr::InvalidDistribution(msg) => write!(f, "Invalid distribution: {msg}"),
            MlErr::Solver(msg) => write!(f, "The optimizer failed: {msg}"),
            MlErr::Safetensors(e) => write!(f, "safetensors error: {e}"),
            MlErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Safetensors(e) => Some(e),
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SafeTensorError> for MlErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Safetensors(value)
    }
}

impl From<NormalError> for MlErr {
    fn from(value: NormalError) -> Self {
        Self::InvalidDistribution(value.to_string())
    }
}
