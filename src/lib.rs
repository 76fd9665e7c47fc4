pub mod batch;
pub mod config;
mod error;
pub mod image_io;
pub mod style;
pub mod tracking;

pub use error::{Result, StyleErr};
