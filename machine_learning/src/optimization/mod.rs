mod adam;
mod lbfgs;
mod optimizer;

pub use adam::Adam;
pub use lbfgs::{Lbfgs, LbfgsSummary, Termination};
pub use optimizer::Optimizer;
