mod gram;
mod loss_fn;
mod mse;
mod sum_squared;
mod total_variation;

pub use gram::{gram, gram_backward};
pub use loss_fn::LossFn;
pub use mse::Mse;
pub use sum_squared::SumSquared;
pub use total_variation::{total_variation, total_variation_prime};
