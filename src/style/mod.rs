mod init;
mod loss;
mod representation;
mod snapshot;
mod transfer;

pub use init::init_image;
pub use loss::{Losses, build_loss, loss_and_grad};
pub use representation::{Targets, content_representation, style_representations};
pub use snapshot::Snapshots;
pub use transfer::{ADAM_LR, Phase, TransferOutcome, neural_style_transfer};
