use anyhow::Context;
use clap::Parser;
use log::info;
use machine_learning::arch::vgg;

use neural_style::{
    batch,
    config::{Args, TransferConfig},
    style,
};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let batch_mode = args.batch;
    let config = TransferConfig::try_from(args)?;

    let mut extractor = vgg::vgg(
        config.model.into(),
        config.extractor_weights.as_deref(),
        config.seed,
    )
    .context("couldn't build the feature extractor")?;
    info!("Using {} in the optimization procedure.", config.model);

    if batch_mode {
        let outcomes = batch::run_batch(&config, &mut extractor)?;
        info!(runs = outcomes.len(); "batch finished");
    } else {
        let outcome = style::neural_style_transfer(&config, &mut extractor)?;
        info!(dump_path:? = outcome.dump_path; "results written");
    }

    Ok(())
}
