use std::{fs, path::PathBuf};

use log::{debug, info};
use machine_learning::{
    MlErr,
    arch::FeatureExtractor,
    optimization::{Adam, Lbfgs, LbfgsSummary, Optimizer},
};
use ndarray::ArrayView4;

use super::{
    init::init_image,
    loss::{Losses, loss_and_grad},
    representation::Targets,
    snapshot::Snapshots,
};
use crate::{
    Result,
    config::{OptimizerKind, TransferConfig},
    image_io::{self, Target},
    tracking::Tracker,
};

/// The learning rate of the first order strategy, on the `[0, 255]` pixel scale.
pub const ADAM_LR: f32 = 10.;

/// The stages of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Iterating,
    Done,
}

/// What a finished run produced.
#[derive(Clone, Debug)]
pub struct TransferOutcome {
    /// The directory every output of the run was written to.
    pub dump_path: PathBuf,
    pub final_image: PathBuf,
    /// The total loss of every objective evaluation, in order.
    pub totals: Vec<f32>,
    /// How the quasi-Newton strategy ended, `None` for the first order one.
    pub lbfgs: Option<LbfgsSummary>,
}

/// Synthesizes an image with the content of one image and the style of another.
///
/// # Arguments
/// * `config` - The configuration of the run.
/// * `extractor` - The frozen network the representations are taken from.
///
/// # Returns
/// The outcome of the run, or the first error found. No error is retried.
pub fn neural_style_transfer<E: FeatureExtractor + ?Sized>(
    config: &TransferConfig,
    extractor: &mut E,
) -> Result<TransferOutcome> {
    let (mut session, mut img) = Session::setup(config, extractor)?;

    session.enter(Phase::Iterating);
    let lbfgs = match config.optimizer {
        OptimizerKind::Adam => {
            session.run_adam(&mut img)?;
            None
        }
        OptimizerKind::Lbfgs => Some(session.run_lbfgs(&mut img)?),
    };

    session.finish(&img, lbfgs)
}

/// The state a run carries from its setup to its end.
struct Session<'a, E: ?Sized> {
    config: &'a TransferConfig,
    extractor: &'a mut E,
    targets: Targets,
    tracker: Tracker,
    snapshots: Snapshots,
    dump_path: PathBuf,
    shape: (usize, usize, usize, usize),
    phase: Phase,
}

/// The explicit state handed to every quasi-Newton objective evaluation.
struct EvalState<'s, 'a, E: ?Sized> {
    session: &'s mut Session<'a, E>,
    cnt: usize,
    n: usize,
}

impl<'a, E: FeatureExtractor + ?Sized> Session<'a, E> {
    /// Prepares the images, captures the targets and starts tracking.
    ///
    /// # Returns
    /// The session and the flattened image the optimization starts from.
    fn setup(config: &'a TransferConfig, extractor: &'a mut E) -> Result<(Self, Vec<f32>)> {
        config.validate()?;

        let dump_path = image_io::dump_dir(
            &config.output_img_dir,
            &config.content_img_name,
            &config.style_img_name,
        );
        fs::create_dir_all(&dump_path)?;

        let style_path = config.style_img_path();
        let content_img =
            image_io::prepare_img(config.content_img_path(), Target::Height(config.height))?;
        let style_img = image_io::prepare_img(&style_path, Target::Height(config.height))?;

        let init = init_image(config.init_method, content_img.view(), &style_path, config.seed)?;
        let shape = init.dim();
        let img: Vec<f32> = init.iter().copied().collect();

        let targets = Targets::capture(&mut *extractor, content_img.view(), style_img.view())?;
        let tracker = Tracker::start(&dump_path, config, &config.model.to_string());
        let snapshots = Snapshots::new(&dump_path, config);

        info!(
            dump_path:? = dump_path,
            optimizer:? = config.optimizer,
            init_method:? = config.init_method,
            iterations = config.iterations;
            "starting style transfer"
        );

        let session = Self {
            config,
            extractor,
            targets,
            tracker,
            snapshots,
            dump_path,
            shape,
            phase: Phase::Initializing,
        };

        Ok((session, img))
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from:? = self.phase, to:? = phase; "style transfer phase change");
        self.phase = phase;
    }

    /// Runs the fixed iteration budget of the first order strategy.
    fn run_adam(&mut self, img: &mut [f32]) -> Result<()> {
        let n = self.config.iterations;
        let mut adam = Adam::with_lr(img.len(), ADAM_LR);

        for cnt in 0..n {
            let x = view(self.shape, img)?;
            let (losses, grad) =
                loss_and_grad(&mut *self.extractor, x, &self.targets, &self.config.weights)?;

            let grad: Vec<f32> = grad.iter().copied().collect();
            adam.update_params(&grad, img)?;

            self.report("Adam", cnt, &losses);
            self.snapshots.save_if_due(view(self.shape, img)?, cnt, n);
        }

        Ok(())
    }

    /// Hands the image to L-BFGS, which evaluates the objective as many times as it needs.
    fn run_lbfgs(&mut self, img: &mut [f32]) -> Result<LbfgsSummary> {
        let n = self.config.iterations;
        let lbfgs = Lbfgs::new(n);

        let mut state = EvalState {
            session: self,
            cnt: 0,
            n,
        };
        let summary = lbfgs.minimize(img, &mut state, evaluate::<E>)?;

        info!(
            termination:? = summary.termination,
            iterations = summary.iterations,
            evaluations = summary.evaluations;
            "L-BFGS finished"
        );

        Ok(summary)
    }

    fn report(&mut self, tag: &str, cnt: usize, losses: &Losses) {
        let r = losses.weighted(cnt, &self.config.weights);
        info!(
            "{tag} | iteration: {cnt:03}, total loss={:12.4}, content_loss={:12.4}, style loss={:12.4}, tv loss={:12.4}",
            r.total, r.content, r.style, r.tv
        );
        self.tracker.record(r);
    }

    /// Writes the final image and closes the tracking.
    fn finish(mut self, img: &[f32], lbfgs: Option<LbfgsSummary>) -> Result<TransferOutcome> {
        self.enter(Phase::Done);

        let final_image = self.snapshots.final_path();
        image_io::save_img(view(self.shape, img)?, &final_image)?;
        info!(path:? = final_image; "saved the final image");

        Ok(TransferOutcome {
            dump_path: self.dump_path,
            final_image,
            totals: self.tracker.finish(),
            lbfgs,
        })
    }
}

/// One evaluation of the quasi-Newton objective, counted as one logged iteration.
fn evaluate<E: FeatureExtractor + ?Sized>(
    state: &mut EvalState<'_, '_, E>,
    x: &[f32],
    grad: &mut [f32],
) -> machine_learning::Result<f32> {
    let session = &mut *state.session;
    let img = view(session.shape, x)?;
    let (losses, dx) = loss_and_grad(
        &mut *session.extractor,
        img,
        &session.targets,
        &session.config.weights,
    )?;

    if dx.len() != grad.len() {
        return Err(MlErr::SizeMismatch {
            what: "image gradient",
            got: dx.len(),
            expected: grad.len(),
        });
    }

    for (g, d) in grad.iter_mut().zip(dx.iter()) {
        *g = *d;
    }

    session.report("L-BFGS", state.cnt, &losses);
    session.snapshots.save_if_due(img, state.cnt, state.n);
    state.cnt += 1;

    Ok(losses.total)
}

fn view(
    shape: (usize, usize, usize, usize),
    x: &[f32],
) -> machine_learning::Result<ArrayView4<'_, f32>> {
    ArrayView4::from_shape(shape, x).map_err(|_| MlErr::SizeMismatch {
        what: "optimizing image",
        got: x.len(),
        expected: shape.0 * shape.1 * shape.2 * shape.3,
    })
}
