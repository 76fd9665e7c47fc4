use std::{
    cell::RefCell,
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

use image::{Rgb, RgbImage};
use machine_learning::{
    arch::{FeatureNet, Sequential, layers::Layer},
    initialization::RandParamGen,
};
use neural_style::{
    batch,
    config::{InitMethod, LossWeights, OptimizerKind, TransferConfig},
    style::neural_style_transfer,
    tracking::{LOSSES_FILE, RUN_FILE},
};
use rand::{SeedableRng, rngs::StdRng};

fn extractor(content_tap: &str) -> FeatureNet {
    let net = Sequential::new([
        ("conv1", Layer::conv3x3(3, 4)),
        ("relu1", Layer::relu()),
        ("pool1", Layer::max_pool2d(2, 2)),
        ("conv2", Layer::conv3x3(4, 4)),
        ("relu2", Layer::relu()),
    ]);

    let mut features =
        FeatureNet::new(net, &["relu1", content_tap, "relu2"], 1, vec![0, 2]).unwrap();
    let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(5)));
    let mut param_gen = RandParamGen::normal(rng, features.size(), 0., 0.1).unwrap();
    features.init_params(&mut param_gen).unwrap();
    features
}

fn write_img(dir: &Path, name: &str, w: u32, h: u32, phase: u32) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_fn(w, h, |x, y| {
        Rgb([
            ((x * 3 + phase) % 256) as u8,
            ((y * 5 + 2 * phase) % 256) as u8,
            (((x + y) * 7 + phase) % 256) as u8,
        ])
    })
    .save(&path)
    .unwrap();
    path
}

struct Workspace {
    _root: tempfile::TempDir,
    config: TransferConfig,
}

fn workspace(size: u32) -> Workspace {
    let root = tempfile::tempdir().unwrap();
    let content_dir = root.path().join("content");
    let style_dir = root.path().join("style");
    fs::create_dir_all(&content_dir).unwrap();
    fs::create_dir_all(&style_dir).unwrap();

    write_img(&content_dir, "figures.png", size, size, 0);
    write_img(&style_dir, "starry.png", size, size, 90);

    let config = TransferConfig {
        content_img_name: "figures.png".into(),
        style_img_name: "starry.png".into(),
        content_images_dir: content_dir,
        style_images_dir: style_dir,
        output_img_dir: root.path().join("out"),
        height: size,
        ..TransferConfig::default()
    };

    Workspace {
        _root: root,
        config,
    }
}

fn images_in(dir: &Path, ext: &str) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(ext))
        .collect();
    names.sort();
    names
}

#[test]
fn adam_run_logs_every_iteration_and_saves_snapshots() {
    let ws = workspace(128);
    let config = TransferConfig {
        iterations: 10,
        saving_freq: 5,
        ..ws.config.clone()
    };

    let outcome = neural_style_transfer(&config, &mut extractor("conv2")).unwrap();

    assert_eq!(outcome.totals.len(), 10);
    assert!(outcome.totals.iter().all(|t| t.is_finite()));
    assert!(outcome.lbfgs.is_none());
    assert!(outcome.dump_path.ends_with("combined_figures_starry"));

    assert_eq!(
        images_in(&outcome.dump_path, ".jpg"),
        vec!["0000.jpg", "0005.jpg", "0009.jpg", "final.jpg"]
    );

    let losses = fs::read_to_string(outcome.dump_path.join(LOSSES_FILE)).unwrap();
    assert_eq!(losses.lines().count(), 10);
    assert!(outcome.dump_path.join(RUN_FILE).is_file());
}

#[test]
fn adam_reduces_the_content_loss() {
    let ws = workspace(32);
    let config = TransferConfig {
        iterations: 20,
        saving_freq: -1,
        init_method: InitMethod::Style,
        weights: LossWeights {
            content: 1.,
            style: 0.,
            tv: 0.,
        },
        ..ws.config.clone()
    };

    // the content tap is a convolution, the content loss is a convex quadratic of the image
    let outcome = neural_style_transfer(&config, &mut extractor("conv1")).unwrap();

    let first = outcome.totals[0];
    let last = outcome.totals[outcome.totals.len() - 1];
    assert!(last < first, "{first} -> {last}");
}

#[test]
fn adam_reduces_the_content_loss_from_noise() {
    let ws = workspace(32);
    let config = TransferConfig {
        iterations: 20,
        saving_freq: -1,
        init_method: InitMethod::Random,
        weights: LossWeights {
            content: 1.,
            style: 0.,
            tv: 0.,
        },
        ..ws.config.clone()
    };

    let outcome = neural_style_transfer(&config, &mut extractor("conv1")).unwrap();

    let first = outcome.totals[0];
    let last = outcome.totals[outcome.totals.len() - 1];
    assert!(last < first, "{first} -> {last}");
}

#[test]
fn a_seed_makes_noise_started_runs_repeatable() {
    let ws = workspace(24);
    let run = |out: &str, seed: u64| {
        let config = TransferConfig {
            iterations: 3,
            saving_freq: -1,
            init_method: InitMethod::Random,
            seed,
            output_img_dir: ws.config.output_img_dir.join(out),
            ..ws.config.clone()
        };
        let outcome = neural_style_transfer(&config, &mut extractor("conv2")).unwrap();
        let final_image = fs::read(&outcome.final_image).unwrap();
        (outcome.totals, final_image)
    };

    let (totals, image) = run("first", 7);
    let (same_totals, same_image) = run("second", 7);
    let (other_totals, _) = run("third", 8);

    assert_eq!(totals, same_totals);
    assert_eq!(image, same_image);
    assert_ne!(totals, other_totals);
}

#[test]
fn lbfgs_counts_every_evaluation() {
    let ws = workspace(24);
    let config = TransferConfig {
        optimizer: OptimizerKind::Lbfgs,
        iterations: 4,
        saving_freq: -1,
        init_method: InitMethod::Random,
        ..ws.config.clone()
    };

    let outcome = neural_style_transfer(&config, &mut extractor("conv2")).unwrap();
    let summary = outcome.lbfgs.unwrap();

    assert_eq!(outcome.totals.len(), summary.evaluations);
    assert!(summary.loss <= summary.initial_loss);
    assert!(outcome.final_image.is_file());

    // only the descriptive final snapshot and the final image
    let images = images_in(&outcome.dump_path, ".jpg");
    assert!(images.len() <= 2, "{images:?}");
    assert!(images.contains(&"final.jpg".to_string()));
}

#[test]
fn missing_images_abort_the_run() {
    let ws = workspace(16);
    let config = TransferConfig {
        content_img_name: "missing.png".into(),
        iterations: 1,
        ..ws.config.clone()
    };

    assert!(neural_style_transfer(&config, &mut extractor("conv2")).is_err());
}

#[test]
fn batch_runs_one_transfer_per_pair() {
    let ws = workspace(16);
    let config = TransferConfig {
        iterations: 2,
        saving_freq: -1,
        ..ws.config.clone()
    };

    write_img(&config.content_images_dir, "a.png", 16, 16, 3);
    write_img(&config.style_images_dir, "a.png", 16, 16, 40);
    write_img(&config.content_images_dir, "b.png", 16, 16, 5);
    write_img(&config.style_images_dir, "b.png", 16, 16, 70);

    let outcomes = batch::run_batch(&config, &mut extractor("conv2")).unwrap();

    // figures.png has no style counterpart
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].dump_path.ends_with("a/combined_a_a"));
    assert!(outcomes[1].dump_path.ends_with("b/combined_b_b"));
    assert!(outcomes.iter().all(|o| o.totals.len() == 2));
}
