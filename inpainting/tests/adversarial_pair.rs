use inpainting::{Discriminator, GeneratorConfig, InpaintGenerator};
use ndarray::Array5;

#[test]
fn discriminator_scores_generated_volumes() {
    let config = GeneratorConfig {
        channels: 1,
        widths: [4, 8, 8],
        block_num: 1,
        rates: vec![1, 2, 4, 8],
    };
    let generator = InpaintGenerator::new(config, 11).unwrap();
    let mut disc = Discriminator::new(1, [4, 8, 8, 8], 12).unwrap();

    let x = Array5::from_shape_fn((1, 1, 24, 24, 24), |(_, _, i, j, k)| {
        ((i * j + k) as f32 * 0.05).sin()
    });
    let mask = Array5::from_shape_fn((1, 1, 24, 24, 24), |(_, _, i, j, _)| {
        ((8..16).contains(&i) && (8..16).contains(&j)) as u8 as f32
    });

    // the network only sees the unmasked part of the volume
    let masked = &x * &mask.mapv(|m| 1. - m);
    let fake = generator.forward(masked.view(), mask.view()).unwrap();
    assert_eq!(fake.dim(), x.dim());

    // composite the generated region into the original volume
    let composite = &fake * &mask + &masked;

    // 24 -> 12 -> 6 -> 3 -> 2 -> 1
    let real = disc.forward(x.view()).unwrap();
    let score = disc.forward(composite.view()).unwrap();

    assert_eq!(real.dim(), (1, 1, 1, 1, 1));
    assert_eq!(score.dim(), (1, 1, 1, 1, 1));
    assert!(score.iter().chain(real.iter()).all(|v| v.is_finite()));
}
