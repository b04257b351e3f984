// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use sg_nn::module::Module;
use sg_nn::{
    io, AmbiguityPolicy, FeatureShape, LiveVariables, MissingStorePolicy, ParameterStore,
    RestoreError, RestoreOutcome, Tensor,
};
use sg_vision::{
    EncoderTaps, GroupCount, ShuffleNetConfig, ShuffleNetEncoder, StageBuilder, StageId,
    VisionError,
};
use std::path::Path;
use tempfile::tempdir;

fn config(seed: u64, pretrained: &Path) -> ShuffleNetConfig {
    ShuffleNetConfig::new(5, pretrained).with_seed(seed)
}

fn small_input() -> FeatureShape {
    FeatureShape::new(3, 32, 32).unwrap()
}

fn image(shape: FeatureShape, seed: u64) -> Tensor {
    Tensor::random_uniform(1, shape.volume(), 0.0, 255.0, Some(seed)).unwrap()
}

fn template(encoder: &ShuffleNetEncoder) -> ParameterStore {
    encoder
        .live_variables()
        .unwrap()
        .into_iter()
        .map(|variable| {
            let (rows, cols) = variable.shape;
            (variable.name, Tensor::zeros(rows, cols).unwrap())
        })
        .collect()
}

#[test]
fn imagenet_sized_input_produces_documented_shapes() {
    let dir = tempdir().unwrap();
    let input = FeatureShape::new(3, 224, 224).unwrap();
    let encoder =
        ShuffleNetEncoder::build(input, config(1, &dir.path().join("w.bin"))).unwrap();
    assert_eq!(encoder.stem().output_shape(), FeatureShape::new(24, 111, 111).unwrap());
    assert_eq!(
        encoder.taps(),
        EncoderTaps {
            score: FeatureShape::new(5, 7, 7).unwrap(),
            feed_high: FeatureShape::new(480, 14, 14).unwrap(),
            feed_low: FeatureShape::new(240, 28, 28).unwrap(),
        }
    );
    let stage4 = encoder.stage(StageId::Four).unwrap();
    assert_eq!(stage4.output_shape(), FeatureShape::new(960, 7, 7).unwrap());
    assert_eq!(encoder.stage(StageId::Two).unwrap().input_shape().hw(), (55, 55));
}

#[test]
fn full_build_materialises_sixteen_units() {
    let dir = tempdir().unwrap();
    let encoder =
        ShuffleNetEncoder::build(small_input(), config(1, &dir.path().join("w.bin"))).unwrap();
    let counts: Vec<usize> = encoder.stages().iter().map(|s| s.units().len()).collect();
    assert_eq!(counts, [4, 8, 4]);
    assert_eq!(encoder.unit_count(), 16);
    let last = &encoder.stages()[1].units()[7];
    assert_eq!(last.scope(), "shufflenet_encoder/stage3_7");
}

#[test]
fn stage_depths_follow_the_group_count() {
    let dir = tempdir().unwrap();
    for groups in GroupCount::ALL {
        let widths = groups.widths();
        let cfg = config(2, &dir.path().join("w.bin")).with_groups(groups);
        let encoder = ShuffleNetEncoder::build(small_input(), cfg).unwrap();
        let depths: Vec<usize> = encoder
            .stages()
            .iter()
            .map(|stage| stage.output_shape().channels)
            .collect();
        assert_eq!(depths, [widths.stage2, widths.stage3, widths.stage4], "{groups}");
        assert_eq!(encoder.taps().score.channels, 5);
    }
}

#[test]
fn stage_builder_rejects_unknown_stages() {
    let dir = tempdir().unwrap();
    let builder = StageBuilder::new(&config(1, &dir.path().join("w.bin")));
    let input = FeatureShape::new(24, 7, 7).unwrap();
    assert!(matches!(
        builder.build_stage(input, 1, 3, 1),
        Err(VisionError::InvalidStage { stage: 1 })
    ));
    assert!(matches!(
        builder.build_stage(input, 5, 3, 1),
        Err(VisionError::InvalidStage { stage: 5 })
    ));
}

#[test]
fn forward_returns_scores_and_both_taps() {
    let dir = tempdir().unwrap();
    let encoder =
        ShuffleNetEncoder::build(small_input(), config(3, &dir.path().join("w.bin"))).unwrap();
    let input = image(small_input(), 9);
    let outputs = encoder.forward_all(&input).unwrap();
    let taps = encoder.taps();
    assert_eq!(taps.feed_low, FeatureShape::new(240, 4, 4).unwrap());
    assert_eq!(taps.feed_high, FeatureShape::new(480, 2, 2).unwrap());
    assert_eq!(taps.score, FeatureShape::new(5, 1, 1).unwrap());
    assert_eq!(outputs.feed_low.shape(), (1, taps.feed_low.volume()));
    assert_eq!(outputs.feed_high.shape(), (1, taps.feed_high.volume()));
    assert_eq!(outputs.score.shape(), (1, taps.score.volume()));
    assert!(outputs.feed_high.data().iter().all(|v| *v >= 0.0));
    assert!(outputs.score.data().iter().all(|v| v.is_finite()));
    assert_eq!(encoder.forward(&input).unwrap(), outputs.score);
}

#[test]
fn configured_bias_skips_the_classification_head() {
    let dir = tempdir().unwrap();
    let cfg = ShuffleNetConfig {
        bias: 0.5,
        ..config(8, &dir.path().join("w.bin"))
    };
    let encoder = ShuffleNetEncoder::build(small_input(), cfg).unwrap();
    assert!(encoder.head().conv().bias().value().data().iter().all(|b| *b == 0.0));
    assert!(encoder.stem().conv().bias().value().data().iter().all(|b| *b == 0.5));
    let first = &encoder.stages()[0].units()[0];
    assert!(first.bottleneck().conv().bias().value().data().iter().all(|b| *b == 0.5));
    assert_eq!(encoder.head().conv().weight().weight_decay(), 4e-5);
    assert_eq!(encoder.head().conv().bias().weight_decay(), 0.0);
}

#[test]
fn legacy_keys_only_touch_the_named_scope() {
    let dir = tempdir().unwrap();
    let mut encoder =
        ShuffleNetEncoder::build(small_input(), config(4, &dir.path().join("w.bin"))).unwrap();
    let before = encoder.head().conv().weight().value().clone();
    let (rows, cols) = encoder.stem().conv().weight().value().shape();
    let stem = Tensor::full(rows, cols, 0.5).unwrap();
    let store: ParameterStore = [
        ("conv1/weights".to_string(), stem.clone()),
        ("conv1b/weights".to_string(), Tensor::zeros(rows, cols).unwrap()),
    ]
    .into_iter()
    .collect();
    let report = encoder.load_weights_from(&store).unwrap();
    assert_eq!(report.assigned, 1);
    assert_eq!(report.unused_keys, 1);
    assert_eq!(encoder.stem().conv().weight().value(), &stem);
    assert_eq!(encoder.head().conv().weight().value(), &before);
}

#[test]
fn mismatched_shapes_leave_every_variable_untouched() {
    let dir = tempdir().unwrap();
    let mut encoder =
        ShuffleNetEncoder::build(small_input(), config(5, &dir.path().join("w.bin"))).unwrap();
    let before = encoder.state_dict().unwrap();
    let store: ParameterStore = [("weights".to_string(), Tensor::zeros(1, 1).unwrap())]
        .into_iter()
        .collect();
    let err = encoder.load_weights_from(&store).unwrap_err();
    assert!(matches!(err, VisionError::Restore(RestoreError::Tensor(_))));
    assert_eq!(encoder.state_dict().unwrap(), before);
}

#[test]
fn overlapping_keys_follow_the_ambiguity_policy() {
    let dir = tempdir().unwrap();
    let cfg = config(6, &dir.path().join("w.bin"));
    let mut encoder = ShuffleNetEncoder::build(small_input(), cfg.clone()).unwrap();
    let (rows, cols) = encoder.stem().conv().weight().value().shape();
    let short = Tensor::full(rows, cols, 1.0).unwrap();
    let long = Tensor::full(rows, cols, 2.0).unwrap();
    let store: ParameterStore = [
        ("conv1/weights".to_string(), short),
        ("encoder/conv1/weights".to_string(), long.clone()),
    ]
    .into_iter()
    .collect();

    let report = encoder.load_weights_from(&store).unwrap();
    assert_eq!(report.ambiguities.len(), 1);
    assert_eq!(
        report.ambiguities[0].keys,
        ["conv1/weights", "encoder/conv1/weights"]
    );
    assert_eq!(encoder.stem().conv().weight().value(), &long);

    let strict = ShuffleNetConfig {
        on_ambiguous_match: AmbiguityPolicy::Reject,
        ..cfg
    };
    let mut encoder = ShuffleNetEncoder::build(small_input(), strict).unwrap();
    let before = encoder.stem().conv().weight().value().clone();
    assert!(matches!(
        encoder.load_weights_from(&store),
        Err(VisionError::Restore(RestoreError::AmbiguousMatch { .. }))
    ));
    assert_eq!(encoder.stem().conv().weight().value(), &before);
}

#[test]
fn missing_store_is_skipped_by_default() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.bin");
    let mut encoder = ShuffleNetEncoder::build(small_input(), config(7, &path)).unwrap();
    let before = encoder.state_dict().unwrap();
    let outcome = encoder.load_pretrained_weights().unwrap();
    assert_eq!(outcome, RestoreOutcome::Skipped { path: path.clone() });
    assert_eq!(encoder.state_dict().unwrap(), before);
}

#[test]
fn missing_store_fails_when_required() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.bin");
    let cfg = ShuffleNetConfig {
        on_missing_pretrained: MissingStorePolicy::Fail,
        ..config(7, &path)
    };
    let mut encoder = ShuffleNetEncoder::build(small_input(), cfg).unwrap();
    assert!(matches!(
        encoder.load_pretrained_weights(),
        Err(VisionError::Restore(RestoreError::NotFound { path: p })) if p == path
    ));
}

#[test]
fn exported_weights_restore_into_a_fresh_encoder() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shufflenet.bin");
    let source = ShuffleNetEncoder::build(small_input(), config(11, &path)).unwrap();
    let exported = source.export_pretrained(&template(&source), &path).unwrap();
    assert_eq!(exported.len(), source.live_variables().unwrap().len());

    let mut target = ShuffleNetEncoder::build(small_input(), config(12, &path)).unwrap();
    let input = image(small_input(), 3);
    assert_ne!(source.forward(&input).unwrap(), target.forward(&input).unwrap());

    let RestoreOutcome::Restored(report) = target.load_pretrained_weights().unwrap() else {
        panic!("exported store should exist");
    };
    assert_eq!(report.assigned, exported.len());
    assert_eq!(report.unmatched_variables, 0);
    assert!(report.ambiguities.is_empty());
    assert_eq!(source.state_dict().unwrap(), target.state_dict().unwrap());
    assert_eq!(source.forward(&input).unwrap(), target.forward(&input).unwrap());
}

#[test]
fn json_stores_restore_like_binary_ones() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shufflenet.json");
    let source = ShuffleNetEncoder::build(small_input(), config(21, &path)).unwrap();
    source.export_pretrained(&template(&source), &path).unwrap();
    let mut target = ShuffleNetEncoder::build(small_input(), config(22, &path)).unwrap();
    assert!(matches!(
        target.load_pretrained_weights().unwrap(),
        RestoreOutcome::Restored(_)
    ));
    assert_eq!(source.state_dict().unwrap(), target.state_dict().unwrap());
}

#[test]
fn checkpoints_round_trip_through_bincode() {
    let dir = tempdir().unwrap();
    let weights = dir.path().join("unused.bin");
    let checkpoint = dir.path().join("encoder.ckpt");
    let source = ShuffleNetEncoder::build(small_input(), config(31, &weights)).unwrap();
    io::save_bincode(&source, &checkpoint).unwrap();
    let mut target = ShuffleNetEncoder::build(small_input(), config(32, &weights)).unwrap();
    io::load_bincode(&mut target, &checkpoint).unwrap();
    assert_eq!(source.state_dict().unwrap(), target.state_dict().unwrap());
}
