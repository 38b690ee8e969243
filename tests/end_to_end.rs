use std::sync::Arc;

use aop_mixer::config::EngineSettings;
use aop_mixer::models::{
    Algorithm, AlgorithmChoice, MixMode, OptimizationConfig, OptimizationRequest, Paint,
    PerceptualColor, VolumeConstraints,
};
use aop_mixer::services::metrics::{MemorySink, MetricEvent, MetricsSink};
use aop_mixer::{EngineState, Optimizer};

fn white_black() -> Vec<Paint> {
    vec![
        Paint::new("white", "White", PerceptualColor::new(95.0, 0.0, 0.0)),
        Paint::new("black", "Black", PerceptualColor::new(5.0, 0.0, 0.0)),
    ]
}

fn palette() -> Vec<Paint> {
    vec![
        Paint::new("titanium-white", "Titanium White", PerceptualColor::new(95.0, -0.5, 2.0)),
        Paint::new("ivory-black", "Ivory Black", PerceptualColor::new(8.0, 0.5, -1.0)),
        Paint::new("cadmium-red", "Cadmium Red", PerceptualColor::new(45.0, 62.0, 45.0)),
        Paint::new("ultramarine", "Ultramarine Blue", PerceptualColor::new(30.0, 20.0, -60.0)),
        Paint::new("yellow-ochre", "Yellow Ochre", PerceptualColor::new(65.0, 10.0, 55.0)),
    ]
}

fn config(seed: u64) -> OptimizationConfig {
    OptimizationConfig {
        seed: Some(seed),
        time_limit_ms: 15_000,
        ..OptimizationConfig::default()
    }
}

#[test]
fn neutral_gray_from_white_and_black() {
    let outcome = Optimizer::default()
        .optimize(
            &PerceptualColor::new(50.0, 0.0, 0.0),
            &white_black(),
            &VolumeConstraints::exact(100.0),
            &config(1),
        )
        .unwrap();

    let formula = &outcome.formula;
    assert_eq!(formula.paint_ratios.len(), 2);
    assert!(formula.delta_e < 2.0, "deltaE {}", formula.delta_e);
    for ratio in &formula.paint_ratios {
        assert!((ratio.volume_ml - 50.0).abs() < 5.0, "{ratio:?}");
    }
    assert!((formula.total_volume - 100.0).abs() < 1e-6);
    assert!(outcome.metrics.target_met);
    assert_eq!(outcome.metrics.algorithm_used, Algorithm::DifferentialEvolution);
}

#[test]
fn conflicting_component_limits_are_rejected_before_search() {
    let sink = Arc::new(MemorySink::default());
    let optimizer = Optimizer::new(EngineState::new(
        EngineSettings::default(),
        sink.clone() as Arc<dyn MetricsSink>,
    ));
    let constraints = VolumeConstraints {
        minimum_component_volume_ml: Some(60.0),
        maximum_component_volume_ml: Some(45.0),
        ..VolumeConstraints::window(100.0, 200.0)
    };

    let err = optimizer
        .optimize(
            &PerceptualColor::new(50.0, 0.0, 0.0),
            &white_black(),
            &constraints,
            &config(1),
        )
        .unwrap_err();

    assert_eq!(err.code(), "CONFLICTING_CONSTRAINTS");
    let message = err.to_string();
    assert!(message.contains("minimum_component_volume_ml"), "{message}");
    assert!(message.contains("maximum_component_volume_ml"), "{message}");

    let events = sink.events();
    assert!(events
        .iter()
        .all(|e| !matches!(e, MetricEvent::RunStarted { .. })));
}

#[test]
fn tight_volume_window_with_five_paints() {
    let constraints = VolumeConstraints::window(49.5, 50.5);
    let outcome = Optimizer::default()
        .optimize(
            &PerceptualColor::new(55.0, 20.0, 25.0),
            &palette(),
            &constraints,
            &config(7),
        )
        .unwrap();

    let formula = &outcome.formula;
    assert!(
        (49.5..=50.5).contains(&formula.total_volume),
        "total {}",
        formula.total_volume
    );
    let sum: f64 = formula.paint_ratios.iter().map(|r| r.volume_ml).sum();
    assert!((sum - formula.total_volume).abs() <= 0.1);
    assert!(formula.paint_ratios.len() <= 5);
    assert!(formula.constraint_violations.is_empty());
}

#[test]
fn component_minimum_with_more_paints_than_fit() {
    let constraints = VolumeConstraints {
        minimum_component_volume_ml: Some(30.0),
        ..VolumeConstraints::exact(100.0)
    };
    let outcome = Optimizer::default()
        .optimize(
            &PerceptualColor::new(50.0, 0.0, 0.0),
            &palette(),
            &constraints,
            &config(13),
        )
        .unwrap();

    let formula = &outcome.formula;
    assert!(formula.constraint_violations.is_empty(), "{:?}", formula.constraint_violations);
    assert!(formula.paint_ratios.len() <= 3);
    assert!(formula.paint_ratios.iter().all(|r| r.volume_ml >= 30.0 - 1e-9));
    assert!((formula.total_volume - 100.0).abs() < 1e-6);
}

#[test]
fn component_minimum_does_not_block_a_close_match() {
    let constraints = VolumeConstraints {
        minimum_component_volume_ml: Some(10.0),
        ..VolumeConstraints::exact(100.0)
    };
    for seed in 0..3 {
        let outcome = Optimizer::default()
            .optimize(
                &PerceptualColor::new(50.0, 0.0, 0.0),
                &palette(),
                &constraints,
                &config(seed),
            )
            .unwrap();
        let formula = &outcome.formula;
        assert!(formula.constraint_violations.is_empty(), "{:?}", formula.constraint_violations);
        assert!(formula.delta_e < 3.0, "seed {seed}: deltaE {}", formula.delta_e);
        assert_eq!(outcome.metrics.final_best_delta_e, formula.delta_e);
    }
}

#[test]
fn precision_in_a_narrow_window() {
    let constraints = VolumeConstraints {
        precision_ml: Some(1.0),
        ..VolumeConstraints::window(49.5, 50.5)
    };
    let outcome = Optimizer::default()
        .optimize(
            &PerceptualColor::new(55.0, 20.0, 25.0),
            &palette(),
            &constraints,
            &config(21),
        )
        .unwrap();
    let formula = &outcome.formula;
    assert!((formula.total_volume - 50.0).abs() < 1e-9, "total {}", formula.total_volume);
    assert!(formula.constraint_violations.is_empty(), "{:?}", formula.constraint_violations);
}

#[test]
fn precision_grid_is_respected() {
    let constraints = VolumeConstraints {
        precision_ml: Some(0.5),
        ..VolumeConstraints::exact(100.0)
    };
    let outcome = Optimizer::default()
        .optimize(
            &PerceptualColor::new(60.0, 10.0, 20.0),
            &palette(),
            &constraints,
            &config(3),
        )
        .unwrap();
    for ratio in &outcome.formula.paint_ratios {
        let steps = ratio.volume_ml / 0.5;
        assert!((steps - steps.round()).abs() < 1e-6, "{ratio:?}");
    }
}

#[test]
fn forced_tpe_returns_a_valid_formula() {
    let cfg = OptimizationConfig {
        algorithm: AlgorithmChoice::TpeHybrid,
        mode: MixMode::Enhanced,
        max_paint_count: 3,
        ..config(11)
    };
    let outcome = Optimizer::default()
        .optimize(
            &PerceptualColor::new(45.0, 15.0, -10.0),
            &palette(),
            &VolumeConstraints::exact(200.0),
            &cfg,
        )
        .unwrap();

    assert_eq!(outcome.metrics.algorithm_used, Algorithm::TpeHybrid);
    assert!(outcome.formula.paint_ratios.len() <= 3);
    assert!((outcome.formula.total_volume - 200.0).abs() < 1e-6);
    let percent: f64 = outcome.formula.paint_ratios.iter().map(|r| r.percentage).sum();
    assert!((percent - 100.0).abs() < 1e-6);
    assert!(outcome.metrics.generation_history.is_empty());
}

#[test]
fn large_palettes_use_tpe() {
    let paints: Vec<Paint> = (0..12)
        .map(|i| {
            let hue = i as f64 * 30f64.to_radians();
            Paint::new(
                format!("p{i}"),
                format!("Paint {i}"),
                PerceptualColor::new(30.0 + 4.0 * i as f64, 50.0 * hue.cos(), 50.0 * hue.sin()),
            )
        })
        .collect();
    let outcome = Optimizer::default()
        .optimize(
            &PerceptualColor::new(50.0, 10.0, 10.0),
            &paints,
            &VolumeConstraints::exact(100.0),
            &config(5),
        )
        .unwrap();
    assert_eq!(outcome.metrics.algorithm_used, Algorithm::TpeHybrid);
    assert!(outcome.formula.paint_ratios.len() <= 5);
}

#[test]
fn unreachable_target_is_reported_not_raised() {
    let outcome = Optimizer::default()
        .optimize(
            &PerceptualColor::new(50.0, 80.0, 0.0),
            &white_black(),
            &VolumeConstraints::exact(100.0),
            &config(2),
        )
        .unwrap();
    assert!(!outcome.metrics.target_met);
    assert!(outcome.formula.delta_e > 2.0);
    assert!(outcome.metrics.final_best_delta_e.is_finite());
}

#[test]
fn run_lifecycle_events_are_recorded() {
    let sink = Arc::new(MemorySink::default());
    let optimizer = Optimizer::new(EngineState::new(
        EngineSettings::default(),
        sink.clone() as Arc<dyn MetricsSink>,
    ));
    let outcome = optimizer
        .optimize(
            &PerceptualColor::new(50.0, 0.0, 0.0),
            &white_black(),
            &VolumeConstraints::exact(100.0),
            &config(9),
        )
        .unwrap();

    let events = sink.events();
    assert!(matches!(events.first(), Some(MetricEvent::RunStarted { .. })));
    match events.last() {
        Some(MetricEvent::RunFinished { run_id, metrics }) => {
            assert_eq!(*run_id, outcome.metrics.run_id);
            assert_eq!(metrics, &outcome.metrics);
        }
        other => panic!("unexpected last event {other:?}"),
    }
}

#[test]
fn batch_runs_each_request_independently() {
    let good = OptimizationRequest {
        target: PerceptualColor::new(50.0, 0.0, 0.0),
        paints: white_black(),
        constraints: VolumeConstraints::exact(100.0),
        config: config(4),
    };
    let bad = OptimizationRequest {
        paints: white_black()[..1].to_vec(),
        ..good.clone()
    };

    let results = Optimizer::default().optimize_batch(&[good.clone(), bad, good]);
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert_eq!(
        results[1].as_ref().unwrap_err().code(),
        "INSUFFICIENT_PAINTS"
    );
    assert_eq!(
        results[0].as_ref().unwrap().formula,
        results[2].as_ref().unwrap().formula
    );
}

#[test]
fn request_json_round_trips_through_the_optimizer() {
    let raw = r#"{
        "target": {"L": 50.0, "a": 0.0, "b": 0.0},
        "paints": [
            {"id": "w", "name": "White", "lab": {"L": 95.0, "a": 0.0, "b": 0.0},
             "opacity": 0.9, "tintingStrength": 0.5, "kubelkaMunk": {"k": 0.05, "s": 0.9}},
            {"id": "k", "name": "Black", "lab": {"L": 5.0, "a": 0.0, "b": 0.0},
             "opacity": 0.95, "tintingStrength": 0.5, "kubelkaMunk": {"k": 0.9, "s": 0.1}}
        ],
        "constraints": {"min_total_volume_ml": 100.0, "max_total_volume_ml": 100.0},
        "config": {"mode": "standard", "maxPaintCount": 2, "timeLimit_ms": 5000,
                   "accuracyTarget": 2.0, "algorithm": "auto", "seed": 1}
    }"#;
    let request: OptimizationRequest = serde_json::from_str(raw).unwrap();
    let outcome = Optimizer::default().optimize_request(&request).unwrap();

    let json = serde_json::to_value(&outcome).unwrap();
    let formula = &json["formula"];
    assert!(formula["paintRatios"].is_array());
    assert!(formula["deltaE"].as_f64().unwrap() < 2.0);
    assert!(formula["predictedColor"]["L"].is_number());
    assert!(formula["kubelkaMunkK"].is_number());
    let metrics = &json["metrics"];
    assert_eq!(metrics["algorithmUsed"], "differential_evolution");
    assert!(metrics["timeElapsed"].is_u64());
    assert!(metrics["initialBestDeltaE"].is_number());
}
