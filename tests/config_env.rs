use std::sync::Mutex;

use tempfile::NamedTempFile;

use depth_height::config::EngineConfig;
use depth_height::ModelKind;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "HEIGHT_CONFIG",
        "HEIGHT_KEYPOINT_THRESHOLD",
        "HEIGHT_MIN_IOU",
        "HEIGHT_MAX_IDLE_FRAMES",
        "HEIGHT_RETRAIN_EVERY",
        "HEIGHT_MODEL",
        "HEIGHT_STABILIZER_SEED",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "keypoints": { "threshold": 0.1 },
        "tracking": { "min_iou": 0.2, "max_idle_frames": 12 },
        "calibration": {
            "max_observations_per_object": 32,
            "min_training_pairs": 20,
            "model": "constant",
            "degree": 2
        },
        "stabilizer": { "window": 7, "robust_weight": 0.5, "max_trials": 50 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("HEIGHT_CONFIG", file.path());
    std::env::set_var("HEIGHT_MAX_IDLE_FRAMES", "90");
    std::env::set_var("HEIGHT_MODEL", "polynomial");
    std::env::set_var("HEIGHT_STABILIZER_SEED", "42");

    let cfg = EngineConfig::load().expect("load config");

    assert_eq!(cfg.keypoint_threshold, 0.1);
    assert_eq!(cfg.tracking.min_iou, 0.2);
    assert_eq!(cfg.tracking.max_idle_frames, 90);
    assert_eq!(cfg.calibration.max_observations_per_object, 32);
    assert_eq!(cfg.calibration.min_training_pairs, 20);
    assert_eq!(cfg.calibration.model, ModelKind::Polynomial);
    assert_eq!(cfg.calibration.degree, 2);
    assert_eq!(cfg.calibration.retrain_every_frames, 0);
    assert_eq!(cfg.stabilizer.window, 7);
    assert_eq!(cfg.stabilizer.robust_weight, 0.5);
    assert_eq!(cfg.stabilizer.ransac.max_trials, 50);
    assert_eq!(cfg.stabilizer.ransac.min_samples, 2);
    assert_eq!(cfg.stabilizer.ransac.seed, 42);

    clear_env();
}

#[test]
fn toml_extension_selects_toml_parser() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
        [calibration]
        retrain_every_frames = 25
        ridge = 0.001

        [stabilizer]
        window = 9
        residual_threshold = 1.5
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = EngineConfig::load_from(file.path()).expect("load config");
    assert_eq!(cfg.calibration.retrain_every_frames, 25);
    assert_eq!(cfg.calibration.ridge, 0.001);
    assert_eq!(cfg.stabilizer.window, 9);
    assert_eq!(cfg.stabilizer.ransac.residual_threshold, Some(1.5));
    assert_eq!(cfg.keypoint_threshold, 0.12);

    clear_env();
}

#[test]
fn missing_config_uses_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = EngineConfig::load().expect("load config");
    assert_eq!(cfg, EngineConfig::default());
}

#[test]
fn invalid_env_value_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("HEIGHT_MIN_IOU", "lots");
    let err = EngineConfig::load().unwrap_err();
    assert!(err.to_string().contains("HEIGHT_MIN_IOU"), "{err}");

    clear_env();
    std::env::set_var("HEIGHT_MODEL", "neural");
    let err = EngineConfig::load().unwrap_err();
    assert!(err.to_string().contains("HEIGHT_MODEL"), "{err}");

    clear_env();
}

#[test]
fn env_override_is_validated() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("HEIGHT_KEYPOINT_THRESHOLD", "0.8");
    let err = EngineConfig::load().unwrap_err();
    assert!(err.to_string().contains("keypoints.threshold"), "{err}");

    clear_env();
}

#[test]
fn unreadable_config_file_names_the_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("HEIGHT_CONFIG", "/nonexistent/height.json");
    let err = EngineConfig::load().unwrap_err();
    assert!(err.to_string().contains("/nonexistent/height.json"), "{err}");

    clear_env();
}
