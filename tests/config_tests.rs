//! Configuration loading and validation

use rdt_reader::config::{AggregationMode, Config, InterpretationKind, LocalizerMode, EXAMPLE_CONFIG};
use rdt_reader::Error;

#[test]
fn test_example_config_from_file() {
    let path = std::env::temp_dir().join(format!("rdt-example-{}.yaml", std::process::id()));
    std::fs::write(&path, EXAMPLE_CONFIG).unwrap();

    let config = Config::from_file(&path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.models.interpretation_kind, InterpretationKind::Classifier);
    assert_eq!(config.localizer.mode, LocalizerMode::Pair);
    assert_eq!(config.capture.aggregation, AggregationMode::SingleShot);
    assert_eq!(config.strip.fiducials[0].label, "arrows");

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_missing_file_is_io_error() {
    let err = Config::from_file("/nonexistent/rdt.yaml").unwrap_err();
    assert!(matches!(err, Error::IoError(_)));
}

#[test]
fn test_malformed_yaml_is_config_error() {
    let err = Config::from_yaml("capture: [not, a, map").unwrap_err();
    assert!(matches!(err, Error::ConfigError(_)));

    let err = Config::from_yaml("capture:\n  aggregation: sometimes\n").unwrap_err();
    assert!(matches!(err, Error::ConfigError(_)));
}

#[test]
fn test_custom_strip_layout() {
    let yaml = r"
strip:
  length: 60.0
  width: 4.0
  window_top: 30.0
  window_bottom: 40.0
  fiducials:
    - { label: top, offset: 5.0 }
    - { label: bottom, offset: 55.0 }
localizer:
  mode: pair
models:
  interpretation_kind: line_detector
";
    let config = Config::from_yaml(yaml).unwrap();
    config.validate().unwrap();
    assert_eq!(config.strip.fiducials.len(), 2);
    assert_eq!(config.models.interpretation_kind, InterpretationKind::LineDetector);
    // Unspecified sections keep their defaults
    assert_eq!(config.strip.window_size, 300);
    assert_eq!(config.capture.display_width, 720);

    let mut triple = config;
    triple.localizer.mode = LocalizerMode::Triple;
    assert!(triple.validate().is_err());
}

#[test]
fn test_validation_messages() {
    let mut config = Config::default();
    config.motion.window_capacity = 0;
    let message = config.validate().unwrap_err().to_string();
    assert!(message.contains("Motion window"), "{message}");

    let mut config = Config::default();
    config.quality.under_exposure_threshold = 200;
    config.quality.over_exposure_threshold = 100;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.capture.strip_height_fraction = 0.9;
    assert!(config.validate().is_err());
}
