use demand_forecast::error::{ErrorKind, ForecastError};
use forecast_math::MathError;
use std::io;

#[test]
fn test_error_conversion() {
    let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
    match ForecastError::from(io_error) {
        ForecastError::Io(_) => {}
        other => panic!("Expected Io variant, got {:?}", other),
    }

    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    match ForecastError::from(json_error) {
        ForecastError::Json(_) => {}
        other => panic!("Expected Json variant, got {:?}", other),
    }

    let math_error = MathError::InsufficientData("need two rows".to_string());
    assert_eq!(ForecastError::from(math_error).kind(), ErrorKind::Internal);
}

#[test]
fn test_error_display() {
    let error = ForecastError::DataInsufficiency("series has 10 observations".to_string());
    assert_eq!(
        error.to_string(),
        "Data insufficiency: series has 10 observations"
    );
    assert_eq!(ForecastError::Cancelled.to_string(), "Run cancelled");
}

#[test]
fn test_run_fatal_errors() {
    assert!(ForecastError::Reconciliation("cycle".to_string()).is_run_fatal());
    assert!(ForecastError::Configuration("horizon".to_string()).is_run_fatal());
    assert!(!ForecastError::ModelFit("diverged".to_string()).is_run_fatal());
    assert!(!ForecastError::DataInsufficiency("short".to_string()).is_run_fatal());
}

#[test]
fn test_kinds_serialize_in_snake_case() {
    assert_eq!(
        serde_json::to_string(&ErrorKind::DataInsufficiency).unwrap(),
        "\"data_insufficiency\""
    );
}
