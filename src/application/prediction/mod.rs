// Adapter around the external predictor
pub mod calibration;
pub mod gateway;

pub use calibration::{CalibrationSnapshot, Calibrator};
pub use gateway::PredictionGateway;
