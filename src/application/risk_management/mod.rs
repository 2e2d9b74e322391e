// Risk gating, position sizing and circuit breakers
pub mod circuit_breaker_service;
pub mod risk_manager;
pub mod sizing_engine;

pub use circuit_breaker_service::{CircuitBreakerService, TripReason};
pub use risk_manager::{EvaluationRequest, RiskManager};
pub use sizing_engine::{SizingEngine, SizingInputs};
