// Risk management domain
pub mod decision;
pub mod risk_config;
pub mod state;

pub use decision::{RejectionReason, RiskDecision};
pub use risk_config::{RiskConfig, RiskConfigError};
pub use state::RiskState;
