// Top-level wiring, control channel dispatch and shutdown
pub mod supervisor;

pub use supervisor::Supervisor;
