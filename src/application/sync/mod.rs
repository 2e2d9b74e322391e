// Cross-exchange reconciliation
pub mod board;
pub mod sync_manager;

pub use board::{PnlLedger, SyncBoard, SyncStatus};
pub use sync_manager::{SyncConfig, SyncManager};
