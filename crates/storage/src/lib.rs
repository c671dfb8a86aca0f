pub mod audit;
pub mod error;
pub mod quota;
pub mod webui;

pub use audit::{AuditStore, UsageTotals};
pub use error::StorageError;
pub use quota::QuotaStore;
pub use webui::WebUiStore;
