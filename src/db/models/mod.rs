pub mod interruption;
pub mod session;

pub use interruption::InterruptionRecord;
pub use session::{FlushStatus, LedgerStatus, SessionRecord};
