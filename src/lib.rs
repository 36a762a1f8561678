pub mod amount;
pub mod corrector;
pub mod csv;
pub mod event;
pub mod ledger;
pub mod log;
pub mod model;
pub mod replay;

pub use amount::Amount;
pub use corrector::{BalanceCorrector, CorrectionError, Outcome};
pub use model::{CorrectionConfig, Direction, TransferIntent, Trigger, TriggerEvent};
