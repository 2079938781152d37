pub mod accounts;
pub mod activity;
pub mod copy;
pub mod feed;
pub mod fees;
pub mod ledger;
pub mod store;
pub mod triggers;

pub use accounts::{AccountError, AccountService, Registration};
pub use activity::ActivityFeed;
pub use copy::{CopyError, CopyMirror};
pub use feed::{PriceBoard, PriceFeed, TickConsumer};
pub use fees::{ReferralError, ReferralLedger};
pub use ledger::{LedgerError, PositionLedger};
pub use store::SqliteStore;
pub use triggers::TriggerEngine;
