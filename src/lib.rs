//! Cylinder delivery ledger with mandatory empty-cylinder reconciliation.
//!
//! Tracks daily cylinder deliveries by field agents, computes the cash
//! amount owed per delivery, and reconciles returned empties against
//! delivered counts. Every discrepant unit must carry exactly one
//! classified reason before a reconciliation can be saved, producing a
//! per-unit audit trail tied to the original record.
//!
//! Storage is a single local SQLite database; the connection is opened
//! once via [`db::init`] and the resulting [`db::DbState`] is passed to
//! every component. This crate has no UI: form rendering, navigation, and
//! export file formatting are callers' concerns, consuming the typed
//! structs and the [`report`] row contract.
//!
//! Typical flow:
//!
//! ```no_run
//! use cylinder_ledger::{db, delivery, reconcile, report};
//!
//! # fn main() -> cylinder_ledger::Result<()> {
//! let store = db::init(std::path::Path::new("./data"))?;
//!
//! let receipt = delivery::submit_delivery(
//!     &store,
//!     &delivery::DeliveryInput {
//!         employee: "Ravi".into(),
//!         total_cyl: 10,
//!         empty_received: None,
//!         online_pay: 2,
//!         paytm_pay: 1,
//!         partial_amt: 0.0,
//!         collected_amt: 6142.5,
//!     },
//! )?;
//!
//! // Operator corrects the empties count to 8: two cylinders are missing
//! // and each needs a classified reason before the save goes through.
//! let mut session = reconcile::ReconcileSession::begin(&store, receipt.record_id)?;
//! session.confirm_empties(&store, Some(8))?;
//! session.set_reason(reconcile::ReasonCode::EmptyPending)?;
//! session.set_consumer_name("Sharma")?;
//! session.next()?;
//! session.set_reason(reconcile::ReasonCode::Dbc)?;
//! session.save(&store)?;
//!
//! let totals = report::totals_for_date(&store, "2026-08-29")?;
//! println!("delivered today: {}", totals.total_cyl);
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod delivery;
pub mod employees;
pub mod error;
pub mod reconcile;
pub mod report;

pub use db::DbState;
pub use delivery::{DeliveryInput, DeliveryReceipt};
pub use error::{Error, Result};
pub use reconcile::{ReasonCode, ReconcileSession, SessionState, SlotKind};
pub use report::{DayRecord, DayTotals};
