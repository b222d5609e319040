//! Empty-cylinder reconciliation engine.
//!
//! A delivery's returned-empties count may legitimately differ from its
//! delivered count. Every discrepant unit must carry exactly one classified
//! reason before the reconciliation can be saved, giving a per-unit audit
//! trail: one short-returned cylinder can have a completely different cause
//! than another in the same batch.
//!
//! [`ReconcileSession`] is an explicit state machine decoupled from any
//! rendering:
//!
//! ```text
//! AwaitingEmptiesConfirmation --confirm_empties--> Closed        (delta == 0)
//!                             \-----------------> AwaitingSlotEntry
//! AwaitingSlotEntry --save--> Closed
//! any non-Closed state --abandon--> Abandoned
//! ```
//!
//! Slot selections live in memory until the terminal [`save`], which
//! persists the whole set in one SQLite transaction or not at all.
//!
//! [`save`]: ReconcileSession::save

use chrono::Local;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::DbState;
use crate::delivery::DATE_TIME_FORMAT;
use crate::error::{Error, Result};

/// Which side of the delta a slot explains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    /// Fewer empties came back than cylinders went out.
    Missing,
    /// More empties came back than cylinders went out.
    Extra,
}

/// Classified reason for one discrepant cylinder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonCode {
    /// No consumer / no reason given.
    Nc,
    /// Denied by consumer.
    Dbc,
    /// Taken as replacement/transfer.
    Tv,
    /// Consumer returned a previously-owed empty.
    EmptyReturned,
    /// Consumer owes an empty, pending future return.
    EmptyPending,
}

impl ReasonCode {
    /// Stable storage string for the `remark_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Nc => "NC",
            ReasonCode::Dbc => "DBC",
            ReasonCode::Tv => "TV",
            ReasonCode::EmptyReturned => "EmptyReturned",
            ReasonCode::EmptyPending => "EmptyPending",
        }
    }

    pub fn parse(text: &str) -> Option<ReasonCode> {
        match text {
            "NC" => Some(ReasonCode::Nc),
            "DBC" => Some(ReasonCode::Dbc),
            "TV" => Some(ReasonCode::Tv),
            "EmptyReturned" => Some(ReasonCode::EmptyReturned),
            "EmptyPending" => Some(ReasonCode::EmptyPending),
            _ => None,
        }
    }

    /// Codes that name a specific consumer; for these the consumer name is
    /// semantically expected (though an empty string is still stored).
    pub fn expects_consumer_name(&self) -> bool {
        matches!(self, ReasonCode::Nc | ReasonCode::Dbc | ReasonCode::Tv)
    }

    /// Selectable codes for a slot of the given kind.
    pub fn options_for(kind: SlotKind) -> &'static [ReasonCode] {
        match kind {
            SlotKind::Missing => &[
                ReasonCode::Nc,
                ReasonCode::Dbc,
                ReasonCode::Tv,
                ReasonCode::EmptyPending,
            ],
            SlotKind::Extra => &[
                ReasonCode::Tv,
                ReasonCode::EmptyReturned,
                ReasonCode::Nc,
                ReasonCode::Dbc,
                ReasonCode::EmptyPending,
            ],
        }
    }
}

/// One in-memory reconciliation slot: exactly one discrepant cylinder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    /// 1-based position, stable display order.
    pub seq: i64,
    pub kind: SlotKind,
    pub reason: Option<ReasonCode>,
    pub consumer_name: String,
}

/// A persisted reconciliation slot, read back from the `remarks` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotRow {
    pub record_id: i64,
    pub seq: i64,
    pub remark_type: String,
    pub consumer_name: String,
    pub created_at: String,
}

/// Session lifecycle. `Balanced` is not a resting state: a zero delta at
/// confirmation moves straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Waiting for the operator to confirm (or correct once) the
    /// empties-received count.
    AwaitingEmptiesConfirmation,
    /// Slots generated; operator is classifying them one at a time.
    AwaitingSlotEntry,
    /// Reconciliation complete: balanced, or all slots saved.
    Closed,
    /// Operator cancelled; nothing persisted by this session after the
    /// empties confirmation.
    Abandoned,
}

/// Stateful reconciliation workflow for one delivery record.
#[derive(Debug)]
pub struct ReconcileSession {
    record_id: i64,
    delivered: i64,
    empty_received: i64,
    state: SessionState,
    slots: Vec<Slot>,
    current_index: usize,
}

impl ReconcileSession {
    /// Start reconciling `record_id`, loading its delivered and stored
    /// empties counts.
    pub fn begin(db: &DbState, record_id: i64) -> Result<Self> {
        let conn = db.lock()?;
        let (delivered, empty_received) = conn
            .query_row(
                "SELECT total_cyl, empty_received FROM records WHERE id = ?1",
                params![record_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    Error::Validation(format!("record not found: {record_id}"))
                }
                other => Error::Storage(other),
            })?;

        Ok(ReconcileSession {
            record_id,
            delivered,
            empty_received,
            state: SessionState::AwaitingEmptiesConfirmation,
            slots: Vec::new(),
            current_index: 0,
        })
    }

    pub fn record_id(&self) -> i64 {
        self.record_id
    }

    pub fn delivered(&self) -> i64 {
        self.delivered
    }

    pub fn empty_received(&self) -> i64 {
        self.empty_received
    }

    /// Signed difference: negative = missing empties, positive = extra.
    pub fn delta(&self) -> i64 {
        self.empty_received - self.delivered
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_slot(&self) -> Option<&Slot> {
        self.slots.get(self.current_index)
    }

    /// Confirm the empties-received count, optionally correcting it.
    ///
    /// The single allowed correction: only callable in
    /// `AwaitingEmptiesConfirmation`. Persists the count, computes the
    /// delta, and either closes the session (balanced) or generates one
    /// unfilled slot per discrepant unit. Closing balanced also clears any
    /// slot set left by an earlier run, in the same transaction as the
    /// count update, so the record's slot count always matches its delta.
    pub fn confirm_empties(&mut self, db: &DbState, corrected: Option<i64>) -> Result<()> {
        if self.state != SessionState::AwaitingEmptiesConfirmation {
            return Err(Error::State(format!(
                "confirm_empties not allowed in {:?}",
                self.state
            )));
        }

        let count = corrected.unwrap_or(self.empty_received);
        if count < 0 {
            return Err(Error::Validation(
                "empty_received: must not be negative".into(),
            ));
        }
        let delta = count - self.delivered;

        {
            let conn = db.lock()?;
            if delta == 0 {
                conn.execute_batch("BEGIN IMMEDIATE")?;
                let result = (|| -> Result<()> {
                    conn.execute(
                        "UPDATE records SET empty_received = ?1 WHERE id = ?2",
                        params![count, self.record_id],
                    )?;
                    conn.execute(
                        "DELETE FROM remarks WHERE record_id = ?1",
                        params![self.record_id],
                    )?;
                    Ok(())
                })();
                match result {
                    Ok(()) => conn.execute_batch("COMMIT")?,
                    Err(e) => {
                        let _ = conn.execute_batch("ROLLBACK");
                        return Err(e);
                    }
                }
            } else {
                conn.execute(
                    "UPDATE records SET empty_received = ?1 WHERE id = ?2",
                    params![count, self.record_id],
                )?;
            }
        }
        self.empty_received = count;

        if delta == 0 {
            info!(
                record_id = self.record_id,
                "Empties balanced, no reconciliation needed"
            );
            self.state = SessionState::Closed;
            return Ok(());
        }

        let kind = if delta < 0 {
            SlotKind::Missing
        } else {
            SlotKind::Extra
        };
        self.slots = (1..=delta.abs())
            .map(|seq| Slot {
                seq,
                kind,
                reason: None,
                consumer_name: String::new(),
            })
            .collect();
        self.current_index = 0;
        self.state = SessionState::AwaitingSlotEntry;

        info!(
            record_id = self.record_id,
            delta,
            slots = self.slots.len(),
            "Reconciliation slots generated"
        );
        Ok(())
    }

    fn require_slot_entry(&self) -> Result<()> {
        if self.state != SessionState::AwaitingSlotEntry {
            return Err(Error::State(format!(
                "slot entry not allowed in {:?}",
                self.state
            )));
        }
        Ok(())
    }

    /// Select a reason for the current slot (in-memory only).
    ///
    /// The code must be in the option set for the slot's kind.
    pub fn set_reason(&mut self, code: ReasonCode) -> Result<()> {
        self.require_slot_entry()?;
        let slot = &mut self.slots[self.current_index];
        if !ReasonCode::options_for(slot.kind).contains(&code) {
            return Err(Error::Validation(format!(
                "{} is not a valid reason for a {:?} slot",
                code.as_str(),
                slot.kind
            )));
        }
        slot.reason = Some(code);
        Ok(())
    }

    /// Set the consumer name on the current slot (in-memory only).
    pub fn set_consumer_name(&mut self, name: &str) -> Result<()> {
        self.require_slot_entry()?;
        self.slots[self.current_index].consumer_name = name.trim().to_string();
        Ok(())
    }

    /// Advance to the next slot. Blocked unless the current slot has a
    /// reason selected.
    pub fn next(&mut self) -> Result<()> {
        self.require_slot_entry()?;
        if self.slots[self.current_index].reason.is_none() {
            return Err(Error::RequiredField(
                "select a reason before proceeding".into(),
            ));
        }
        if self.current_index + 1 < self.slots.len() {
            self.current_index += 1;
        }
        Ok(())
    }

    /// Go back one slot. Never guarded; revisiting a slot and selecting
    /// again simply overwrites the in-memory value.
    pub fn prev(&mut self) -> Result<()> {
        self.require_slot_entry()?;
        self.current_index = self.current_index.saturating_sub(1);
        Ok(())
    }

    /// Terminal save: persist every slot, all-or-nothing.
    ///
    /// Fails with [`Error::RequiredField`] if any slot lacks a reason, with
    /// nothing written. Any mid-batch storage failure rolls the whole batch
    /// back, so the record never carries a partial slot set. A previous slot
    /// set for this record (an earlier reconciliation run) is replaced in
    /// the same transaction.
    pub fn save(&mut self, db: &DbState) -> Result<()> {
        self.require_slot_entry()?;
        if self.slots.iter().any(|s| s.reason.is_none()) {
            return Err(Error::RequiredField(
                "all slots must have a reason before saving".into(),
            ));
        }

        let conn = db.lock()?;
        let now = Local::now().format(DATE_TIME_FORMAT).to_string();

        conn.execute_batch("BEGIN IMMEDIATE")?;

        let result = (|| -> Result<()> {
            conn.execute(
                "DELETE FROM remarks WHERE record_id = ?1",
                params![self.record_id],
            )?;
            for slot in &self.slots {
                let reason = slot.reason.ok_or_else(|| {
                    Error::RequiredField("slot lost its reason before saving".into())
                })?;
                conn.execute(
                    "INSERT INTO remarks (record_id, seq, remark_type, consumer_name, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        self.record_id,
                        slot.seq,
                        reason.as_str(),
                        slot.consumer_name,
                        now,
                    ],
                )?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute_batch("COMMIT")?;
                self.state = SessionState::Closed;
                info!(
                    record_id = self.record_id,
                    slots = self.slots.len(),
                    "Reconciliation saved"
                );
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Cancel the session. Pure no-op on the persistence layer; data
    /// committed before this call (the empties correction) stays committed.
    pub fn abandon(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(Error::State("session already closed".into()));
        }
        self.state = SessionState::Abandoned;
        Ok(())
    }
}

/// Persisted slots for a record, in `seq` order.
pub fn slots_for_record(conn: &Connection, record_id: i64) -> Result<Vec<SlotRow>> {
    let mut stmt = conn.prepare(
        "SELECT record_id, seq, remark_type, consumer_name, created_at
         FROM remarks WHERE record_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt
        .query_map(params![record_id], |row| {
            Ok(SlotRow {
                record_id: row.get(0)?,
                seq: row.get(1)?,
                remark_type: row.get(2)?,
                consumer_name: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ===========================================================================
// Tests
// ===========================================================================
