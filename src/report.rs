//! Daily reporting over delivery records and their reconciliation slots.
//!
//! Read-only views: per-record listing with a joined remark summary, day
//! totals, and the flat export row contract consumed by grid/spreadsheet
//! renderers. How a caller turns the rows into CSV or XLSX is not this
//! module's concern.

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::db::DbState;
use crate::error::{Error, Result};
use crate::reconcile::slots_for_record;

/// One delivery record joined with its remark summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayRecord {
    pub id: i64,
    pub employee: String,
    pub total_cyl: i64,
    pub empty_received: i64,
    pub online_pay: i64,
    pub paytm_pay: i64,
    pub partial_amt: f64,
    pub final_amt: f64,
    pub collected_amt: f64,
    pub date_time: String,
    /// `"CODE: name"` (or bare `"CODE"`) per slot, comma-joined in seq order.
    pub remarks_text: String,
}

/// Column sums over one day's records. Slot data is never aggregated
/// numerically, only rendered as text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayTotals {
    pub total_cyl: i64,
    pub empty_received: i64,
    pub online_pay: i64,
    pub paytm_pay: i64,
    pub partial_amt: f64,
    pub collected_amt: f64,
}

/// Export header: fixed column set and order.
pub const EXPORT_COLUMNS: [&str; 11] = [
    "Sr",
    "employee",
    "total_cyl",
    "empty_received",
    "online_pay",
    "paytm_pay",
    "partial_amt",
    "final_amt",
    "collected_amt",
    "date_time",
    "remarks",
];

fn validate_date(date: &str) -> Result<()> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| Error::Validation(format!("not a YYYY-MM-DD date: {date:?}")))?;
    Ok(())
}

fn remarks_text(conn: &Connection, record_id: i64) -> Result<String> {
    let parts: Vec<String> = slots_for_record(conn, record_id)?
        .into_iter()
        .map(|slot| {
            if slot.consumer_name.trim().is_empty() {
                slot.remark_type
            } else {
                format!("{}: {}", slot.remark_type, slot.consumer_name)
            }
        })
        .collect();
    Ok(parts.join(", "))
}

/// All records for a calendar date, in insertion order, each with its
/// remark summary.
pub fn list_for_date(db: &DbState, date: &str) -> Result<Vec<DayRecord>> {
    validate_date(date)?;
    let conn = db.lock()?;

    let mut stmt = conn.prepare(
        "SELECT id, employee, total_cyl, empty_received, online_pay, paytm_pay,
                partial_amt, final_amt, collected_amt, date_time
         FROM records WHERE date_time LIKE ?1 ORDER BY id",
    )?;
    let like = format!("{date}%");
    let mut records = stmt
        .query_map(params![like], |row| {
            Ok(DayRecord {
                id: row.get(0)?,
                employee: row.get(1)?,
                total_cyl: row.get(2)?,
                empty_received: row.get(3)?,
                online_pay: row.get(4)?,
                paytm_pay: row.get(5)?,
                partial_amt: row.get(6)?,
                final_amt: row.get(7)?,
                collected_amt: row.get(8)?,
                date_time: row.get(9)?,
                remarks_text: String::new(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for record in &mut records {
        record.remarks_text = remarks_text(&conn, record.id)?;
    }

    Ok(records)
}

/// Column sums over the records of one calendar date. Pure read; calling
/// it twice with no intervening writes returns identical totals.
pub fn totals_for_date(db: &DbState, date: &str) -> Result<DayTotals> {
    let mut totals = DayTotals::default();
    for record in list_for_date(db, date)? {
        totals.total_cyl += record.total_cyl;
        totals.empty_received += record.empty_received;
        totals.online_pay += record.online_pay;
        totals.paytm_pay += record.paytm_pay;
        totals.partial_amt += record.partial_amt;
        totals.collected_amt += record.collected_amt;
    }
    Ok(totals)
}

/// Flat export table for one date: header row, one row per record, a blank
/// separator row, then a `TOTALS` row aligned to the same columns with
/// non-summable cells left empty.
pub fn export_rows(db: &DbState, date: &str) -> Result<Vec<Vec<String>>> {
    let records = list_for_date(db, date)?;
    let totals = totals_for_date(db, date)?;

    let mut rows = Vec::with_capacity(records.len() + 3);
    rows.push(EXPORT_COLUMNS.iter().map(|c| c.to_string()).collect());

    for (sr, record) in records.iter().enumerate() {
        rows.push(vec![
            (sr + 1).to_string(),
            record.employee.clone(),
            record.total_cyl.to_string(),
            record.empty_received.to_string(),
            record.online_pay.to_string(),
            record.paytm_pay.to_string(),
            format!("{:.2}", record.partial_amt),
            format!("{:.2}", record.final_amt),
            format!("{:.2}", record.collected_amt),
            record.date_time.clone(),
            record.remarks_text.clone(),
        ]);
    }

    rows.push(Vec::new());
    rows.push(vec![
        "TOTALS".to_string(),
        String::new(),
        totals.total_cyl.to_string(),
        totals.empty_received.to_string(),
        totals.online_pay.to_string(),
        totals.paytm_pay.to_string(),
        format!("{:.2}", totals.partial_amt),
        String::new(),
        format!("{:.2}", totals.collected_amt),
        String::new(),
        String::new(),
    ]);

    Ok(rows)
}

/// Render a stored `YYYY-MM-DD[ HH:MM:SS]` timestamp as `DD-MM-YYYY` for
/// display; unparsable input comes back unchanged.
pub fn format_ddmmyyyy(text: &str) -> String {
    let date_part = text.get(..10).unwrap_or(text);
    match NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        Ok(date) => date.format("%d-%m-%Y").to_string(),
        Err(_) => text.to_string(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
