//! Delivery transaction builder.
//!
//! Turns raw operator input into a validated, persisted delivery record.
//! Computes the cash amount due from the cylinder price captured at
//! computation time; a later price change never rewrites an existing
//! record's `final_amt`.

use chrono::Local;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{self, DbState};
use crate::employees;
use crate::error::{Error, Result};

/// Timestamp format shared by records and remarks.
pub(crate) const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Raw operator input for one delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryInput {
    /// Agent name; empty string means "unselected" and is stored as-is.
    pub employee: String,
    /// Cylinders delivered full.
    pub total_cyl: i64,
    /// Empties collected; defaults to `total_cyl` when not supplied.
    pub empty_received: Option<i64>,
    /// Cylinders paid online, full price.
    pub online_pay: i64,
    /// Cylinders paid via app, full price.
    pub paytm_pay: i64,
    /// Extra cash amount not tied to a cylinder count.
    pub partial_amt: f64,
    /// Cash actually collected by the agent.
    pub collected_amt: f64,
}

/// Outcome of a successful delivery submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub record_id: i64,
    pub final_amt: f64,
}

/// Round to 2 decimal places, half away from zero.
pub(crate) fn round_2dp(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Parse an operator-entered count field. Blank means zero; anything
/// unparsable or negative is a validation error.
pub fn parse_count(field: &str, text: &str) -> Result<i64> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(0);
    }
    let value: i64 = text
        .parse()
        .map_err(|_| Error::Validation(format!("{field}: not a whole number: {text:?}")))?;
    if value < 0 {
        return Err(Error::Validation(format!("{field}: must not be negative")));
    }
    Ok(value)
}

/// Parse an operator-entered amount field. Blank means zero.
pub fn parse_amount(field: &str, text: &str) -> Result<f64> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(0.0);
    }
    let value: f64 = text
        .parse()
        .map_err(|_| Error::Validation(format!("{field}: not a number: {text:?}")))?;
    if !value.is_finite() || value < 0.0 {
        return Err(Error::Validation(format!("{field}: must be a non-negative number")));
    }
    Ok(value)
}

/// Amount due for a delivery at the given unit price.
///
/// `cash_cyl = total - online - paytm`; those cylinders are owed in cash at
/// the unit price, plus any partial amount already agreed.
pub fn compute_amount_due(input: &DeliveryInput, unit_price: f64) -> Result<f64> {
    validate_counts(input)?;
    let cash_cyl = input.total_cyl - input.online_pay - input.paytm_pay;
    Ok(round_2dp(cash_cyl as f64 * unit_price + input.partial_amt))
}

fn validate_counts(input: &DeliveryInput) -> Result<()> {
    for (field, value) in [
        ("total_cyl", input.total_cyl),
        ("online_pay", input.online_pay),
        ("paytm_pay", input.paytm_pay),
    ] {
        if value < 0 {
            return Err(Error::Validation(format!("{field}: must not be negative")));
        }
    }
    if let Some(empty) = input.empty_received {
        if empty < 0 {
            return Err(Error::Validation(
                "empty_received: must not be negative".into(),
            ));
        }
    }
    for (field, value) in [
        ("partial_amt", input.partial_amt),
        ("collected_amt", input.collected_amt),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(Error::Validation(format!(
                "{field}: must be a non-negative number"
            )));
        }
    }
    match input.online_pay.checked_add(input.paytm_pay) {
        Some(paid) if paid <= input.total_cyl => Ok(()),
        _ => Err(Error::Validation(
            "payment count exceeds delivered count".into(),
        )),
    }
}

/// Validate and persist one delivery record.
///
/// A non-empty employee must exist in the registry; an empty employee is
/// tolerated and stored as the empty string. On any validation failure
/// nothing is persisted. Reconciliation slots are the engine's job, not
/// this function's.
pub fn submit_delivery(db: &DbState, input: &DeliveryInput) -> Result<DeliveryReceipt> {
    validate_counts(input)?;

    if !input.employee.is_empty() && !employees::employee_exists(db, &input.employee)? {
        return Err(Error::Validation(format!(
            "unknown employee: {:?}",
            input.employee
        )));
    }

    let conn = db.lock()?;
    let unit_price = db::get_unit_price(&conn);
    let cash_cyl = input.total_cyl - input.online_pay - input.paytm_pay;
    let final_amt = round_2dp(cash_cyl as f64 * unit_price + input.partial_amt);

    let empty_received = input.empty_received.unwrap_or(input.total_cyl);
    let now = Local::now().format(DATE_TIME_FORMAT).to_string();

    conn.execute(
        "INSERT INTO records (employee, total_cyl, empty_received, online_pay,
                              paytm_pay, partial_amt, final_amt, collected_amt, date_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            input.employee,
            input.total_cyl,
            empty_received,
            input.online_pay,
            input.paytm_pay,
            input.partial_amt,
            final_amt,
            input.collected_amt,
            now,
        ],
    )?;
    let record_id = conn.last_insert_rowid();

    info!(
        record_id,
        employee = %input.employee,
        total_cyl = input.total_cyl,
        final_amt,
        "Delivery recorded"
    );

    Ok(DeliveryReceipt {
        record_id,
        final_amt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::employees::add_employee;

    fn input(total: i64, online: i64, paytm: i64, partial: f64) -> DeliveryInput {
        DeliveryInput {
            employee: String::new(),
            total_cyl: total,
            empty_received: None,
            online_pay: online,
            paytm_pay: paytm,
            partial_amt: partial,
            collected_amt: 0.0,
        }
    }

    #[test]
    fn test_amount_due_basic() {
        // 10 delivered, 2 online + 1 paytm => 7 cash cylinders
        let due = compute_amount_due(&input(10, 2, 1, 50.0), 877.5).unwrap();
        assert_eq!(due, 7.0 * 877.5 + 50.0);
    }

    #[test]
    fn test_amount_due_rounds_half_up() {
        // 1 cash cylinder at 10.0 plus 0.125 partial = 10.125, an exact
        // binary value, so the 2dp midpoint rounds away from zero.
        let due = compute_amount_due(&input(1, 0, 0, 0.125), 10.0).unwrap();
        assert_eq!(due, 10.13);
    }

    #[test]
    fn test_payment_counts_exceeding_delivered_rejected() {
        let db = db::test_db();
        let err = submit_delivery(&db, &input(5, 3, 3, 0.0)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(err.to_string(), "validation: payment count exceeds delivered count");

        // Nothing persisted
        let conn = db.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_payment_count_sum_overflow_rejected() {
        let err = compute_amount_due(&input(i64::MAX, i64::MAX, 1, 0.0), 877.5).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_negative_count_rejected() {
        let err = compute_amount_due(&input(-1, 0, 0, 0.0), 877.5).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_unknown_employee_rejected_empty_tolerated() {
        let db = db::test_db();
        add_employee(&db, "Ravi").expect("add");

        let mut inp = input(2, 0, 0, 0.0);
        inp.employee = "Nobody".into();
        let err = submit_delivery(&db, &inp).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // Empty employee is stored as-is
        inp.employee = String::new();
        let receipt = submit_delivery(&db, &inp).expect("empty employee ok");
        let conn = db.lock().unwrap();
        let stored: String = conn
            .query_row(
                "SELECT employee FROM records WHERE id = ?1",
                params![receipt.record_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored, "");
    }

    #[test]
    fn test_submit_uses_current_price_and_defaults_empties() {
        let db = db::test_db();
        {
            let conn = db.lock().unwrap();
            db::set_unit_price(&conn, 900.0).expect("set price");
        }

        let receipt = submit_delivery(&db, &input(4, 1, 1, 25.5)).expect("submit");
        assert_eq!(receipt.final_amt, 2.0 * 900.0 + 25.5);

        let conn = db.lock().unwrap();
        let (empty, final_amt): (i64, f64) = conn
            .query_row(
                "SELECT empty_received, final_amt FROM records WHERE id = ?1",
                params![receipt.record_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(empty, 4, "empty_received defaults to total_cyl");
        assert_eq!(final_amt, receipt.final_amt);
    }

    #[test]
    fn test_price_captured_at_computation_time() {
        let db = db::test_db();
        let receipt = submit_delivery(&db, &input(1, 0, 0, 0.0)).expect("submit");
        assert_eq!(receipt.final_amt, db::DEFAULT_CYLINDER_PRICE);

        {
            let conn = db.lock().unwrap();
            db::set_unit_price(&conn, 1.0).expect("price change");
        }

        // Stored amount is unchanged by the later price update
        let conn = db.lock().unwrap();
        let stored: f64 = conn
            .query_row(
                "SELECT final_amt FROM records WHERE id = ?1",
                params![receipt.record_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored, db::DEFAULT_CYLINDER_PRICE);
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_count("total_cyl", " 12 ").unwrap(), 12);
        assert_eq!(parse_count("total_cyl", "").unwrap(), 0);
        assert!(parse_count("total_cyl", "abc").is_err());
        assert!(parse_count("total_cyl", "-2").is_err());

        assert_eq!(parse_amount("partial_amt", "10.5").unwrap(), 10.5);
        assert_eq!(parse_amount("partial_amt", "  ").unwrap(), 0.0);
        assert!(parse_amount("partial_amt", "-1").is_err());
        assert!(parse_amount("partial_amt", "NaN").is_err());
    }
}
