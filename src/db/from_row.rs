//! Row mapping shared by the query functions.

use rusqlite::{Connection, Params, Row, types::Type};

use crate::error::Result;
use crate::models::{Purchase, PurchaseStatus, Video};

pub const VIDEO_COLS: &str = "id, owner_id, title, price_cents, currency, created_at";

pub const PURCHASE_COLS: &str = "id, user_id, video_id, amount_cents, currency, status, \
     gateway_payment_id, created_at, updated_at, completed_at";

pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

impl FromRow for Video {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Video {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            price_cents: row.get(3)?,
            currency: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for Purchase {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get(5)?;
        let status = status.parse::<PurchaseStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
        })?;

        Ok(Purchase {
            id: row.get(0)?,
            user_id: row.get(1)?,
            video_id: row.get(2)?,
            amount_cents: row.get(3)?,
            currency: row.get(4)?,
            status,
            gateway_payment_id: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            completed_at: row.get(9)?,
        })
    }
}

pub fn query_one<T: FromRow, P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Option<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(T::from_row(row)?)),
        None => Ok(None),
    }
}

pub fn query_all<T: FromRow, P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| T::from_row(row))?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}
