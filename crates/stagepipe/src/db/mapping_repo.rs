//! Mapping repository — CRUD operations for the `field_mappings` table.
//!
//! Rows carry storage-level strings; `mapping::MappingReconciler` converts
//! them to typed mappings and derives duplicate flags on read.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw field mapping row from the database.
#[derive(Debug, Clone)]
pub struct MappingRow {
    pub mapping_id: i64,
    pub source_table: String,
    pub source_field: String,
    pub target_table: String,
    pub target_column: String,
    pub tpa: String,
    pub mapping_method: String,
    pub confidence_score: Option<f64>,
    pub approved: bool,
    pub transformation_logic: Option<String>,
    pub created_timestamp: String,
    pub updated_timestamp: String,
}

impl MappingRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            mapping_id: row.get("mapping_id")?,
            source_table: row.get("source_table")?,
            source_field: row.get("source_field")?,
            target_table: row.get("target_table")?,
            target_column: row.get("target_column")?,
            tpa: row.get("tpa")?,
            mapping_method: row.get("mapping_method")?,
            confidence_score: row.get("confidence_score")?,
            approved: row.get::<_, i64>("approved")? != 0,
            transformation_logic: row.get("transformation_logic")?,
            created_timestamp: row.get("created_timestamp")?,
            updated_timestamp: row.get("updated_timestamp")?,
        })
    }
}

/// Fields of a new mapping row. Timestamps are supplied by the caller.
#[derive(Debug, Clone)]
pub struct NewMappingRow {
    pub source_table: String,
    pub source_field: String,
    pub target_table: String,
    pub target_column: String,
    pub tpa: String,
    pub mapping_method: String,
    pub confidence_score: Option<f64>,
    pub approved: bool,
    pub transformation_logic: Option<String>,
}

const INSERT_SQL: &str = "INSERT INTO field_mappings
     (source_table, source_field, target_table, target_column, tpa,
      mapping_method, confidence_score, approved, transformation_logic,
      created_timestamp, updated_timestamp)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)";

/// Inserts one mapping row and returns its assigned mapping_id.
pub fn insert(db: &Database, new: &NewMappingRow, now: &str) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            INSERT_SQL,
            params![
                new.source_table,
                new.source_field,
                new.target_table,
                new.target_column,
                new.tpa,
                new.mapping_method,
                new.confidence_score,
                new.approved as i64,
                new.transformation_logic,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Inserts a batch of rows inside one transaction. Either every row lands
/// or none do. Returns the assigned ids in input order.
pub fn insert_batch(
    db: &Database,
    rows: &[NewMappingRow],
    now: &str,
) -> Result<Vec<i64>, DatabaseError> {
    db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(rows.len());
        for new in rows {
            tx.execute(
                INSERT_SQL,
                params![
                    new.source_table,
                    new.source_field,
                    new.target_table,
                    new.target_column,
                    new.tpa,
                    new.mapping_method,
                    new.confidence_score,
                    new.approved as i64,
                    new.transformation_logic,
                    now
                ],
            )?;
            ids.push(tx.last_insert_rowid());
        }
        tx.commit()?;
        Ok(ids)
    })
}

/// Finds a mapping row by its ID.
pub fn find_by_id(db: &Database, mapping_id: i64) -> Result<Option<MappingRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM field_mappings WHERE mapping_id = ?1")?;
        let mut rows = stmt.query_map(params![mapping_id], MappingRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Sets the approved flag. Returns true if a row was updated.
pub fn set_approved(
    db: &Database,
    mapping_id: i64,
    approved: bool,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE field_mappings SET approved = ?2, updated_timestamp = ?3
             WHERE mapping_id = ?1",
            params![mapping_id, approved as i64, now],
        )?;
        Ok(n > 0)
    })
}

/// Deletes a row outright. Returns true if a row was removed.
pub fn delete_by_id(db: &Database, mapping_id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "DELETE FROM field_mappings WHERE mapping_id = ?1",
            params![mapping_id],
        )?;
        Ok(n > 0)
    })
}

/// Lists rows for one tpa, optionally restricted to one target table.
/// Stable order: target_table, then mapping_id.
pub fn list_scope(
    db: &Database,
    tpa: &str,
    target_table: Option<&str>,
) -> Result<Vec<MappingRow>, DatabaseError> {
    db.with_conn(|conn| {
        let (sql, params_vec): (&str, Vec<Box<dyn rusqlite::types::ToSql>>) = match target_table {
            Some(table) => (
                "SELECT * FROM field_mappings WHERE tpa = ?1 AND target_table = ?2
                 ORDER BY target_table, mapping_id",
                vec![Box::new(tpa.to_string()), Box::new(table.to_string())],
            ),
            None => (
                "SELECT * FROM field_mappings WHERE tpa = ?1
                 ORDER BY target_table, mapping_id",
                vec![Box::new(tpa.to_string())],
            ),
        };

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(sql)?;
        let rows: Vec<MappingRow> = stmt
            .query_map(params_ref.as_slice(), MappingRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Per-target-table (total, approved) counts for one tpa.
pub fn completeness_counts(
    db: &Database,
    tpa: &str,
) -> Result<Vec<(String, u64, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT target_table, COUNT(*), SUM(approved) FROM field_mappings
             WHERE tpa = ?1 GROUP BY target_table ORDER BY target_table",
        )?;
        let rows: Vec<(String, u64, u64)> = stmt
            .query_map(params![tpa], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get::<_, Option<u64>>(2)?.unwrap_or(0)))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
