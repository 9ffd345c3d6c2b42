//! Queue repository — CRUD operations for the `file_processing_queue` table.
//!
//! Rows carry storage-level strings; the `queue::QueueLedger` converts them
//! to typed entries.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw queue row from the database.
#[derive(Debug, Clone)]
pub struct QueueRow {
    pub queue_id: i64,
    pub file_name: String,
    pub tpa: String,
    pub file_type: String,
    pub file_size_bytes: Option<i64>,
    pub status: String,
    pub discovered_timestamp: String,
    pub processed_timestamp: Option<String>,
    pub process_result: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i64,
}

impl QueueRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            queue_id: row.get("queue_id")?,
            file_name: row.get("file_name")?,
            tpa: row.get("tpa")?,
            file_type: row.get("file_type")?,
            file_size_bytes: row.get("file_size_bytes")?,
            status: row.get("status")?,
            discovered_timestamp: row.get("discovered_timestamp")?,
            processed_timestamp: row.get("processed_timestamp")?,
            process_result: row.get("process_result")?,
            error_message: row.get("error_message")?,
            retry_count: row.get("retry_count")?,
        })
    }
}

/// Query filter parameters for queue listing. Values within one field are
/// OR-ed (SQL `IN`), fields are AND-ed together.
#[derive(Debug, Default, Clone)]
pub struct QueueRowFilter {
    pub status: Vec<String>,
    pub file_type: Vec<String>,
    pub tpa: Vec<String>,
}

/// Inserts a new queue row and returns its assigned queue_id.
pub fn insert(
    db: &Database,
    file_name: &str,
    tpa: &str,
    file_type: &str,
    file_size_bytes: Option<i64>,
    status: &str,
    discovered_timestamp: &str,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO file_processing_queue
             (file_name, tpa, file_type, file_size_bytes, status, discovered_timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                file_name,
                tpa,
                file_type,
                file_size_bytes,
                status,
                discovered_timestamp
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds a queue row by its ID.
pub fn find_by_id(db: &Database, queue_id: i64) -> Result<Option<QueueRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM file_processing_queue WHERE queue_id = ?1")?;
        let mut rows = stmt.query_map(params![queue_id], QueueRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Finds the most recent row for a file, by queue_id.
pub fn find_latest_for_file(
    db: &Database,
    file_name: &str,
    tpa: &str,
) -> Result<Option<QueueRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM file_processing_queue
             WHERE file_name = ?1 AND tpa = ?2
             ORDER BY queue_id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![file_name, tpa], QueueRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Finds a row for a file whose status is in the given set, if any.
pub fn find_for_file_with_status(
    db: &Database,
    file_name: &str,
    tpa: &str,
    statuses: &[&str],
) -> Result<Option<QueueRow>, DatabaseError> {
    db.with_conn(|conn| {
        let placeholders: Vec<String> = (0..statuses.len()).map(|i| format!("?{}", i + 3)).collect();
        let sql = format!(
            "SELECT * FROM file_processing_queue
             WHERE file_name = ?1 AND tpa = ?2 AND status IN ({})
             ORDER BY queue_id DESC LIMIT 1",
            placeholders.join(", ")
        );

        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(file_name.to_string()), Box::new(tpa.to_string())];
        for s in statuses {
            param_values.push(Box::new(s.to_string()));
        }
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params_ref.as_slice(), QueueRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Overwrites the mutable result fields of a row.
pub fn update_result(
    db: &Database,
    queue_id: i64,
    status: &str,
    processed_timestamp: Option<&str>,
    process_result: Option<&str>,
    error_message: Option<&str>,
    retry_count: i64,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE file_processing_queue
             SET status = ?2, processed_timestamp = ?3, process_result = ?4,
                 error_message = ?5, retry_count = ?6
             WHERE queue_id = ?1",
            params![
                queue_id,
                status,
                processed_timestamp,
                process_result,
                error_message,
                retry_count
            ],
        )?;
        Ok(())
    })
}

/// Deletes a row outright. Returns true if a row was removed.
pub fn delete_by_id(db: &Database, queue_id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "DELETE FROM file_processing_queue WHERE queue_id = ?1",
            params![queue_id],
        )?;
        Ok(n > 0)
    })
}

/// Queries rows with filters, newest first.
pub fn query(db: &Database, filter: &QueueRowFilter) -> Result<Vec<QueueRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        let mut add_in_clause = |column: &str, values: &[String]| {
            if values.is_empty() {
                return;
            }
            let placeholders: Vec<String> = values
                .iter()
                .enumerate()
                .map(|(i, _)| format!("?{}", param_values.len() + i + 1))
                .collect();
            conditions.push(format!("{} IN ({})", column, placeholders.join(", ")));
            for v in values {
                param_values.push(Box::new(v.clone()));
            }
        };

        add_in_clause("status", &filter.status);
        add_in_clause("file_type", &filter.file_type);
        add_in_clause("tpa", &filter.tpa);

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT * FROM file_processing_queue {} ORDER BY discovered_timestamp DESC, queue_id DESC",
            where_clause
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<QueueRow> = stmt
            .query_map(params_ref.as_slice(), QueueRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Resets PROCESSING rows older than the cutoff back to PENDING with an
/// explanatory error text. Rows with no processed_timestamp are also reset.
/// Returns the number of rows changed.
pub fn reset_stuck(
    db: &Database,
    cutoff_timestamp: &str,
    note: &str,
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE file_processing_queue
             SET status = 'PENDING', error_message = ?2
             WHERE status = 'PROCESSING'
               AND (processed_timestamp IS NULL OR processed_timestamp < ?1)",
            params![cutoff_timestamp, note],
        )?;
        Ok(n as u64)
    })
}

/// Removes every row. Returns the number of rows removed.
pub fn truncate(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute("DELETE FROM file_processing_queue", [])?;
        Ok(n as u64)
    })
}

/// Per-(tpa, status) row counts, optionally restricted to one tpa.
pub fn status_counts(
    db: &Database,
    tpa: Option<&str>,
) -> Result<Vec<(String, String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let (sql, params_vec): (&str, Vec<Box<dyn rusqlite::types::ToSql>>) = match tpa {
            Some(t) => (
                "SELECT tpa, status, COUNT(*) FROM file_processing_queue
                 WHERE tpa = ?1 GROUP BY tpa, status ORDER BY tpa, status",
                vec![Box::new(t.to_string())],
            ),
            None => (
                "SELECT tpa, status, COUNT(*) FROM file_processing_queue
                 GROUP BY tpa, status ORDER BY tpa, status",
                Vec::new(),
            ),
        };

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(sql)?;
        let rows: Vec<(String, String, u64)> = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
