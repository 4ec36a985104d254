//! Result handlers.
//!
//! Responses decode backend frames and hand them to a [`ResultHandler`].
//! The handler lives inside the request until the request is written and
//! then inside its response until the server finishes the statement.

use crate::error::Result;
use crate::protocol::backend::query::{CommandComplete, DataRow, RowDescription};
use crate::row::{Column, ResultSet, Row};

/// Receives the results of one query or portal execution.
///
/// Callback patterns by statement type:
/// - SELECT with rows: `result_start` → `row*` → `result_end`
/// - SELECT with 0 rows: `result_start` → `result_end`
/// - INSERT/UPDATE/DELETE: `result_end` only (with affected row count)
///
/// A simple query containing several statements repeats the pattern per
/// statement. `finish` is called exactly once, after the last callback, with
/// the outcome of the whole request. If a callback returns an error, no
/// further callbacks are made and that error is passed to `finish`.
pub trait ResultHandler: Send {
    /// Called when a result set begins.
    fn result_start(&mut self, cols: RowDescription<'_>) -> Result<()> {
        let _ = cols;
        Ok(())
    }

    /// Called for each data row.
    fn row(&mut self, row: DataRow<'_>) -> Result<()>;

    /// Called when a statement completes.
    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        let _ = complete;
        Ok(())
    }

    /// Called once with the final outcome.
    fn finish(&mut self, outcome: Result<()>);
}

/// Collects every result set and passes them to a callback on finish.
///
/// ```
/// use pgnio::handler::CollectHandler;
///
/// let handler = CollectHandler::new(|result| {
///     for set in result.unwrap_or_default() {
///         println!("{} rows", set.rows.len());
///     }
/// });
/// # drop(handler);
/// ```
pub struct CollectHandler<F> {
    sets: Vec<ResultSet>,
    current: Option<ResultSet>,
    callback: Option<F>,
}

impl<F> CollectHandler<F>
where
    F: FnOnce(Result<Vec<ResultSet>>) + Send,
{
    pub fn new(callback: F) -> Self {
        Self {
            sets: Vec::new(),
            current: None,
            callback: Some(callback),
        }
    }
}

impl<F> ResultHandler for CollectHandler<F>
where
    F: FnOnce(Result<Vec<ResultSet>>) + Send,
{
    fn result_start(&mut self, cols: RowDescription<'_>) -> Result<()> {
        self.current = Some(ResultSet {
            columns: cols.fields().iter().map(Column::from).collect(),
            ..Default::default()
        });
        Ok(())
    }

    fn row(&mut self, row: DataRow<'_>) -> Result<()> {
        let row = Row::parse(row)?;
        self.current.get_or_insert_with(ResultSet::default).rows.push(row);
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        let mut set = self.current.take().unwrap_or_default();
        set.tag = complete.tag.to_string();
        self.sets.push(set);
        Ok(())
    }

    fn finish(&mut self, outcome: Result<()>) {
        // A suspended portal ends without CommandComplete
        if let Some(set) = self.current.take() {
            self.sets.push(set);
        }
        if let Some(callback) = self.callback.take() {
            callback(outcome.map(|()| std::mem::take(&mut self.sets)));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::Error;

    type Slot = Arc<Mutex<Option<Result<Vec<ResultSet>>>>>;

    fn handler() -> (impl ResultHandler, Slot) {
        let slot: Slot = Arc::default();
        let out = Arc::clone(&slot);
        let handler = CollectHandler::new(move |r| {
            *out.lock().unwrap() = Some(r);
        });
        (handler, slot)
    }

    #[test]
    fn test_collect_rows_and_tags() {
        let (mut h, slot) = handler();
        let desc =
            b"\x00\x01n\0\x00\x00\x00\x00\x00\x00\x00\x00\x00\x17\x00\x04\xff\xff\xff\xff\x00\x00";
        h.result_start(RowDescription::parse(desc).unwrap()).unwrap();
        h.row(DataRow::parse(b"\x00\x01\x00\x00\x00\x011").unwrap()).unwrap();
        h.row(DataRow::parse(b"\x00\x01\x00\x00\x00\x012").unwrap()).unwrap();
        h.result_end(CommandComplete { tag: "SELECT 2" }).unwrap();
        h.result_end(CommandComplete { tag: "UPDATE 3" }).unwrap();
        h.finish(Ok(()));

        let sets = slot.lock().unwrap().take().unwrap().unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].columns[0].name, "n");
        assert_eq!(sets[0].columns[0].type_oid, 23);
        assert_eq!(sets[0].rows[1].get_str(0).unwrap(), Some("2"));
        assert_eq!(sets[0].rows_affected(), Some(2));
        assert!(sets[1].rows.is_empty());
        assert_eq!(sets[1].rows_affected(), Some(3));
    }

    #[test]
    fn test_finish_with_error() {
        let (mut h, slot) = handler();
        h.result_end(CommandComplete { tag: "SELECT 0" }).unwrap();
        h.finish(Err(Error::ConnectionBroken));
        let result = slot.lock().unwrap().take().unwrap();
        assert!(matches!(result, Err(Error::ConnectionBroken)));
    }
}
