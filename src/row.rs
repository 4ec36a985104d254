//! Owned result values gathered by [`CollectHandler`](crate::handler::CollectHandler).
//!
//! Values are kept in the wire representation the server sent; converting
//! them to Rust types is left to the caller.

use crate::error::{Error, Result};
use crate::protocol::backend::query::{CommandComplete, DataRow, FieldDescription};
use crate::protocol::types::{FormatCode, Oid};

/// Column metadata from a RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub type_oid: Oid,
    pub format: FormatCode,
}

impl From<&FieldDescription<'_>> for Column {
    fn from(field: &FieldDescription<'_>) -> Self {
        Self {
            name: field.name.to_string(),
            type_oid: field.type_oid(),
            format: field.format(),
        }
    }
}

/// One row of raw column values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    values: Vec<Option<Vec<u8>>>,
}

impl Row {
    pub fn parse(row: DataRow<'_>) -> Result<Self> {
        let values = row
            .values()?
            .into_iter()
            .map(|v| v.map(<[u8]>::to_vec))
            .collect();
        Ok(Self { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw bytes of column `index`; `None` for NULL or out of range.
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.values.get(index)?.as_deref()
    }

    pub fn is_null(&self, index: usize) -> bool {
        matches!(self.values.get(index), Some(None))
    }

    /// Column `index` as UTF-8 text.
    pub fn get_str(&self, index: usize) -> Result<Option<&str>> {
        match self.values.get(index) {
            None => Err(Error::Decode(format!(
                "column {} out of range ({} columns)",
                index,
                self.values.len()
            ))),
            Some(None) => Ok(None),
            Some(Some(bytes)) => simdutf8::compat::from_utf8(bytes)
                .map(Some)
                .map_err(|e| Error::Decode(format!("column {index}: {e}"))),
        }
    }
}

/// The result of one statement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultSet {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    /// Command tag from CommandComplete; empty when the portal was suspended
    pub tag: String,
}

impl ResultSet {
    /// Rows affected as reported by the command tag.
    pub fn rows_affected(&self) -> Option<u64> {
        CommandComplete { tag: &self.tag }.rows_affected()
    }

    /// Index of the column called `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_access() {
        let payload = b"\x00\x02\x00\x00\x00\x05hello\xff\xff\xff\xff";
        let row = Row::parse(DataRow::parse(payload).unwrap()).unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&b"hello"[..]));
        assert_eq!(row.get_str(0).unwrap(), Some("hello"));
        assert!(row.is_null(1));
        assert_eq!(row.get_str(1).unwrap(), None);
        assert!(row.get_str(2).is_err());
    }

    #[test]
    fn test_result_set_tag() {
        let set = ResultSet {
            columns: vec![Column {
                name: "n".into(),
                type_oid: 23,
                format: FormatCode::Text,
            }],
            rows: vec![],
            tag: "SELECT 0".into(),
        };
        assert_eq!(set.rows_affected(), Some(0));
        assert_eq!(set.column_index("n"), Some(0));
        assert_eq!(set.column_index("m"), None);
    }
}
