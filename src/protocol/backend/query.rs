//! Result-carrying backend messages: RowDescription, DataRow, CommandComplete.

use std::mem::size_of;

use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U16 as U16BE, U32 as U32BE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i16, read_i32};
use crate::protocol::types::{FormatCode, Oid};

/// Fixed 18-byte part following each field name.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
struct FieldTail {
    table_oid: U32BE,
    column_id: I16BE,
    type_oid: U32BE,
    type_size: I16BE,
    type_modifier: I32BE,
    format: U16BE,
}

/// One column of a RowDescription.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescription<'a> {
    pub name: &'a str,
    tail: &'a FieldTail,
}

impl FieldDescription<'_> {
    /// Source table, 0 if the column isn't a plain table column.
    pub fn table_oid(&self) -> Oid {
        self.tail.table_oid.get()
    }

    pub fn column_id(&self) -> i16 {
        self.tail.column_id.get()
    }

    pub fn type_oid(&self) -> Oid {
        self.tail.type_oid.get()
    }

    /// -1 for variable-width types
    pub fn type_size(&self) -> i16 {
        self.tail.type_size.get()
    }

    pub fn type_modifier(&self) -> i32 {
        self.tail.type_modifier.get()
    }

    pub fn format(&self) -> FormatCode {
        FormatCode::from_u16(self.tail.format.get())
    }
}

/// RowDescription: column metadata for the rows that follow.
#[derive(Debug)]
pub struct RowDescription<'a> {
    fields: Vec<FieldDescription<'a>>,
}

impl<'a> RowDescription<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (count, mut data) = read_i16(payload)?;
        let count = usize::try_from(count)
            .map_err(|_| Error::Protocol(format!("RowDescription: negative field count {count}")))?;

        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let (name, rest) = read_cstr(data)?;
            let (tail, rest) = read_bytes(rest, size_of::<FieldTail>())?;
            let tail = FieldTail::ref_from_bytes(tail)?;
            fields.push(FieldDescription { name, tail });
            data = rest;
        }

        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescription<'a>] {
        &self.fields
    }
}

/// DataRow: one row of column values.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    count: usize,
    data: &'a [u8],
}

impl<'a> DataRow<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (count, data) = read_i16(payload)?;
        let count = usize::try_from(count)
            .map_err(|_| Error::Protocol(format!("DataRow: negative column count {count}")))?;
        Ok(Self { count, data })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Decode every column value; `None` is SQL NULL.
    pub fn values(&self) -> Result<Vec<Option<&'a [u8]>>> {
        let mut values = Vec::with_capacity(self.count);
        let mut data = self.data;
        for _ in 0..self.count {
            let (len, rest) = read_i32(data)?;
            if len < 0 {
                values.push(None);
                data = rest;
                continue;
            }
            let (value, rest) = read_bytes(rest, len as usize)?;
            values.push(Some(value));
            data = rest;
        }
        Ok(values)
    }
}

/// CommandComplete: a statement finished; carries the command tag.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }

    /// Row count reported in the tag, for commands that report one.
    ///
    /// `INSERT` tags carry a legacy oid before the count.
    pub fn rows_affected(&self) -> Option<u64> {
        let mut words = self.tag.split_whitespace();
        let command = words.next()?;
        let count = match command {
            "INSERT" => words.nth(1)?,
            "SELECT" | "UPDATE" | "DELETE" | "COPY" | "MOVE" | "FETCH" | "MERGE" => words.next()?,
            _ => return None,
        };
        count.parse().ok()
    }

    /// First word of the tag.
    pub fn command(&self) -> Option<&'a str> {
        self.tag.split_whitespace().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_description_payload() -> Vec<u8> {
        let mut p = 2_i16.to_be_bytes().to_vec();
        for (name, oid, format) in [("id", 23_u32, 1_u16), ("name", 25, 0)] {
            p.extend_from_slice(name.as_bytes());
            p.push(0);
            p.extend_from_slice(&16384_u32.to_be_bytes());
            p.extend_from_slice(&1_i16.to_be_bytes());
            p.extend_from_slice(&oid.to_be_bytes());
            p.extend_from_slice(&(-1_i16).to_be_bytes());
            p.extend_from_slice(&(-1_i32).to_be_bytes());
            p.extend_from_slice(&format.to_be_bytes());
        }
        p
    }

    #[test]
    fn test_parse_row_description() {
        let payload = row_description_payload();
        let desc = RowDescription::parse(&payload).unwrap();
        assert_eq!(desc.len(), 2);
        let id = desc.fields()[0];
        assert_eq!(id.name, "id");
        assert_eq!(id.type_oid(), 23);
        assert_eq!(id.table_oid(), 16384);
        assert_eq!(id.format(), FormatCode::Binary);
        assert_eq!(desc.fields()[1].name, "name");
        assert_eq!(desc.fields()[1].format(), FormatCode::Text);

        // Truncated tail
        assert!(RowDescription::parse(&payload[..payload.len() - 3]).is_err());
    }

    #[test]
    fn test_parse_data_row() {
        let payload = b"\x00\x03\x00\x00\x00\x0242\xff\xff\xff\xff\x00\x00\x00\x00";
        let row = DataRow::parse(payload).unwrap();
        assert_eq!(row.len(), 3);
        let values = row.values().unwrap();
        assert_eq!(values, vec![Some(&b"42"[..]), None, Some(&b""[..])]);

        let truncated = DataRow::parse(b"\x00\x01\x00\x00\x00\x05ab").unwrap();
        assert!(truncated.values().is_err());
    }

    #[test]
    fn test_rows_affected() {
        let cases = [
            ("SELECT 5", Some(5)),
            ("INSERT 0 3", Some(3)),
            ("UPDATE 10", Some(10)),
            ("DELETE 0", Some(0)),
            ("MERGE 2", Some(2)),
            ("FETCH 7", Some(7)),
            ("CREATE TABLE", None),
            ("BEGIN", None),
        ];
        for (tag, expected) in cases {
            assert_eq!(CommandComplete { tag }.rows_affected(), expected, "{tag}");
        }
        let done = CommandComplete::parse(b"INSERT 0 1\0").unwrap();
        assert_eq!(done.command(), Some("INSERT"));
    }
}
