//! ErrorResponse and NoticeResponse.
//!
//! Both carry the same list of `code:1, value:cstring` fields ending in a
//! zero byte.

use crate::error::{Error, ErrorFields, Result};
use crate::protocol::codec::read_cstr;

/// Decode the field list shared by ErrorResponse and NoticeResponse.
pub fn parse_fields(payload: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut data = payload;

    while let Some((&code, rest)) = data.split_first() {
        if code == 0 {
            break;
        }
        let (value, rest) = read_cstr(rest)?;
        data = rest;

        let slot = match code {
            b'S' => &mut fields.severity,
            b'V' => &mut fields.severity_non_localized,
            b'C' => &mut fields.code,
            b'M' => &mut fields.message,
            b'D' => &mut fields.detail,
            b'H' => &mut fields.hint,
            b'q' => &mut fields.internal_query,
            b'W' => &mut fields.where_,
            b's' => &mut fields.schema,
            b't' => &mut fields.table,
            b'c' => &mut fields.column,
            b'd' => &mut fields.data_type,
            b'n' => &mut fields.constraint,
            b'F' => &mut fields.file,
            b'R' => &mut fields.routine,
            b'P' => {
                fields.position = value.parse().ok();
                continue;
            }
            b'p' => {
                fields.internal_position = value.parse().ok();
                continue;
            }
            b'L' => {
                fields.line = value.parse().ok();
                continue;
            }
            _ => {
                tracing::debug!("ignoring error field '{}'", code as char);
                continue;
            }
        };
        *slot = Some(value.to_string());
    }

    Ok(fields)
}

/// ErrorResponse: the current command failed.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub fields: ErrorFields,
}

impl ErrorResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields(payload)?,
        })
    }

    pub fn into_error(self) -> Error {
        Error::Server(self.fields)
    }
}

/// NoticeResponse: a warning or informational message.
#[derive(Debug, Clone)]
pub struct NoticeResponse {
    pub fields: ErrorFields,
}

impl NoticeResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields(payload)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_fields() {
        let payload =
            b"SERROR\0VERROR\0C42601\0Msyntax error at or near \"SELEC\"\0P1\0Fscan.l\0L1176\0Rscanner_yyerror\0\0";
        let err = ErrorResponse::parse(payload).unwrap();
        assert_eq!(err.fields.severity(), Some("ERROR"));
        assert_eq!(err.fields.code.as_deref(), Some("42601"));
        assert_eq!(err.fields.position, Some(1));
        assert_eq!(err.fields.line, Some(1176));
        assert_eq!(err.fields.routine.as_deref(), Some("scanner_yyerror"));
        assert!(!err.fields.is_fatal());
        assert_eq!(err.into_error().sqlstate(), Some("42601"));
    }

    #[test]
    fn test_fatal_and_unknown_fields() {
        let payload = b"SFATAL\0C28P01\0Zfuture\0Mpassword authentication failed\0\0";
        let notice = NoticeResponse::parse(payload).unwrap();
        assert!(notice.fields.is_fatal());
        assert_eq!(
            notice.fields.message.as_deref(),
            Some("password authentication failed")
        );
        assert!(ErrorResponse::parse(b"Munterminated").is_err());
    }
}
