//! Startup-phase and session-level backend messages.

use zerocopy::byteorder::big_endian::U32 as U32BE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i32, read_u32};
use crate::protocol::types::TransactionStatus;

/// Authentication request codes (first Int32 of an 'R' payload).
pub mod auth_code {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const GSS: i32 = 7;
    pub const GSS_CONTINUE: i32 = 8;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Decoded Authentication message.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthenticationMessage<'a> {
    Ok,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    /// SASL negotiation start, listing the mechanisms the server accepts
    Sasl { mechanisms: Vec<&'a str> },
    SaslContinue { data: &'a [u8] },
    SaslFinal { data: &'a [u8] },
    /// Kerberos, GSSAPI or SSPI; carries the raw code
    Unsupported(i32),
}

impl<'a> AuthenticationMessage<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (code, rest) = read_i32(payload)?;
        let message = match code {
            auth_code::OK => Self::Ok,
            auth_code::CLEARTEXT_PASSWORD => Self::CleartextPassword,
            auth_code::MD5_PASSWORD => {
                let (salt, _) = read_bytes(rest, 4)
                    .map_err(|_| Error::Protocol("MD5Password: missing salt".into()))?;
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(salt);
                Self::Md5Password { salt: bytes }
            }
            auth_code::SASL => {
                let mut mechanisms = Vec::new();
                let mut data = rest;
                while data.first().is_some_and(|&b| b != 0) {
                    let (mechanism, remaining) = read_cstr(data)?;
                    mechanisms.push(mechanism);
                    data = remaining;
                }
                Self::Sasl { mechanisms }
            }
            auth_code::SASL_CONTINUE => Self::SaslContinue { data: rest },
            auth_code::SASL_FINAL => Self::SaslFinal { data: rest },
            auth_code::KERBEROS_V5 | auth_code::GSS | auth_code::GSS_CONTINUE | auth_code::SSPI => {
                Self::Unsupported(code)
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unknown authentication request {}",
                    other
                )));
            }
        };
        Ok(message)
    }
}

/// BackendKeyData: process id and secret key for out-of-band cancellation.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct BackendKeyData {
    pid: U32BE,
    secret_key: U32BE,
}

impl BackendKeyData {
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Ok(Self::ref_from_bytes(payload)?)
    }

    pub fn process_id(&self) -> u32 {
        self.pid.get()
    }

    pub fn secret_key(&self) -> u32 {
        self.secret_key.get()
    }
}

/// ParameterStatus: a run-time parameter reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterStatus<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl<'a> ParameterStatus<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self { name, value })
    }
}

/// ReadyForQuery: the server finished a query cycle.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct ReadyForQuery {
    status: u8,
}

impl ReadyForQuery {
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Ok(Self::ref_from_bytes(payload)?)
    }

    /// Transaction status, or an error for an unknown indicator byte.
    pub fn transaction_status(&self) -> Result<TransactionStatus> {
        TransactionStatus::from_byte(self.status).ok_or_else(|| {
            Error::Protocol(format!(
                "unknown transaction status '{}'",
                self.status as char
            ))
        })
    }
}

/// NotificationResponse: a LISTEN/NOTIFY message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationResponse<'a> {
    pub pid: u32,
    pub channel: &'a str,
    pub payload: &'a str,
}

impl<'a> NotificationResponse<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (pid, rest) = read_u32(payload)?;
        let (channel, rest) = read_cstr(rest)?;
        let (payload, _) = read_cstr(rest)?;
        Ok(Self {
            pid,
            channel,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_auth_requests() {
        assert_eq!(
            AuthenticationMessage::parse(&[0, 0, 0, 0]).unwrap(),
            AuthenticationMessage::Ok
        );
        assert_eq!(
            AuthenticationMessage::parse(&[0, 0, 0, 5, 1, 2, 3, 4]).unwrap(),
            AuthenticationMessage::Md5Password { salt: [1, 2, 3, 4] }
        );
        assert!(AuthenticationMessage::parse(&[0, 0, 0, 5, 1]).is_err());
        assert_eq!(
            AuthenticationMessage::parse(&[0, 0, 0, 7]).unwrap(),
            AuthenticationMessage::Unsupported(7)
        );
        assert!(AuthenticationMessage::parse(&[0, 0, 0, 99]).is_err());
    }

    #[test]
    fn test_parse_sasl_mechanisms() {
        let payload = b"\x00\x00\x00\x0aSCRAM-SHA-256-PLUS\x00SCRAM-SHA-256\x00\x00";
        let AuthenticationMessage::Sasl { mechanisms } =
            AuthenticationMessage::parse(payload).unwrap()
        else {
            panic!("expected SASL");
        };
        assert_eq!(mechanisms, vec!["SCRAM-SHA-256-PLUS", "SCRAM-SHA-256"]);
    }

    #[test]
    fn test_parse_session_messages() {
        let key = BackendKeyData::parse(&[0, 0, 0x30, 0x39, 0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(key.process_id(), 12345);
        assert_eq!(key.secret_key(), 0xdeadbeef);
        assert!(BackendKeyData::parse(&[0, 1]).is_err());

        let ready = ReadyForQuery::parse(b"T").unwrap();
        assert_eq!(ready.transaction_status().unwrap(), TransactionStatus::InTransaction);
        assert!(ReadyForQuery::parse(b"X").unwrap().transaction_status().is_err());

        let status = ParameterStatus::parse(b"TimeZone\0UTC\0").unwrap();
        assert_eq!(status.name, "TimeZone");
        assert_eq!(status.value, "UTC");

        let notify = NotificationResponse::parse(b"\x00\x00\x00\x07jobs\0ready\0").unwrap();
        assert_eq!(notify.pid, 7);
        assert_eq!(notify.channel, "jobs");
        assert_eq!(notify.payload, "ready");
    }
}
