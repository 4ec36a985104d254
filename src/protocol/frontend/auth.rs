//! Authentication responses and password hashing.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::protocol::output::OutputStream;

/// SASL mechanism this client implements.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// GS2 header for "no channel binding"; base64 of it is `biws`.
const GS2_HEADER: &str = "n,,";

/// Write a PasswordMessage carrying a cleartext or MD5-hashed password.
pub fn write_password(out: &mut OutputStream, password: &str) -> Result<()> {
    super::begin(out, super::msg_type::PASSWORD)?;
    out.write_cstr(password)?;
    out.complete_packet()
}

/// Write a SASLInitialResponse.
pub fn write_sasl_initial_response(
    out: &mut OutputStream,
    mechanism: &str,
    data: &[u8],
) -> Result<()> {
    let len = i32::try_from(data.len())
        .map_err(|_| Error::Auth("SASL initial response too large".into()))?;
    super::begin(out, super::msg_type::PASSWORD)?;
    out.write_cstr(mechanism)?;
    out.write_i32(len)?;
    out.write_bytes(data)?;
    out.complete_packet()
}

/// Write a SASLResponse.
pub fn write_sasl_response(out: &mut OutputStream, data: &[u8]) -> Result<()> {
    super::begin(out, super::msg_type::PASSWORD)?;
    out.write_bytes(data)?;
    out.complete_packet()
}

/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    use md5::Md5;

    let inner = Md5::new()
        .chain_update(password.as_bytes())
        .chain_update(user.as_bytes())
        .finalize();
    let outer = Md5::new()
        .chain_update(format!("{:x}", inner).as_bytes())
        .chain_update(salt)
        .finalize();
    format!("md5{:x}", outer)
}

fn hmac(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| Error::Auth(format!("HMAC key: {e}")))?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

#[derive(Debug)]
enum ScramState {
    Initial,
    ClientFinalSent {
        salted_password: [u8; 32],
        auth_message: String,
    },
    Done,
}

/// Client side of a SCRAM-SHA-256 exchange (RFC 5802/7677) without channel
/// binding.
#[derive(Debug)]
pub struct ScramSha256 {
    password: String,
    client_first_bare: String,
    client_nonce: String,
    state: ScramState,
}

impl ScramSha256 {
    /// Start an exchange with a fresh random nonce.
    ///
    /// The server takes the user from the startup packet, so the SCRAM
    /// username is left empty.
    pub fn new(password: &str) -> Self {
        use rand::Rng;

        let mut bytes = [0u8; 18];
        rand::rng().fill(&mut bytes);
        Self::with_nonce("", password, &STANDARD.encode(bytes))
    }

    fn with_nonce(user: &str, password: &str, nonce: &str) -> Self {
        let user = user.replace('=', "=3D").replace(',', "=2C");
        Self {
            password: password.to_string(),
            client_first_bare: format!("n={},r={}", user, nonce),
            client_nonce: nonce.to_string(),
            state: ScramState::Initial,
        }
    }

    /// client-first-message, sent in the SASLInitialResponse.
    pub fn client_first(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_bare)
    }

    /// Consume server-first-message and produce client-final-message.
    pub fn client_final(&mut self, server_first: &[u8]) -> Result<String> {
        if !matches!(self.state, ScramState::Initial) {
            return Err(Error::Auth("unexpected SCRAM server-first-message".into()));
        }
        let server_first = simdutf8::compat::from_utf8(server_first)
            .map_err(|e| Error::Auth(format!("server-first-message: {e}")))?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in server_first.split(',') {
            match attr.split_once('=') {
                Some(("r", v)) => nonce = Some(v),
                Some(("s", v)) => salt = Some(v),
                Some(("i", v)) => iterations = v.parse::<u32>().ok(),
                _ => {}
            }
        }
        let (Some(nonce), Some(salt), Some(iterations)) = (nonce, salt, iterations) else {
            return Err(Error::Auth(format!(
                "malformed server-first-message: {server_first}"
            )));
        };
        if !nonce.starts_with(&self.client_nonce) || nonce.len() == self.client_nonce.len() {
            return Err(Error::Auth("server nonce does not extend client nonce".into()));
        }
        let salt = STANDARD
            .decode(salt)
            .map_err(|e| Error::Auth(format!("invalid SCRAM salt: {e}")))?;

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );

        let client_key = hmac(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);

        let without_proof = format!("c={},r={}", STANDARD.encode(GS2_HEADER), nonce);
        let auth_message = format!("{},{},{}", self.client_first_bare, server_first, without_proof);
        let signature = hmac(&stored_key, auth_message.as_bytes())?;

        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(signature) {
            *p ^= s;
        }

        self.state = ScramState::ClientFinalSent {
            salted_password,
            auth_message,
        };
        Ok(format!("{},p={}", without_proof, STANDARD.encode(proof)))
    }

    /// Check the server signature in server-final-message.
    pub fn verify_server_final(&mut self, server_final: &[u8]) -> Result<()> {
        let ScramState::ClientFinalSent {
            salted_password,
            auth_message,
        } = std::mem::replace(&mut self.state, ScramState::Done)
        else {
            return Err(Error::Auth("unexpected SCRAM server-final-message".into()));
        };

        let server_final = simdutf8::compat::from_utf8(server_final)
            .map_err(|e| Error::Auth(format!("server-final-message: {e}")))?;
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(Error::Auth(format!("server rejected SCRAM exchange: {err}")));
        }
        let signature = server_final
            .split(',')
            .find_map(|attr| attr.strip_prefix("v="))
            .and_then(|v| STANDARD.decode(v).ok())
            .ok_or_else(|| Error::Auth(format!("malformed server-final-message: {server_final}")))?;

        let server_key = hmac(&salted_password, b"Server Key")?;
        let expected = hmac(&server_key, auth_message.as_bytes())?;
        if signature != expected {
            return Err(Error::Auth("server signature mismatch".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::buffer_pool::BufferPool;
    use crate::protocol::frontend::written;

    // RFC 7677 section 3
    const NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const CLIENT_FINAL: &str =
        "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    #[test]
    fn test_scram_rfc7677_exchange() {
        let mut scram = ScramSha256::with_nonce("user", "pencil", NONCE);
        assert_eq!(scram.client_first(), format!("n,,n=user,r={NONCE}"));
        let client_final = scram.client_final(SERVER_FIRST.as_bytes()).unwrap();
        assert_eq!(client_final, CLIENT_FINAL);
        scram.verify_server_final(SERVER_FINAL.as_bytes()).unwrap();
    }

    #[test]
    fn test_scram_rejects_bad_signature_and_nonce() {
        let mut scram = ScramSha256::with_nonce("user", "wrong", NONCE);
        scram.client_final(SERVER_FIRST.as_bytes()).unwrap();
        assert!(matches!(
            scram.verify_server_final(SERVER_FINAL.as_bytes()),
            Err(Error::Auth(_))
        ));

        let mut scram = ScramSha256::with_nonce("", "pencil", "abc");
        assert!(scram.client_final(SERVER_FIRST.as_bytes()).is_err());

        let mut scram = ScramSha256::new("pencil");
        assert!(scram.verify_server_final(SERVER_FINAL.as_bytes()).is_err());
    }

    #[test]
    fn test_md5_password() {
        let a = md5_password("postgres", "password", &[1, 2, 3, 4]);
        assert!(a.starts_with("md5"));
        assert_eq!(a.len(), 35);
        assert_eq!(a, md5_password("postgres", "password", &[1, 2, 3, 4]));
        assert_ne!(a, md5_password("postgres", "password", &[4, 3, 2, 1]));
    }

    #[test]
    fn test_password_messages() {
        let mut out = OutputStream::new(Arc::new(BufferPool::new(4, 64)));
        write_password(&mut out, "secret").unwrap();
        write_sasl_initial_response(&mut out, SCRAM_SHA_256, b"n,,n=,r=x").unwrap();
        let buf = written(&out);
        assert_eq!(&buf[..12], b"p\0\0\0\x0bsecret\0");
        assert_eq!(buf[12], b'p');
        assert_eq!(&buf[17..31], b"SCRAM-SHA-256\0");
        assert_eq!(&buf[31..35], &9_i32.to_be_bytes());
        assert_eq!(&buf[35..], b"n,,n=,r=x");
    }
}
