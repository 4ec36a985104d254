//! Connection handshakes.

use crate::error::Result;
use crate::opts::Opts;
use crate::request::Request;
use crate::response::AuthResponse;

/// Runs once the transport is connected.
pub trait Handshake: Send {
    /// Produce the first request to send, ahead of every queued request.
    fn finish_connect(self: Box<Self>) -> Result<Option<Request>>;
}

/// Sends the StartupMessage and authenticates with the configured password.
#[derive(Debug, Clone)]
pub struct StartupHandshake {
    params: Vec<(String, String)>,
    user: String,
    password: Option<String>,
}

impl StartupHandshake {
    pub fn new(opts: &Opts) -> Self {
        Self {
            params: opts.startup_params(),
            user: opts.user.clone(),
            password: opts.password.clone(),
        }
    }
}

impl Handshake for StartupHandshake {
    fn finish_connect(self: Box<Self>) -> Result<Option<Request>> {
        let Self {
            params,
            user,
            password,
        } = *self;
        Ok(Some(Request::Startup {
            params,
            auth: AuthResponse::new(user, password),
        }))
    }
}
