//! Incoming units of protocol work.
//!
//! A [`Response`] consumes the frames the server sends for one request.
//! [`Response::read`] returns `Some` while the response wants more frames;
//! the engine then feeds it the next routed frame ahead of the awaiting
//! queue. Errors reported by a [`ResultHandler`] are kept and delivered on
//! finish; the response still drains its frames so the stream stays in step.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::handler::ResultHandler;
use crate::protocol::backend::{
    AuthenticationMessage, CommandComplete, DataRow, RowDescription, msg_type, tag_name,
};
use crate::protocol::frame::Frame;
use crate::protocol::frontend::auth::{SCRAM_SHA_256, ScramSha256};
use crate::protocol::frontend::md5_password;
use crate::request::{PasswordMessage, Request};
use crate::statement_cache::PreparedStatementCache;

/// What a response may touch while consuming a frame.
pub struct ReadContext<'a> {
    priority: &'a mut VecDeque<Request>,
    cache: &'a mut PreparedStatementCache,
    write_required: &'a mut bool,
}

impl<'a> ReadContext<'a> {
    pub(crate) fn new(
        priority: &'a mut VecDeque<Request>,
        cache: &'a mut PreparedStatementCache,
        write_required: &'a mut bool,
    ) -> Self {
        Self {
            priority,
            cache,
            write_required,
        }
    }

    /// Queue a follow-up request ahead of application requests.
    pub fn write(&mut self, request: Request) {
        self.priority.push_back(request);
        *self.write_required = true;
    }
}

/// Authentication exchange, from StartupMessage to the first ReadyForQuery.
///
/// Each password round moves this value into a blocking
/// [`Request::Password`], which hands it back as the awaited response.
/// After AuthenticationOk it stays active while the server reports its
/// parameters, so nothing else is sent before startup completes.
pub struct AuthResponse {
    user: String,
    password: Option<String>,
    scram: Option<ScramSha256>,
    authenticated: bool,
}

impl AuthResponse {
    pub fn new(user: impl Into<String>, password: Option<String>) -> Self {
        Self {
            user: user.into(),
            password,
            scram: None,
            authenticated: false,
        }
    }

    fn password(&self) -> Result<String> {
        self.password
            .clone()
            .ok_or_else(|| Error::Auth("server requested a password but none was provided".into()))
    }

    fn reply(self, message: PasswordMessage, ctx: &mut ReadContext<'_>) -> Option<Response> {
        ctx.write(Request::Password {
            message,
            auth: self,
        });
        None
    }

    fn read(mut self, frame: Frame<'_>, ctx: &mut ReadContext<'_>) -> Result<Option<Response>> {
        if frame.tag != msg_type::AUTHENTICATION || self.authenticated {
            return Err(Error::Protocol(format!(
                "unexpected {} during startup",
                tag_name(frame.tag)
            )));
        }
        match AuthenticationMessage::parse(frame.payload)? {
            AuthenticationMessage::Ok => {
                tracing::debug!("authenticated as {}", self.user);
                self.authenticated = true;
                Ok(Some(Response::Authentication(self)))
            }
            AuthenticationMessage::CleartextPassword => {
                let password = self.password()?;
                Ok(self.reply(PasswordMessage::Cleartext(password), ctx))
            }
            AuthenticationMessage::Md5Password { salt } => {
                let hashed = md5_password(&self.user, &self.password()?, &salt);
                Ok(self.reply(PasswordMessage::Md5(hashed), ctx))
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                if !mechanisms.contains(&SCRAM_SHA_256) {
                    return Err(Error::Unsupported(format!(
                        "SASL mechanisms {:?}",
                        mechanisms
                    )));
                }
                let scram = ScramSha256::new(&self.password()?);
                let data = scram.client_first().into_bytes();
                self.scram = Some(scram);
                let message = PasswordMessage::SaslInitial {
                    mechanism: SCRAM_SHA_256.to_string(),
                    data,
                };
                Ok(self.reply(message, ctx))
            }
            AuthenticationMessage::SaslContinue { data } => {
                let scram = self
                    .scram
                    .as_mut()
                    .ok_or_else(|| Error::Auth("SASL continue before SASL start".into()))?;
                let reply = scram.client_final(data)?;
                Ok(self.reply(PasswordMessage::SaslResponse(reply.into_bytes()), ctx))
            }
            AuthenticationMessage::SaslFinal { data } => {
                self.scram
                    .as_mut()
                    .ok_or_else(|| Error::Auth("SASL final before SASL start".into()))?
                    .verify_server_final(data)?;
                // AuthenticationOk follows
                Ok(Some(Response::Authentication(self)))
            }
            AuthenticationMessage::Unsupported(code) => Err(Error::Unsupported(format!(
                "authentication method {}",
                code
            ))),
        }
    }
}

/// Expects ParseComplete for a statement taken from the cache.
#[derive(Debug)]
pub struct ParseResponse {
    sql: String,
}

impl ParseResponse {
    pub fn new(sql: String) -> Self {
        Self { sql }
    }
}

/// Result delivery shared by simple queries and portal executions.
struct Results {
    handler: Box<dyn ResultHandler>,
    error: Option<Error>,
}

impl Results {
    fn new(handler: Box<dyn ResultHandler>) -> Self {
        Self {
            handler,
            error: None,
        }
    }

    fn deliver(&mut self, f: impl FnOnce(&mut dyn ResultHandler) -> Result<()>) {
        if self.error.is_none()
            && let Err(e) = f(self.handler.as_mut())
        {
            self.error = Some(e);
        }
    }

    /// Handle a result frame; `Ok(false)` for a tag that isn't one.
    fn consume(&mut self, frame: Frame<'_>) -> Result<bool> {
        match frame.tag {
            msg_type::ROW_DESCRIPTION => {
                let cols = RowDescription::parse(frame.payload)?;
                self.deliver(|h| h.result_start(cols));
            }
            msg_type::DATA_ROW => {
                let row = DataRow::parse(frame.payload)?;
                self.deliver(|h| h.row(row));
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(frame.payload)?;
                self.deliver(|h| h.result_end(complete));
            }
            msg_type::EMPTY_QUERY_RESPONSE | msg_type::NO_DATA => {}
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn finish(mut self) {
        let outcome = match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        };
        self.handler.finish(outcome);
    }

    fn fail(mut self, err: Error) {
        self.handler.finish(Err(err));
    }

    fn desync(self, err: Error) -> Error {
        self.fail(Error::Protocol(err.to_string()));
        err
    }
}

/// Frames of a Describe(portal) + Execute pair.
pub struct ExecuteResponse {
    results: Results,
}

impl ExecuteResponse {
    pub fn new(handler: Box<dyn ResultHandler>) -> Self {
        Self {
            results: Results::new(handler),
        }
    }

    fn read(mut self, frame: Frame<'_>) -> Result<Option<Response>> {
        match frame.tag {
            msg_type::COMMAND_COMPLETE
            | msg_type::EMPTY_QUERY_RESPONSE
            | msg_type::PORTAL_SUSPENDED => {
                if let Err(e) = self.results.consume(frame) {
                    return Err(self.results.desync(e));
                }
                self.results.finish();
                Ok(None)
            }
            _ => match self.results.consume(frame) {
                Ok(true) => Ok(Some(Response::Execute(self))),
                Ok(false) => Err(self.results.desync(Error::Protocol(format!(
                    "unexpected {} in portal execution",
                    tag_name(frame.tag)
                )))),
                Err(e) => Err(self.results.desync(e)),
            },
        }
    }
}

/// Frames of a simple query, up to its ReadyForQuery.
pub struct QueryResponse {
    results: Results,
}

impl QueryResponse {
    pub fn new(handler: Box<dyn ResultHandler>) -> Self {
        Self {
            results: Results::new(handler),
        }
    }

    fn read(mut self, frame: Frame<'_>) -> Result<Option<Response>> {
        match self.results.consume(frame) {
            Ok(true) => Ok(Some(Response::Query(self))),
            Ok(false) => Err(self.results.desync(Error::Unsupported(format!(
                "{} in simple query",
                tag_name(frame.tag)
            )))),
            Err(e) => Err(self.results.desync(e)),
        }
    }
}

/// Expected answer to a request.
pub enum Response {
    Authentication(AuthResponse),
    Parse(ParseResponse),
    Bind,
    Execute(ExecuteResponse),
    Query(QueryResponse),
}

impl Response {
    /// Consume one frame.
    ///
    /// `Ok(Some(_))` asks for the next frame as well. `Err` means the stream
    /// no longer matches the pending work; the response has already
    /// finished its handler.
    pub fn read(self, frame: Frame<'_>, ctx: &mut ReadContext<'_>) -> Result<Option<Response>> {
        match self {
            Self::Authentication(auth) => auth.read(frame, ctx),
            Self::Parse(parse) => {
                if frame.tag == msg_type::PARSE_COMPLETE {
                    return Ok(None);
                }
                ctx.cache.forget(&parse.sql);
                Err(Error::Protocol(format!(
                    "expected ParseComplete, got {}",
                    tag_name(frame.tag)
                )))
            }
            Self::Bind => {
                if frame.tag == msg_type::BIND_COMPLETE {
                    return Ok(None);
                }
                Err(Error::Protocol(format!(
                    "expected BindComplete, got {}",
                    tag_name(frame.tag)
                )))
            }
            Self::Execute(execute) => execute.read(frame),
            Self::Query(query) => query.read(frame),
        }
    }

    /// The server reported an error (or the connection ended) before this
    /// response completed.
    pub fn fail(self, err: Error, ctx: &mut ReadContext<'_>) {
        match self {
            Self::Authentication(_) => tracing::debug!("authentication failed: {}", err),
            Self::Parse(parse) => {
                if let Some(name) = ctx.cache.forget(&parse.sql) {
                    tracing::debug!("forgetting statement {} after failed Parse", name);
                }
            }
            Self::Bind => {}
            Self::Execute(execute) => execute.results.fail(err),
            Self::Query(query) => query.results.fail(err),
        }
    }

    /// ReadyForQuery arrived while this response was still taking frames.
    pub fn finish(self, ctx: &mut ReadContext<'_>) {
        match self {
            Self::Query(query) => query.results.finish(),
            Self::Authentication(auth) if auth.authenticated => {}
            other => {
                tracing::warn!("ReadyForQuery before {} response completed", other.kind());
                other.fail(
                    Error::Protocol("ReadyForQuery before response completed".into()),
                    ctx,
                );
            }
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "Authentication",
            Self::Parse(_) => "Parse",
            Self::Bind => "Bind",
            Self::Execute(_) => "Execute",
            Self::Query(_) => "Query",
        }
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::handler::CollectHandler;
    use crate::row::ResultSet;

    type Slot = Arc<Mutex<Option<Result<Vec<ResultSet>>>>>;

    fn collect() -> (Box<dyn ResultHandler>, Slot) {
        let slot: Slot = Arc::default();
        let out = Arc::clone(&slot);
        let handler = CollectHandler::new(move |r| {
            *out.lock().unwrap() = Some(r);
        });
        (Box::new(handler), slot)
    }

    struct Ctx {
        priority: VecDeque<Request>,
        cache: PreparedStatementCache,
        write_required: bool,
    }

    impl Ctx {
        fn new() -> Self {
            Self {
                priority: VecDeque::new(),
                cache: PreparedStatementCache::new(),
                write_required: false,
            }
        }

        fn read(
            &mut self,
            response: Response,
            tag: u8,
            payload: &[u8],
        ) -> Result<Option<Response>> {
            let mut ctx =
                ReadContext::new(&mut self.priority, &mut self.cache, &mut self.write_required);
            response.read(Frame { tag, payload }, &mut ctx)
        }
    }

    const ROW_DESC: &[u8] =
        b"\x00\x01v\0\x00\x00\x00\x00\x00\x00\x00\x00\x00\x19\xff\xff\xff\xff\xff\xff\x00\x00";

    #[test]
    fn test_execute_response_multi_frame() {
        let mut ctx = Ctx::new();
        let (handler, slot) = collect();
        let mut response = Response::Execute(ExecuteResponse::new(handler));
        for (tag, payload) in [
            (b'T', ROW_DESC),
            (b'D', &b"\x00\x01\x00\x00\x00\x01a"[..]),
            (b'D', &b"\x00\x01\xff\xff\xff\xff"[..]),
        ] {
            response = ctx.read(response, tag, payload).unwrap().expect("wants more");
        }
        assert!(ctx.read(response, b'C', b"SELECT 2\0").unwrap().is_none());

        let sets = slot.lock().unwrap().take().unwrap().unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].rows.len(), 2);
        assert_eq!(sets[0].rows[0].get_str(0).unwrap(), Some("a"));
        assert!(sets[0].rows[1].is_null(0));
        assert_eq!(sets[0].tag, "SELECT 2");
    }

    #[test]
    fn test_query_response_stays_active() {
        let mut ctx = Ctx::new();
        let (handler, slot) = collect();
        let response = Response::Query(QueryResponse::new(handler));
        let response = ctx.read(response, b'C', b"CREATE TABLE\0").unwrap().unwrap();
        let response = ctx.read(response, b'I', b"").unwrap().unwrap();
        assert!(slot.lock().unwrap().is_none());

        let mut read_ctx =
            ReadContext::new(&mut ctx.priority, &mut ctx.cache, &mut ctx.write_required);
        response.finish(&mut read_ctx);
        let sets = slot.lock().unwrap().take().unwrap().unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].rows_affected(), None);
    }

    #[test]
    fn test_unexpected_frame_fails_handler() {
        let mut ctx = Ctx::new();
        let (handler, slot) = collect();
        let response = Response::Execute(ExecuteResponse::new(handler));
        assert!(ctx.read(response, b'2', b"").is_err());
        assert!(matches!(
            slot.lock().unwrap().take(),
            Some(Err(Error::Protocol(_)))
        ));

        assert!(ctx.read(Response::Bind, b'2', b"").unwrap().is_none());
        assert!(ctx.read(Response::Bind, b'1', b"").is_err());
    }

    #[test]
    fn test_failed_parse_forgets_statement() {
        let mut ctx = Ctx::new();
        ctx.cache.get_or_assign("SELEC 1");
        let response = Response::Parse(ParseResponse::new("SELEC 1".into()));
        let mut read_ctx =
            ReadContext::new(&mut ctx.priority, &mut ctx.cache, &mut ctx.write_required);
        response.fail(Error::Server(Default::default()), &mut read_ctx);
        assert!(ctx.cache.is_empty());
    }

    #[test]
    fn test_md5_auth_queues_password() {
        let mut ctx = Ctx::new();
        let auth = Response::Authentication(AuthResponse::new("alice", Some("secret".into())));
        assert!(ctx.read(auth, b'R', &[0, 0, 0, 5, 9, 8, 7, 6]).unwrap().is_none());
        assert!(ctx.write_required);

        let Some(Request::Password { message, auth }) = ctx.priority.pop_front() else {
            panic!("expected a password request");
        };
        assert_eq!(
            message,
            PasswordMessage::Md5(md5_password("alice", "secret", &[9, 8, 7, 6]))
        );
        let auth = ctx
            .read(Response::Authentication(auth), b'R', &[0, 0, 0, 0])
            .unwrap()
            .expect("waits for ReadyForQuery");
        assert!(ctx.read(auth, b'R', &[0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_auth_without_password() {
        let mut ctx = Ctx::new();
        let auth = Response::Authentication(AuthResponse::new("alice", None));
        assert!(matches!(
            ctx.read(auth, b'R', &[0, 0, 0, 3]),
            Err(Error::Auth(_))
        ));

        let auth = Response::Authentication(AuthResponse::new("alice", None));
        assert!(matches!(
            ctx.read(auth, b'R', &[0, 0, 0, 9]),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_handler_error_is_kept_until_completion() {
        struct Failing(Arc<Mutex<Option<Result<()>>>>, usize);
        impl ResultHandler for Failing {
            fn row(&mut self, _row: DataRow<'_>) -> Result<()> {
                self.1 += 1;
                Err(Error::Decode("bad row".into()))
            }
            fn finish(&mut self, outcome: Result<()>) {
                assert_eq!(self.1, 1);
                *self.0.lock().unwrap() = Some(outcome);
            }
        }

        let outcome = Arc::new(Mutex::new(None));
        let mut ctx = Ctx::new();
        let handler = Box::new(Failing(Arc::clone(&outcome), 0));
        let mut response = Response::Execute(ExecuteResponse::new(handler));
        for _ in 0..3 {
            response = ctx
                .read(response, b'D', b"\x00\x01\x00\x00\x00\x01x")
                .unwrap()
                .unwrap();
        }
        assert!(outcome.lock().unwrap().is_none());
        assert!(ctx.read(response, b'C', b"SELECT 3\0").unwrap().is_none());
        assert!(matches!(
            outcome.lock().unwrap().take(),
            Some(Err(Error::Decode(_)))
        ));
    }
}
