//! Outgoing units of protocol work.
//!
//! A [`Request`] serializes itself into the output stream and says what
//! happens next: the [`Response`] to await, a follow-up request to write
//! right away, and whether the server will answer with ReadyForQuery.
//!
//! The extended-query chain is Parse → Bind → Execute → Sync. Parse is
//! skipped on the wire when the statement is already prepared on this
//! connection.

use crate::error::{Error, Result};
use crate::handler::ResultHandler;
use crate::protocol::frontend;
use crate::protocol::output::OutputStream;
use crate::protocol::types::{FormatCode, Param};
use crate::response::{AuthResponse, ExecuteResponse, ParseResponse, QueryResponse, Response};
use crate::statement_cache::PreparedStatementCache;

/// What the writer needs besides the request itself.
pub struct WriteContext<'a> {
    pub out: &'a mut OutputStream,
    pub cache: &'a mut PreparedStatementCache,
}

/// Outcome of writing one request.
#[derive(Default)]
pub struct Written {
    /// Response to enqueue, if the server answers this message
    pub response: Option<Response>,
    /// Request to write immediately after this one
    pub next: Option<Request>,
    /// The server ends this cycle with ReadyForQuery
    pub ready_marker: bool,
}

impl Written {
    fn respond(response: Response) -> Self {
        Self {
            response: Some(response),
            ..Default::default()
        }
    }
}

/// A password-phase message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordMessage {
    Cleartext(String),
    /// Already hashed with [`md5_password`](crate::protocol::frontend::md5_password)
    Md5(String),
    SaslInitial { mechanism: String, data: Vec<u8> },
    SaslResponse(Vec<u8>),
}

impl PasswordMessage {
    fn write(&self, out: &mut OutputStream) -> Result<()> {
        match self {
            Self::Cleartext(password) | Self::Md5(password) => {
                frontend::write_password(out, password)
            }
            Self::SaslInitial { mechanism, data } => {
                frontend::write_sasl_initial_response(out, mechanism, data)
            }
            Self::SaslResponse(data) => frontend::write_sasl_response(out, data),
        }
    }
}

/// A prepared-statement execution: SQL, parameters and the portal to run it in.
pub struct Portal {
    /// Portal name; empty for the unnamed portal
    pub name: String,
    pub sql: String,
    /// Statement name; assigned from the statement cache when sent as Parse
    pub statement: String,
    pub params: Vec<Param>,
    /// Result column formats; empty means text for every column
    pub result_formats: Vec<FormatCode>,
    /// Row limit for Execute; 0 means no limit
    pub max_rows: u32,
    pub handler: Box<dyn ResultHandler>,
}

impl Portal {
    pub fn new(
        sql: impl Into<String>,
        params: Vec<Param>,
        handler: Box<dyn ResultHandler>,
    ) -> Self {
        Self {
            name: String::new(),
            sql: sql.into(),
            statement: String::new(),
            params,
            result_formats: Vec::new(),
            max_rows: 0,
            handler,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Bind against an already prepared statement instead of the cache.
    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = statement.into();
        self
    }

    pub fn with_result_formats(mut self, formats: Vec<FormatCode>) -> Self {
        self.result_formats = formats;
        self
    }

    pub fn with_max_rows(mut self, max_rows: u32) -> Self {
        self.max_rows = max_rows;
        self
    }

    fn validate(&self) -> Result<()> {
        frontend::check_cstr("portal name", &self.name)?;
        frontend::check_cstr("statement name", &self.statement)?;
        frontend::check_cstr("query", &self.sql)?;
        if self.params.len() > i16::MAX as usize {
            return Err(Error::InvalidUsage(format!(
                "{} parameters exceed the protocol limit of {}",
                self.params.len(),
                i16::MAX
            )));
        }
        if self.result_formats.len() > i16::MAX as usize {
            return Err(Error::InvalidUsage("too many result formats".into()));
        }
        if i32::try_from(self.max_rows).is_err() {
            return Err(Error::InvalidUsage(format!(
                "row limit {} exceeds {}",
                self.max_rows,
                i32::MAX
            )));
        }
        if let Some(i) = self
            .params
            .iter()
            .position(|p| p.value.as_ref().is_some_and(|v| v.len() > i32::MAX as usize))
        {
            return Err(Error::InvalidUsage(format!("parameter ${} is too large", i + 1)));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Portal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Portal")
            .field("name", &self.name)
            .field("sql", &self.sql)
            .field("statement", &self.statement)
            .field("params", &self.params.len())
            .field("max_rows", &self.max_rows)
            .finish_non_exhaustive()
    }
}

/// Outgoing protocol message.
pub enum Request {
    /// StartupMessage; answered by the authentication exchange
    Startup {
        params: Vec<(String, String)>,
        auth: AuthResponse,
    },
    /// Password or SASL reply, continuing the same authentication exchange
    Password {
        message: PasswordMessage,
        auth: AuthResponse,
    },
    /// Simple query
    Query {
        sql: String,
        handler: Box<dyn ResultHandler>,
    },
    /// Parse (when needed), then Bind
    Parse(Portal),
    /// Bind, then Execute
    Bind(Portal),
    /// Describe + Execute of a bound portal, then Sync
    Execute {
        portal: String,
        max_rows: u32,
        handler: Box<dyn ResultHandler>,
    },
    Sync,
    Terminate,
}

impl Request {
    /// Simple query; `sql` may hold several statements.
    pub fn query(sql: impl Into<String>, handler: Box<dyn ResultHandler>) -> Self {
        Self::Query {
            sql: sql.into(),
            handler,
        }
    }

    /// Prepare (through the statement cache), bind and execute `portal`.
    pub fn prepared(portal: Portal) -> Self {
        Self::Parse(portal)
    }

    /// Bind and execute `portal` against its already prepared statement.
    pub fn bind(portal: Portal) -> Self {
        Self::Bind(portal)
    }

    /// Requests that must be answered before anything else is sent.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Startup { .. } | Self::Password { .. })
    }

    /// Serialize into `ctx.out`.
    ///
    /// A request that fails validation finishes its handler with the error
    /// and writes nothing. `Err` is returned only when the output stream
    /// itself failed, which is fatal to the connection.
    pub fn write(self, ctx: &mut WriteContext<'_>) -> Result<Written> {
        match self {
            Self::Startup { params, auth } => {
                let pairs: Vec<(&str, &str)> = params
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str()))
                    .collect();
                frontend::write_startup(ctx.out, &pairs)?;
                Ok(Written::respond(Response::Authentication(auth)))
            }
            Self::Password { message, auth } => {
                message.write(ctx.out)?;
                Ok(Written::respond(Response::Authentication(auth)))
            }
            Self::Query { sql, mut handler } => {
                if let Err(e) = frontend::check_cstr("query", &sql) {
                    handler.finish(Err(e));
                    return Ok(Written::default());
                }
                if let Err(e) = frontend::write_query(ctx.out, &sql) {
                    handler.finish(Err(Error::ConnectionBroken));
                    return Err(e);
                }
                Ok(Written {
                    response: Some(Response::Query(QueryResponse::new(handler))),
                    next: None,
                    ready_marker: true,
                })
            }
            Self::Parse(mut portal) => {
                if let Err(e) = portal.validate() {
                    portal.handler.finish(Err(e));
                    return Ok(Written::default());
                }
                let (is_new, name) = ctx.cache.get_or_assign(&portal.sql);
                portal.statement = name.to_string();
                let mut response = None;
                if is_new {
                    let encoded =
                        frontend::write_parse(ctx.out, &portal.statement, &portal.sql, &[]);
                    if let Err(e) = encoded {
                        portal.handler.finish(Err(Error::ConnectionBroken));
                        return Err(e);
                    }
                    response = Some(Response::Parse(ParseResponse::new(portal.sql.clone())));
                }
                Ok(Written {
                    response,
                    next: Some(Self::Bind(portal)),
                    ready_marker: false,
                })
            }
            Self::Bind(mut portal) => {
                if let Err(e) = portal.validate() {
                    portal.handler.finish(Err(e));
                    return Ok(Written::default());
                }
                let encoded = frontend::write_bind(
                    ctx.out,
                    &portal.name,
                    &portal.statement,
                    &portal.params,
                    &portal.result_formats,
                );
                if let Err(e) = encoded {
                    portal.handler.finish(Err(Error::ConnectionBroken));
                    return Err(e);
                }
                let Portal {
                    name,
                    max_rows,
                    handler,
                    ..
                } = portal;
                Ok(Written {
                    response: Some(Response::Bind),
                    next: Some(Self::Execute {
                        portal: name,
                        max_rows,
                        handler,
                    }),
                    ready_marker: false,
                })
            }
            Self::Execute {
                portal,
                max_rows,
                mut handler,
            } => {
                let encoded = frontend::write_describe_portal(ctx.out, &portal)
                    .and_then(|()| frontend::write_execute(ctx.out, &portal, max_rows));
                if let Err(e) = encoded {
                    handler.finish(Err(Error::ConnectionBroken));
                    return Err(e);
                }
                Ok(Written {
                    response: Some(Response::Execute(ExecuteResponse::new(handler))),
                    next: Some(Self::Sync),
                    ready_marker: false,
                })
            }
            Self::Sync => {
                frontend::write_sync(ctx.out)?;
                Ok(Written {
                    ready_marker: true,
                    ..Default::default()
                })
            }
            Self::Terminate => {
                frontend::write_terminate(ctx.out)?;
                Ok(Written::default())
            }
        }
    }

    /// Finish the request's handler with `err` without sending anything.
    pub fn fail(self, err: Error) {
        let kind = self.kind();
        match self {
            Self::Query { mut handler, .. } | Self::Execute { mut handler, .. } => {
                handler.finish(Err(err))
            }
            Self::Parse(mut portal) | Self::Bind(mut portal) => portal.handler.finish(Err(err)),
            Self::Startup { .. } | Self::Password { .. } | Self::Sync | Self::Terminate => {
                tracing::debug!("dropping unsent {}: {}", kind, err);
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Startup { .. } => "Startup",
            Self::Password { .. } => "Password",
            Self::Query { .. } => "Query",
            Self::Parse(_) => "Parse",
            Self::Bind(_) => "Bind",
            Self::Execute { .. } => "Execute",
            Self::Sync => "Sync",
            Self::Terminate => "Terminate",
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query { sql, .. } => f
                .debug_struct("Query")
                .field("sql", sql)
                .finish_non_exhaustive(),
            Self::Parse(portal) | Self::Bind(portal) => {
                f.debug_tuple(self.kind()).field(portal).finish()
            }
            Self::Execute { portal, max_rows, .. } => f
                .debug_struct("Execute")
                .field("portal", portal)
                .field("max_rows", max_rows)
                .finish_non_exhaustive(),
            _ => f.write_str(self.kind()),
        }
    }
}
