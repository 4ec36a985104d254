//! The protocol engine.
//!
//! [`NetworkConnection`] owns a non-blocking [`Transport`] and everything
//! needed to pipeline requests over it: the priority and submission queues,
//! the queue of responses awaiting frames, the blocking slot and the
//! outgoing buffers. It performs no waiting itself. A driver calls
//! [`handle_read`](NetworkConnection::handle_read) and
//! [`handle_write`](NetworkConnection::handle_write) when the socket is
//! ready or a request was submitted, and watches
//! [`interest`](NetworkConnection::interest) to know when writability
//! matters.

mod handshake;
mod shared;
mod transport;

pub use handshake::{Handshake, StartupHandshake};
pub use shared::{ConnectionState, Submitter, WriteSignal};
pub use transport::{Interest, Transport};

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use crate::buffer_pool::PooledBuffer;
use crate::error::{Error, ErrorFields, Result};
use crate::opts::Opts;
use crate::protocol::backend::{
    BackendKeyData, ErrorResponse, NoticeResponse, NotificationResponse, ParameterStatus,
    ReadyForQuery, is_connection_level, msg_type, tag_name,
};
use crate::protocol::frame::{Frame, HEADER_LEN, MAX_FRAME_LEN, announced_len, parse_frame};
use crate::protocol::output::OutputStream;
use crate::protocol::types::TransactionStatus;
use crate::request::{Request, WriteContext};
use crate::response::{ReadContext, Response};
use crate::statement_cache::PreparedStatementCache;

use shared::Shared;

/// Identifies an awaited response, for matching the blocking slot.
pub type ResponseId = u64;

/// Holds the blocking slot until the transport is connected, so no frame is
/// read and no request written before the handshake runs.
const GUARD: ResponseId = 0;

enum Awaiting {
    Response { id: ResponseId, response: Response },
    /// The server answers here with ReadyForQuery
    ReadyMarker,
}

/// Readiness-driven PostgreSQL protocol engine.
pub struct NetworkConnection<T> {
    io: Option<T>,
    shared: Arc<Shared>,
    handshake: Option<Box<dyn Handshake>>,

    priority: VecDeque<Request>,
    awaiting: VecDeque<Awaiting>,
    /// Response that asked for the next frame, bypassing `awaiting`
    immediate: Option<(ResponseId, Response)>,
    blocking: Option<ResponseId>,
    next_id: ResponseId,

    out: OutputStream,
    /// Buffer left behind by a short write
    incomplete: Option<PooledBuffer>,
    interest: Interest,

    read_buffer: Vec<u8>,
    /// Size the read buffer returns to after an oversized frame
    read_buffer_size: usize,
    filled: usize,

    cache: PreparedStatementCache,
    write_required: bool,
    terminated: bool,
    eof: bool,

    server_params: Vec<(String, String)>,
    backend_key: Option<(u32, u32)>,
    transaction_status: TransactionStatus,
    fatal: Option<ErrorFields>,
}

fn not_connected() -> Error {
    Error::InvalidUsage("transport is not connected".into())
}

impl<T: Transport> NetworkConnection<T> {
    /// Create a disconnected engine. `signal` is raised whenever a request
    /// is submitted through a [`Submitter`].
    pub fn new(opts: &Opts, signal: Arc<dyn WriteSignal>) -> Self {
        Self {
            io: None,
            shared: Arc::new(Shared::new(signal)),
            handshake: None,
            priority: VecDeque::new(),
            awaiting: VecDeque::new(),
            immediate: None,
            blocking: Some(GUARD),
            next_id: GUARD + 1,
            out: OutputStream::new(opts.pool()),
            incomplete: None,
            interest: Interest::Read,
            read_buffer: vec![0; opts.read_buffer_size.max(HEADER_LEN)],
            read_buffer_size: opts.read_buffer_size.max(HEADER_LEN),
            filled: 0,
            cache: PreparedStatementCache::new(),
            write_required: false,
            terminated: false,
            eof: false,
            server_params: Vec::new(),
            backend_key: None,
            transaction_status: TransactionStatus::Idle,
            fatal: None,
        }
    }

    /// Handle for queueing requests from any thread.
    pub fn submitter(&self) -> Submitter {
        Submitter {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Readiness to wait for. Readability always matters.
    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// Returns true when the connection has nothing more to do: it failed, or
    /// it was closed and the server hung up.
    pub fn is_finished(&self) -> bool {
        match self.shared.state() {
            ConnectionState::Failed => true,
            ConnectionState::Closed => self.eof,
            _ => false,
        }
    }

    pub fn transport(&self) -> Option<&T> {
        self.io.as_ref()
    }

    /// Run-time parameters reported by the server.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.server_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Process id and secret key for CancelRequest.
    pub fn backend_key(&self) -> Option<(u32, u32)> {
        self.backend_key
    }

    /// Transaction status from the latest ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Responses written and not yet satisfied.
    pub fn in_flight(&self) -> usize {
        let queued = self
            .awaiting
            .iter()
            .filter(|a| matches!(a, Awaiting::Response { .. }))
            .count();
        queued + usize::from(self.immediate.is_some())
    }

    /// Begin connecting. The transport is supplied to
    /// [`handle_connect`](Self::handle_connect) once it is established.
    pub fn connect(&mut self, handshake: Box<dyn Handshake>) -> Result<()> {
        if !self
            .shared
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            return Err(Error::InvalidUsage(
                "Connection already being established".into(),
            ));
        }
        self.handshake = Some(handshake);
        Ok(())
    }

    /// The transport connected: run the handshake and start writing.
    pub fn handle_connect(&mut self, io: T) -> Result<()> {
        let Some(handshake) = self.handshake.take() else {
            return Err(Error::InvalidUsage("handle_connect without connect".into()));
        };
        self.io = Some(io);

        let first = match handshake.finish_connect() {
            Ok(first) => first,
            Err(e) => {
                self.handle_exception(&e);
                return Err(e);
            }
        };
        if self.blocking == Some(GUARD) {
            self.blocking = None;
        }
        match first {
            Some(request) => self.priority.push_front(request),
            None => {
                if self
                    .shared
                    .transition(ConnectionState::Connecting, ConnectionState::Ready)
                {
                    tracing::info!("connection ready");
                }
            }
        }
        self.handle_write()
    }

    /// Serialize what may be sent and write buffered bytes.
    pub fn handle_write(&mut self) -> Result<()> {
        if self.io.is_none() {
            return Err(not_connected());
        }
        let result = self.write_inner();
        if let Err(e) = &result {
            self.handle_exception(e);
        }
        result
    }

    /// Read everything available and dispatch the frames.
    pub fn handle_read(&mut self) -> Result<()> {
        if self.io.is_none() {
            return Err(not_connected());
        }
        let result = self.read_inner();
        if let Err(e) = &result {
            self.handle_exception(e);
        }
        result
    }

    /// Fail the connection: every outstanding response and queued request
    /// is finished with an error and buffered output is discarded.
    pub fn handle_exception(&mut self, err: &Error) {
        tracing::error!("connection failed: {}", err);
        if self.shared.state() != ConnectionState::Closed {
            self.shared.set_state(ConnectionState::Failed);
        }
        self.fail_outstanding(Some(err));
    }

    /// A protocol error goes to the response in flight; everything else
    /// gets the terminal error.
    fn fail_outstanding(&mut self, cause: Option<&Error>) {
        let err = terminal_error(self.fatal.clone());
        let mut head = match cause {
            Some(Error::Protocol(msg)) => Some(Error::Protocol(msg.clone())),
            _ => None,
        };
        let mut ctx =
            ReadContext::new(&mut self.priority, &mut self.cache, &mut self.write_required);
        if let Some((_, response)) = self.immediate.take() {
            response.fail(head.take().unwrap_or_else(&err), &mut ctx);
        }
        for awaiting in self.awaiting.drain(..) {
            if let Awaiting::Response { response, .. } = awaiting {
                response.fail(head.take().unwrap_or_else(&err), &mut ctx);
            }
        }
        for request in self.priority.drain(..) {
            request.fail(err());
        }
        self.shared.drain(&err);

        self.blocking = None;
        self.handshake = None;
        self.out.clear();
        self.incomplete = None;
        self.interest = Interest::Read;
        self.filled = 0;
        self.write_required = false;
    }

    fn write_inner(&mut self) -> Result<()> {
        self.write_required = false;
        self.serialize_pending()?;
        self.flush_buffers()
    }

    fn serialize_pending(&mut self) -> Result<()> {
        while self.blocking.is_none() && !self.terminated && self.fatal.is_none() {
            let Some(request) = self.priority.pop_front().or_else(|| self.shared.queue.pop())
            else {
                break;
            };
            self.write_request(request)?;
        }
        Ok(())
    }

    fn write_request(&mut self, request: Request) -> Result<()> {
        let mut current = Some(request);
        while let Some(request) = current.take() {
            let blocking = request.is_blocking();
            let terminate = matches!(request, Request::Terminate);
            let written = request.write(&mut WriteContext {
                out: &mut self.out,
                cache: &mut self.cache,
            })?;

            if let Some(response) = written.response {
                let id = self.next_id;
                self.next_id += 1;
                if blocking {
                    self.blocking = Some(id);
                }
                self.awaiting.push_back(Awaiting::Response { id, response });
            }
            if written.ready_marker {
                self.awaiting.push_back(Awaiting::ReadyMarker);
            }
            if terminate {
                self.terminated = true;
                self.shared.set_state(ConnectionState::Closed);
                tracing::info!("closing connection");
            }
            if let Some(next) = written.next {
                if self.blocking.is_some() {
                    self.priority.push_front(next);
                } else {
                    current = Some(next);
                }
            }
        }
        Ok(())
    }

    fn flush_buffers(&mut self) -> Result<()> {
        let io = self.io.as_mut().ok_or_else(not_connected)?;

        if let Some(buffer) = self.incomplete.as_mut() {
            if !write_buffer(io, buffer)? {
                self.interest = Interest::ReadWrite;
                return Ok(());
            }
            self.incomplete = None;
        }

        let mut stalled = None;
        for (i, buffer) in self.out.written_buffers_mut().iter_mut().enumerate() {
            if !write_buffer(&mut *io, buffer)? {
                stalled = Some(i);
                break;
            }
        }

        match stalled {
            Some(i) => {
                // Written buffers go back to the pool; the stalled one waits
                let mut sent = self.out.remove_buffers(i + 1);
                self.incomplete = sent.pop();
                self.interest = Interest::ReadWrite;
            }
            None => {
                let count = self.out.written_buffers().len();
                self.out.remove_buffers(count);
                self.interest = Interest::Read;
            }
        }
        Ok(())
    }

    fn read_inner(&mut self) -> Result<()> {
        loop {
            if self.filled == self.read_buffer.len() {
                self.grow_read_buffer()?;
            }
            let io = self.io.as_mut().ok_or_else(not_connected)?;
            match io.try_read(&mut self.read_buffer[self.filled..]) {
                Ok(0) => return self.on_eof(),
                Ok(n) => {
                    self.filled += n;
                    self.process_frames()?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.shrink_read_buffer();
        if self.write_required {
            self.write_inner()?;
        }
        Ok(())
    }

    fn grow_read_buffer(&mut self) -> Result<()> {
        let limit = MAX_FRAME_LEN + 1;
        let current = self.read_buffer.len();
        let announced = announced_len(&self.read_buffer[..self.filled]).unwrap_or(0);
        let target = announced.max(current.saturating_mul(2)).min(limit);
        if target <= current {
            return Err(Error::Protocol(format!(
                "frame of {} bytes exceeds the read buffer limit",
                announced
            )));
        }
        self.read_buffer
            .try_reserve_exact(target - current)
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::OutOfMemory, e)))?;
        self.read_buffer.resize(target, 0);
        Ok(())
    }

    fn shrink_read_buffer(&mut self) {
        if self.filled == 0 && self.read_buffer.len() > self.read_buffer_size {
            tracing::trace!(
                "shrinking read buffer from {} to {} bytes",
                self.read_buffer.len(),
                self.read_buffer_size
            );
            self.read_buffer.truncate(self.read_buffer_size);
            self.read_buffer.shrink_to_fit();
        }
    }

    fn process_frames(&mut self) -> Result<()> {
        let mut buf = std::mem::take(&mut self.read_buffer);
        let mut offset = 0;
        let result = loop {
            match parse_frame(&buf, offset, self.filled) {
                Ok(Some(parsed)) => {
                    offset += parsed.consumed;
                    if let Err(e) = self.dispatch(parsed.frame) {
                        break Err(e);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        buf.copy_within(offset..self.filled, 0);
        self.filled -= offset;
        self.read_buffer = buf;
        result
    }

    fn on_eof(&mut self) -> Result<()> {
        self.eof = true;
        if self.terminated {
            tracing::info!("connection closed");
            self.fail_outstanding(None);
            return Ok(());
        }
        Err(match &self.fatal {
            Some(fields) => Error::Server(fields.clone()),
            None => Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            )),
        })
    }

    fn release_blocking(&mut self, id: ResponseId) {
        if self.blocking == Some(id) {
            self.blocking = None;
            self.write_required = true;
        }
    }

    fn dispatch(&mut self, frame: Frame<'_>) -> Result<()> {
        if self.blocking == Some(GUARD) {
            return Err(Error::Protocol(format!(
                "{} received before the connection was established",
                tag_name(frame.tag)
            )));
        }
        tracing::trace!("received {} ({} bytes)", tag_name(frame.tag), frame.payload.len());

        if !is_connection_level(frame.tag) {
            return self.route(frame);
        }
        match frame.tag {
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(frame.payload)?;
                tracing::debug!("server parameter {} = {}", param.name, param.value);
                match self.server_params.iter_mut().find(|(n, _)| n == param.name) {
                    Some((_, value)) => *value = param.value.to_string(),
                    None => self
                        .server_params
                        .push((param.name.to_string(), param.value.to_string())),
                }
                Ok(())
            }
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(frame.payload)?;
                tracing::debug!("backend process id {}", key.process_id());
                self.backend_key = Some((key.process_id(), key.secret_key()));
                Ok(())
            }
            msg_type::READY_FOR_QUERY => self.on_ready_for_query(frame.payload),
            msg_type::ERROR_RESPONSE => self.on_error_response(frame.payload),
            msg_type::NOTICE_RESPONSE => {
                let notice = NoticeResponse::parse(frame.payload)?;
                tracing::warn!("server notice: {}", notice.fields);
                Ok(())
            }
            _ => {
                let notification = NotificationResponse::parse(frame.payload)?;
                tracing::info!(
                    "notification on {} from {}: {}",
                    notification.channel,
                    notification.pid,
                    notification.payload
                );
                Ok(())
            }
        }
    }

    fn route(&mut self, frame: Frame<'_>) -> Result<()> {
        let (id, response) = match self.immediate.take() {
            Some(active) => active,
            None => match self.awaiting.pop_front() {
                Some(Awaiting::Response { id, response }) => (id, response),
                Some(Awaiting::ReadyMarker) => {
                    self.awaiting.push_front(Awaiting::ReadyMarker);
                    return Err(Error::Protocol(format!(
                        "unexpected {} while awaiting ReadyForQuery",
                        tag_name(frame.tag)
                    )));
                }
                None => {
                    return Err(Error::Protocol(format!(
                        "unexpected {} with no request in flight",
                        tag_name(frame.tag)
                    )));
                }
            },
        };

        let mut ctx =
            ReadContext::new(&mut self.priority, &mut self.cache, &mut self.write_required);
        match response.read(frame, &mut ctx)? {
            Some(next) => self.immediate = Some((id, next)),
            None => self.release_blocking(id),
        }
        Ok(())
    }

    fn on_ready_for_query(&mut self, payload: &[u8]) -> Result<()> {
        self.transaction_status = ReadyForQuery::parse(payload)?.transaction_status()?;

        if let Some((id, response)) = self.immediate.take() {
            let mut ctx =
                ReadContext::new(&mut self.priority, &mut self.cache, &mut self.write_required);
            response.finish(&mut ctx);
            self.release_blocking(id);
        }

        if self
            .shared
            .transition(ConnectionState::Connecting, ConnectionState::Ready)
        {
            tracing::info!("connection ready");
            self.write_required = true;
            return Ok(());
        }

        match self.awaiting.pop_front() {
            Some(Awaiting::ReadyMarker) => Ok(()),
            Some(entry @ Awaiting::Response { .. }) => {
                let kind = match &entry {
                    Awaiting::Response { response, .. } => response.kind(),
                    Awaiting::ReadyMarker => "ReadyMarker",
                };
                self.awaiting.push_front(entry);
                Err(Error::Protocol(format!(
                    "ReadyForQuery while a {} response is pending",
                    kind
                )))
            }
            None => {
                tracing::warn!("ReadyForQuery with no request in flight");
                Ok(())
            }
        }
    }

    /// Fail the active response and everything awaiting up to the next
    /// ReadyForQuery; the server skips the rest of the cycle after an error.
    fn on_error_response(&mut self, payload: &[u8]) -> Result<()> {
        let fields = ErrorResponse::parse(payload)?.fields;
        tracing::warn!("server error: {}", fields);
        if fields.is_fatal() {
            self.fatal = Some(fields.clone());
        }

        if let Some((id, response)) = self.immediate.take() {
            let mut ctx =
                ReadContext::new(&mut self.priority, &mut self.cache, &mut self.write_required);
            response.fail(Error::Server(fields.clone()), &mut ctx);
            self.release_blocking(id);
        }
        while matches!(self.awaiting.front(), Some(Awaiting::Response { .. })) {
            let Some(Awaiting::Response { id, response }) = self.awaiting.pop_front() else {
                break;
            };
            let mut ctx =
                ReadContext::new(&mut self.priority, &mut self.cache, &mut self.write_required);
            response.fail(Error::Server(fields.clone()), &mut ctx);
            self.release_blocking(id);
        }
        Ok(())
    }
}

/// Error handed to outstanding work when the connection ends.
fn terminal_error(fatal: Option<ErrorFields>) -> impl Fn() -> Error {
    move || match &fatal {
        Some(fields) => Error::Server(fields.clone()),
        None => Error::ConnectionBroken,
    }
}

/// Write what remains of `buffer`; false when the socket stopped accepting.
fn write_buffer<T: Transport>(io: &mut T, buffer: &mut PooledBuffer) -> Result<bool> {
    while buffer.has_remaining() {
        match io.try_write(buffer.unflushed()) {
            Ok(0) => return Err(Error::Io(io::ErrorKind::WriteZero.into())),
            Ok(n) => buffer.advance(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

impl<T> std::fmt::Debug for NetworkConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkConnection")
            .field("state", &self.shared.state())
            .field("awaiting", &self.awaiting.len())
            .field("blocking", &self.blocking)
            .field("interest", &self.interest)
            .field("pending_bytes", &self.out.pending())
            .finish_non_exhaustive()
    }
}
