//! State shared between the engine and submitting threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crossbeam_queue::SegQueue;

use crate::error::{Error, Result};
use crate::request::Request;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// `connect` not called yet
    Disconnected = 0,
    /// Startup and authentication in progress
    Connecting = 1,
    /// Startup finished; requests flow
    Ready = 2,
    /// Terminate was sent
    Closed = 3,
    /// The connection broke
    Failed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::Ready,
            3 => Self::Closed,
            _ => Self::Failed,
        }
    }

    /// Returns true once the connection accepts no more requests.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Wakes the event loop when a request is submitted.
pub trait WriteSignal: Send + Sync {
    fn write_required(&self);
}

impl<F: Fn() + Send + Sync> WriteSignal for F {
    fn write_required(&self) {
        self()
    }
}

pub(crate) struct Shared {
    state: AtomicU8,
    pub(crate) queue: SegQueue<Request>,
    signal: Arc<dyn WriteSignal>,
}

impl Shared {
    pub(crate) fn new(signal: Arc<dyn WriteSignal>) -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            queue: SegQueue::new(),
            signal,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to`; false if the state was something else.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Fail every request still in the queue.
    pub(crate) fn drain(&self, err: impl Fn() -> Error) {
        while let Some(request) = self.queue.pop() {
            request.fail(err());
        }
    }
}

/// Thread-safe handle for handing requests to a connection.
///
/// Requests from one `Submitter` (or one thread) are written in submission
/// order. Submitting never touches the socket; it queues the request and
/// wakes the event loop.
#[derive(Clone)]
pub struct Submitter {
    pub(crate) shared: Arc<Shared>,
}

impl Submitter {
    /// Queue `request` for writing.
    ///
    /// A rejected request has its handler finished with the same error that
    /// is returned here.
    pub fn submit(&self, request: Request) -> Result<()> {
        match self.shared.state() {
            ConnectionState::Disconnected => {
                let err = || Error::InvalidUsage("submit before connect".into());
                request.fail(err());
                return Err(err());
            }
            ConnectionState::Closed | ConnectionState::Failed => {
                request.fail(Error::ConnectionBroken);
                return Err(Error::ConnectionBroken);
            }
            ConnectionState::Connecting | ConnectionState::Ready => {}
        }

        self.shared.queue.push(request);
        self.shared.signal.write_required();

        // The engine may have shut down between the check and the push
        if self.shared.state().is_terminal() {
            self.shared.drain(|| Error::ConnectionBroken);
        }
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }
}

impl std::fmt::Debug for Submitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submitter")
            .field("state", &self.shared.state())
            .field("queued", &self.shared.queue.len())
            .finish()
    }
}
