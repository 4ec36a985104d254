//! PostgreSQL wire protocol (version 3.0) encoding and decoding.
//!
//! # Structure
//!
//! - `frame`: splitting the incoming byte stream into backend frames
//! - `output`: the outgoing byte stream over pooled buffers
//! - `backend`: Server → Client messages (parsing)
//! - `frontend`: Client → Server messages (encoding)
//! - `codec`: decoding primitives
//! - `types`: common protocol types (FormatCode, Oid, TransactionStatus, Param)

pub mod backend;
pub mod codec;
pub mod frame;
pub mod frontend;
pub mod output;
pub mod types;

pub use frame::{Frame, MAX_FRAME_LEN, ParsedFrame, parse_frame};
pub use output::OutputStream;
pub use types::{FormatCode, Oid, Param, TransactionStatus};
