//! Error taxonomy shared by the wire codec, the message decoder and the
//! trace decoder.

use thiserror::Error;

/// Everything that can go wrong while parsing, encoding or replaying a
/// Nexus-RV trace.
#[derive(Error, Debug)]
pub enum Error {
    /// A bounded allocation (currently only the return-address stack's
    /// lazy growth) could not be satisfied.
    #[error("out of memory")]
    NoMem,

    /// The caller-provided buffer cannot hold even a single maximal
    /// message.
    #[error("buffer too small (must be at least {min} bytes)")]
    BufferTooSmall {
        /// The minimum required buffer size.
        min: usize,
    },

    /// A framing byte carried the reserved MSEO value `2`.
    #[error("bad MSEO framing byte")]
    StreamBadMseo,

    /// The stream ended mid-message.
    #[error("stream truncated mid-message")]
    StreamTruncate,

    /// The underlying reader/writer failed.
    #[error("stream I/O failed")]
    StreamIo(#[source] std::io::Error),

    /// A message's fields are internally inconsistent (e.g. reserved
    /// MSEO, or extra bytes after `Idle`).
    #[error("invalid message: {0}")]
    MsgInvalid(&'static str),

    /// A required field was absent from the wire (or from the text
    /// representation).
    #[error("missing required field: {0}")]
    MsgMissingField(&'static str),

    /// The TCODE is not one this library understands, or the message
    /// uses a combination of fields it does not support.
    #[error("unsupported message (tcode={tcode})")]
    MsgUnsupported {
        /// The offending TCODE.
        tcode: u8,
    },

    /// The trace has been fully consumed.
    #[error("end of trace")]
    TraceEof,

    /// An operation was attempted before the first sync message.
    #[error("trace decoder is not synchronized")]
    TraceNotSynced,

    /// More history elements are pending than the decoder can track.
    #[error("history array overflow")]
    TraceHistOverflow,

    /// The pending I-CNT credit would overflow its counter.
    #[error("I-CNT overflow")]
    TraceIcntOverflow,

    /// `pop_ret` was called with an empty return-address stack.
    #[error("return-address stack is empty")]
    TraceRetstackEmpty,

    /// The caller asked for an event kind that does not match what is
    /// actually pending (e.g. `next_indirect` with a direct branch
    /// pending).
    #[error("trace decoder state mismatch: {0}")]
    TraceMismatch(&'static str),

    /// The hardware-configuration string could not be parsed.
    #[error("invalid hardware configuration string: {0}")]
    HwCfgInvalid(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::StreamIo(e)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
