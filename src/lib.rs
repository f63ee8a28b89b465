//! A sans-I/O library for decoding and encoding the Nexus-RV hardware
//! trace protocol: the MDO/MSEO wire codec, a buffered streaming
//! message decoder, and a trace decoder that folds messages into
//! instruction-retirement events.
//!
//! Common abbreviations:
//!
//! - TCODE: trace message type code;
//! - MDO/MSEO: message data/end-of-stream-marker lanes of the wire
//!   format;
//! - ICNT: retired-instruction count;
//! - TNT: taken/not-taken (branch direction history bit);
//! - HTM: history trace mode;
//! - VAO: virtual-address optimization.

pub mod decoder;
pub mod error;
pub mod histarray;
pub mod hwconfig;
pub mod message;
pub mod retstack;
pub mod text;
pub mod trace;
pub mod wire;

pub use decoder::MsgDecoder;
pub use error::{Error, Result};
pub use histarray::{HistArray, HistElement};
pub use hwconfig::{HwConfig, MSG_MAX_BYTES};
pub use message::{Message, Tcode, HREPEAT_MAX, ICNT_MAX};
pub use retstack::ReturnStack;
pub use trace::{ErrorEvent, Event, IndirectEvent, OwnershipInfo, StopEvent, SyncEvent, TraceDecoder};
