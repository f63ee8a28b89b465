//! The streaming, buffered message decoder: applies the wire codec in
//! [`crate::wire`] to a [`std::io::Read`] source, refilling and rolling
//! its internal buffer as needed and supporting rewind/offset queries
//! the way the source library's `nexusrv_msg_decoder` does.

use std::io::Read;

use crate::error::Error;
use crate::hwconfig::{HwConfig, MSG_MAX_BYTES};
use crate::message::Message;
use crate::wire::decode_msg;

/// A buffered, streaming decoder over a byte source.
///
/// Unlike the source library (which has the caller pass in a raw
/// buffer), this decoder owns its working buffer — the borrow checker
/// already gives us the exclusivity the C API enforced by convention.
pub struct MsgDecoder<R> {
    cfg: HwConfig,
    reader: R,
    buf: Vec<u8>,
    filled: usize,
    pos: usize,
    nread: usize,
    lastmsg_len: usize,
    src_filter: Option<u32>,
}

impl<R: Read> MsgDecoder<R> {
    /// Create a decoder reading from `reader`, with an internal buffer
    /// of `bufsz` bytes (must be at least [`MSG_MAX_BYTES`]) and an
    /// optional `SRC` filter: when set, messages whose `src` differs
    /// are silently skipped (their bytes still count toward `offset`).
    pub fn new(
        cfg: HwConfig,
        reader: R,
        bufsz: usize,
        src_filter: Option<u32>,
    ) -> Result<Self, Error> {
        if bufsz < MSG_MAX_BYTES {
            return Err(Error::BufferTooSmall { min: MSG_MAX_BYTES });
        }
        Ok(MsgDecoder {
            cfg,
            reader,
            buf: vec![0u8; bufsz],
            filled: 0,
            pos: 0,
            nread: 0,
            lastmsg_len: 0,
            src_filter,
        })
    }

    /// Borrow the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Mutably borrow the underlying reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Decode and return the next message, or `Ok(None)` on a clean
    /// end of stream (no partial message pending).
    pub fn next(&mut self) -> Result<Option<Message>, Error> {
        loop {
            if self.pos < self.filled {
                match decode_msg(&self.cfg, &self.buf[self.pos..self.filled]) {
                    Ok((msg, n)) => {
                        self.pos += n;
                        if let Some(filter) = self.src_filter {
                            if !msg.idle() && msg.src != filter {
                                continue;
                            }
                        }
                        self.lastmsg_len = n;
                        return Ok(Some(msg));
                    }
                    Err(Error::StreamTruncate) => { /* need more bytes, fall through */ }
                    Err(e) => return Err(e),
                }
            }
            if self.pos > 0 {
                self.buf.copy_within(self.pos..self.filled, 0);
                self.filled -= self.pos;
                self.nread += self.pos;
                self.pos = 0;
            }
            if self.filled == self.buf.len() {
                return Err(Error::BufferTooSmall {
                    min: self.buf.len() + 1,
                });
            }
            let n = self.reader.read(&mut self.buf[self.filled..])?;
            if n == 0 {
                return if self.filled == 0 {
                    Ok(None)
                } else {
                    Err(Error::StreamTruncate)
                };
            }
            self.filled += n;
        }
    }

    /// The raw bytes of the most recently returned message.
    pub fn lastmsg(&self) -> &[u8] {
        &self.buf[self.pos - self.lastmsg_len..self.pos]
    }

    /// Undo the last successful `next()`. Idempotent: calling it twice
    /// in a row has the same effect as calling it once.
    pub fn rewind_last(&mut self) {
        self.pos -= self.lastmsg_len;
        self.lastmsg_len = 0;
    }

    /// The absolute byte offset, from the start of the stream, of the
    /// most recently returned message.
    pub fn offset(&self) -> usize {
        self.nread + self.pos - self.lastmsg_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hwconfig::HwConfig;
    use crate::message::{Message, Tcode};
    use crate::wire::encode_msg;

    fn encode_all(cfg: &HwConfig, msgs: &[Message]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; MSG_MAX_BYTES];
        for m in msgs {
            let n = encode_msg(cfg, m, &mut buf).unwrap();
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn decodes_sequence_and_hits_clean_eof() {
        let cfg = HwConfig::default();
        let mut msg = Message::new(Tcode::DirectBranch);
        msg.icnt = 3;
        let bytes = encode_all(&cfg, &[msg.clone(), Message::new(Tcode::Idle)]);
        let mut dec = MsgDecoder::new(cfg, &bytes[..], MSG_MAX_BYTES, None).unwrap();
        let a = dec.next().unwrap().unwrap();
        assert_eq!(a.icnt, 3);
        let b = dec.next().unwrap().unwrap();
        assert!(b.idle());
        assert!(dec.next().unwrap().is_none());
    }

    #[test]
    fn rewind_last_is_idempotent() {
        let cfg = HwConfig::default();
        let mut msg = Message::new(Tcode::DirectBranch);
        msg.icnt = 9;
        let bytes = encode_all(&cfg, &[msg]);
        let mut dec = MsgDecoder::new(cfg, &bytes[..], MSG_MAX_BYTES, None).unwrap();
        let first = dec.next().unwrap().unwrap();
        dec.rewind_last();
        dec.rewind_last();
        let second = dec.next().unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn src_filter_skips_other_sources() {
        let cfg = HwConfig {
            src_bits: 4,
            ..HwConfig::default()
        };
        let mut a = Message::new(Tcode::DirectBranch);
        a.src = 1;
        a.icnt = 1;
        let mut b = Message::new(Tcode::DirectBranch);
        b.src = 2;
        b.icnt = 2;
        let bytes = encode_all(&cfg, &[a, b]);
        let mut dec = MsgDecoder::new(cfg, &bytes[..], MSG_MAX_BYTES, Some(2)).unwrap();
        let only = dec.next().unwrap().unwrap();
        assert_eq!(only.src, 2);
        assert!(dec.next().unwrap().is_none());
    }

    #[test]
    fn buffer_size_independent_of_message_count() {
        let cfg = HwConfig::default();
        let msgs: Vec<Message> = (0..20)
            .map(|i| {
                let mut m = Message::new(Tcode::DirectBranch);
                m.icnt = i + 1;
                m
            })
            .collect();
        let bytes = encode_all(&cfg, &msgs);
        for bufsz in [MSG_MAX_BYTES, MSG_MAX_BYTES * 2, 4096] {
            let mut dec = MsgDecoder::new(cfg, &bytes[..], bufsz, None).unwrap();
            let mut icnts = Vec::new();
            while let Some(m) = dec.next().unwrap() {
                icnts.push(m.icnt);
            }
            assert_eq!(icnts, (1..=20).collect::<Vec<_>>());
        }
    }

    #[test]
    fn truncated_trailing_message_is_an_error() {
        let cfg = HwConfig::default();
        let mut msg = Message::new(Tcode::DirectBranch);
        msg.icnt = 3;
        let mut bytes = encode_all(&cfg, &[msg]);
        bytes.truncate(bytes.len() - 1);
        let mut dec = MsgDecoder::new(cfg, &bytes[..], MSG_MAX_BYTES, None).unwrap();
        assert!(matches!(dec.next(), Err(Error::StreamTruncate)));
    }
}
