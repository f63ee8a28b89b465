//! The MDO/MSEO bit-packed wire codec: the part of this crate that has
//! no analogue in an off-the-shelf crate, so it is hand-rolled exactly
//! the way the reference hardware spec describes it (and the way the
//! source library implements it), rather than forced through
//! `bitvec`/`bitmatch`, which assume compile-time-fixed bit layouts.

use crate::error::Error;
use crate::hwconfig::HwConfig;
use crate::message::{Message, Tcode};

const MDO_BITS: u32 = 6;

fn get_mdo(b: u8) -> u8 {
    b >> 2
}

fn get_mseo(b: u8) -> u8 {
    b & 0x3
}

/// Scan forward for the first end-of-message boundary (a byte whose
/// MSEO is `3`). Returns the offset *after* that byte, or `None` if the
/// buffer contains no complete message.
pub fn sync_forward(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| get_mseo(b) == 3).map(|i| i + 1)
}

/// Scan backward for the start of the last complete message: the
/// offset right after the *previous* EOM byte (or 0 if there is none)
/// preceding the final EOM byte in `buf`. Returns `None` if `buf`
/// contains no EOM byte at all.
pub fn sync_backward(buf: &[u8]) -> Option<usize> {
    let last_eom = buf.iter().rposition(|&b| get_mseo(b) == 3)?;
    let prev_eom = buf[..last_eom].iter().rposition(|&b| get_mseo(b) == 3);
    Some(prev_eom.map_or(0, |i| i + 1))
}

fn unpack_bits(group: &[u8], bit_offset: usize, bits: u32) -> u64 {
    let mut value = 0u64;
    let mut shift = 0u32;
    let mut bit_offset = bit_offset;
    let mut bits_left = bits;
    while bits_left > 0 {
        let byte = bit_offset / MDO_BITS as usize;
        let off = (bit_offset % MDO_BITS as usize) as u32;
        let avail = MDO_BITS - off;
        let take = avail.min(bits_left);
        let mdo = get_mdo(group[byte]) as u64;
        let mask = (1u64 << take) - 1;
        value |= ((mdo >> off) & mask) << shift;
        shift += take;
        bit_offset += take as usize;
        bits_left -= take;
    }
    value
}

/// Decode-side cursor: walks the input one "field run" at a time, a
/// run being the bytes up to (and including) the next byte whose MSEO
/// is nonzero.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    group_len: usize,
    bit_offset: usize,
    eom: bool,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor {
            buf,
            pos: 0,
            group_len: 0,
            bit_offset: 0,
            eom: false,
        }
    }

    fn next_group(&mut self) -> Result<(), Error> {
        self.pos += self.group_len;
        let mut i = 0usize;
        loop {
            let idx = self.pos + i;
            if idx >= self.buf.len() {
                return Err(Error::StreamTruncate);
            }
            let mseo = get_mseo(self.buf[idx]);
            i += 1;
            if mseo == 2 {
                return Err(Error::StreamBadMseo);
            }
            if mseo != 0 {
                self.eom = mseo == 3;
                self.group_len = i;
                self.bit_offset = 0;
                return Ok(());
            }
        }
    }

    fn group(&self) -> &[u8] {
        &self.buf[self.pos..self.pos + self.group_len]
    }

    fn bits_left(&self) -> u32 {
        (self.group_len * MDO_BITS as usize - self.bit_offset) as u32
    }

    fn unpack_fixed(&mut self, bits: u32, name: &'static str) -> Result<u64, Error> {
        if bits == 0 {
            return Ok(0);
        }
        if bits > self.bits_left() {
            return Err(Error::MsgMissingField(name));
        }
        let v = unpack_bits(self.group(), self.bit_offset, bits);
        self.bit_offset += bits as usize;
        Ok(v)
    }

    fn unpack_var(&mut self, required: bool, name: &'static str) -> Result<u64, Error> {
        let bits = self.bits_left();
        if required && bits == 0 {
            return Err(Error::MsgMissingField(name));
        }
        let v = if bits == 0 {
            0
        } else {
            unpack_bits(self.group(), self.bit_offset, bits)
        };
        self.bit_offset += bits as usize;
        Ok(v)
    }

    /// A VAO field: like `unpack_var` but sign-extends from the
    /// top bit of the (byte-aligned) run.
    fn unpack_xaddr_vao(&mut self, name: &'static str) -> Result<u64, Error> {
        let bits = self.bits_left();
        if bits == 0 {
            return Err(Error::MsgMissingField(name));
        }
        let raw = unpack_bits(self.group(), self.bit_offset, bits);
        self.bit_offset += bits as usize;
        Ok(sign_extend(raw, bits))
    }

    fn consumed(&self) -> usize {
        self.pos + self.group_len
    }
}

pub(crate) fn sign_extend(value: u64, bits: u32) -> u64 {
    if bits == 0 || bits >= 64 {
        return value;
    }
    let sign_bit = 1u64 << (bits - 1);
    (value ^ sign_bit).wrapping_sub(sign_bit)
}

fn var_bits_needed(value: u64, required: bool) -> u32 {
    if value == 0 {
        if required {
            1
        } else {
            0
        }
    } else {
        64 - value.leading_zeros()
    }
}

fn vao_bits_needed(value: u64) -> u32 {
    // Minimal two's-complement width (including the sign bit), then
    // rounded up to a whole number of MDO lanes so the decode side
    // can sign-extend from the top of the byte-aligned run.
    let signed = value as i64;
    let natural = if signed >= 0 {
        (64 - value.leading_zeros()) + 1
    } else {
        let inv = !value;
        (64 - inv.leading_zeros()) + 1
    }
    .max(1);
    ((natural + MDO_BITS - 1) / MDO_BITS) * MDO_BITS
}

struct Encoder<'a> {
    buf: &'a mut [u8],
    bit_offset: usize,
}

impl<'a> Encoder<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Encoder { buf, bit_offset: 0 }
    }

    fn pack_fixed(&mut self, bits: u32, value: u64) -> Result<(), Error> {
        if bits == 0 {
            return Ok(());
        }
        let limit_bits = self.buf.len() * MDO_BITS as usize;
        if self.bit_offset + bits as usize > limit_bits {
            return Err(Error::BufferTooSmall {
                min: (self.bit_offset + bits as usize + MDO_BITS as usize - 1)
                    / MDO_BITS as usize,
            });
        }
        let mut value = if bits >= 64 {
            value
        } else {
            value & ((1u64 << bits) - 1)
        };
        let mut bit_offset = self.bit_offset;
        let mut bits_left = bits;
        loop {
            let byte = bit_offset / MDO_BITS as usize;
            let shift = (bit_offset % MDO_BITS as usize) as u32;
            let available = MDO_BITS - shift;
            let mut mdo = get_mdo(self.buf[byte]);
            let mut mseo = get_mseo(self.buf[byte]);
            if shift == 0 {
                mdo = 0;
                mseo = 0;
            }
            mdo |= ((value << shift) & 0x3f) as u8;
            self.buf[byte] = (mdo << 2) | mseo;
            if available > bits_left {
                break;
            }
            value >>= available;
            bits_left -= available;
            bit_offset += available as usize;
        }
        self.bit_offset += bits as usize;
        Ok(())
    }

    fn end_field(&mut self, mseo: u8) {
        self.bit_offset += MDO_BITS as usize - 1;
        let byte = self.bit_offset / MDO_BITS as usize;
        self.bit_offset = byte * MDO_BITS as usize;
        let b = byte - 1;
        let mdo = get_mdo(self.buf[b]);
        self.buf[b] = (mdo << 2) | mseo;
    }

    fn pack_var(&mut self, value: u64, required: bool, mseo: u8) -> Result<(), Error> {
        let bits = var_bits_needed(value, required);
        self.pack_fixed(bits, value)?;
        self.end_field(mseo);
        Ok(())
    }

    fn pack_vao(&mut self, value: u64, mseo: u8) -> Result<(), Error> {
        let bits = vao_bits_needed(value);
        self.pack_fixed(bits, value)?;
        self.end_field(mseo);
        Ok(())
    }

    fn consumed(&self) -> usize {
        (self.bit_offset + MDO_BITS as usize - 1) / MDO_BITS as usize
    }
}

/// MSEO to use for a variable field that is followed by more fields in
/// this message (`1`, "end of field") versus one that ends the message
/// (`3`, "end of message").
fn mseo_for(last: bool) -> u8 {
    if last {
        3
    } else {
        1
    }
}

/// Encode `msg` into `out`, returning the number of bytes written.
pub fn encode_msg(cfg: &HwConfig, msg: &Message, out: &mut [u8]) -> Result<usize, Error> {
    let tcode = msg
        .tcode_known()
        .ok_or(Error::MsgUnsupported { tcode: msg.tcode })?;
    let mut enc = Encoder::new(out);
    enc.pack_fixed(6, msg.tcode as u64)?;

    if tcode == Tcode::Idle {
        enc.end_field(3);
        return Ok(enc.consumed());
    }

    if cfg.src_bits > 0 {
        enc.pack_fixed(cfg.src_bits as u32, msg.src as u64)?;
    }

    let has_ts = cfg.ts_bits > 0 && msg.has_timestamp;
    if msg.is_sync() && cfg.ts_bits > 0 && !msg.has_timestamp {
        return Err(Error::MsgMissingField("timestamp"));
    }

    match tcode {
        Tcode::Ownership => {
            enc.pack_fixed(2, msg.ownership_fmt as u64)?;
            enc.pack_fixed(2, msg.ownership_prv as u64)?;
            enc.pack_fixed(1, msg.ownership_v as u64)?;
            enc.pack_var(msg.context, false, mseo_for(!has_ts))?;
        }
        Tcode::DirectBranch => {
            enc.pack_var(msg.icnt as u64, true, mseo_for(!has_ts))?;
        }
        Tcode::IndirectBranch => {
            enc.pack_fixed(2, msg.branch_type as u64)?;
            enc.pack_var(msg.icnt as u64, true, 1)?;
            if cfg.vao {
                enc.pack_vao(msg.xaddr, mseo_for(!has_ts))?;
            } else {
                enc.pack_var(msg.xaddr, true, mseo_for(!has_ts))?;
            }
        }
        Tcode::DirectBranchSync | Tcode::ProgTraceSync => {
            enc.pack_fixed(4, msg.sync_type as u64)?;
            enc.pack_var(msg.icnt as u64, true, 1)?;
            if cfg.vao {
                enc.pack_vao(msg.xaddr, mseo_for(!has_ts))?;
            } else {
                enc.pack_var(msg.xaddr, true, mseo_for(!has_ts))?;
            }
        }
        Tcode::IndirectBranchSync => {
            enc.pack_fixed(4, msg.sync_type as u64)?;
            enc.pack_fixed(2, msg.branch_type as u64)?;
            enc.pack_var(msg.icnt as u64, true, 1)?;
            if cfg.vao {
                enc.pack_vao(msg.xaddr, mseo_for(!has_ts))?;
            } else {
                enc.pack_var(msg.xaddr, true, mseo_for(!has_ts))?;
            }
        }
        Tcode::IndirectBranchHist => {
            enc.pack_fixed(2, msg.branch_type as u64)?;
            enc.pack_var(msg.icnt as u64, true, 1)?;
            enc.pack_var(msg.xaddr, true, 1)?;
            enc.pack_var(msg.hist as u64, true, mseo_for(!has_ts))?;
        }
        Tcode::IndirectBranchHistSync => {
            enc.pack_fixed(4, msg.sync_type as u64)?;
            enc.pack_fixed(2, msg.branch_type as u64)?;
            enc.pack_var(msg.icnt as u64, true, 1)?;
            enc.pack_var(msg.xaddr, true, 1)?;
            enc.pack_var(msg.hist as u64, true, mseo_for(!has_ts))?;
        }
        Tcode::Error => {
            enc.pack_fixed(4, msg.error_type as u64)?;
            enc.pack_var(msg.error_code as u64, false, mseo_for(!has_ts))?;
        }
        Tcode::ResourceFull => {
            enc.pack_fixed(4, msg.res_code as u64)?;
            match msg.res_code {
                0 => enc.pack_var(msg.icnt as u64, true, mseo_for(!has_ts))?,
                1 => enc.pack_var(msg.hist as u64, true, mseo_for(!has_ts))?,
                2 => {
                    enc.pack_var(msg.hist as u64, true, 1)?;
                    enc.pack_var(msg.hrepeat as u64, true, mseo_for(!has_ts))?;
                }
                _ => enc.pack_var(msg.res_data as u64, false, mseo_for(!has_ts))?,
            }
        }
        Tcode::RepeatBranch => {
            enc.pack_var(msg.hrepeat as u64, true, mseo_for(!has_ts))?;
        }
        Tcode::ProgTraceCorrelation => {
            if msg.cdf > 1 {
                return Err(Error::MsgUnsupported { tcode: msg.tcode });
            }
            enc.pack_fixed(4, msg.stop_code as u64)?;
            enc.pack_fixed(2, msg.cdf as u64)?;
            if msg.cdf == 1 {
                enc.pack_var(msg.icnt as u64, true, 1)?;
                enc.pack_var(msg.hist as u64, true, mseo_for(!has_ts))?;
            } else {
                enc.pack_var(msg.icnt as u64, true, mseo_for(!has_ts))?;
            }
        }
        Tcode::Idle => unreachable!(),
    }

    if has_ts {
        enc.pack_var(msg.timestamp, true, 3)?;
    }
    Ok(enc.consumed())
}

/// Decode one message starting at the front of `buf`. Returns the
/// decoded message and the number of bytes consumed.
pub fn decode_msg(cfg: &HwConfig, buf: &[u8]) -> Result<(Message, usize), Error> {
    let mut cur = Cursor::new(buf);
    cur.next_group()?;
    let mut msg = Message::default();
    msg.tcode = cur.unpack_fixed(6, "tcode")? as u8;

    let tcode = match msg.tcode_known() {
        Some(t) => t,
        None => {
            // Unrecognized tcode: we don't know this message's field
            // layout, but MSEO framing still tells us where it ends.
            // Drain to EOM and hand back a bare tcode-only message so
            // the caller can skip over it (or print it) without
            // getting stuck re-decoding the same bytes.
            while !cur.eom {
                cur.next_group()?;
            }
            return Ok((msg, cur.consumed()));
        }
    };

    if tcode == Tcode::Idle {
        if !cur.eom {
            return Err(Error::MsgInvalid("Idle must be a single byte"));
        }
        return Ok((msg, cur.consumed()));
    }

    if cfg.src_bits > 0 {
        msg.src = cur.unpack_fixed(cfg.src_bits as u32, "src")? as u32;
    }

    match tcode {
        Tcode::Ownership => {
            msg.ownership_fmt = cur.unpack_fixed(2, "format")? as u8;
            msg.ownership_prv = cur.unpack_fixed(2, "prv")? as u8;
            msg.ownership_v = cur.unpack_fixed(1, "v")? as u8;
            msg.context = cur.unpack_var(false, "context")?;
        }
        Tcode::DirectBranch => {
            msg.icnt = cur.unpack_var(true, "icnt")? as u32;
        }
        Tcode::IndirectBranch => {
            msg.branch_type = cur.unpack_fixed(2, "btype")? as u8;
            msg.icnt = cur.unpack_var(true, "icnt")? as u32;
            cur.next_group()?;
            msg.xaddr = if cfg.vao {
                cur.unpack_xaddr_vao("xaddr")?
            } else {
                cur.unpack_var(true, "xaddr")?
            };
        }
        Tcode::DirectBranchSync | Tcode::ProgTraceSync => {
            msg.sync_type = cur.unpack_fixed(4, "sync")? as u8;
            msg.icnt = cur.unpack_var(true, "icnt")? as u32;
            cur.next_group()?;
            msg.xaddr = if cfg.vao {
                cur.unpack_xaddr_vao("xaddr")?
            } else {
                cur.unpack_var(true, "xaddr")?
            };
        }
        Tcode::IndirectBranchSync => {
            msg.sync_type = cur.unpack_fixed(4, "sync")? as u8;
            msg.branch_type = cur.unpack_fixed(2, "btype")? as u8;
            msg.icnt = cur.unpack_var(true, "icnt")? as u32;
            cur.next_group()?;
            msg.xaddr = if cfg.vao {
                cur.unpack_xaddr_vao("xaddr")?
            } else {
                cur.unpack_var(true, "xaddr")?
            };
        }
        Tcode::IndirectBranchHist => {
            msg.branch_type = cur.unpack_fixed(2, "btype")? as u8;
            msg.icnt = cur.unpack_var(true, "icnt")? as u32;
            cur.next_group()?;
            msg.xaddr = cur.unpack_var(true, "xaddr")?;
            cur.next_group()?;
            msg.hist = cur.unpack_var(true, "hist")? as u32;
        }
        Tcode::IndirectBranchHistSync => {
            msg.sync_type = cur.unpack_fixed(4, "sync")? as u8;
            msg.branch_type = cur.unpack_fixed(2, "btype")? as u8;
            msg.icnt = cur.unpack_var(true, "icnt")? as u32;
            cur.next_group()?;
            msg.xaddr = cur.unpack_var(true, "xaddr")?;
            cur.next_group()?;
            msg.hist = cur.unpack_var(true, "hist")? as u32;
        }
        Tcode::Error => {
            msg.error_type = cur.unpack_fixed(4, "etype")? as u8;
            msg.error_code = cur.unpack_var(false, "ecode")? as u32;
        }
        Tcode::ResourceFull => {
            msg.res_code = cur.unpack_fixed(4, "rcode")? as u8;
            match msg.res_code {
                0 => msg.icnt = cur.unpack_var(true, "icnt")? as u32,
                1 => msg.hist = cur.unpack_var(true, "hist")? as u32,
                2 => {
                    msg.hist = cur.unpack_var(true, "hist")? as u32;
                    cur.next_group()?;
                    msg.hrepeat = cur.unpack_var(true, "hrepeat")? as u32;
                }
                _ => {
                    msg.res_data = cur.unpack_var(false, "rdata")? as u32;
                }
            }
        }
        Tcode::RepeatBranch => {
            msg.hrepeat = cur.unpack_var(true, "hrepeat")? as u32;
        }
        Tcode::ProgTraceCorrelation => {
            msg.stop_code = cur.unpack_fixed(4, "evcode")? as u8;
            msg.cdf = cur.unpack_fixed(2, "cdf")? as u8;
            if msg.cdf == 2 {
                return Err(Error::MsgUnsupported { tcode: msg.tcode });
            }
            msg.icnt = cur.unpack_var(true, "icnt")? as u32;
            if msg.cdf == 1 {
                cur.next_group()?;
                msg.hist = cur.unpack_var(true, "hist")? as u32;
            }
        }
        Tcode::Idle => unreachable!(),
    }

    if msg.icnt > crate::message::ICNT_MAX {
        return Err(Error::MsgInvalid("icnt out of range"));
    }
    if msg.hrepeat > crate::message::HREPEAT_MAX {
        return Err(Error::MsgInvalid("hrepeat out of range"));
    }
    if msg.has_hist() && msg.hist == 0 {
        return Err(Error::MsgInvalid("hist field must be nonzero"));
    }

    if cfg.ts_bits > 0 {
        if !cur.eom {
            cur.next_group()?;
            msg.timestamp = cur.unpack_var(true, "timestamp")?;
            msg.has_timestamp = true;
        } else if msg.is_sync() {
            return Err(Error::MsgMissingField("timestamp"));
        }
    }

    Ok((msg, cur.consumed()))
}
