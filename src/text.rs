//! A lossless, human-readable mirror of [`Message`], matching the
//! source library's `NAME=VALUE` text format field-for-field so traces
//! can be round-tripped through `dump`/`assemble`.
//!
//! [`write_msg`] writes everything from the TCODE mnemonic onward
//! (`"DIRECT-BRANCH Time=0 TCODE=3 ICNT=5"`); the `"Msg #<n> +<off> "`
//! prefix and the leading mnemonic token are the caller's concern (see
//! `src/bin/dump.rs` and `src/bin/assemble.rs`), exactly as the
//! `dump`/`assemble` split responsibilities in the source tools.

use std::fmt;

use crate::error::Error;
use crate::message::{Message, Tcode};

/// Write the `Time=... TCODE=... [Src=...] ...` tail of a message's
/// text representation (the TCODE mnemonic is included as the very
/// first token).
pub fn write_msg(w: &mut impl fmt::Write, msg: &Message) -> fmt::Result {
    let tcode = msg.tcode_known();
    let name = tcode.map(Tcode::as_str).unwrap_or("UNKNOWN");
    write!(w, "{} Time={} TCODE={}", name, msg.timestamp, msg.tcode)?;
    if msg.has_src() {
        write!(w, " Src={}", msg.src)?;
    }
    let tcode = match tcode {
        Some(t) => t,
        None => return Ok(()),
    };
    if tcode == Tcode::Idle {
        return Ok(());
    }
    match tcode {
        Tcode::Ownership => {
            write!(
                w,
                " FORMAT={} PRV={} V={} CONTEXT=0x{:x}",
                msg.ownership_fmt, msg.ownership_prv, msg.ownership_v, msg.context
            )
        }
        Tcode::Error => {
            write!(w, " ETYPE={} ECODE=0x{:x}", msg.error_type, msg.error_code)
        }
        Tcode::ResourceFull => {
            write!(w, " RCODE={}", msg.res_code)?;
            match msg.res_code {
                0 => write!(w, " ICNT={}", msg.icnt),
                1 => write!(w, " HIST=0x{:x}", msg.hist),
                2 => write!(w, " HIST=0x{:x} HREPEAT={}", msg.hist, msg.hrepeat),
                _ => write!(w, " RDATA=0x{:x}", msg.res_data),
            }
        }
        Tcode::RepeatBranch => write!(w, " HREPEAT={}", msg.hrepeat),
        Tcode::ProgTraceCorrelation => {
            write!(w, " EVCODE={} CDF={} ICNT={}", msg.stop_code, msg.cdf, msg.icnt)?;
            if msg.cdf == 1 {
                write!(w, " HIST=0x{:x}", msg.hist)?;
            }
            Ok(())
        }
        _ => {
            if msg.is_sync() {
                write!(w, " SYNC={}", msg.sync_type)?;
            }
            if msg.is_indir_branch() {
                write!(w, " BTYPE={}", msg.branch_type)?;
            }
            if msg.has_icnt() {
                write!(w, " ICNT={}", msg.icnt)?;
            }
            if msg.has_xaddr() {
                write!(w, " XADDR=0x{:x}", msg.xaddr)?;
            }
            if msg.has_hist() {
                write!(w, " HIST=0x{:x}", msg.hist)?;
            }
            Ok(())
        }
    }
}

/// Render `msg` to an owned `String`.
pub fn format_msg(msg: &Message) -> String {
    let mut s = String::new();
    write_msg(&mut s, msg).expect("String writer never fails");
    s
}

struct Tokens<'a> {
    inner: std::str::SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn field(&mut self, name: &'static str) -> Result<u64, Error> {
        let tok = self.inner.next().ok_or(Error::MsgMissingField(name))?;
        let (key, value) = tok.split_once('=').ok_or(Error::MsgMissingField(name))?;
        if key != name {
            return Err(Error::MsgMissingField(name));
        }
        parse_num(value).ok_or(Error::MsgInvalid(name))
    }
}

fn parse_num(v: &str) -> Option<u64> {
    if let Some(hex) = v.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()
    } else {
        v.parse().ok()
    }
}

/// Parse the `Time=... TCODE=...` tail of a text message (i.e. the
/// same slice [`write_msg`] produces, with any leading mnemonic token
/// already stripped by the caller).
pub fn read_msg(line: &str) -> Result<Message, Error> {
    let mut tokens = Tokens {
        inner: line.split_whitespace(),
    };
    let mut msg = Message::default();
    msg.timestamp = tokens.field("Time")?;
    msg.tcode = tokens.field("TCODE")? as u8;
    if msg.idle() {
        return Ok(msg);
    }
    msg.src = tokens.field("Src")? as u32;

    let tcode = msg
        .tcode_known()
        .ok_or(Error::MsgUnsupported { tcode: msg.tcode })?;

    match tcode {
        Tcode::Ownership => {
            msg.ownership_fmt = tokens.field("FORMAT")? as u8;
            msg.ownership_prv = tokens.field("PRV")? as u8;
            msg.ownership_v = tokens.field("V")? as u8;
            msg.context = tokens.field("CONTEXT")?;
        }
        Tcode::Error => {
            msg.error_type = tokens.field("ETYPE")? as u8;
            msg.error_code = tokens.field("ECODE")? as u32;
        }
        Tcode::ResourceFull => {
            msg.res_code = tokens.field("RCODE")? as u8;
            match msg.res_code {
                0 => msg.icnt = tokens.field("ICNT")? as u32,
                1 => msg.hist = tokens.field("HIST")? as u32,
                2 => {
                    msg.hist = tokens.field("HIST")? as u32;
                    msg.hrepeat = tokens.field("HREPEAT")? as u32;
                }
                _ => msg.res_data = tokens.field("RDATA")? as u32,
            }
        }
        Tcode::RepeatBranch => {
            msg.hrepeat = tokens.field("HREPEAT")? as u32;
        }
        Tcode::ProgTraceCorrelation => {
            msg.stop_code = tokens.field("EVCODE")? as u8;
            msg.cdf = tokens.field("CDF")? as u8;
            msg.icnt = tokens.field("ICNT")? as u32;
            if msg.cdf == 1 {
                msg.hist = tokens.field("HIST")? as u32;
            }
        }
        _ => {
            if msg.is_sync() {
                msg.sync_type = tokens.field("SYNC")? as u8;
            }
            if msg.is_indir_branch() {
                msg.branch_type = tokens.field("BTYPE")? as u8;
            }
            msg.icnt = tokens.field("ICNT")? as u32;
            if msg.has_xaddr() {
                msg.xaddr = tokens.field("XADDR")?;
            }
            if msg.has_hist() {
                msg.hist = tokens.field("HIST")? as u32;
            }
        }
    }
    msg.has_timestamp = true;
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_branch_roundtrips_through_text() {
        let mut msg = Message::new(Tcode::DirectBranch);
        msg.icnt = 42;
        msg.timestamp = 7;
        let text = format_msg(&msg);
        assert_eq!(text, "DIRECT-BRANCH Time=7 TCODE=3 Src=0 ICNT=42");
        let parsed = read_msg(&text).unwrap();
        assert_eq!(parsed.icnt, 42);
        assert_eq!(parsed.timestamp, 7);
    }

    #[test]
    fn idle_has_no_trailing_fields() {
        let msg = Message::new(Tcode::Idle);
        let text = format_msg(&msg);
        assert_eq!(text, "IDLE Time=0 TCODE=63");
        let parsed = read_msg(&text).unwrap();
        assert!(parsed.idle());
    }

    #[test]
    fn resource_full_rcode2_roundtrips() {
        let mut msg = Message::new(Tcode::ResourceFull);
        msg.res_code = 2;
        msg.hist = 0b1010;
        msg.hrepeat = 3;
        let text = format_msg(&msg);
        let parsed = read_msg(&text).unwrap();
        assert_eq!(parsed.hist, 0b1010);
        assert_eq!(parsed.hrepeat, 3);
    }

    #[test]
    fn missing_field_is_reported() {
        assert!(matches!(
            read_msg("Time=1"),
            Err(Error::MsgMissingField("TCODE"))
        ));
    }
}
