//! Hardware trace configuration: the per-SoC parameters that govern both
//! the wire codec's field widths and a few trace-decoder behaviors.

use crate::error::Error;

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

/// The maximum size, in bytes, of a single encoded message for any legal
/// configuration. Callers must size their message buffers at least this
/// large.
pub const MSG_MAX_BYTES: usize = 38;

/// Parameters describing a specific trace encoder instance. Every field
/// width the wire codec needs, plus the vendor-quirk switch the trace
/// decoder consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct HwConfig {
    /// Width, in bits, of the `SRC` field (0 = absent).
    pub src_bits: u8,
    /// Width, in bits, of the `TIMESTAMP` field (0 = no timestamps).
    pub ts_bits: u8,
    /// Width, in bits, of the traced program-counter address space.
    pub addr_bits: u8,
    /// Upper bound on the return-address stack depth.
    pub max_stack: u32,
    /// Timestamp tick frequency in Hz (0 = raw tick counts).
    pub timer_freq: u64,
    /// History Trace Mode: branch history is reported via `HIST`
    /// fields instead of one message per branch.
    pub htm: bool,
    /// Virtual-Address-Optimization: addresses are sign-extended
    /// variable-width fields instead of always full-width.
    pub vao: bool,
    /// Enable the vendor quirk family described in `trace::DESIGN`.
    pub quirk_vendor: bool,
}

impl Default for HwConfig {
    fn default() -> Self {
        HwConfig {
            src_bits: 0,
            ts_bits: 0,
            addr_bits: 32,
            max_stack: 32,
            timer_freq: 0,
            htm: false,
            vao: false,
            quirk_vendor: false,
        }
    }
}

fn apply_model(cfg: &mut HwConfig, model: &str) -> std::result::Result<(), ()> {
    match model {
        "generic32" => {
            cfg.addr_bits = 32;
            cfg.max_stack = 32;
        }
        "generic64" => {
            cfg.addr_bits = 64;
            cfg.max_stack = 32;
        }
        "vendorA4" => {
            cfg.addr_bits = 32;
            cfg.max_stack = 4;
            cfg.quirk_vendor = true;
        }
        "vendorA8" => {
            cfg.addr_bits = 32;
            cfg.max_stack = 8;
            cfg.quirk_vendor = true;
        }
        _ => return Err(()),
    }
    Ok(())
}

fn parse_timerfreq(value: &str) -> std::result::Result<u64, ()> {
    let (digits, mult) = if let Some(d) = value.strip_suffix("GHz") {
        (d, 1_000_000_000)
    } else if let Some(d) = value.strip_suffix("MHz") {
        (d, 1_000_000)
    } else if let Some(d) = value.strip_suffix("KHz") {
        (d, 1_000)
    } else if let Some(d) = value.strip_suffix("Hz") {
        (d, 1)
    } else {
        (value, 1)
    };
    let base: u64 = digits.parse().map_err(|_| ())?;
    Ok(base * mult)
}

impl HwConfig {
    /// Parse the `key=value,flag` hardware-configuration grammar.
    ///
    /// Recognized keys: `ts`, `src`, `addr`, `maxstack`, `timerfreq`
    /// (accepting a `Hz`/`KHz`/`MHz`/`GHz` suffix), `model` (expanding
    /// to one of `generic32`, `generic64`, `vendorA4`, `vendorA8`),
    /// `quirk-vendor` / `no-quirk-vendor`, `htm` / `no-htm`, `vao` /
    /// `no-vao`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let mut cfg = HwConfig::default();
        if s.is_empty() {
            return Ok(cfg);
        }
        for token in s.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if let Some(rest) = token.strip_prefix("no-") {
                match rest {
                    "quirk-vendor" => cfg.quirk_vendor = false,
                    "htm" => cfg.htm = false,
                    "vao" => cfg.vao = false,
                    _ => return Err(Error::HwCfgInvalid(token.to_string())),
                }
                continue;
            }
            match token {
                "quirk-vendor" => {
                    cfg.quirk_vendor = true;
                    continue;
                }
                "htm" => {
                    cfg.htm = true;
                    continue;
                }
                "vao" => {
                    cfg.vao = true;
                    continue;
                }
                _ => {}
            }
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| Error::HwCfgInvalid(token.to_string()))?;
            match key {
                "model" => apply_model(&mut cfg, value)
                    .map_err(|_| Error::HwCfgInvalid(token.to_string()))?,
                "ts" => {
                    cfg.ts_bits = value.parse().map_err(|_| Error::HwCfgInvalid(token.to_string()))?
                }
                "src" => {
                    cfg.src_bits = value.parse().map_err(|_| Error::HwCfgInvalid(token.to_string()))?
                }
                "addr" => {
                    cfg.addr_bits = value.parse().map_err(|_| Error::HwCfgInvalid(token.to_string()))?
                }
                "maxstack" => {
                    cfg.max_stack =
                        value.parse().map_err(|_| Error::HwCfgInvalid(token.to_string()))?
                }
                "timerfreq" => {
                    cfg.timer_freq = parse_timerfreq(value)
                        .map_err(|_| Error::HwCfgInvalid(token.to_string()))?
                }
                _ => return Err(Error::HwCfgInvalid(token.to_string())),
            }
        }
        Ok(cfg)
    }
}
