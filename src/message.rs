//! The decoded message record and the TCODE predicates that drive both
//! the wire codec and the trace decoder.

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

/// The upper bound of the `ICNT` field (22 bits).
pub const ICNT_MAX: u32 = (1 << 22) - 1;
/// The upper bound of the `HREPEAT` field (18 bits).
pub const HREPEAT_MAX: u32 = (1 << 18) - 1;

/// A Nexus-RV message type code. Values match the wire encoding exactly
/// so that `tcode as u8` round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[repr(u8)]
pub enum Tcode {
    Ownership = 2,
    DirectBranch = 3,
    IndirectBranch = 4,
    Error = 8,
    ProgTraceSync = 9,
    DirectBranchSync = 11,
    IndirectBranchSync = 12,
    ResourceFull = 27,
    IndirectBranchHist = 28,
    IndirectBranchHistSync = 29,
    RepeatBranch = 30,
    ProgTraceCorrelation = 33,
    Idle = 63,
}

impl Tcode {
    /// Map a raw 6-bit TCODE value to a known variant, if any.
    pub fn from_u8(v: u8) -> Option<Tcode> {
        use Tcode::*;
        Some(match v {
            2 => Ownership,
            3 => DirectBranch,
            4 => IndirectBranch,
            8 => Error,
            9 => ProgTraceSync,
            11 => DirectBranchSync,
            12 => IndirectBranchSync,
            27 => ResourceFull,
            28 => IndirectBranchHist,
            29 => IndirectBranchHistSync,
            30 => RepeatBranch,
            33 => ProgTraceCorrelation,
            63 => Idle,
            _ => return None,
        })
    }

    /// A short human-readable mnemonic, used by the text mirror.
    pub fn as_str(self) -> &'static str {
        use Tcode::*;
        match self {
            Ownership => "OWNERSHIP",
            DirectBranch => "DIRECT-BRANCH",
            IndirectBranch => "INDIRECT-BRANCH",
            Error => "ERROR",
            ProgTraceSync => "PROG-TRACE-SYNC",
            DirectBranchSync => "DIRECT-BRANCH-SYNC",
            IndirectBranchSync => "INDIRECT-BRANCH-SYNC",
            ResourceFull => "RESOURCE-FULL",
            IndirectBranchHist => "INDIRECT-BRANCH-HIST",
            IndirectBranchHistSync => "INDIRECT-BRANCH-HIST-SYNC",
            RepeatBranch => "REPEAT-BRANCH",
            ProgTraceCorrelation => "PROG-TRACE-CORRELATION",
            Idle => "IDLE",
        }
    }
}

/// A single decoded (or to-be-encoded) Nexus-RV trace message.
///
/// Mirrors the source library's tagged-union layout as a flat record:
/// `tcode` selects which of the remaining fields are meaningful: see
/// the `has_*`/`is_*` predicates below, which both the wire codec and
/// the trace decoder use to decide which fields to touch.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct Message {
    pub tcode: u8,
    pub src: u32,
    pub timestamp: u64,
    pub has_timestamp: bool,

    pub icnt: u32,
    pub xaddr: u64,
    pub hist: u32,
    pub hrepeat: u32,
    pub sync_type: u8,
    pub branch_type: u8,

    pub ownership_fmt: u8,
    pub ownership_prv: u8,
    pub ownership_v: u8,
    pub context: u64,

    pub error_type: u8,
    pub error_code: u32,

    pub res_code: u8,
    pub res_data: u32,

    pub stop_code: u8,
    pub cdf: u8,
}

impl Message {
    /// Build a bare message of the given type with every other field
    /// defaulted; callers then fill in the fields relevant to `tcode`.
    pub fn new(tcode: Tcode) -> Message {
        Message {
            tcode: tcode as u8,
            ..Message::default()
        }
    }

    pub fn tcode_known(&self) -> Option<Tcode> {
        Tcode::from_u8(self.tcode)
    }

    pub fn known(&self) -> bool {
        self.tcode_known().is_some()
    }

    pub fn idle(&self) -> bool {
        self.tcode == Tcode::Idle as u8
    }

    pub fn has_src(&self) -> bool {
        !self.idle()
    }

    pub fn is_branch(&self) -> bool {
        matches!(
            self.tcode_known(),
            Some(
                Tcode::DirectBranch
                    | Tcode::IndirectBranch
                    | Tcode::DirectBranchSync
                    | Tcode::IndirectBranchSync
                    | Tcode::IndirectBranchHist
                    | Tcode::IndirectBranchHistSync
                    | Tcode::ProgTraceSync
            )
        )
    }

    pub fn is_indir_branch(&self) -> bool {
        matches!(
            self.tcode_known(),
            Some(
                Tcode::IndirectBranch
                    | Tcode::IndirectBranchSync
                    | Tcode::IndirectBranchHist
                    | Tcode::IndirectBranchHistSync
            )
        )
    }

    pub fn is_sync(&self) -> bool {
        matches!(
            self.tcode_known(),
            Some(
                Tcode::ProgTraceSync
                    | Tcode::DirectBranchSync
                    | Tcode::IndirectBranchSync
                    | Tcode::IndirectBranchHistSync
            )
        )
    }

    pub fn is_res(&self) -> bool {
        self.tcode == Tcode::ResourceFull as u8
    }

    pub fn is_error(&self) -> bool {
        self.tcode == Tcode::Error as u8
    }

    pub fn is_stop(&self) -> bool {
        self.tcode == Tcode::ProgTraceCorrelation as u8
    }

    pub fn has_icnt(&self) -> bool {
        self.is_branch()
            || (self.is_res() && self.res_code == 0)
            || self.is_stop()
    }

    pub fn has_xaddr(&self) -> bool {
        matches!(
            self.tcode_known(),
            Some(
                Tcode::IndirectBranch
                    | Tcode::IndirectBranchSync
                    | Tcode::IndirectBranchHist
                    | Tcode::IndirectBranchHistSync
                    | Tcode::DirectBranchSync
                    | Tcode::ProgTraceSync
            )
        )
    }

    pub fn has_hist(&self) -> bool {
        matches!(
            self.tcode_known(),
            Some(Tcode::IndirectBranchHist | Tcode::IndirectBranchHistSync)
        )
    }

    /// The index of the most significant set bit of `hist`, i.e. the
    /// number of real TNT bits encoded below the HTM stop bit.
    pub fn hist_bits(hist: u32) -> u32 {
        if hist == 0 {
            0
        } else {
            31 - hist.leading_zeros()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcode_roundtrips_through_u8() {
        for t in [
            Tcode::Ownership,
            Tcode::DirectBranch,
            Tcode::IndirectBranch,
            Tcode::Error,
            Tcode::ProgTraceSync,
            Tcode::DirectBranchSync,
            Tcode::IndirectBranchSync,
            Tcode::ResourceFull,
            Tcode::IndirectBranchHist,
            Tcode::IndirectBranchHistSync,
            Tcode::RepeatBranch,
            Tcode::ProgTraceCorrelation,
            Tcode::Idle,
        ] {
            assert_eq!(Tcode::from_u8(t as u8), Some(t));
        }
    }

    #[test]
    fn idle_has_no_src() {
        let m = Message::new(Tcode::Idle);
        assert!(!m.has_src());
    }

    #[test]
    fn hist_bits_finds_msb() {
        assert_eq!(Message::hist_bits(0b1), 0);
        assert_eq!(Message::hist_bits(0b101), 2);
        assert_eq!(Message::hist_bits(0), 0);
    }

    #[test]
    fn indirect_branch_hist_has_hist_field() {
        let m = Message::new(Tcode::IndirectBranchHist);
        assert!(m.has_hist());
        assert!(m.has_xaddr());
        assert!(m.is_indir_branch());
    }
}
