//! Operation codes and message headers
//!
//! The operation set is closed and versioned by the protocol; dispatch is
//! a match over this enum, not an open-ended table.

use crate::error::{Result, XsError};

/// Request id carried by unsolicited watch events
pub const WATCH_EVENT_REQ_ID: u32 = 0;

/// Transaction id meaning "no transaction"
pub const NO_TRANSACTION: u32 = 0;

/// Wire operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Op {
    Debug = 0,
    Directory = 1,
    Read = 2,
    GetPerms = 3,
    Watch = 4,
    Unwatch = 5,
    TransactionStart = 6,
    TransactionEnd = 7,
    Introduce = 8,
    Release = 9,
    GetDomainPath = 10,
    Write = 11,
    Mkdir = 12,
    Rm = 13,
    SetPerms = 14,
    WatchEvent = 15,
    Error = 16,
    IsDomainIntroduced = 17,
    Resume = 18,
    SetTarget = 19,
    ResetWatches = 21,
    DirectoryPart = 22,
}

impl Op {
    /// Decode a raw operation code
    pub fn from_code(code: u32) -> Result<Self> {
        let op = match code {
            0 => Op::Debug,
            1 => Op::Directory,
            2 => Op::Read,
            3 => Op::GetPerms,
            4 => Op::Watch,
            5 => Op::Unwatch,
            6 => Op::TransactionStart,
            7 => Op::TransactionEnd,
            8 => Op::Introduce,
            9 => Op::Release,
            10 => Op::GetDomainPath,
            11 => Op::Write,
            12 => Op::Mkdir,
            13 => Op::Rm,
            14 => Op::SetPerms,
            15 => Op::WatchEvent,
            16 => Op::Error,
            17 => Op::IsDomainIntroduced,
            18 => Op::Resume,
            19 => Op::SetTarget,
            21 => Op::ResetWatches,
            22 => Op::DirectoryPart,
            _ => return Err(XsError::NotImplemented),
        };
        Ok(op)
    }

    /// Domain-management and debug codes require a privileged caller
    pub fn privileged_only(self) -> bool {
        matches!(
            self,
            Op::Debug
                | Op::Introduce
                | Op::Release
                | Op::GetDomainPath
                | Op::IsDomainIntroduced
                | Op::Resume
                | Op::SetTarget
        )
    }
}

/// Fixed-size wire message header
///
/// Sixteen bytes, four little-endian `u32` words, followed by `len`
/// payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    /// Operation code (kept raw so unknown codes can be reported)
    pub op: u32,

    /// Caller-chosen request id, echoed in the response
    pub req_id: u32,

    /// Transaction id, 0 for none
    pub tx_id: u32,

    /// Payload length in bytes
    pub len: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_round_trip() {
        for code in (0..23u32).filter(|c| *c != 20) {
            let op = Op::from_code(code).unwrap();
            assert_eq!(op as u32, code);
        }
    }

    #[test]
    fn unknown_codes_are_not_implemented() {
        assert_eq!(Op::from_code(20), Err(XsError::NotImplemented));
        assert_eq!(Op::from_code(99), Err(XsError::NotImplemented));
    }

    #[test]
    fn privilege_gating_covers_domain_management() {
        assert!(Op::Debug.privileged_only());
        assert!(Op::Introduce.privileged_only());
        assert!(!Op::Read.privileged_only());
        assert!(!Op::Watch.privileged_only());
    }
}
