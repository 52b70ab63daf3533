//! Permissions and caller identity
//!
//! Every node carries an ordered permission list. The first entry names the
//! owning domain; its mode doubles as the default granted to domains with
//! no explicit entry. Owners and privileged callers always get full access.
//!
//! Wire format per entry: one mode letter followed by a decimal domain id,
//! e.g. `n0`, `r5`, `w3`, `b7`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, XsError};

/// The caller identity attached to every operation
///
/// Privilege determination is an external collaborator's job; the embedder
/// decides it once per session and passes it in here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    /// The domain on whose behalf the operation runs
    pub domid: u32,

    /// Privileged callers bypass permission checks and per-domain quotas
    pub privileged: bool,
}

impl Caller {
    /// A privileged control-plane caller
    pub fn privileged(domid: u32) -> Self {
        Self {
            domid,
            privileged: true,
        }
    }

    /// An unprivileged guest caller
    pub fn unprivileged(domid: u32) -> Self {
        Self {
            domid,
            privileged: false,
        }
    }
}

/// Access mode granted by one permission entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermMode {
    /// No access
    None,
    /// Read only
    Read,
    /// Write only
    Write,
    /// Read and write
    ReadWrite,
}

impl PermMode {
    /// The wire letter for this mode
    pub fn letter(self) -> char {
        match self {
            PermMode::None => 'n',
            PermMode::Read => 'r',
            PermMode::Write => 'w',
            PermMode::ReadWrite => 'b',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c {
            'n' => Some(PermMode::None),
            'r' => Some(PermMode::Read),
            'w' => Some(PermMode::Write),
            'b' => Some(PermMode::ReadWrite),
            _ => None,
        }
    }

    /// Whether this mode allows reading
    pub fn can_read(self) -> bool {
        matches!(self, PermMode::Read | PermMode::ReadWrite)
    }

    /// Whether this mode allows writing
    pub fn can_write(self) -> bool {
        matches!(self, PermMode::Write | PermMode::ReadWrite)
    }
}

/// One entry in a node's permission list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Perm {
    /// Domain the entry applies to (entry 0: the owner)
    pub id: u32,

    /// Mode granted (entry 0: also the default for unlisted domains)
    pub mode: PermMode,
}

impl Perm {
    pub fn new(id: u32, mode: PermMode) -> Self {
        Self { id, mode }
    }

    /// Parse a wire permission string like `r5`
    pub fn parse(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        let mode = chars
            .next()
            .and_then(PermMode::from_letter)
            .ok_or_else(|| XsError::MalformedRequest(format!("bad permission {s:?}")))?;
        let id = chars
            .as_str()
            .parse::<u32>()
            .map_err(|_| XsError::MalformedRequest(format!("bad permission {s:?}")))?;
        Ok(Self { id, mode })
    }

    /// Format as a wire permission string
    pub fn format(&self) -> String {
        format!("{}{}", self.mode.letter(), self.id)
    }
}

/// The effective mode a caller gets from a permission list
///
/// Scan order: an explicit entry for the caller's domain wins (first match);
/// otherwise the first entry's mode applies as the default.
fn effective_mode(perms: &[Perm], domid: u32) -> PermMode {
    let default = perms.first().map(|p| p.mode).unwrap_or(PermMode::None);
    if perms.first().map(|p| p.id) == Some(domid) {
        // Owner; handled by the caller-level checks, but an explicit owner
        // lookup should still read as full access.
        return PermMode::ReadWrite;
    }
    perms
        .iter()
        .skip(1)
        .find(|p| p.id == domid)
        .map(|p| p.mode)
        .unwrap_or(default)
}

/// Check read access against a permission list
pub fn check_read(caller: Caller, perms: &[Perm]) -> Result<()> {
    if caller.privileged || effective_mode(perms, caller.domid).can_read() {
        Ok(())
    } else {
        Err(XsError::PermissionDenied)
    }
}

/// Check write access against a permission list
pub fn check_write(caller: Caller, perms: &[Perm]) -> Result<()> {
    if caller.privileged || effective_mode(perms, caller.domid).can_write() {
        Ok(())
    } else {
        Err(XsError::PermissionDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format_round_trip() {
        for s in ["n0", "r5", "w12", "b100"] {
            assert_eq!(Perm::parse(s).unwrap().format(), s);
        }
        assert!(Perm::parse("x1").is_err());
        assert!(Perm::parse("r").is_err());
        assert!(Perm::parse("rfive").is_err());
    }

    #[test]
    fn owner_has_full_access() {
        let perms = vec![Perm::new(3, PermMode::None)];
        assert!(check_read(Caller::unprivileged(3), &perms).is_ok());
        assert!(check_write(Caller::unprivileged(3), &perms).is_ok());
    }

    #[test]
    fn first_entry_mode_is_default_for_others() {
        let perms = vec![Perm::new(0, PermMode::None), Perm::new(5, PermMode::Read)];
        // Domain 5 has an explicit read-only entry
        assert!(check_read(Caller::unprivileged(5), &perms).is_ok());
        assert!(check_write(Caller::unprivileged(5), &perms).is_err());
        // Domain 7 falls back to the owner's mode: none
        assert!(check_read(Caller::unprivileged(7), &perms).is_err());
    }

    #[test]
    fn privileged_bypasses_everything() {
        let perms = vec![Perm::new(1, PermMode::None)];
        assert!(check_write(Caller::privileged(0), &perms).is_ok());
    }
}
