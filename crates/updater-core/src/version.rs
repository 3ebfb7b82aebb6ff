//! ---
//! upd_section: "02-update-pipeline"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Version probing, download, install and restart of the target application."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::fmt;

/// Integer build number of the target application.
///
/// Ordering is plain integer ordering. [`VersionCode::UNKNOWN`] stands for
/// "not installed", "unreachable" or "unreadable" and sorts below every real
/// version, so an absent value can never look up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionCode(i64);

impl VersionCode {
    /// Sentinel for an unknown version.
    pub const UNKNOWN: VersionCode = VersionCode(-1);

    /// Wrap a known version code. Negative inputs collapse to [`VersionCode::UNKNOWN`].
    pub fn new(code: i64) -> Self {
        if code < 0 {
            Self::UNKNOWN
        } else {
            Self(code)
        }
    }

    /// Parse a plain decimal body such as `"42"` or `"42\n"`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        trimmed.parse::<i64>().ok().map(Self)
    }

    pub fn is_known(&self) -> bool {
        self.0 >= 0
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl Default for VersionCode {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl From<i64> for VersionCode {
    fn from(code: i64) -> Self {
        Self::new(code)
    }
}

impl fmt::Display for VersionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("unknown")
        }
    }
}
