use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// ABI compatibility verdict, following the differ's exit status convention.
///
/// The four comparison outcomes are totally ordered by severity. `Error` is
/// not comparable with them: it means no comparison took place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    NoChange,
    Compatible,
    Incompatible,
    Breaking,
    Error,
}

impl Verdict {
    pub const ORDERED: [Verdict; 4] = [
        Verdict::NoChange,
        Verdict::Compatible,
        Verdict::Incompatible,
        Verdict::Breaking,
    ];

    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => Verdict::NoChange,
            4 => Verdict::Compatible,
            8 => Verdict::Incompatible,
            12 => Verdict::Breaking,
            _ => Verdict::Error,
        }
    }

    /// Severity value (0/4/8/12). `None` for `Error`.
    pub fn severity(self) -> Option<u8> {
        match self {
            Verdict::NoChange => Some(0),
            Verdict::Compatible => Some(4),
            Verdict::Incompatible => Some(8),
            Verdict::Breaking => Some(12),
            Verdict::Error => None,
        }
    }

    /// Numeric value used for worst-case reduction; `Error` ranks below everything.
    pub fn rank(self) -> i32 {
        self.severity().map(i32::from).unwrap_or(-1)
    }

    pub fn exit_code(self) -> i32 {
        self.rank()
    }

    /// True for the verdicts that carry the differ's "incompatible" bit.
    pub fn is_incompatible(self) -> bool {
        matches!(self, Verdict::Incompatible | Verdict::Breaking)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::NoChange => "NO_CHANGE",
            Verdict::Compatible => "COMPATIBLE",
            Verdict::Incompatible => "INCOMPATIBLE",
            Verdict::Breaking => "BREAKING",
            Verdict::Error => "ERROR",
        }
    }

    /// Worst verdict of a set. An empty set yields `Error`.
    pub fn worst<I: IntoIterator<Item = Verdict>>(verdicts: I) -> Verdict {
        verdicts.into_iter().max_by_key(|v| v.rank()).unwrap_or(Verdict::Error)
    }
}

impl PartialOrd for Verdict {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.severity(), other.severity()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ if self == other => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
