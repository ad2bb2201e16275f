//! # Version comparison.
//!
//! Server builds are identified by strings such as `1.4.0` or
//! `2026.01.13-5b2f1c`. [`compare`] splits both sides on `.`, `-`, `+` and `_`
//! into numeric or lexical components and compares them position by position.
//!
//! - numeric vs numeric: integer order;
//! - lexical vs lexical: byte-wise string order;
//! - numeric vs lexical: the formats are incompatible → [`VersionOrdering::Unknown`];
//! - a missing trailing component equals `0` (`1.4` == `1.4.0`); a trailing
//!   lexical component on one side only is incompatible.
//!
//! Never panics, and never reports `Unknown` as `Equal`.
//!
//! ```rust
//! use servervisor::version::{compare, VersionOrdering};
//!
//! assert_eq!(compare("1.4.0", "1.5.0"), VersionOrdering::RemoteNewer);
//! assert_eq!(compare("1.4", "1.4.0"), VersionOrdering::Equal);
//! assert_eq!(compare("1.4.0", "nightly"), VersionOrdering::Unknown);
//! ```

use std::cmp::Ordering;

/// Outcome of comparing the local version against the remote one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrdering {
    Equal,
    RemoteNewer,
    LocalNewer,
    Unknown,
}

impl VersionOrdering {
    /// True iff an update should be installed.
    #[inline]
    pub fn update_available(self) -> bool {
        matches!(self, VersionOrdering::RemoteNewer)
    }

    /// Same comparison seen from the other side.
    #[inline]
    pub fn reversed(self) -> Self {
        match self {
            VersionOrdering::RemoteNewer => VersionOrdering::LocalNewer,
            VersionOrdering::LocalNewer => VersionOrdering::RemoteNewer,
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Component<'a> {
    Num(u64),
    Text(&'a str),
}

fn parse(v: &str) -> Option<Vec<Component<'_>>> {
    let v = v.trim();
    if v.is_empty() {
        return None;
    }
    v.split(['.', '-', '+', '_'])
        .map(|part| {
            if part.is_empty() {
                None
            } else if part.bytes().all(|b| b.is_ascii_digit()) {
                part.parse().ok().map(Component::Num)
            } else {
                Some(Component::Text(part))
            }
        })
        .collect()
}

/// Compares `local` against `remote`.
pub fn compare(local: &str, remote: &str) -> VersionOrdering {
    let (Some(l), Some(r)) = (parse(local), parse(remote)) else {
        return VersionOrdering::Unknown;
    };

    let len = l.len().max(r.len());
    for i in 0..len {
        let ord = match (l.get(i), r.get(i)) {
            (Some(Component::Num(a)), Some(Component::Num(b))) => a.cmp(b),
            (Some(Component::Text(a)), Some(Component::Text(b))) => a.cmp(b),
            (Some(Component::Num(a)), None) => a.cmp(&0),
            (None, Some(Component::Num(b))) => 0.cmp(b),
            _ => return VersionOrdering::Unknown,
        };
        match ord {
            Ordering::Equal => continue,
            Ordering::Less => return VersionOrdering::RemoteNewer,
            Ordering::Greater => return VersionOrdering::LocalNewer,
        }
    }
    VersionOrdering::Equal
}
