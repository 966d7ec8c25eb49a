use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum PreTag {
    Dev,
    Alpha,
    Beta,
    Rc,
}

/// Package version: dotted numeric release with an optional pre-release tag
/// (sorts before the release) or post/packaging revision (sorts after).
///
/// `v2024.1`, `2021.17.2-5`, `1.0rc1`, `1.2.post3` and `3.0.0+local` all
/// parse; local labels after `+` are ignored for ordering.
#[derive(Clone, Debug)]
pub struct Version {
    raw: String,
    release: Vec<u64>,
    pre: Option<(PreTag, u64)>,
    post: Option<u64>,
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidVersion {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let raw = input.trim();
        let body = raw.strip_prefix(['v', 'V']).unwrap_or(raw);
        let body = body.split('+').next().unwrap_or("");
        if body.is_empty() {
            return Err(invalid("empty"));
        }

        let release_end = body
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
            .map_or(body.len(), |(i, _)| i);
        let (release_str, mut rest) = body.split_at(release_end);
        // "1.0.rc1" / "1.0.post1": the separator dot belongs to the suffix
        let release_str = match release_str.strip_suffix('.') {
            Some(r) if !rest.is_empty() => {
                rest = &body[release_end - 1..];
                r
            }
            _ => release_str,
        };

        let mut release = Vec::new();
        for part in release_str.split('.') {
            let n = part.parse::<u64>().map_err(|_| invalid("non-numeric release segment"))?;
            release.push(n);
        }

        let mut version = Version {
            raw: raw.to_string(),
            release,
            pre: None,
            post: None,
        };

        let suffix = rest.trim_start_matches(['.', '-', '_']).to_ascii_lowercase();
        if suffix.is_empty() {
            return Ok(version);
        }
        if let Ok(n) = suffix.parse::<u64>() {
            version.post = Some(n);
            return Ok(version);
        }
        let letters_end = suffix
            .char_indices()
            .find(|(_, c)| !c.is_ascii_alphabetic())
            .map_or(suffix.len(), |(i, _)| i);
        let (tag, num) = suffix.split_at(letters_end);
        let num = num.trim_start_matches(['.', '-', '_']);
        let n = if num.is_empty() {
            0
        } else {
            num.parse::<u64>().map_err(|_| invalid("bad suffix number"))?
        };
        match tag {
            "post" | "r" | "rev" => version.post = Some(n),
            "dev" => version.pre = Some((PreTag::Dev, n)),
            "a" | "alpha" => version.pre = Some((PreTag::Alpha, n)),
            "b" | "beta" => version.pre = Some((PreTag::Beta, n)),
            "rc" | "c" | "pre" | "preview" => version.pre = Some((PreTag::Rc, n)),
            _ => return Err(invalid("unknown suffix")),
        }
        Ok(version)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn major(&self) -> u64 {
        self.segment(0)
    }

    pub fn minor(&self) -> u64 {
        self.segment(1)
    }

    fn segment(&self, idx: usize) -> u64 {
        self.release.get(idx).copied().unwrap_or(0)
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    fn cmp_release(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        (0..len)
            .map(|i| self.segment(i).cmp(&other.segment(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_release(other)
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
            .then_with(|| self.post.cmp(&other.post))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl FromStr for Version {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Patch,
    Minor,
    Major,
}

impl TransitionKind {
    pub fn classify(old: &Version, new: &Version) -> Self {
        if old.major() != new.major() {
            TransitionKind::Major
        } else if old.minor() != new.minor() {
            TransitionKind::Minor
        } else {
            TransitionKind::Patch
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransitionKind::Patch => "patch",
            TransitionKind::Minor => "minor",
            TransitionKind::Major => "major",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of ordering raw version strings.
#[derive(Clone, Debug, Default)]
pub struct SortedVersions {
    pub versions: Vec<Version>,
    /// Inputs that did not parse, in input order.
    pub rejected: Vec<String>,
}

/// Parses, sorts ascending and de-duplicates version strings. The first
/// spelling of equal versions wins.
pub fn sort_versions<I, S>(raw: I) -> SortedVersions
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = SortedVersions::default();
    for s in raw {
        match Version::parse(s.as_ref()) {
            Ok(v) => out.versions.push(v),
            Err(_) => out.rejected.push(s.as_ref().to_string()),
        }
    }
    out.versions.sort();
    out.versions.dedup();
    out
}
