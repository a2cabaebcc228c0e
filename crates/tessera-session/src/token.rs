//! Session tokens
//!
//! A session token marks a logical point in one partition's write history.
//! Two wire forms exist:
//!
//! - simple: a bare LSN, e.g. `42`
//! - vector: `{version}#{globalLsn}#{regionId}={localLsn}#...`, e.g.
//!   `1#100#1=20#2=35`
//!
//! A vector token without region segments (`1#100`) is valid and simply carries
//! no regional awareness. A region LSN of `-1` means "unset".

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SessionTokenError};

/// Region LSN value meaning "no requirement for this region"
pub const UNSET_LSN: i64 = -1;

const SEGMENT_SEPARATOR: char = '#';
const REGION_SEPARATOR: char = '=';

/// Outcome of comparing a candidate token against a required one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// The candidate has observed at least everything the required token has
    Sufficient,
    /// Reading at the candidate could return data older than required
    Insufficient,
}

impl Staleness {
    pub fn is_sufficient(self) -> bool {
        self == Staleness::Sufficient
    }
}

/// Vector form of a session token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VectorSessionToken {
    version: i64,
    global_lsn: i64,
    local_lsn_by_region: BTreeMap<u32, i64>,
}

impl VectorSessionToken {
    pub fn new(version: i64, global_lsn: i64, local_lsn_by_region: BTreeMap<u32, i64>) -> Self {
        Self {
            version,
            global_lsn,
            local_lsn_by_region,
        }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn global_lsn(&self) -> i64 {
        self.global_lsn
    }

    pub fn local_lsn_by_region(&self) -> &BTreeMap<u32, i64> {
        &self.local_lsn_by_region
    }

    pub fn region_lsn(&self, region_id: u32) -> Option<i64> {
        self.local_lsn_by_region.get(&region_id).copied()
    }

    fn merge(&self, other: &Self) -> Result<Self> {
        if self.version == other.version {
            let same_regions = self.local_lsn_by_region.len() == other.local_lsn_by_region.len()
                && self
                    .local_lsn_by_region
                    .keys()
                    .all(|id| other.local_lsn_by_region.contains_key(id));
            if !same_regions {
                return Err(SessionTokenError::incompatible(
                    self,
                    other,
                    "same version with different region sets",
                ));
            }
        }

        // The higher version decides the region set; shared regions take the max.
        let (newer, older) = if self.version >= other.version {
            (self, other)
        } else {
            (other, self)
        };

        let local_lsn_by_region = newer
            .local_lsn_by_region
            .iter()
            .map(|(id, lsn)| {
                let merged = older
                    .local_lsn_by_region
                    .get(id)
                    .map_or(*lsn, |other_lsn| (*lsn).max(*other_lsn));
                (*id, merged)
            })
            .collect();

        Ok(Self {
            version: newer.version,
            global_lsn: self.global_lsn.max(other.global_lsn),
            local_lsn_by_region,
        })
    }

    fn compare_for_staleness(&self, required: &Self) -> Staleness {
        if self.version < required.version || self.global_lsn < required.global_lsn {
            return Staleness::Insufficient;
        }

        for (region_id, required_lsn) in &required.local_lsn_by_region {
            if *required_lsn == UNSET_LSN {
                continue;
            }
            match self.local_lsn_by_region.get(region_id) {
                Some(lsn) if lsn >= required_lsn => {}
                _ => return Staleness::Insufficient,
            }
        }

        Staleness::Sufficient
    }
}

impl fmt::Display for VectorSessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.version, self.global_lsn)?;
        for (region_id, lsn) in &self.local_lsn_by_region {
            write!(f, "#{}={}", region_id, lsn)?;
        }
        Ok(())
    }
}

/// A session token in either wire form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionToken {
    /// Legacy single-LSN token
    Simple(i64),
    /// Version + global LSN + per-region LSNs
    Vector(VectorSessionToken),
}

impl SessionToken {
    /// Build a vector token
    pub fn vector(
        version: i64,
        global_lsn: i64,
        regions: impl IntoIterator<Item = (u32, i64)>,
    ) -> Self {
        Self::Vector(VectorSessionToken::new(
            version,
            global_lsn,
            regions.into_iter().collect(),
        ))
    }

    /// Parse a header value, logging and discarding malformed input
    pub fn parse_lenient(value: &str) -> Option<Self> {
        match value.parse() {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unusable session token");
                None
            }
        }
    }

    /// The token's global LSN (the only LSN of a simple token)
    pub fn global_lsn(&self) -> i64 {
        match self {
            SessionToken::Simple(lsn) => *lsn,
            SessionToken::Vector(v) => v.global_lsn,
        }
    }

    /// Format version, `None` for simple tokens
    pub fn version(&self) -> Option<i64> {
        match self {
            SessionToken::Simple(_) => None,
            SessionToken::Vector(v) => Some(v.version),
        }
    }

    /// Local LSN recorded for a region
    pub fn region_lsn(&self, region_id: u32) -> Option<i64> {
        match self {
            SessionToken::Simple(_) => None,
            SessionToken::Vector(v) => v.region_lsn(region_id),
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, SessionToken::Vector(_))
    }

    /// Component-wise maximum of two tokens of the same partition
    ///
    /// Fails with [`SessionTokenError::TokenIncompatible`] when a simple token
    /// meets a vector token, or two vector tokens share a version but disagree
    /// on their region set.
    pub fn merge(&self, other: &SessionToken) -> Result<SessionToken> {
        match (self, other) {
            (SessionToken::Simple(a), SessionToken::Simple(b)) => Ok(SessionToken::Simple(*a.max(b))),
            (SessionToken::Vector(a), SessionToken::Vector(b)) => a.merge(b).map(SessionToken::Vector),
            _ => Err(SessionTokenError::incompatible(
                self,
                other,
                "simple and vector tokens cannot be combined",
            )),
        }
    }

    /// Whether reading at `self` satisfies a request that requires `required`
    ///
    /// Mixed simple/vector comparisons fall back to the global LSN.
    pub fn compare_for_staleness(&self, required: &SessionToken) -> Staleness {
        match (self, required) {
            (SessionToken::Vector(candidate), SessionToken::Vector(required)) => {
                candidate.compare_for_staleness(required)
            }
            _ if self.global_lsn() >= required.global_lsn() => Staleness::Sufficient,
            _ => Staleness::Insufficient,
        }
    }

    /// Copy of this token with every region outside `keep` set to [`UNSET_LSN`]
    pub fn with_regions_masked(&self, keep: &HashSet<u32>) -> SessionToken {
        match self {
            SessionToken::Simple(_) => self.clone(),
            SessionToken::Vector(v) => {
                let local_lsn_by_region = v
                    .local_lsn_by_region
                    .iter()
                    .map(|(id, lsn)| {
                        let lsn = if keep.contains(id) { *lsn } else { UNSET_LSN };
                        (*id, lsn)
                    })
                    .collect();
                SessionToken::Vector(VectorSessionToken {
                    local_lsn_by_region,
                    ..v.clone()
                })
            }
        }
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionToken::Simple(lsn) => write!(f, "{}", lsn),
            SessionToken::Vector(v) => v.fmt(f),
        }
    }
}

impl FromStr for SessionToken {
    type Err = SessionTokenError;

    fn from_str(s: &str) -> Result<Self> {
        let input = s.trim();
        if input.is_empty() {
            return Err(SessionTokenError::parse(s, "empty token"));
        }

        if !input.contains(SEGMENT_SEPARATOR) {
            let lsn = parse_lsn(s, input, "LSN")?;
            return Ok(SessionToken::Simple(lsn));
        }

        let mut segments = input.split(SEGMENT_SEPARATOR);

        let version = segments
            .next()
            .ok_or_else(|| SessionTokenError::parse(s, "missing version"))?;
        let version = parse_lsn(s, version, "version")?;

        let global_lsn = segments
            .next()
            .ok_or_else(|| SessionTokenError::parse(s, "missing global LSN"))?;
        let global_lsn = parse_lsn(s, global_lsn, "global LSN")?;

        let mut local_lsn_by_region = BTreeMap::new();
        for segment in segments {
            let (region, lsn) = segment.split_once(REGION_SEPARATOR).ok_or_else(|| {
                SessionTokenError::parse(s, format!("region segment '{}' is not id=lsn", segment))
            })?;

            let region_id: u32 = region.parse().map_err(|_| {
                SessionTokenError::parse(s, format!("region id '{}' is not a number", region))
            })?;
            let lsn: i64 = lsn.parse().map_err(|_| {
                SessionTokenError::parse(s, format!("region LSN '{}' is not a number", lsn))
            })?;
            if lsn < UNSET_LSN {
                return Err(SessionTokenError::parse(
                    s,
                    format!("region LSN {} is out of range", lsn),
                ));
            }

            if local_lsn_by_region.insert(region_id, lsn).is_some() {
                return Err(SessionTokenError::parse(
                    s,
                    format!("region {} appears twice", region_id),
                ));
            }
        }

        Ok(SessionToken::Vector(VectorSessionToken {
            version,
            global_lsn,
            local_lsn_by_region,
        }))
    }
}

fn parse_lsn(token: &str, value: &str, what: &str) -> Result<i64> {
    let parsed: i64 = value
        .parse()
        .map_err(|_| SessionTokenError::parse(token, format!("{} '{}' is not a number", what, value)))?;
    if parsed < 0 {
        return Err(SessionTokenError::parse(
            token,
            format!("{} {} is negative", what, parsed),
        ));
    }
    Ok(parsed)
}

impl Serialize for SessionToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SessionToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(s: &str) -> SessionToken {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_vector_token() {
        let t = token("1#100#1=20#2=35");
        assert_eq!(t.version(), Some(1));
        assert_eq!(t.global_lsn(), 100);
        assert_eq!(t.region_lsn(1), Some(20));
        assert_eq!(t.region_lsn(2), Some(35));
        assert_eq!(t.region_lsn(3), None);
    }

    #[test]
    fn test_parse_without_regions() {
        let t = token("3#77");
        assert!(t.is_vector());
        assert_eq!(t.global_lsn(), 77);
        assert_eq!(t.region_lsn(0), None);
    }

    #[test]
    fn test_parse_simple_token() {
        assert_eq!(token("42"), SessionToken::Simple(42));
        assert_eq!(token(" 42 ").to_string(), "42");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in [
            "", "#", "abc", "1#", "1#x", "1#100#", "1#100#2", "1#100#a=1", "1#100#1=b",
            "1#100#1=2#1=3", "-5", "1#-4", "1#100#1=-2",
        ] {
            let err = input.parse::<SessionToken>().unwrap_err();
            assert!(
                matches!(err, SessionTokenError::Parse { .. }),
                "expected parse error for {:?}",
                input
            );
        }
    }

    #[test]
    fn test_parse_accepts_unset_region() {
        let t = token("2#50#4=-1");
        assert_eq!(t.region_lsn(4), Some(UNSET_LSN));
    }

    #[test]
    fn test_display_orders_regions() {
        let t = token("1#100#9=1#2=5");
        assert_eq!(t.to_string(), "1#100#2=5#9=1");
        assert_eq!(token(&t.to_string()), t);
    }

    #[test]
    fn test_parse_lenient() {
        assert!(SessionToken::parse_lenient("1#5").is_some());
        assert!(SessionToken::parse_lenient("garbage#").is_none());
    }

    #[test]
    fn test_merge_takes_component_max() {
        let a = token("1#100#1=20#2=40");
        let b = token("1#90#1=25#2=30");
        assert_eq!(a.merge(&b).unwrap(), token("1#100#1=25#2=40"));
    }

    #[test]
    fn test_merge_higher_version_decides_regions() {
        let older = token("1#100#1=20#2=40");
        let newer = token("2#90#1=10#3=7");
        let merged = older.merge(&newer).unwrap();
        assert_eq!(merged, token("2#100#1=20#3=7"));
        assert_eq!(newer.merge(&older).unwrap(), merged);
    }

    #[test]
    fn test_merge_same_version_different_regions_is_incompatible() {
        let a = token("1#100#1=20");
        let b = token("1#100#2=20");
        assert!(matches!(
            a.merge(&b),
            Err(SessionTokenError::TokenIncompatible { .. })
        ));
    }

    #[test]
    fn test_merge_simple_with_vector_is_incompatible() {
        let err = token("5").merge(&token("1#5")).unwrap_err();
        assert!(err.to_string().contains("cannot be merged"));
        assert_eq!(token("5").merge(&token("9")).unwrap(), token("9"));
    }

    #[test]
    fn test_staleness_global_lsn() {
        let required = token("1#100#1=20");
        assert_eq!(
            token("1#99#1=30").compare_for_staleness(&required),
            Staleness::Insufficient
        );
        assert!(token("1#100#1=20")
            .compare_for_staleness(&required)
            .is_sufficient());
    }

    #[test]
    fn test_staleness_region_lsn() {
        let required = token("1#100#1=20#2=10");
        assert_eq!(
            token("1#120#1=20#2=9").compare_for_staleness(&required),
            Staleness::Insufficient
        );
        assert_eq!(
            token("1#120#1=21#2=10").compare_for_staleness(&required),
            Staleness::Sufficient
        );
    }

    #[test]
    fn test_staleness_absent_region() {
        let candidate = token("1#100#1=20");
        assert_eq!(
            candidate.compare_for_staleness(&token("1#100#1=20#2=5")),
            Staleness::Insufficient
        );
        assert_eq!(
            candidate.compare_for_staleness(&token("1#100#1=20#2=-1")),
            Staleness::Sufficient
        );
    }

    #[test]
    fn test_staleness_version() {
        assert_eq!(
            token("1#500").compare_for_staleness(&token("2#100")),
            Staleness::Insufficient
        );
    }

    #[test]
    fn test_staleness_mixed_forms() {
        assert!(token("100").compare_for_staleness(&token("1#90")).is_sufficient());
        assert!(!token("1#80").compare_for_staleness(&token("90")).is_sufficient());
    }

    #[test]
    fn test_with_regions_masked() {
        let t = token("1#100#1=20#2=30#3=40");
        let keep: HashSet<u32> = [1, 3].into_iter().collect();
        assert_eq!(t.with_regions_masked(&keep), token("1#100#1=20#2=-1#3=40"));
        assert_eq!(token("7").with_regions_masked(&keep), token("7"));
    }
}
