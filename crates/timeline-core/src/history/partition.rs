//! Partition invariant over an entity's versions.
//!
//! Sorted by `start`, every version must end exactly where the next one
//! starts. Zero-width versions (`start == end`) are allowed; they appear when
//! the earliest recorded activity has no known creation instant before it.

use std::collections::BTreeMap;

use crate::error::ErrorCode;
use crate::model::{Instant, Oid, VersionDocument};

/// First violation found for an entity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionViolation {
    #[error("{}: {oid}: version [{start}, {end}) ends before it starts", ErrorCode::PartitionViolation.code())]
    Inverted { oid: Oid, start: Instant, end: Instant },
    #[error("{}: {oid}: version starting at {start} is open-ended but not the latest", ErrorCode::PartitionViolation.code())]
    OpenBeforeLatest { oid: Oid, start: Instant },
    #[error("{}: {oid}: gap between end {end} and next start {next_start}", ErrorCode::PartitionViolation.code())]
    Gap {
        oid: Oid,
        end: Instant,
        next_start: Instant,
    },
    #[error("{}: {oid}: overlap between end {end} and next start {next_start}", ErrorCode::PartitionViolation.code())]
    Overlap {
        oid: Oid,
        end: Instant,
        next_start: Instant,
    },
}

impl PartitionViolation {
    /// Machine-readable code associated with this violation.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::PartitionViolation
    }
}

/// Check that, per `oid`, `versions` tile time without gaps or overlaps.
///
/// Input order does not matter; versions are grouped by `oid` and sorted by
/// `(start, end)` with open-ended versions last.
///
/// # Errors
///
/// Returns the first [`PartitionViolation`] found, in `oid` order.
pub fn check_partition(versions: &[VersionDocument]) -> Result<(), PartitionViolation> {
    let mut by_oid: BTreeMap<&Oid, Vec<&VersionDocument>> = BTreeMap::new();
    for version in versions {
        by_oid.entry(&version.oid).or_default().push(version);
    }

    for (oid, mut chain) in by_oid {
        chain.sort_by_key(|v| (v.start, v.end.unwrap_or(Instant::MAX)));
        for version in &chain {
            if let Some(end) = version.end {
                if end < version.start {
                    return Err(PartitionViolation::Inverted {
                        oid: oid.clone(),
                        start: version.start,
                        end,
                    });
                }
            }
        }
        for pair in chain.windows(2) {
            let (current, next) = (pair[0], pair[1]);
            match current.end {
                None => {
                    return Err(PartitionViolation::OpenBeforeLatest {
                        oid: oid.clone(),
                        start: current.start,
                    });
                }
                Some(end) if end < next.start => {
                    return Err(PartitionViolation::Gap {
                        oid: oid.clone(),
                        end,
                        next_start: next.start,
                    });
                }
                Some(end) if end > next.start => {
                    return Err(PartitionViolation::Overlap {
                        oid: oid.clone(),
                        end,
                        next_start: next.start,
                    });
                }
                Some(_) => {}
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{PartitionViolation, check_partition};
    use crate::model::{Oid, VersionDocument};

    #[test]
    fn contiguous_chain_passes_in_any_order() {
        let versions = vec![
            VersionDocument::new("1", 150),
            VersionDocument::new("1", 100).with_end(150),
            VersionDocument::new("2", 5).with_end(5),
            VersionDocument::new("2", 5),
        ];
        assert_eq!(check_partition(&versions), Ok(()));
    }

    #[test]
    fn gap_is_reported() {
        let versions = vec![
            VersionDocument::new("1", 100).with_end(140),
            VersionDocument::new("1", 150),
        ];
        assert_eq!(
            check_partition(&versions),
            Err(PartitionViolation::Gap {
                oid: Oid::from("1"),
                end: 140,
                next_start: 150
            })
        );
    }

    #[test]
    fn overlap_is_reported() {
        let versions = vec![
            VersionDocument::new("1", 100).with_end(160),
            VersionDocument::new("1", 150),
        ];
        assert!(matches!(
            check_partition(&versions),
            Err(PartitionViolation::Overlap { end: 160, .. })
        ));
    }

    #[test]
    fn two_current_versions_are_reported() {
        let versions = vec![VersionDocument::new("1", 100), VersionDocument::new("1", 150)];
        assert!(matches!(
            check_partition(&versions),
            Err(PartitionViolation::OpenBeforeLatest { start: 100, .. })
        ));
    }

    #[test]
    fn inverted_interval_is_reported() {
        let versions = vec![VersionDocument::new("1", 100).with_end(90)];
        assert!(matches!(
            check_partition(&versions),
            Err(PartitionViolation::Inverted { .. })
        ));
    }
}
