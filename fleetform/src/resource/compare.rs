//! Snapshot comparison.
//!
//! Only provider-observable fields take part: name, tags, identifier and the
//! kind's own fields. `observed_at` is derived and ignored.

use thiserror::Error;

use super::{ResourceKind, Shared, Snapshot};
use crate::error::ReconcileError;

/// Two snapshots of different resource kinds were compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot compare {actual} snapshot with {expected} snapshot")]
pub struct KindMismatch {
    pub actual: ResourceKind,
    pub expected: ResourceKind,
}

impl KindMismatch {
    /// Attach the cluster and resource the comparison was made for.
    pub fn within(self, cluster: &str, resource: &str) -> ReconcileError {
        ReconcileError::KindMismatch {
            kind: self.expected,
            cluster: cluster.to_string(),
            resource: resource.to_string(),
            source: self,
        }
    }
}

/// Names of the fields that differ between `actual` and `expected`.
///
/// Fails only when the snapshots are of different kinds.
pub fn diff(actual: &Snapshot, expected: &Snapshot) -> Result<Vec<&'static str>, KindMismatch> {
    let mut fields = Vec::new();
    match (actual, expected) {
        (Snapshot::VmScaleSet(a), Snapshot::VmScaleSet(e)) => {
            diff_shared(&a.shared, &e.shared, &mut fields);
            if a.image != e.image {
                fields.push("image");
            }
            if a.size != e.size {
                fields.push("size");
            }
            if a.capacity != e.capacity {
                fields.push("capacity");
            }
        }
        (Snapshot::ResourceGroup(a), Snapshot::ResourceGroup(e)) => {
            diff_shared(&a.shared, &e.shared, &mut fields);
            if a.location != e.location {
                fields.push("location");
            }
        }
        (a, e) => {
            return Err(KindMismatch {
                actual: a.kind(),
                expected: e.kind(),
            })
        }
    }
    Ok(fields)
}

/// Structural equality of two snapshots of the same kind.
pub fn is_equal(actual: &Snapshot, expected: &Snapshot) -> Result<bool, KindMismatch> {
    Ok(diff(actual, expected)?.is_empty())
}

fn diff_shared(a: &Shared, e: &Shared, fields: &mut Vec<&'static str>) {
    if a.name != e.name {
        fields.push("name");
    }
    if a.tags != e.tags {
        fields.push("tags");
    }
    if a.identifier != e.identifier {
        fields.push("identifier");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ResourceGroupSnapshot, ScaleSetSnapshot};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn scale_set(identifier: &str, image: &str, capacity: u64) -> Snapshot {
        let mut tags = BTreeMap::new();
        tags.insert("cluster".to_string(), "kube".to_string());
        Snapshot::VmScaleSet(ScaleSetSnapshot {
            shared: Shared::new("kube-master", tags, identifier),
            image: image.to_string(),
            size: "Standard_DS2_v2".to_string(),
            capacity,
        })
    }

    fn group(location: &str) -> Snapshot {
        Snapshot::ResourceGroup(ResourceGroupSnapshot {
            shared: Shared::new("kube", BTreeMap::new(), "/rg/kube"),
            location: location.to_string(),
        })
    }

    #[test]
    fn test_equal_snapshots() {
        let a = scale_set("/vmss/1", "ubuntu-16.04-x64", 3);
        let e = scale_set("/vmss/1", "ubuntu-16.04-x64", 3);
        assert!(is_equal(&a, &e).unwrap());
    }

    #[test]
    fn test_observed_at_is_ignored() {
        let a = scale_set("/vmss/1", "ubuntu-16.04-x64", 3);
        let mut e = scale_set("/vmss/1", "ubuntu-16.04-x64", 3);
        if let Snapshot::VmScaleSet(s) = &mut e {
            s.shared.observed_at = Some(Utc.with_ymd_and_hms(2017, 1, 1, 0, 0, 0).unwrap());
        }
        assert!(is_equal(&a, &e).unwrap());
    }

    #[test]
    fn test_differences_are_not_errors() {
        let a = scale_set("", "", 0);
        let e = scale_set("/vmss/1", "ubuntu-16.04-x64", 3);
        assert_eq!(
            diff(&a, &e).unwrap(),
            vec!["identifier", "image", "capacity"]
        );
        assert!(!is_equal(&a, &e).unwrap());
    }

    #[test]
    fn test_comparison_is_symmetric() {
        let pairs = [
            (scale_set("/vmss/1", "a", 1), scale_set("/vmss/1", "a", 1)),
            (scale_set("/vmss/1", "a", 1), scale_set("/vmss/2", "a", 1)),
            (scale_set("", "a", 1), scale_set("", "b", 2)),
            (group("eastus"), group("westeurope")),
            (group("eastus"), group("eastus")),
        ];
        for (a, b) in &pairs {
            assert_eq!(is_equal(a, b).unwrap(), is_equal(b, a).unwrap());
        }
    }

    #[test]
    fn test_kind_mismatch_is_an_error() {
        let mismatch = is_equal(&group("eastus"), &scale_set("", "a", 1)).unwrap_err();
        assert_eq!(
            mismatch,
            KindMismatch {
                actual: ResourceKind::ResourceGroup,
                expected: ResourceKind::VmScaleSet,
            }
        );

        match mismatch.within("kube", "kube-master") {
            ReconcileError::KindMismatch {
                kind,
                cluster,
                resource,
                ..
            } => {
                assert_eq!(kind, ResourceKind::VmScaleSet);
                assert_eq!(cluster, "kube");
                assert_eq!(resource, "kube-master");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
