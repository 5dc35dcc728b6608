//! Error types for reconciliation.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::provider::ProviderError;
use crate::resource::compare::KindMismatch;
use crate::resource::ResourceKind;

/// Errors surfaced by resource drivers and the reconciler.
///
/// Nothing here is retried internally. Each variant names the resource kind,
/// cluster and resource it concerns.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reading the actual state from the provider failed.
    #[error("{kind} {resource} (cluster {cluster}): provider query failed: {source}")]
    ProviderQuery {
        kind: ResourceKind,
        cluster: String,
        resource: String,
        #[source]
        source: ProviderError,
    },

    /// An abstract image or size has no provider mapping.
    #[error("{kind} {resource} (cluster {cluster}): {source}")]
    UnknownCatalogEntry {
        kind: ResourceKind,
        cluster: String,
        resource: String,
        #[source]
        source: CatalogError,
    },

    /// Create/update failed at the provider.
    #[error("{kind} {resource} (cluster {cluster}): apply failed: {source}")]
    Apply {
        kind: ResourceKind,
        cluster: String,
        resource: String,
        #[source]
        source: ProviderError,
    },

    /// The operation's precondition does not hold.
    #[error("{kind} {resource} (cluster {cluster}): {reason}")]
    Precondition {
        kind: ResourceKind,
        cluster: String,
        resource: String,
        reason: String,
    },

    /// Provider-side delete failed.
    #[error("{kind} {resource} (cluster {cluster}): delete failed: {source}")]
    Delete {
        kind: ResourceKind,
        cluster: String,
        resource: String,
        #[source]
        source: ProviderError,
    },

    /// A wired subnet or load balancer pool does not resolve in the cluster.
    #[error("{kind} {resource} (cluster {cluster}): unresolved reference {reference}")]
    UnresolvedReference {
        kind: ResourceKind,
        cluster: String,
        resource: String,
        reference: String,
    },

    /// A driver is bound to a server pool the cluster does not declare.
    #[error("{kind} {resource}: cluster {cluster} has no such server pool")]
    UnknownServerPool {
        kind: ResourceKind,
        cluster: String,
        resource: String,
    },

    /// A driver was handed a snapshot of another resource kind.
    #[error("{kind} {resource} (cluster {cluster}): {source}")]
    KindMismatch {
        kind: ResourceKind,
        cluster: String,
        resource: String,
        #[source]
        source: KindMismatch,
    },
}

impl ReconcileError {
    /// Resource kind the error concerns.
    pub fn kind(&self) -> ResourceKind {
        match self {
            ReconcileError::ProviderQuery { kind, .. }
            | ReconcileError::UnknownCatalogEntry { kind, .. }
            | ReconcileError::Apply { kind, .. }
            | ReconcileError::Precondition { kind, .. }
            | ReconcileError::Delete { kind, .. }
            | ReconcileError::UnresolvedReference { kind, .. }
            | ReconcileError::UnknownServerPool { kind, .. }
            | ReconcileError::KindMismatch { kind, .. } => *kind,
        }
    }

    /// Name of the resource the error concerns.
    pub fn resource(&self) -> &str {
        match self {
            ReconcileError::ProviderQuery { resource, .. }
            | ReconcileError::UnknownCatalogEntry { resource, .. }
            | ReconcileError::Apply { resource, .. }
            | ReconcileError::Precondition { resource, .. }
            | ReconcileError::Delete { resource, .. }
            | ReconcileError::UnresolvedReference { resource, .. }
            | ReconcileError::UnknownServerPool { resource, .. }
            | ReconcileError::KindMismatch { resource, .. } => resource,
        }
    }
}

/// Result type for reconciliation.
pub type Result<T> = std::result::Result<T, ReconcileError>;
