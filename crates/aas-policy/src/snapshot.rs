// snapshot.rs - Immutable, shareable view of a parsed policy.
//
// A PolicySnapshot freezes a PolicyDocument behind an Arc. Cloning is a
// refcount bump, the contents can never change after construction, and the
// snapshot can cross threads freely. Validation, risk evaluation and the
// watch loop's "current" state all hold snapshots, never documents.

use std::ops::Deref;
use std::sync::Arc;

use crate::document::PolicyDocument;

#[derive(Debug, Clone, PartialEq)]
pub struct PolicySnapshot {
    inner: Arc<PolicyDocument>,
}

impl PolicySnapshot {
    /// Freeze a document. The document is moved in; later edits are impossible.
    pub fn from_document(document: PolicyDocument) -> Self {
        Self {
            inner: Arc::new(document),
        }
    }

    pub fn document(&self) -> &PolicyDocument {
        &self.inner
    }

    /// Whether two snapshots share the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Deref for PolicySnapshot {
    type Target = PolicyDocument;

    fn deref(&self) -> &PolicyDocument {
        &self.inner
    }
}

impl From<PolicyDocument> for PolicySnapshot {
    fn from(document: PolicyDocument) -> Self {
        Self::from_document(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_same_document() {
        let snap = PolicySnapshot::from_document(PolicyDocument::with_required_profiles());
        let copy = snap.clone();
        assert!(snap.ptr_eq(&copy));
        assert_eq!(copy.global.schema_version, 1);
        assert!(copy.has_profile("live_pilot"));
    }

    #[test]
    fn snapshot_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PolicySnapshot>();
    }
}
