//! Nullable (`optional<T>`/`unique_ptr<T>`) fields (§4.3).

/// Dense encoding stores one bit per entry (present/absent) plus the
/// child's own column written unconditionally-on-present, skipped
/// otherwise. Sparse encoding stores only an index column recording,
/// per present entry, the child's cluster-local slot.
///
/// Chosen once at connect-to-sink time from the child's packed size
/// (§4.3, "dense is chosen automatically when the item's on-disk element
/// size is ≤ 4 bytes, the size of a sparse index entry") and fixed for
/// the life of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullableEncoding {
    Dense,
    Sparse,
}

#[derive(Debug, Clone)]
pub struct NullableKind {
    pub encoding: NullableEncoding,
    /// Sparse only: present-slot count since the last `CommitCluster`.
    pub cluster_present: u64,
}

impl NullableKind {
    pub fn new(encoding: NullableEncoding) -> Self {
        NullableKind { encoding, cluster_present: 0 }
    }
}
