//! The read-only cardinality projection (§4.3).

/// A read-only view over a collection field's offset column, yielding
/// just the per-entry item count instead of the items themselves.
/// `target` identifies which sibling/descendant collection this
/// projects; connecting it to a sink is unsupported (§4.3, "Non-goals").
#[derive(Debug, Clone, Copy, Default)]
pub struct CardinalityKind;
