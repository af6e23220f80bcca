//! Offset-based composite fields: record/class/pair/tuple, and the
//! schema root (§4.3, "Record-like fields").

/// One declared member of a record-shaped field, in declaration order.
/// `name` already carries the reserved `:` prefix for base-class members
/// (§4.3, §6); `Field::create` is what applies that prefix.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    /// True for a base-class subobject rather than a named data member.
    pub is_base_class: bool,
}

/// A record/class/pair/tuple field, or the unnamed schema root. Owns no
/// columns of its own: every column belongs to some descendant primitive,
/// array, collection, variant, or nullable field.
#[derive(Debug, Clone, Default)]
pub struct RecordKind {
    pub members: Vec<Member>,
}
