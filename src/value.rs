//! In-memory value representation, and the owning/non-owning handles the
//! field engine hands back to callers.
//!
//! The source system this crate's domain is modeled on represents values
//! as raw, placement-constructed bytes behind a `void*`. A safe Rust field
//! engine instead represents every in-memory value as a [`Value`] tree:
//! one variant per field structure kind, recursively nested the same way
//! the on-disk columns are. `Generate`/`Bind`/`Append`/`Read` all operate
//! on `Value` instead of raw pointers.

use smallvec::SmallVec;

/// An in-memory value shaped like the field tree that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Index32(u32),
    Index64(u64),
    /// Children in declaration order, for record/class/pair/tuple/enum.
    Record(Vec<Value>),
    /// Exactly `N` elements, for fixed arrays.
    FixedArray(Vec<Value>),
    /// Word-backed bitset storage.
    Bitset(SmallVec<[u64; 1]>),
    /// Item values, for vector/RVec/proxied-collection/set.
    Collection(Vec<Value>),
    /// `tag == 0` is valueless; otherwise `tag` selects alternative
    /// `tag - 1` and `value` holds it.
    Variant { tag: u32, value: Option<Box<Value>> },
    /// `None` is absent (null pointer / empty optional).
    Nullable(Option<Box<Value>>),
    /// Transparent atomic wrapper.
    Atomic(Box<Value>),
}

impl Value {
    pub fn as_record(&self) -> &[Value] {
        match self {
            Value::Record(v) => v,
            _ => panic!("Value is not a record"),
        }
    }

    pub fn as_record_mut(&mut self) -> &mut Vec<Value> {
        match self {
            Value::Record(v) => v,
            _ => panic!("Value is not a record"),
        }
    }

    pub fn as_collection(&self) -> &[Value] {
        match self {
            Value::Collection(v) => v,
            _ => panic!("Value is not a collection"),
        }
    }

    pub fn as_collection_mut(&mut self) -> &mut Vec<Value> {
        match self {
            Value::Collection(v) => v,
            _ => panic!("Value is not a collection"),
        }
    }

    pub fn as_atomic_inner(&self) -> Option<&Value> {
        match self {
            Value::Atomic(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_nan_aware_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float32(a), Value::Float32(b)) => a.to_bits() == b.to_bits() || a == b,
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits() || a == b,
            (Value::Record(a), Value::Record(b)) | (Value::Collection(a), Value::Collection(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_nan_aware_eq(y))
            }
            (Value::FixedArray(a), Value::FixedArray(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_nan_aware_eq(y))
            }
            (Value::Nullable(a), Value::Nullable(b)) => match (a, b) {
                (Some(x), Some(y)) => x.is_nan_aware_eq(y),
                (None, None) => true,
                _ => false,
            },
            (Value::Variant { tag: ta, value: va }, Value::Variant { tag: tb, value: vb }) => {
                ta == tb
                    && match (va, vb) {
                        (Some(x), Some(y)) => x.is_nan_aware_eq(y),
                        (None, None) => true,
                        _ => false,
                    }
            }
            (Value::Atomic(a), Value::Atomic(b)) => a.is_nan_aware_eq(b),
            _ => self == other,
        }
    }
}

/// An owning or non-owning reference to a value (§3, "Value handle").
///
/// `Owned` is returned by `Field::generate`; `Borrowed` is returned by
/// `Field::bind`. Ownership is never transferred between the two: binding
/// never takes over an object's lifetime.
pub enum ValueHandle<'a> {
    Owned(Value),
    Borrowed(&'a mut Value),
}

impl<'a> ValueHandle<'a> {
    pub fn get(&self) -> &Value {
        match self {
            ValueHandle::Owned(v) => v,
            ValueHandle::Borrowed(v) => v,
        }
    }

    pub fn get_mut(&mut self) -> &mut Value {
        match self {
            ValueHandle::Owned(v) => v,
            ValueHandle::Borrowed(v) => v,
        }
    }

    pub fn into_owned(self) -> Value {
        match self {
            ValueHandle::Owned(v) => v,
            ValueHandle::Borrowed(v) => v.clone(),
        }
    }
}

/// A reusable cluster-local read buffer (§4.2, "Bulk handle").
///
/// Reused across calls to amortize allocation: a new range only triggers
/// a reset (and hence a reallocation-worthy resize) when it falls outside
/// `[first_index, first_index + values.len())` within the same cluster.
pub struct BulkHandle {
    pub first_index: u64,
    pub values: Vec<Value>,
    pub available: Vec<bool>,
    pub valid_count: usize,
    /// Field-owned scratch space for kinds that need to stash
    /// cross-call state (variable-length collections stash their inner
    /// item arrays here).
    pub aux: Vec<u8>,
}

impl BulkHandle {
    pub fn new() -> Self {
        BulkHandle { first_index: 0, values: Vec::new(), available: Vec::new(), valid_count: 0, aux: Vec::new() }
    }

    /// True when the handle already spans `[first_index, first_index +
    /// count)`.
    pub fn covers(&self, first_index: u64, count: usize) -> bool {
        self.first_index == first_index && self.values.len() == count
    }

    /// Resets the handle to a fresh range, destroying prior contents.
    pub fn reset(&mut self, first_index: u64, count: usize, default: Value) {
        self.first_index = first_index;
        self.values = vec![default; count];
        self.available = vec![false; count];
        self.valid_count = 0;
        self.aux.clear();
    }

    /// All requested (`mask_req`) slots are already available.
    pub fn fully_satisfies(&self, mask_req: &[bool]) -> bool {
        mask_req.iter().enumerate().all(|(i, &req)| !req || self.available[i])
    }

    /// Marks slot `i` available with `value`, bumping `valid_count` if it
    /// was not already counted.
    pub fn fill(&mut self, i: usize, value: Value) {
        if !self.available[i] {
            self.valid_count += 1;
        }
        self.values[i] = value;
        self.available[i] = true;
    }

    pub fn fill_all(&mut self, values: Vec<Value>) {
        self.valid_count = values.len();
        self.available = vec![true; values.len()];
        self.values = values;
    }
}

impl Default for BulkHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Sentinel bulk-read return: "every requested slot (and possibly more)
/// was filled, regardless of the request mask" (§4.2).
pub const BULK_ALL: i64 = -1;
