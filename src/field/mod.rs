//! The field base contract and the field kinds it dispatches to (§4.1,
//! §4.3).
//!
//! A [`Field`] is a single node in the recursive schema tree: it knows its
//! own on-disk shape (one of the fixed [`FieldKind`]s), owns zero or more
//! [`Column`]/[`SourceColumn`] handles, and owns its children outright
//! (no parent back-pointer is stored; every operation that would need one
//! — e.g. schema iteration — works top-down instead, see `DESIGN.md`).

pub mod array;
pub mod cardinality;
pub mod collection;
pub mod create;
pub mod nullable;
pub mod primitive;
pub mod record;
pub mod variant;

use crate::column::{Column, ColumnElement, ColumnSet, ColumnType, PageSink, PageSource, SourceColumn, WriteOptions};
use crate::error::{FieldError, FieldState, Result};
use crate::reflect::TypeReflection;
use crate::value::{BulkHandle, Value, ValueHandle, BULK_ALL};
use array::{BitsetKind, FixedArrayKind};
use cardinality::CardinalityKind;
use collection::{CollectionKind, UntypedCollectionWriterKind};
use log::debug;
use nullable::{NullableEncoding, NullableKind};
use primitive::PrimitiveKind;
use record::RecordKind;
use std::cell::RefCell;
use std::rc::Rc;
use variant::VariantKind;

/// Per-field capability bits (§3, "Field traits"). Hand-rolled rather than
/// pulled in from a bitflags crate: four bits do not earn a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldTraits(u8);

impl FieldTraits {
    pub const TRIVIALLY_CONSTRUCTIBLE: u8 = 1 << 0;
    pub const TRIVIALLY_DESTRUCTIBLE: u8 = 1 << 1;
    /// Maps 1:1 onto a single packed column (§3).
    pub const MAPPABLE: u8 = 1 << 2;
    /// `Append`/`Read` can go straight through the principal column with
    /// no per-value transformation (§4.1, "simple"). Demoted whenever a
    /// read callback is installed, restored when the last one is removed
    /// — unless that callback came from schema evolution (`DESIGN.md`,
    /// Open Question decisions).
    pub const SIMPLE: u8 = 1 << 3;

    pub fn empty() -> Self {
        FieldTraits(0)
    }

    pub fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u8, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub fn trivial_type(self) -> bool {
        self.has(Self::TRIVIALLY_CONSTRUCTIBLE) && self.has(Self::TRIVIALLY_DESTRUCTIBLE)
    }

    pub fn mappable(self) -> bool {
        self.has(Self::MAPPABLE)
    }

    pub fn simple(self) -> bool {
        self.has(Self::SIMPLE)
    }
}

/// A post-read transformation installed on a field (§4.4). `removable`
/// is `false` for callbacks installed by schema evolution: removing a
/// user callback can restore the `simple` fast path, removing an
/// evolution callback must not (`DESIGN.md`).
pub struct ReadCallback {
    pub id: u64,
    pub removable: bool,
    pub f: Rc<dyn Fn(&mut Value)>,
}

/// The field kind and its kind-specific state (§4.3).
#[derive(Clone)]
pub enum FieldKind {
    Record(RecordKind),
    Primitive(PrimitiveKind),
    FixedArray(FixedArrayKind, usize),
    Bitset(BitsetKind, usize),
    Collection(CollectionKind),
    UntypedCollectionWriter(UntypedCollectionWriterKind),
    Variant(VariantKind),
    Nullable(NullableKind),
    Cardinality(CardinalityKind),
    /// Transparent wrapper (`atomic<T>`, and enum-over-integer): delegates
    /// every operation to `children[0]` unchanged.
    Atomic,
}

/// One node of the recursive schema tree (§3, §4.1).
pub struct Field {
    name: String,
    type_name: String,
    type_alias: Option<String>,
    type_version: u32,
    traits: FieldTraits,
    /// `N` for `FixedArray`/`Bitset`; `1` for everything else.
    repetition: usize,
    on_disk_id: Option<u64>,
    state: FieldState,
    children: Vec<Field>,
    columns: Vec<Column>,
    source_columns: Vec<SourceColumn>,
    kind: FieldKind,
    read_callbacks: Vec<ReadCallback>,
    next_callback_id: u64,
}

impl Field {
    fn leaf(name: &str, type_name: &str, kind: FieldKind, traits: FieldTraits) -> Self {
        Field {
            name: name.to_string(),
            type_name: type_name.to_string(),
            type_alias: None,
            type_version: 1,
            traits,
            repetition: 1,
            on_disk_id: None,
            state: FieldState::Unconnected,
            children: Vec::new(),
            columns: Vec::new(),
            source_columns: Vec::new(),
            kind,
            read_callbacks: Vec::new(),
            next_callback_id: 0,
        }
    }

    fn composite(name: &str, type_name: &str, kind: FieldKind, children: Vec<Field>) -> Self {
        let mut f = Field::leaf(name, type_name, kind, FieldTraits::empty());
        f.children = children;
        f
    }

    /// Parses `type_name` and builds the corresponding field tree (§3,
    /// §4.3). Bare identifiers are resolved via `reflection`.
    pub fn create(type_name: &str, field_name: &str, reflection: &dyn TypeReflection) -> Result<Field> {
        create::create(type_name, field_name, reflection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The source-level sugar name this field was created under, if any
    /// (e.g. `"string"` for a `char` collection).
    pub fn type_alias(&self) -> Option<&str> {
        self.type_alias.as_deref()
    }

    pub fn type_version(&self) -> u32 {
        self.type_version
    }

    /// `N` for `array<T, N>`/`bitset<N>`; `1` for every other kind (§3).
    pub fn repetition(&self) -> usize {
        self.repetition
    }

    pub fn set_type_version(&mut self, version: u32) {
        self.type_version = version;
    }

    pub fn traits(&self) -> FieldTraits {
        self.traits
    }

    pub fn state(&self) -> FieldState {
        self.state
    }

    pub fn on_disk_id(&self) -> Option<u64> {
        self.on_disk_id
    }

    pub fn set_on_disk_id(&mut self, id: u64) {
        self.on_disk_id = Some(id);
    }

    pub fn children(&self) -> &[Field] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [Field] {
        &mut self.children
    }

    /// Deep-copies this field's schema — type info, traits, representation
    /// choice, and children — under `new_name` (§4.1, "Clone"). The
    /// on-disk id is preserved; state resets to unconnected and no columns
    /// or read callbacks are copied, matching `Create(f.typeName)` plus
    /// this field's own already-resolved shape.
    pub fn clone_as(&self, new_name: &str) -> Field {
        let mut traits = self.traits;
        traits.set(FieldTraits::SIMPLE, traits.mappable());
        Field {
            name: new_name.to_string(),
            type_name: self.type_name.clone(),
            type_alias: self.type_alias.clone(),
            type_version: self.type_version,
            traits,
            repetition: self.repetition,
            on_disk_id: self.on_disk_id,
            state: FieldState::Unconnected,
            children: self.children.iter().map(|c| c.clone_as(&c.name)).collect(),
            columns: Vec::new(),
            source_columns: Vec::new(),
            kind: self.kind.clone(),
            read_callbacks: Vec::new(),
            next_callback_id: 0,
        }
    }

    /// Walks this field and its descendants, collecting `(on_disk_id,
    /// column handles)` for every node that owns at least one column.
    /// A test harness uses this after [`Field::connect_to_sink`] to
    /// populate an in-memory page store's id-to-column mapping, the
    /// role a real container format's descriptor plays (`DESIGN.md`).
    pub fn collect_column_bindings(&self, out: &mut Vec<(u64, Vec<crate::column::ColumnHandle>)>) {
        if let Some(id) = self.on_disk_id {
            if !self.columns.is_empty() {
                out.push((id, self.columns.iter().map(Column::handle).collect()));
            }
        }
        for child in &self.children {
            child.collect_column_bindings(out);
        }
    }

    /// Copies on-disk ids from `other` into this field by matching child
    /// names, recursively. Members present in `self` but not in `other`
    /// are left with `on_disk_id: None` — new members a schema-evolved
    /// read-side tree adds since the data was written (§4.4).
    pub fn copy_on_disk_ids_from(&mut self, other: &Field) {
        self.on_disk_id = other.on_disk_id;
        for child in &mut self.children {
            if let Some(src_child) = other.children.iter().find(|c| c.name() == child.name()) {
                child.copy_on_disk_ids_from(src_child);
            }
        }
    }

    fn require_state(&self, expected: FieldState) -> Result<()> {
        if self.state != expected {
            return Err(FieldError::state_violation(self.name.clone(), self.state));
        }
        Ok(())
    }

    /// A fresh default-constructed value for this field (§4.1, "Generate").
    pub fn generate(&self) -> Value {
        match &self.kind {
            FieldKind::Primitive(pk) => pk.default_value(),
            FieldKind::Record(_) => Value::Record(self.children.iter().map(Field::generate).collect()),
            FieldKind::FixedArray(_, n) => Value::FixedArray(vec![self.children[0].generate(); *n]),
            FieldKind::Bitset(_, n) => Value::Bitset(smallvec::smallvec![0u64; n.div_ceil(64).max(1)]),
            FieldKind::Collection(_) | FieldKind::UntypedCollectionWriter(_) => Value::Collection(Vec::new()),
            FieldKind::Variant(_) => Value::Variant { tag: 0, value: None },
            FieldKind::Nullable(_) => Value::Nullable(None),
            FieldKind::Cardinality(_) => Value::Index64(0),
            FieldKind::Atomic => Value::Atomic(Box::new(self.children[0].generate())),
        }
    }

    /// Wraps caller-owned `value` as a non-owning handle (§4.1, "Bind").
    /// Unlike the placement-new binding this crate's domain is modeled on,
    /// there is no raw memory to place into: binding is simply "hand back
    /// a mutable view of what the caller already owns."
    pub fn bind<'a>(&self, value: &'a mut Value) -> ValueHandle<'a> {
        ValueHandle::Borrowed(value)
    }

    // ---- sink connection -------------------------------------------------

    /// Connects this field (and recursively its children) to `sink`,
    /// creating whatever columns its kind needs (§4.1, steps 1-4).
    /// `next_id` hands out on-disk field ids in the same pre-order every
    /// call will walk the tree in, standing in for what a real container
    /// format's descriptor would assign (`DESIGN.md`).
    pub fn connect_to_sink(&mut self, sink: Rc<RefCell<dyn PageSink>>, options: WriteOptions, next_id: &mut u64) -> Result<()> {
        self.require_state(FieldState::Unconnected)?;
        match &mut self.kind {
            FieldKind::Primitive(pk) => {
                let ty = pk.column_type(options.use_split_encoding && options.compression_enabled);
                let handle = sink.borrow_mut().create_column(ty, 0);
                self.columns.push(Column::new(ty, handle, sink));
                self.assign_id(next_id);
            }
            FieldKind::Bitset(_, _) => {
                let handle = sink.borrow_mut().create_column(ColumnType::Bit, 0);
                self.columns.push(Column::new(ColumnType::Bit, handle, sink));
                self.assign_id(next_id);
            }
            FieldKind::Record(_) | FieldKind::FixedArray(_, _) => {
                for child in &mut self.children {
                    child.connect_to_sink(sink.clone(), options, next_id)?;
                }
            }
            FieldKind::Atomic => {
                self.children[0].connect_to_sink(sink, options, next_id)?;
            }
            FieldKind::Collection(_) => {
                let ty = offset_column_type(&options);
                let handle = sink.borrow_mut().create_column(ty, 0);
                self.columns.push(Column::new(ty, handle, sink.clone()));
                self.assign_id(next_id);
                self.children[0].connect_to_sink(sink, options, next_id)?;
            }
            FieldKind::UntypedCollectionWriter(_) => {
                let ty = offset_column_type(&options);
                let handle = sink.borrow_mut().create_column(ty, 0);
                self.columns.push(Column::new(ty, handle, sink.clone()));
                self.assign_id(next_id);
                self.children[0].connect_to_sink(sink, options, next_id)?;
            }
            FieldKind::Variant(_) => {
                let handle = sink.borrow_mut().create_column(ColumnType::Switch, 0);
                self.columns.push(Column::new(ColumnType::Switch, handle, sink.clone()));
                self.assign_id(next_id);
                for child in &mut self.children {
                    child.connect_to_sink(sink.clone(), options, next_id)?;
                }
            }
            FieldKind::Nullable(nk) => {
                self.children[0].connect_to_sink(sink.clone(), options, next_id)?;
                let packed = self.children[0].packed_size();
                let encoding = if packed <= 4 { NullableEncoding::Dense } else { NullableEncoding::Sparse };
                nk.encoding = encoding;
                let ty = match encoding {
                    NullableEncoding::Dense => ColumnType::Bit,
                    NullableEncoding::Sparse => offset_column_type(&options),
                };
                let handle = sink.borrow_mut().create_column(ty, 0);
                self.columns.push(Column::new(ty, handle, sink));
                self.assign_id(next_id);
            }
            FieldKind::Cardinality(_) => {
                return Err(FieldError::unsupported("cardinality fields are read-only"));
            }
        }
        self.state = FieldState::ConnectedSink;
        self.recompute_simple();
        debug!("field '{}' ({}) connected to sink, on_disk_id={:?}", self.name, self.type_name, self.on_disk_id);
        Ok(())
    }

    fn assign_id(&mut self, next_id: &mut u64) {
        self.on_disk_id = Some(*next_id);
        *next_id += 1;
    }

    /// The size in bytes of this field's principal column element, or of
    /// its single child's for a transparent wrapper. Used to pick the
    /// nullable encoding (§4.3).
    fn packed_size(&self) -> usize {
        match &self.kind {
            FieldKind::Primitive(pk) => pk.value_size(),
            FieldKind::Bitset(_, n) => n.div_ceil(8).max(1),
            FieldKind::Atomic => self.children[0].packed_size(),
            _ => self.columns.first().map(|c| c.packed_size()).unwrap_or(8),
        }
    }

    // ---- source connection ------------------------------------------------

    /// True when neither this field nor any descendant has an on-disk id
    /// to connect to: an entirely new member added since the data was
    /// written (§4.4, schema evolution).
    fn is_absent_subtree(&self) -> bool {
        match &self.kind {
            FieldKind::Record(_) | FieldKind::FixedArray(_, _) => {
                !self.children.is_empty() && self.children.iter().all(Field::is_absent_subtree)
            }
            FieldKind::Atomic => self.children[0].is_absent_subtree(),
            _ => self.on_disk_id.is_none(),
        }
    }

    /// Connects this field (and recursively its children) to `source`.
    /// Fields whose [`Field::on_disk_id`] was never set (because they
    /// are new members absent from the on-disk type) are left
    /// unconnected; their reads fall back to [`Field::generate`]
    /// defaults, and `on_disk_version` is used to look up evolution
    /// rules to run after each read (§4.4).
    pub fn connect_to_source(&mut self, source: Rc<dyn PageSource>, on_disk_version: u32, reflection: &dyn TypeReflection) -> Result<()> {
        self.require_state(FieldState::Unconnected)?;
        if self.is_absent_subtree() {
            return Ok(());
        }
        match &mut self.kind {
            FieldKind::Primitive(pk) => {
                let id = self.on_disk_id.ok_or_else(|| FieldError::schema_mismatch(&self.name, "missing on-disk id"))?;
                let cols = source.lookup_columns(id);
                let (ty, handle) = cols.into_iter().next().ok_or_else(|| FieldError::schema_mismatch(&self.name, "no column for id"))?;
                let declared = ColumnSet::new(smallvec::smallvec![pk.column_type(true)])
                    .with_deserialize_only(smallvec::smallvec![pk.column_type(false)]);
                validate_representation(&self.name, ty, &declared)?;
                self.source_columns.push(SourceColumn::new(ty, handle, source));
            }
            FieldKind::Bitset(_, _) => {
                let id = self.on_disk_id.ok_or_else(|| FieldError::schema_mismatch(&self.name, "missing on-disk id"))?;
                let cols = source.lookup_columns(id);
                let (ty, handle) = cols.into_iter().next().ok_or_else(|| FieldError::schema_mismatch(&self.name, "no column for id"))?;
                validate_representation(&self.name, ty, &ColumnSet::new(smallvec::smallvec![ColumnType::Bit]))?;
                self.source_columns.push(SourceColumn::new(ty, handle, source));
            }
            FieldKind::Record(_) | FieldKind::FixedArray(_, _) => {
                for child in &mut self.children {
                    if !child.is_absent_subtree() {
                        child.connect_to_source(source.clone(), on_disk_version, reflection)?;
                    }
                }
            }
            FieldKind::Atomic => {
                self.children[0].connect_to_source(source, on_disk_version, reflection)?;
            }
            FieldKind::Collection(_) | FieldKind::UntypedCollectionWriter(_) => {
                let id = self.on_disk_id.ok_or_else(|| FieldError::schema_mismatch(&self.name, "missing on-disk id"))?;
                let cols = source.lookup_columns(id);
                let (ty, handle) = cols.into_iter().next().ok_or_else(|| FieldError::schema_mismatch(&self.name, "no column for id"))?;
                validate_representation(&self.name, ty, &offset_representation_set())?;
                self.source_columns.push(SourceColumn::new(ty, handle, source.clone()));
                self.children[0].connect_to_source(source, on_disk_version, reflection)?;
            }
            FieldKind::Variant(_) => {
                let id = self.on_disk_id.ok_or_else(|| FieldError::schema_mismatch(&self.name, "missing on-disk id"))?;
                let cols = source.lookup_columns(id);
                let (ty, handle) = cols.into_iter().next().ok_or_else(|| FieldError::schema_mismatch(&self.name, "no column for id"))?;
                validate_representation(&self.name, ty, &ColumnSet::new(smallvec::smallvec![ColumnType::Switch]))?;
                self.source_columns.push(SourceColumn::new(ty, handle, source.clone()));
                for child in &mut self.children {
                    child.connect_to_source(source.clone(), on_disk_version, reflection)?;
                }
            }
            FieldKind::Nullable(_) => {
                let id = self.on_disk_id.ok_or_else(|| FieldError::schema_mismatch(&self.name, "missing on-disk id"))?;
                let cols = source.lookup_columns(id);
                let (ty, handle) = cols.into_iter().next().ok_or_else(|| FieldError::schema_mismatch(&self.name, "no column for id"))?;
                let declared = ColumnSet::new(smallvec::smallvec![ColumnType::Bit])
                    .with_deserialize_only(smallvec::smallvec![ColumnType::SplitIndex64])
                    .with_deserialize_only(smallvec::smallvec![ColumnType::Index64]);
                validate_representation(&self.name, ty, &declared)?;
                if let FieldKind::Nullable(nk) = &mut self.kind {
                    nk.encoding = if ty == ColumnType::Bit { NullableEncoding::Dense } else { NullableEncoding::Sparse };
                }
                self.source_columns.push(SourceColumn::new(ty, handle, source.clone()));
                self.children[0].connect_to_source(source, on_disk_version, reflection)?;
            }
            FieldKind::Cardinality(_) => {
                let id = self.on_disk_id.ok_or_else(|| FieldError::schema_mismatch(&self.name, "missing on-disk id"))?;
                let cols = source.lookup_columns(id);
                let (ty, handle) = cols.into_iter().next().ok_or_else(|| FieldError::schema_mismatch(&self.name, "no column for id"))?;
                validate_representation(&self.name, ty, &offset_representation_set())?;
                self.source_columns.push(SourceColumn::new(ty, handle, source));
            }
        }
        self.state = FieldState::ConnectedSource;
        self.recompute_simple();
        if matches!(self.kind, FieldKind::Record(_)) {
            let rules = reflection.evolution_rules(&self.type_name, on_disk_version, self.type_version);
            if !rules.is_empty() {
                debug!("field '{}' ({}) installing {} schema-evolution callback(s), on-disk version {} vs current {}", self.name, self.type_name, rules.len(), on_disk_version, self.type_version);
            }
            for rule in rules {
                self.add_read_callback_inner(rule_to_callback(rule), false);
            }
        }
        debug!("field '{}' ({}) connected to source, on_disk_id={:?}", self.name, self.type_name, self.on_disk_id);
        Ok(())
    }

    fn recompute_simple(&mut self) {
        let simple = self.traits.mappable() && self.read_callbacks.is_empty();
        self.traits.set(FieldTraits::SIMPLE, simple);
    }

    // ---- write path --------------------------------------------------------

    /// Appends one value for this field (§4.1, "Append"). Returns the
    /// number of bytes written to the principal column, for callers that
    /// track on-disk growth.
    pub fn append(&mut self, value: &Value) -> Result<usize> {
        self.require_state(FieldState::ConnectedSink)?;
        match &mut self.kind {
            FieldKind::Primitive(pk) => {
                let element = pk.to_element(value, &self.name)?;
                self.columns[0].append(element, &self.name)?;
                Ok(self.columns[0].packed_size())
            }
            FieldKind::Bitset(_, n) => {
                let bits = match value {
                    Value::Bitset(words) => words.clone(),
                    _ => return Err(FieldError::invalid_argument(&self.name, "expected a bitset value")),
                };
                for i in 0..*n {
                    let word = bits.get(i / 64).copied().unwrap_or(0);
                    let bit = (word >> (i % 64)) & 1 != 0;
                    self.columns[0].append(ColumnElement::Bit(bit), &self.name)?;
                }
                Ok(n.div_ceil(8).max(1))
            }
            FieldKind::Record(_) => {
                let children_values = value.as_record();
                if children_values.len() != self.children.len() {
                    return Err(FieldError::invalid_argument(&self.name, "record value arity mismatch"));
                }
                let mut total = 0;
                for (child, v) in self.children.iter_mut().zip(children_values) {
                    total += child.append(v)?;
                }
                Ok(total)
            }
            FieldKind::FixedArray(_, n) => {
                let items = match value {
                    Value::FixedArray(v) => v,
                    _ => return Err(FieldError::invalid_argument(&self.name, "expected a fixed-array value")),
                };
                if items.len() != *n {
                    return Err(FieldError::invalid_argument(&self.name, "fixed-array arity mismatch"));
                }
                let mut total = 0;
                for item in items {
                    total += self.children[0].append(item)?;
                }
                Ok(total)
            }
            FieldKind::Atomic => self.children[0].append(value.as_atomic_inner().ok_or_else(|| {
                FieldError::invalid_argument(&self.name, "expected an atomic value")
            })?),
            FieldKind::Collection(ck) => {
                let items = value.as_collection();
                for item in items {
                    self.children[0].append(item)?;
                }
                ck.cluster_items += items.len() as u64;
                self.columns[0].append(ColumnElement::Index64(ck.cluster_items), &self.name)?;
                Ok(self.columns[0].packed_size())
            }
            FieldKind::UntypedCollectionWriter(_) => {
                Err(FieldError::unsupported("use append_item on an untyped collection writer"))
            }
            FieldKind::Variant(vk) => {
                let (tag, inner) = match value {
                    Value::Variant { tag, value } => (*tag, value),
                    _ => return Err(FieldError::invalid_argument(&self.name, "expected a variant value")),
                };
                let local_index = if tag == 0 {
                    0
                } else {
                    let alt = tag as usize - 1;
                    if alt >= self.children.len() {
                        return Err(FieldError::invalid_argument(&self.name, "variant tag out of range"));
                    }
                    let inner_value = inner.as_deref().ok_or_else(|| {
                        FieldError::invalid_argument(&self.name, "non-zero variant tag requires a value")
                    })?;
                    self.children[alt].append(inner_value)?;
                    let idx = vk.cluster_local_index[alt];
                    vk.cluster_local_index[alt] += 1;
                    idx as u32
                };
                self.columns[0].append(ColumnElement::Switch(tag, local_index), &self.name)?;
                Ok(self.columns[0].packed_size())
            }
            FieldKind::Nullable(nk) => {
                let present = match value {
                    Value::Nullable(v) => v,
                    _ => return Err(FieldError::invalid_argument(&self.name, "expected a nullable value")),
                };
                match (nk.encoding, present) {
                    (NullableEncoding::Dense, Some(v)) => {
                        self.children[0].append(v)?;
                        self.columns[0].append(ColumnElement::Bit(true), &self.name)?;
                    }
                    (NullableEncoding::Dense, None) => {
                        let default = self.children[0].generate();
                        self.children[0].append(&default)?;
                        self.columns[0].append(ColumnElement::Bit(false), &self.name)?;
                    }
                    (NullableEncoding::Sparse, Some(v)) => {
                        self.children[0].append(v)?;
                        nk.cluster_present += 1;
                        self.columns[0].append(ColumnElement::Index64(nk.cluster_present), &self.name)?;
                    }
                    (NullableEncoding::Sparse, None) => {
                        self.columns[0].append(ColumnElement::Index64(nk.cluster_present), &self.name)?;
                    }
                }
                Ok(self.columns[0].packed_size())
            }
            FieldKind::Cardinality(_) => Err(FieldError::unsupported("cardinality fields are read-only")),
        }
    }

    /// Appends one item to an untyped collection writer and closes the
    /// current entry's offset (§4.3). Call once per item, then this
    /// implicitly records one entry per call to [`Field::close_entry`].
    pub fn append_item(&mut self, item: &Value) -> Result<()> {
        self.require_state(FieldState::ConnectedSink)?;
        match &mut self.kind {
            FieldKind::UntypedCollectionWriter(uk) => {
                self.children[0].append(item)?;
                uk.cluster_items += 1;
                Ok(())
            }
            _ => Err(FieldError::invalid_argument(&self.name, "append_item is only valid on an untyped collection writer")),
        }
    }

    /// Closes the current entry of an untyped collection writer, writing
    /// the accumulated item count as this entry's offset.
    pub fn close_entry(&mut self) -> Result<()> {
        self.require_state(FieldState::ConnectedSink)?;
        match &self.kind {
            FieldKind::UntypedCollectionWriter(uk) => {
                let count = uk.cluster_items;
                self.columns[0].append(ColumnElement::Index64(count), &self.name)?;
                Ok(())
            }
            _ => Err(FieldError::invalid_argument(&self.name, "close_entry is only valid on an untyped collection writer")),
        }
    }

    /// Flushes per-cluster state (§5): forwards to the page sink for
    /// every owned column and resets collection/variant/nullable-sparse
    /// local counters, recursively.
    pub fn commit_cluster(&mut self) -> Result<()> {
        if !self.columns.is_empty() {
            debug!("field '{}' committing cluster, {} entries", self.name, self.columns[0].entries_in_cluster());
        }
        for column in &mut self.columns {
            column.commit_cluster(&self.name)?;
        }
        match &mut self.kind {
            FieldKind::Collection(ck) => ck.cluster_items = 0,
            FieldKind::UntypedCollectionWriter(uk) => uk.cluster_items = 0,
            FieldKind::Variant(vk) => vk.cluster_local_index.iter_mut().for_each(|c| *c = 0),
            FieldKind::Nullable(nk) => nk.cluster_present = 0,
            _ => {}
        }
        for child in &mut self.children {
            child.commit_cluster()?;
        }
        Ok(())
    }

    // ---- read path ----------------------------------------------------------

    /// Reads one value at `index`, applying any installed read callbacks
    /// (§4.1, "Read"; §4.4).
    pub fn read(&self, index: u64) -> Result<Value> {
        self.require_state(FieldState::ConnectedSource)?;
        let mut value = self.read_raw(index)?;
        for cb in &self.read_callbacks {
            (cb.f)(&mut value);
        }
        Ok(value)
    }

    fn read_raw(&self, index: u64) -> Result<Value> {
        match &self.kind {
            FieldKind::Primitive(pk) => {
                let element = self.source_columns[0].read(index, &self.name)?;
                pk.from_element(element, &self.name)
            }
            FieldKind::Bitset(_, n) => {
                let mut words = smallvec::smallvec![0u64; n.div_ceil(64).max(1)];
                for i in 0..*n {
                    let element = self.source_columns[0].read(index * (*n as u64) + i as u64, &self.name)?;
                    if let ColumnElement::Bit(true) = element {
                        words[i / 64] |= 1 << (i % 64);
                    }
                }
                Ok(Value::Bitset(words))
            }
            FieldKind::Record(_) => {
                if self.children.is_empty() {
                    return Ok(Value::Record(Vec::new()));
                }
                let mut out = Vec::with_capacity(self.children.len());
                for child in &self.children {
                    out.push(if child.state == FieldState::ConnectedSource { child.read(index)? } else { child.generate() });
                }
                Ok(Value::Record(out))
            }
            FieldKind::FixedArray(_, n) => {
                let mut items = Vec::with_capacity(*n);
                for i in 0..*n {
                    items.push(self.children[0].read(index * (*n as u64) + i as u64)?);
                }
                Ok(Value::FixedArray(items))
            }
            FieldKind::Atomic => Ok(Value::Atomic(Box::new(self.children[0].read(index)?))),
            FieldKind::Collection(_) | FieldKind::UntypedCollectionWriter(_) => {
                let (_, first_item, size) = self.source_columns[0].collection_info(index, &self.name)?;
                let mut items = Vec::with_capacity(size as usize);
                for i in 0..size {
                    items.push(self.children[0].read(first_item + i)?);
                }
                Ok(Value::Collection(items))
            }
            FieldKind::Variant(_) => {
                let element = self.source_columns[0].read(index, &self.name)?;
                let (tag, local_index) = match element {
                    ColumnElement::Switch(tag, local_index) => (tag, local_index),
                    _ => return Err(FieldError::schema_mismatch(&self.name, "switch column held a non-switch element")),
                };
                if tag == 0 {
                    Ok(Value::Variant { tag: 0, value: None })
                } else {
                    let alt = tag as usize - 1;
                    let inner = self.children[alt].read(local_index as u64)?;
                    Ok(Value::Variant { tag, value: Some(Box::new(inner)) })
                }
            }
            FieldKind::Nullable(nk) => match nk.encoding {
                NullableEncoding::Dense => {
                    let element = self.source_columns[0].read(index, &self.name)?;
                    let present = matches!(element, ColumnElement::Bit(true));
                    if present {
                        Ok(Value::Nullable(Some(Box::new(self.children[0].read(index)?))))
                    } else {
                        Ok(Value::Nullable(None))
                    }
                }
                // The sparse index column is cluster-local just like a
                // collection's offset column, so the same cluster-boundary
                // aware lookup (`GetCollectionInfo`) resolves "begin"
                // without having to special-case index 0 of every cluster.
                NullableEncoding::Sparse => {
                    let (_, begin, size) = self.source_columns[0].collection_info(index, &self.name)?;
                    if size == 0 {
                        Ok(Value::Nullable(None))
                    } else {
                        Ok(Value::Nullable(Some(Box::new(self.children[0].read(begin)?))))
                    }
                }
            },
            FieldKind::Cardinality(_) => {
                let (_, _, size) = self.source_columns[0].collection_info(index, &self.name)?;
                Ok(Value::Index64(size))
            }
        }
    }

    /// Fills `bulk` with values for `[first_index, first_index + mask
    /// .len())`, honoring `mask` (`true` = requested) and reusing whatever
    /// of `bulk`'s prior contents already covers the range (§4.2). Returns
    /// [`BULK_ALL`] when every slot ended up filled regardless of the
    /// mask, else the count of newly filled slots. Dispatches to the
    /// documented per-kind overrides: `simple` fields vectorize through
    /// the principal column, cardinality always fills everything, and
    /// everything else falls back to the per-index default.
    pub fn bulk_read(&self, first_index: u64, mask: &[bool], bulk: &mut BulkHandle) -> Result<i64> {
        self.require_state(FieldState::ConnectedSource)?;
        if !bulk.covers(first_index, mask.len()) {
            bulk.reset(first_index, mask.len(), self.generate());
        }
        if bulk.fully_satisfies(mask) {
            return Ok(0);
        }
        if self.traits.simple() {
            return self.bulk_read_simple(first_index, mask.len(), bulk);
        }
        match &self.kind {
            FieldKind::Cardinality(_) => self.bulk_read_cardinality(first_index, mask.len(), bulk),
            FieldKind::Collection(_) | FieldKind::UntypedCollectionWriter(_) => self.bulk_read_collection(first_index, mask, bulk),
            _ => self.bulk_read_default(first_index, mask, bulk),
        }
    }

    /// Simple-field override (§4.2): a single vectorized column read
    /// instead of one `Read` per slot, ignoring `mask` entirely since
    /// reading the whole contiguous range is cheaper than masking it.
    fn bulk_read_simple(&self, first_index: u64, count: usize, bulk: &mut BulkHandle) -> Result<i64> {
        let pk = match &self.kind {
            FieldKind::Primitive(pk) => *pk,
            _ => return self.bulk_read_default(first_index, &vec![true; count], bulk),
        };
        let elements = self.source_columns[0].read_v(first_index, count as u64, &self.name)?;
        let values = elements.into_iter().map(|e| pk.from_element(e, &self.name)).collect::<Result<Vec<_>>>()?;
        bulk.fill_all(values);
        Ok(BULK_ALL)
    }

    /// Cardinality override (§4.2): read the offset column and compute
    /// per-entry differences, filling every slot regardless of `mask`.
    fn bulk_read_cardinality(&self, first_index: u64, count: usize, bulk: &mut BulkHandle) -> Result<i64> {
        let mut values = Vec::with_capacity(count);
        for i in 0..count {
            let (_, _, size) = self.source_columns[0].collection_info(first_index + i as u64, &self.name)?;
            values.push(Value::Index64(size));
        }
        bulk.fill_all(values);
        Ok(BULK_ALL)
    }

    /// Variable-length-collection override (§4.2): stashes each newly
    /// read slot's cluster-local item-array end offset in `bulk.aux` so a
    /// later masked call over the same range can tell a filled slot's
    /// boundary apart without re-deriving it from `GetCollectionInfo`.
    fn bulk_read_collection(&self, first_index: u64, mask: &[bool], bulk: &mut BulkHandle) -> Result<i64> {
        if bulk.aux.len() != mask.len() * 8 {
            bulk.aux = vec![0u8; mask.len() * 8];
        }
        let mut newly_filled = 0i64;
        for (i, &requested) in mask.iter().enumerate() {
            if requested && !bulk.available[i] {
                let (_, begin, size) = self.source_columns[0].collection_info(first_index + i as u64, &self.name)?;
                bulk.aux[i * 8..i * 8 + 8].copy_from_slice(&(begin + size).to_le_bytes());
                let mut items = Vec::with_capacity(size as usize);
                for k in 0..size {
                    items.push(self.children[0].read(begin + k)?);
                }
                bulk.fill(i, Value::Collection(items));
                newly_filled += 1;
            }
        }
        if mask.iter().all(|&m| m) {
            Ok(BULK_ALL)
        } else {
            Ok(newly_filled)
        }
    }

    /// Default impl (§4.2): loop per requested slot, invoking `Read`.
    fn bulk_read_default(&self, first_index: u64, mask: &[bool], bulk: &mut BulkHandle) -> Result<i64> {
        let mut newly_filled = 0i64;
        for (i, &requested) in mask.iter().enumerate() {
            if requested && !bulk.available[i] {
                let value = self.read(first_index + i as u64)?;
                bulk.fill(i, value);
                newly_filled += 1;
            }
        }
        if mask.iter().all(|&m| m) {
            Ok(BULK_ALL)
        } else {
            Ok(newly_filled)
        }
    }

    /// Splits a value into non-owning handles to its immediate children
    /// (§4.1, §4.3, "Split"; testable property #8): leaves return none,
    /// composites return one handle per immediate child (not a recursive
    /// leaf flatten), and a variant returns exactly one handle for its
    /// active alternative (none when valueless).
    pub fn split<'a>(&self, value: &'a Value) -> Vec<&'a Value> {
        match (&self.kind, value) {
            (FieldKind::Record(_), Value::Record(children)) => children.iter().collect(),
            (FieldKind::FixedArray(_, _), Value::FixedArray(items)) => items.iter().collect(),
            (FieldKind::Atomic, Value::Atomic(inner)) => vec![inner.as_ref()],
            (FieldKind::Collection(_) | FieldKind::UntypedCollectionWriter(_), Value::Collection(items)) => items.iter().collect(),
            (FieldKind::Variant(_), Value::Variant { value, .. }) => match value {
                Some(inner) => vec![inner.as_ref()],
                None => Vec::new(),
            },
            (FieldKind::Nullable(_), Value::Nullable(inner)) => match inner {
                Some(v) => vec![v.as_ref()],
                None => Vec::new(),
            },
            // Primitive, bitset, and cardinality fields are leaves: they
            // map onto their own column directly, with nothing further to
            // split into.
            _ => Vec::new(),
        }
    }

    // ---- read callbacks -------------------------------------------------

    pub fn add_read_callback(&mut self, f: Rc<dyn Fn(&mut Value)>) -> u64 {
        self.add_read_callback_inner(f, true)
    }

    fn add_read_callback_inner(&mut self, f: Rc<dyn Fn(&mut Value)>, removable: bool) -> u64 {
        let id = self.next_callback_id;
        self.next_callback_id += 1;
        self.read_callbacks.push(ReadCallback { id, removable, f });
        self.recompute_simple();
        id
    }

    /// Removes the callback with `id`. Returns `Ok(false)` if it was
    /// installed by schema evolution and cannot be removed (`DESIGN.md`).
    pub fn remove_read_callback(&mut self, id: u64) -> Result<bool> {
        match self.read_callbacks.iter().position(|c| c.id == id) {
            Some(pos) if self.read_callbacks[pos].removable => {
                self.read_callbacks.remove(pos);
                self.recompute_simple();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(FieldError::invalid_argument(&self.name, format!("no read callback with id {id}"))),
        }
    }
}

fn rule_to_callback(rule: crate::reflect::EvolutionRule) -> Rc<dyn Fn(&mut Value)> {
    Rc::new(move |v: &mut Value| {
        if let Value::Record(children) = v {
            rule(children);
        }
    })
}

fn offset_column_type(options: &WriteOptions) -> ColumnType {
    if options.use_split_encoding && options.compression_enabled {
        ColumnType::SplitIndex64
    } else {
        ColumnType::Index64
    }
}

/// The offset-column representation shared by collections, the untyped
/// collection writer, and the read-only cardinality projection.
fn offset_representation_set() -> ColumnSet {
    ColumnSet::new(smallvec::smallvec![ColumnType::SplitIndex64])
        .with_deserialize_only(smallvec::smallvec![ColumnType::Index64])
}

/// Connect-to-source step 2: verify `found` is one of the representations
/// `declared` by the field (serialization set ∪ deserialization-only
/// extras). Error kind: schema-mismatch.
fn validate_representation(field: &str, found: ColumnType, declared: &ColumnSet) -> Result<()> {
    if declared.contains(&[found]) {
        Ok(())
    } else {
        Err(FieldError::schema_mismatch(field, format!("on-disk column type {found:?} is not among this field's declared representations")))
    }
}
