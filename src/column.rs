//! The column abstraction: packed element types, representation sets, and
//! the narrow page sink/source interface that the field engine writes to
//! and reads from.
//!
//! This module deliberately does not know how bytes are packed on disk or
//! compressed; that is the page storage's job (see [`PageSink`]/
//! [`PageSource`]). A [`Column`] only knows the logical sequence of typed
//! elements it carries and the page handle it is bound to.

use crate::error::{FieldError, Result};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// The fixed set of on-disk column element types (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColumnType {
    #[default]
    Bit,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Real16,
    Real32,
    Real64,
    Index32,
    Index64,
    SplitIndex32,
    SplitIndex64,
    Switch,
    SplitInt16,
    SplitUInt16,
    SplitInt32,
    SplitUInt32,
    SplitInt64,
    SplitUInt64,
    SplitReal16,
    SplitReal32,
    SplitReal64,
}

impl ColumnType {
    /// The packed element size in bytes, independent of split encoding
    /// (split variants rearrange bytes, they don't change element width).
    pub fn packed_size(self) -> usize {
        use ColumnType::*;
        match self {
            Bit => 1,
            Int8 | UInt8 => 1,
            Int16 | UInt16 | Real16 | SplitInt16 | SplitUInt16 | SplitReal16 => 2,
            Int32 | UInt32 | Real32 | Index32 | SplitIndex32 | SplitInt32 | SplitUInt32
            | SplitReal32 | Switch => 4,
            Int64 | UInt64 | Real64 | Index64 | SplitIndex64 | SplitInt64 | SplitUInt64
            | SplitReal64 => 8,
        }
    }

    /// True for the byte-interleaved encodings that require a plain
    /// fallback when compression is disabled.
    pub fn is_split(self) -> bool {
        use ColumnType::*;
        matches!(
            self,
            SplitIndex32
                | SplitIndex64
                | SplitInt16
                | SplitUInt16
                | SplitInt32
                | SplitUInt32
                | SplitInt64
                | SplitUInt64
                | SplitReal16
                | SplitReal32
                | SplitReal64
        )
    }

    /// The plain (non-split) counterpart of a split type; identity for
    /// types that have none.
    pub fn plain_counterpart(self) -> ColumnType {
        use ColumnType::*;
        match self {
            SplitIndex32 => Index32,
            SplitIndex64 => Index64,
            SplitInt16 => Int16,
            SplitUInt16 => UInt16,
            SplitInt32 => Int32,
            SplitUInt32 => UInt32,
            SplitInt64 => Int64,
            SplitUInt64 => UInt64,
            SplitReal16 => Real16,
            SplitReal32 => Real32,
            SplitReal64 => Real64,
            other => other,
        }
    }
}

/// One packed element as it would sit in a column. The field engine only
/// ever produces/consumes elements that match a column's declared
/// [`ColumnType`]; the page storage (out of scope) is what would actually
/// serialize these to bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnElement {
    Bit(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Real32(f32),
    Real64(f64),
    Index32(u32),
    Index64(u64),
    /// `(tag, local-index)`, used by variant fields.
    Switch(u32, u32),
}

impl ColumnElement {
    pub fn as_u64(self) -> u64 {
        match self {
            ColumnElement::Bit(b) => b as u64,
            ColumnElement::Int8(v) => v as u64,
            ColumnElement::UInt8(v) => v as u64,
            ColumnElement::Int16(v) => v as u64,
            ColumnElement::UInt16(v) => v as u64,
            ColumnElement::Int32(v) => v as u64,
            ColumnElement::UInt32(v) => v as u64,
            ColumnElement::Int64(v) => v as u64,
            ColumnElement::UInt64(v) => v,
            ColumnElement::Real32(v) => v as u64,
            ColumnElement::Real64(v) => v as u64,
            ColumnElement::Index32(v) => v as u64,
            ColumnElement::Index64(v) => v,
            ColumnElement::Switch(_, idx) => idx as u64,
        }
    }
}

/// A serialization/deserialization representation sequence: one
/// [`ColumnType`] per physical column the field owns. Most fields have a
/// single-column representation; records have none (their columns are
/// their children's).
pub type Representation = SmallVec<[ColumnType; 2]>;

/// The ordered set of representations a field declares: the first
/// serialization entry is the default used on write, the rest are
/// deserialization-only fallbacks accepted on read (§3, "Column
/// representation set").
#[derive(Debug, Clone, Default)]
pub struct ColumnSet {
    serialization: Vec<Representation>,
    deserialize_only: Vec<Representation>,
}

impl ColumnSet {
    pub fn new(default: Representation) -> Self {
        ColumnSet { serialization: vec![default], deserialize_only: Vec::new() }
    }

    pub fn with_extra_serialization(mut self, repr: Representation) -> Self {
        self.serialization.push(repr);
        self
    }

    pub fn with_deserialize_only(mut self, repr: Representation) -> Self {
        self.deserialize_only.push(repr);
        self
    }

    pub fn default_representation(&self) -> &Representation {
        &self.serialization[0]
    }

    /// Serialization ∪ deserialization-only, the union a reader may match.
    pub fn deserialization_union(&self) -> impl Iterator<Item = &Representation> {
        self.serialization.iter().chain(self.deserialize_only.iter())
    }

    pub fn contains(&self, repr: &[ColumnType]) -> bool {
        self.deserialization_union().any(|r| r.as_slice() == repr)
    }

    /// Swap every split-encoded entry in the default representation for
    /// its plain counterpart (connect-to-sink step 2: write options may
    /// disable compression).
    pub fn plain_default(&self) -> Representation {
        self.default_representation().iter().map(|t| t.plain_counterpart()).collect()
    }
}

/// Write options passed at connect-to-sink time (§6).
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub compression_enabled: bool,
    pub use_split_encoding: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions { compression_enabled: true, use_split_encoding: true }
    }
}

/// Opaque handle to a column bound to a page sink or source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnHandle(pub u64);

/// The page sink interface consumed by the field engine on write (§6).
pub trait PageSink {
    fn create_column(&mut self, element_type: ColumnType, first_entry: u64) -> ColumnHandle;
    fn append(&mut self, handle: ColumnHandle, element: ColumnElement) -> std::io::Result<()>;
    fn commit_cluster(&mut self, handle: ColumnHandle) -> std::io::Result<()>;
}

/// The page source interface consumed by the field engine on read (§6).
pub trait PageSource {
    /// `(element_type, handle)` for every column registered under the
    /// given on-disk field id, via the descriptor.
    fn lookup_columns(&self, on_disk_id: u64) -> Vec<(ColumnType, ColumnHandle)>;
    fn lookup_type_version(&self, on_disk_id: u64) -> u32;
    fn read(&self, handle: ColumnHandle, global_index: u64) -> std::io::Result<ColumnElement>;
    fn read_v(&self, handle: ColumnHandle, global_index: u64, count: u64) -> std::io::Result<Vec<ColumnElement>>;
    /// `(cluster id, first item index, size)` for a collection's offset
    /// column at `global_index`.
    fn collection_info(&self, handle: ColumnHandle, global_index: u64) -> std::io::Result<(u64, u64, u64)>;
}

/// A column bound to a sink (write path). Tracks the running per-cluster
/// element count needed by collection/variant/nullable-sparse fields to
/// reset their local counters at [`Column::commit_cluster`].
///
/// Holds its sink via `Rc<RefCell<dyn PageSink>>` rather than a borrowed
/// reference: a field tree recurses through owned children, and threading
/// a borrow's lifetime through every node in that tree buys nothing here,
/// the way `near-store`'s `Store` holds its `Database` as `Arc<dyn
/// Database>` instead of a borrow for the same reason.
pub struct Column {
    pub element_type: ColumnType,
    handle: ColumnHandle,
    sink: Rc<RefCell<dyn PageSink>>,
    entries_in_cluster: u64,
}

impl Column {
    pub fn new(element_type: ColumnType, handle: ColumnHandle, sink: Rc<RefCell<dyn PageSink>>) -> Self {
        Column { element_type, handle, sink, entries_in_cluster: 0 }
    }

    pub fn append(&mut self, element: ColumnElement, field_name: &str) -> Result<()> {
        self.sink
            .borrow_mut()
            .append(self.handle, element)
            .map_err(|e| FieldError::io(field_name, e))?;
        self.entries_in_cluster += 1;
        Ok(())
    }

    pub fn entries_in_cluster(&self) -> u64 {
        self.entries_in_cluster
    }

    pub fn commit_cluster(&mut self, field_name: &str) -> Result<()> {
        self.sink
            .borrow_mut()
            .commit_cluster(self.handle)
            .map_err(|e| FieldError::io(field_name, e))?;
        self.entries_in_cluster = 0;
        Ok(())
    }

    pub fn packed_size(&self) -> usize {
        self.element_type.packed_size()
    }

    pub fn handle(&self) -> ColumnHandle {
        self.handle
    }
}

/// A column bound to a source (read path).
pub struct SourceColumn {
    pub element_type: ColumnType,
    handle: ColumnHandle,
    source: Rc<dyn PageSource>,
}

impl SourceColumn {
    pub fn new(element_type: ColumnType, handle: ColumnHandle, source: Rc<dyn PageSource>) -> Self {
        SourceColumn { element_type, handle, source }
    }

    pub fn read(&self, index: u64, field_name: &str) -> Result<ColumnElement> {
        self.source.read(self.handle, index).map_err(|e| FieldError::io(field_name, e))
    }

    pub fn read_v(&self, index: u64, count: u64, field_name: &str) -> Result<Vec<ColumnElement>> {
        self.source.read_v(self.handle, index, count).map_err(|e| FieldError::io(field_name, e))
    }

    pub fn collection_info(&self, index: u64, field_name: &str) -> Result<(u64, u64, u64)> {
        self.source.collection_info(self.handle, index).map_err(|e| FieldError::io(field_name, e))
    }

    pub fn handle(&self) -> ColumnHandle {
        self.handle
    }
}

/// An in-memory page sink/source pair, used only by this crate's own
/// tests to exercise the field engine end to end without a real page
/// storage backend.
pub mod mem {
    use super::*;

    #[derive(Default)]
    struct ColumnData {
        element_type: ColumnType,
        elements: Vec<ColumnElement>,
        cluster_boundaries: Vec<u64>,
    }

    /// An in-memory page store that can act as both sink and source: the
    /// same columns written during a sink phase are visible to a source
    /// phase constructed over it, mirroring round-tripping through a real
    /// file.
    #[derive(Default)]
    pub struct MemPageStore {
        columns: Vec<ColumnData>,
        by_id: HashMap<u64, Vec<usize>>,
        next_id: u64,
    }

    impl MemPageStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Registers a fresh run of columns under an on-disk field id, to
        /// be looked up later via [`PageSource::lookup_columns`].
        pub fn register_id(&mut self, column_indices: &[usize]) -> u64 {
            let id = self.next_id;
            self.next_id += 1;
            self.by_id.insert(id, column_indices.to_vec());
            id
        }

        /// Associates `handles` (already created via [`PageSink::create_column`])
        /// with `on_disk_id`, standing in for what a real container format's
        /// Descriptor (out of scope, §1) would persist when a sink-connected
        /// tree is finalized.
        pub fn adopt(&mut self, on_disk_id: u64, handles: &[ColumnHandle]) {
            self.by_id.insert(on_disk_id, handles.iter().map(|h| h.0 as usize).collect());
        }

        pub fn alloc_id(&mut self) -> u64 {
            let id = self.next_id;
            self.next_id += 1;
            id
        }
    }

    impl PageSink for MemPageStore {
        fn create_column(&mut self, element_type: ColumnType, _first_entry: u64) -> ColumnHandle {
            self.columns.push(ColumnData { element_type, elements: Vec::new(), cluster_boundaries: vec![0] });
            ColumnHandle((self.columns.len() - 1) as u64)
        }

        fn append(&mut self, handle: ColumnHandle, element: ColumnElement) -> std::io::Result<()> {
            self.columns[handle.0 as usize].elements.push(element);
            Ok(())
        }

        fn commit_cluster(&mut self, handle: ColumnHandle) -> std::io::Result<()> {
            let col = &mut self.columns[handle.0 as usize];
            col.cluster_boundaries.push(col.elements.len() as u64);
            Ok(())
        }
    }

    impl PageSource for MemPageStore {
        fn lookup_columns(&self, on_disk_id: u64) -> Vec<(ColumnType, ColumnHandle)> {
            match self.by_id.get(&on_disk_id) {
                Some(idxs) => idxs
                    .iter()
                    .map(|&i| (self.columns[i].element_type, ColumnHandle(i as u64)))
                    .collect(),
                None => Vec::new(),
            }
        }

        fn lookup_type_version(&self, _on_disk_id: u64) -> u32 {
            1
        }

        fn read(&self, handle: ColumnHandle, global_index: u64) -> std::io::Result<ColumnElement> {
            self.columns[handle.0 as usize]
                .elements
                .get(global_index as usize)
                .copied()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "index out of range"))
        }

        fn read_v(&self, handle: ColumnHandle, global_index: u64, count: u64) -> std::io::Result<Vec<ColumnElement>> {
            let col = &self.columns[handle.0 as usize];
            let start = global_index as usize;
            let end = start + count as usize;
            col.elements
                .get(start..end)
                .map(|s| s.to_vec())
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "range out of bounds"))
        }

        fn collection_info(&self, handle: ColumnHandle, global_index: u64) -> std::io::Result<(u64, u64, u64)> {
            let col = &self.columns[handle.0 as usize];
            let idx = global_index as usize;
            let end = col
                .elements
                .get(idx)
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "index out of range"))?
                .as_u64();
            let cluster = col
                .cluster_boundaries
                .iter()
                .rposition(|&b| b <= idx as u64)
                .unwrap_or(0) as u64;
            // Offsets are cluster-local (reset to 0 at every `CommitCluster`):
            // the first index of a cluster always begins at 0, regardless of
            // what the previous cluster's last offset was.
            let cluster_start = col.cluster_boundaries[cluster as usize];
            let begin = if idx as u64 == cluster_start { 0 } else { col.elements[idx - 1].as_u64() };
            Ok((cluster, begin, end - begin))
        }
    }
}
