//! A field engine: the object-to-columns mapping layer of a columnar,
//! self-describing event-data store.
//!
//! A [`field::Field`] tree mirrors an application type's structure one
//! node per member/element, and knows how to connect itself to a
//! [`column::PageSink`] (write) or a [`column::PageSource`] (read),
//! append/read [`value::Value`]s, and iterate itself in schema order
//! (§4.5, [`schema::SchemaIter`]). Page storage, compression, and the
//! descriptor that maps on-disk ids to type names are external
//! collaborators this crate consumes through narrow traits rather than
//! implements — see each trait's doc comment for the boundary.
//!
//! Connecting, appending, and reading all log at `debug` level through
//! the `log` facade; callers choose a backend (`env_logger` in this
//! crate's own tests and examples).

pub mod column;
pub mod error;
pub mod field;
pub mod reflect;
pub mod schema;
pub mod value;

pub use column::{ColumnType, PageSink, PageSource, WriteOptions};
pub use error::{FieldError, FieldState, Result};
pub use field::Field;
pub use reflect::{Registry, TypeReflection};
pub use schema::SchemaIter;
pub use value::{BulkHandle, Value, ValueHandle, BULK_ALL};
