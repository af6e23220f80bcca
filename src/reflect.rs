//! The type reflection service boundary (§6).
//!
//! Production field engines of this shape resolve a type name string to a
//! structural description via a runtime reflection facility generated
//! from the host language's own type system. This crate treats that
//! service as an external collaborator (§1) behind the [`TypeReflection`]
//! trait, and ships only the minimal explicit-registration [`Registry`]
//! implementation the design notes (§9) call out as one valid backend
//! ("a build-time code generator can emit an implementation keyed by type
//! name") — enough to drive this crate's own tests, not a general-purpose
//! reflection system.

use crate::value::Value;
use std::collections::HashMap;

/// One data member of a record/class type, as resolved by reflection.
#[derive(Debug, Clone)]
pub struct MemberDescriptor {
    pub name: String,
    pub type_name: String,
    /// True for a base-class subobject rather than a named data member
    /// (§4.3, "children are split into two categories").
    pub is_base_class: bool,
}

/// The structural description of a named type, as resolved by reflection.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub members: Vec<MemberDescriptor>,
    /// For an enum wrapper: the underlying integer type name.
    pub enum_underlying: Option<String>,
}

/// A post-read transformation installed for one (class, on-disk version)
/// pair, e.g. a schema-evolution rule deriving a new member from an old
/// one. Receives and mutates the record's children in place.
pub type EvolutionRule = std::rc::Rc<dyn Fn(&mut Vec<Value>)>;

/// The reflection service's fixed method set (§6).
pub trait TypeReflection {
    fn resolve(&self, type_name: &str) -> Option<TypeDescriptor>;

    /// Rules to run after a read of `type_name` connected at on-disk
    /// version `on_disk_version`, given the field's current (in-code)
    /// version.
    fn evolution_rules(&self, type_name: &str, on_disk_version: u32, current_version: u32) -> Vec<EvolutionRule>;
}

/// An explicit-registration reflection backend.
///
/// Tests register the record types they need with [`Registry::register`]
/// before calling `Field::create`, the same way a code generator would
/// emit one `register` call per type found in a header.
#[derive(Default)]
pub struct Registry {
    types: HashMap<String, TypeDescriptor>,
    evolutions: HashMap<(String, u32), Vec<EvolutionRule>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: impl Into<String>, descriptor: TypeDescriptor) -> &mut Self {
        self.types.insert(type_name.into(), descriptor);
        self
    }

    /// Registers a rule to run when `type_name` is read back from
    /// `on_disk_version`.
    pub fn register_evolution(&mut self, type_name: impl Into<String>, on_disk_version: u32, rule: EvolutionRule) -> &mut Self {
        self.evolutions.entry((type_name.into(), on_disk_version)).or_default().push(rule);
        self
    }
}

impl TypeReflection for Registry {
    fn resolve(&self, type_name: &str) -> Option<TypeDescriptor> {
        self.types.get(type_name).cloned()
    }

    fn evolution_rules(&self, type_name: &str, on_disk_version: u32, current_version: u32) -> Vec<EvolutionRule> {
        if on_disk_version == current_version {
            return Vec::new();
        }
        self.evolutions.get(&(type_name.to_string(), on_disk_version)).cloned().unwrap_or_default()
    }
}
