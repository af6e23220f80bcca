//! The type-name grammar and `Field::create` (§3, §4.3).
//!
//! A type name is either a primitive keyword, `string` (sugar for a
//! `char` collection), one of a handful of template forms, or a bare
//! identifier resolved through [`TypeReflection`].

use super::array::{BitsetKind, FixedArrayKind};
use super::cardinality::CardinalityKind;
use super::collection::{CollectionFlavor, CollectionKind};
use super::nullable::{NullableEncoding, NullableKind};
use super::primitive::PrimitiveKind;
use super::record::{Member, RecordKind};
use super::variant::VariantKind;
use super::{Field, FieldKind, FieldTraits};
use crate::error::{FieldError, Result};
use crate::reflect::TypeReflection;

pub fn create(type_name: &str, field_name: &str, reflection: &dyn TypeReflection) -> Result<Field> {
    let type_name = type_name.trim();

    if let Some(pk) = PrimitiveKind::from_type_name(type_name) {
        return Ok(Field::leaf(field_name, type_name, FieldKind::Primitive(pk), primitive_traits()));
    }

    if type_name == "string" {
        let item = Field::leaf("item", "char", FieldKind::Primitive(PrimitiveKind::Char), primitive_traits());
        let mut f = Field::composite(
            field_name,
            type_name,
            FieldKind::Collection(CollectionKind::new(CollectionFlavor::Vector)),
            vec![item],
        );
        f.type_alias = Some("string".to_string());
        return Ok(f);
    }

    if let Some((head, args)) = split_template(type_name) {
        return create_template(&head, &args, type_name, field_name, reflection);
    }

    // Bare identifier: resolve through reflection.
    let descriptor = reflection
        .resolve(type_name)
        .ok_or_else(|| FieldError::invalid_argument(field_name, format!("unknown type name '{type_name}'")))?;

    if let Some(underlying) = descriptor.enum_underlying {
        let child = create(&underlying, field_name, reflection)?;
        return Ok(Field::composite(field_name, type_name, FieldKind::Atomic, vec![child]));
    }

    let mut members = Vec::with_capacity(descriptor.members.len());
    let mut children = Vec::with_capacity(descriptor.members.len());
    for m in &descriptor.members {
        // Base-class children get a reserved `:` name prefix so they can't
        // collide with a data member of the same identifier (§4.3, §6).
        let child_name = if m.is_base_class { format!(":{}", m.name) } else { m.name.clone() };
        children.push(create(&m.type_name, &child_name, reflection)?);
        members.push(Member { name: child_name, is_base_class: m.is_base_class });
    }
    Ok(Field::composite(field_name, type_name, FieldKind::Record(RecordKind { members }), children))
}

fn primitive_traits() -> FieldTraits {
    let mut t = FieldTraits::empty();
    t.set(FieldTraits::TRIVIALLY_CONSTRUCTIBLE, true);
    t.set(FieldTraits::TRIVIALLY_DESTRUCTIBLE, true);
    t.set(FieldTraits::MAPPABLE, true);
    t.set(FieldTraits::SIMPLE, true);
    t
}

fn create_template(
    head: &str,
    args: &[String],
    full_name: &str,
    field_name: &str,
    reflection: &dyn TypeReflection,
) -> Result<Field> {
    match head {
        "vector" | "Vec" | "RVec" => {
            let flavor = if head == "RVec" { CollectionFlavor::RVec } else { CollectionFlavor::Vector };
            require_arity(args, 1, full_name, field_name)?;
            let item = create(&args[0], "item", reflection)?;
            Ok(Field::composite(field_name, full_name, FieldKind::Collection(CollectionKind::new(flavor)), vec![item]))
        }
        "proxied" => {
            require_arity(args, 1, full_name, field_name)?;
            let item = create(&args[0], "item", reflection)?;
            Ok(Field::composite(
                field_name,
                full_name,
                FieldKind::Collection(CollectionKind::new(CollectionFlavor::Proxied)),
                vec![item],
            ))
        }
        "set" => {
            require_arity(args, 1, full_name, field_name)?;
            let item = create(&args[0], "item", reflection)?;
            Ok(Field::composite(
                field_name,
                full_name,
                FieldKind::Collection(CollectionKind::new(CollectionFlavor::Set)),
                vec![item],
            ))
        }
        "array" => {
            require_arity(args, 2, full_name, field_name)?;
            let n: usize = args[1]
                .trim()
                .parse()
                .map_err(|_| FieldError::invalid_argument(field_name, format!("bad array size in '{full_name}'")))?;
            let item = create(&args[0], "item", reflection)?;
            let mut f = Field::composite(field_name, full_name, FieldKind::FixedArray(FixedArrayKind, n), vec![item]);
            f.repetition = n;
            Ok(f)
        }
        "bitset" => {
            require_arity(args, 1, full_name, field_name)?;
            let n: usize = args[0]
                .trim()
                .parse()
                .map_err(|_| FieldError::invalid_argument(field_name, format!("bad bitset size in '{full_name}'")))?;
            let mut f = Field::leaf(field_name, full_name, FieldKind::Bitset(BitsetKind, n), FieldTraits::empty());
            f.repetition = n;
            Ok(f)
        }
        "variant" => {
            if args.is_empty() {
                return Err(FieldError::invalid_argument(field_name, "variant must have at least one alternative"));
            }
            let mut children = Vec::with_capacity(args.len());
            for (i, a) in args.iter().enumerate() {
                children.push(create(a, &format!("alt{i}"), reflection)?);
            }
            let n = children.len();
            Ok(Field::composite(field_name, full_name, FieldKind::Variant(VariantKind::new(n)), children))
        }
        "optional" | "unique_ptr" => {
            require_arity(args, 1, full_name, field_name)?;
            let child = create(&args[0], "value", reflection)?;
            // Encoding is picked once the child's packed size is known, at
            // connect-to-sink time; default to dense until then.
            Ok(Field::composite(
                field_name,
                full_name,
                FieldKind::Nullable(NullableKind::new(NullableEncoding::Dense)),
                vec![child],
            ))
        }
        "atomic" => {
            require_arity(args, 1, full_name, field_name)?;
            let child = create(&args[0], field_name, reflection)?;
            Ok(Field::composite(field_name, full_name, FieldKind::Atomic, vec![child]))
        }
        "pair" => {
            require_arity(args, 2, full_name, field_name)?;
            let first = create(&args[0], "first", reflection)?;
            let second = create(&args[1], "second", reflection)?;
            let members = vec![
                Member { name: "first".to_string(), is_base_class: false },
                Member { name: "second".to_string(), is_base_class: false },
            ];
            Ok(Field::composite(field_name, full_name, FieldKind::Record(RecordKind { members }), vec![first, second]))
        }
        "tuple" => {
            if args.is_empty() {
                return Err(FieldError::invalid_argument(field_name, "tuple must have at least one element"));
            }
            let mut members = Vec::with_capacity(args.len());
            let mut children = Vec::with_capacity(args.len());
            for (i, a) in args.iter().enumerate() {
                let name = format!("_{i}");
                children.push(create(a, &name, reflection)?);
                members.push(Member { name, is_base_class: false });
            }
            Ok(Field::composite(field_name, full_name, FieldKind::Record(RecordKind { members }), children))
        }
        "cardinality" => {
            require_arity(args, 1, full_name, field_name)?;
            // args[0] names the target collection; the field engine does
            // not resolve the reference itself (§4.3, "Non-goals").
            let _ = &args[0];
            Ok(Field::leaf(field_name, full_name, FieldKind::Cardinality(CardinalityKind), FieldTraits::empty()))
        }
        other => Err(FieldError::invalid_argument(field_name, format!("unknown type template '{other}'"))),
    }
}

fn require_arity(args: &[String], n: usize, full_name: &str, field_name: &str) -> Result<()> {
    if args.len() != n {
        return Err(FieldError::invalid_argument(
            field_name,
            format!("'{full_name}' expects {n} type argument(s), found {}", args.len()),
        ));
    }
    Ok(())
}

/// Splits `head<a, b<c,d>, e>` into `("head", ["a", "b<c,d>", "e"])`,
/// respecting nested angle brackets when locating top-level commas.
/// Returns `None` for a bare identifier with no template arguments.
fn split_template(s: &str) -> Option<(String, Vec<String>)> {
    let open = s.find('<')?;
    if !s.ends_with('>') {
        return None;
    }
    let head = s[..open].trim().to_string();
    let inner = &s[open + 1..s.len() - 1];
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in inner.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth -= 1,
            ',' if depth == 0 => {
                args.push(inner[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    args.push(inner[start..].trim().to_string());
    Some((head, args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_nested_templates() {
        let (head, args) = split_template("variant<int32, vector<char>>").unwrap();
        assert_eq!(head, "variant");
        assert_eq!(args, vec!["int32".to_string(), "vector<char>".to_string()]);
    }

    #[test]
    fn bare_identifier_has_no_template() {
        assert!(split_template("MyStruct").is_none());
    }
}
