//! The reference-type lattice and the rules deciding when one type may stand
//! in for another.
//!
//! ```text
//!            any                func       extern
//!             |                  |           |
//!             eq               $func      noextern
//!           /    \               |
//!         i31    data          nofunc
//!               /    \
//!          struct    array
//!            |         |
//!         $struct   $array
//!             \       /
//!               none
//! ```


use crate::types::{CompositeType, GlobalType, HeapType, RefType, SubType, TableType, ValType};

/// Resolves a concrete heap type to its definition.
pub trait TypeLookup {
    fn sub_type(&self, index: u32) -> Option<&SubType>;
}

/// How an import's actual type is compared against the importer's
/// declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Same element type and same limits.
    Exact,
    /// Subtyping on element types and subsumption on limits.
    Subtype,
}

/// The top of the hierarchy a heap type lives in.
pub fn top_type(heap_type: HeapType, types: &impl TypeLookup) -> HeapType {
    match heap_type {
        HeapType::Func | HeapType::NoFunc => HeapType::Func,
        HeapType::Extern | HeapType::NoExtern => HeapType::Extern,
        HeapType::Concrete(index) => match types.sub_type(index).map(|sub| &sub.composite) {
            Some(CompositeType::Func(_)) => HeapType::Func,
            _ => HeapType::Any,
        },
        _ => HeapType::Any,
    }
}

fn abstract_subtype(sub: HeapType, sup: HeapType) -> bool {
    use HeapType::*;
    matches!(
        (sub, sup),
        (Eq | I31 | Data | Struct | Array, Any)
            | (I31 | Data | Struct | Array, Eq)
            | (Struct | Array, Data)
    )
}

pub fn heap_subtype(sub: HeapType, sup: HeapType, types: &impl TypeLookup) -> bool {
    if sub == sup {
        return true;
    }
    match sub {
        HeapType::None => top_type(sup, types) == HeapType::Any,
        HeapType::NoFunc => top_type(sup, types) == HeapType::Func,
        HeapType::NoExtern => top_type(sup, types) == HeapType::Extern,
        HeapType::Concrete(index) => concrete_subtype(index, sup, types),
        _ => abstract_subtype(sub, sup),
    }
}

fn concrete_subtype(index: u32, sup: HeapType, types: &impl TypeLookup) -> bool {
    let mut seen = Vec::new();
    let mut current = index;
    loop {
        let Some(def) = types.sub_type(current) else {
            return false;
        };
        let abstract_sup = match def.composite {
            CompositeType::Func(_) => HeapType::Func,
            CompositeType::Struct(_) => HeapType::Struct,
            CompositeType::Array(_) => HeapType::Array,
        };
        if sup == abstract_sup || abstract_subtype(abstract_sup, sup) {
            return true;
        }
        seen.push(current);
        match def.supertype {
            Some(next) if HeapType::Concrete(next) == sup => return true,
            Some(next) if !seen.contains(&next) => current = next,
            _ => return false,
        }
    }
}

pub fn ref_subtype(sub: &RefType, sup: &RefType, types: &impl TypeLookup) -> bool {
    (sup.nullable || !sub.nullable) && heap_subtype(sub.heap_type, sup.heap_type, types)
}

pub fn val_subtype(sub: &ValType, sup: &ValType, types: &impl TypeLookup) -> bool {
    match (sub, sup) {
        (ValType::Ref(sub), ValType::Ref(sup)) => ref_subtype(sub, sup, types),
        _ => sub == sup,
    }
}

/// `actual` limits fit a declaration: at least the declared minimum and, if the
/// declaration caps the size, a cap no larger than it.
pub fn limits_match(
    actual: (u32, Option<u32>),
    declared: (u32, Option<u32>),
    policy: MatchPolicy,
) -> bool {
    match policy {
        MatchPolicy::Exact => actual == declared,
        MatchPolicy::Subtype => {
            actual.0 >= declared.0
                && match (actual.1, declared.1) {
                    (_, None) => true,
                    (Some(actual_max), Some(declared_max)) => actual_max <= declared_max,
                    (None, Some(_)) => false,
                }
        }
    }
}

pub fn table_type_matches(
    actual: &TableType,
    declared: &TableType,
    policy: MatchPolicy,
    types: &impl TypeLookup,
) -> bool {
    let element = match policy {
        MatchPolicy::Exact => actual.element == declared.element,
        MatchPolicy::Subtype => ref_subtype(&actual.element, &declared.element, types),
    };
    element
        && limits_match(
            (actual.initial, actual.maximum),
            (declared.initial, declared.maximum),
            policy,
        )
}

/// Mutable globals are invariant; immutable ones are covariant.
pub fn global_type_matches(
    actual: &GlobalType,
    declared: &GlobalType,
    types: &impl TypeLookup,
) -> bool {
    if actual.mutable != declared.mutable {
        return false;
    }
    if actual.mutable {
        actual.ty == declared.ty
    } else {
        val_subtype(&actual.ty, &declared.ty, types)
    }
}

pub fn func_type_matches(
    actual: u32,
    declared: u32,
    policy: MatchPolicy,
    types: &impl TypeLookup,
) -> bool {
    match policy {
        MatchPolicy::Exact => actual == declared,
        MatchPolicy::Subtype => heap_subtype(
            HeapType::Concrete(actual),
            HeapType::Concrete(declared),
            types,
        ),
    }
}

/// Whether a value may be stored in a slot of type `declared`. `value` is the
/// exact heap type of the referenced object, or `None` for null.
pub fn value_admissible(
    value: Option<HeapType>,
    declared: &RefType,
    types: &impl TypeLookup,
) -> bool {
    match value {
        None => declared.nullable,
        Some(heap_type) => heap_subtype(heap_type, declared.heap_type, types),
    }
}
