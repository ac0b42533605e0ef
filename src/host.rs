//! A reference host for built modules.
//!
//! The host does not execute function bodies. It instantiates a module,
//! links its imports, runs constant expressions and active segments, and then
//! lets the embedder work with tables, globals, memories and GC values under
//! the same type rules an engine applies.

mod instance;
mod value;
#[cfg(test)]
mod test;

use std::collections::HashMap;

use tracing::debug;

pub use instance::{Extern, Imports, Instance};
pub use value::{
    EqKind, Func, Gc, GcObject, Global, HostObject, Memory, Ref, Table, Val, MAX_ARRAY_LEN,
    MAX_PAGES, MAX_TABLE_SIZE, PAGE_SIZE,
};

use crate::compat::{MatchPolicy, TypeLookup};
use crate::error::{host_error, HostResult};
use crate::ir::TypeArena;
use crate::types::{CompositeType, FuncType, StorageType, SubType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub table_import_policy: MatchPolicy,
    pub func_import_policy: MatchPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            table_import_policy: MatchPolicy::Exact,
            func_import_policy: MatchPolicy::Subtype,
        }
    }
}

/// Canonical types shared by every instance of a store.
///
/// Recursion groups are compared structurally: two modules that define the
/// same group get the same canonical ids, so their references are
/// interchangeable.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: Vec<SubType>,
    groups: HashMap<Vec<SubType>, u32>,
}

impl TypeRegistry {
    pub fn len(&self) -> u32 {
        self.types.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Registers every group of `arena` and returns the canonical id of each
    /// module type index.
    pub fn register(&mut self, arena: &TypeArena) -> HostResult<Vec<u32>> {
        let mut canonical = Vec::with_capacity(arena.len() as usize);
        for (range, _) in arena.groups() {
            let len = range.end - range.start;
            // In-group references become group-relative, outside ones are
            // shifted past them so the two cannot collide.
            let mut key = Vec::with_capacity(len as usize);
            for index in range.clone() {
                let sub = arena.get(index).ok_or_else(|| {
                    host_error!(Validation, "type {index} is declared but never defined")
                })?;
                let mut forward = None;
                key.push(sub.map_type_indices(&mut |i| {
                    if range.contains(&i) {
                        i - range.start
                    } else if let Some(&id) = canonical.get(i as usize) {
                        id + len
                    } else {
                        forward.get_or_insert(i);
                        0
                    }
                }));
                if let Some(i) = forward {
                    return Err(host_error!(
                        Validation,
                        "type {index} refers to type {i} outside its recursion group before it is defined"
                    ));
                }
            }
            let base = match self.groups.get(&key) {
                Some(&base) => base,
                None => self.insert_group(key)?,
            };
            canonical.extend((0..len).map(|i| base + i));
        }
        Ok(canonical)
    }

    fn insert_group(&mut self, key: Vec<SubType>) -> HostResult<u32> {
        let base = self.len();
        let len = key.len() as u32;
        let resolved = key
            .iter()
            .map(|sub| sub.map_type_indices(&mut |i| if i < len { base + i } else { i - len }))
            .collect::<Vec<_>>();
        for (offset, sub) in resolved.iter().enumerate() {
            if let Some(supertype) = sub.supertype {
                let parent = match supertype.checked_sub(base) {
                    Some(i) if i < len => resolved.get(i as usize),
                    _ => self.types.get(supertype as usize),
                };
                check_supertype(base + offset as u32, sub, supertype, parent)?;
            }
        }
        debug!("registered {len} canonical types at {base}");
        self.types.extend(resolved);
        self.groups.insert(key, base);
        Ok(base)
    }
}

fn check_supertype(
    id: u32,
    sub: &SubType,
    supertype: u32,
    parent: Option<&SubType>,
) -> HostResult<()> {
    let Some(parent) = parent else {
        return Err(host_error!(Validation, "type {id} extends unknown type {supertype}"));
    };
    if parent.is_final {
        return Err(host_error!(Validation, "type {id} extends final type {supertype}"));
    }
    let same_kind = matches!(
        (&sub.composite, &parent.composite),
        (CompositeType::Func(_), CompositeType::Func(_))
            | (CompositeType::Struct(_), CompositeType::Struct(_))
            | (CompositeType::Array(_), CompositeType::Array(_))
    );
    if !same_kind {
        return Err(host_error!(
            Validation,
            "type {id} is not the same kind of type as its supertype {supertype}"
        ));
    }
    Ok(())
}

impl TypeLookup for TypeRegistry {
    fn sub_type(&self, index: u32) -> Option<&SubType> {
        self.types.get(index as usize)
    }
}

#[derive(Debug, Default)]
pub struct Store {
    config: StoreConfig,
    types: TypeRegistry,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        Store {
            config,
            types: TypeRegistry::default(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub(crate) fn register_types(&mut self, arena: &TypeArena) -> HostResult<Vec<u32>> {
        self.types.register(arena)
    }

    /// The canonical id of a standalone function type. Concrete references in
    /// `ty` must already be canonical ids.
    pub fn register_func_type(&mut self, ty: FuncType) -> HostResult<u32> {
        let key = vec![SubType::new(CompositeType::Func(ty)).map_type_indices(&mut |i| i + 1)];
        match self.types.groups.get(&key) {
            Some(&id) => Ok(id),
            None => self.types.insert_group(key),
        }
    }
}

fn string_array(store: &Store, value: &Ref) -> HostResult<(Gc, StorageType)> {
    let Ref::Array(array) = value else {
        return Err(host_error!(Type, "expected an array reference"));
    };
    let element = store
        .types()
        .sub_type(array.type_id())
        .and_then(|sub| sub.as_array())
        .map(|element| element.storage);
    match element {
        Some(storage @ (StorageType::I8 | StorageType::I16)) => Ok((array.clone(), storage)),
        _ => Err(host_error!(Type, "expected an array of i8 or i16")),
    }
}

/// Decodes `length` elements of an i16 (UTF-16) or i8 (Latin-1) array,
/// starting at `start`.
pub fn array_to_string(store: &Store, array: &Ref, start: u32, length: u32) -> HostResult<String> {
    let (array, storage) = string_array(store, array)?;
    let end = start
        .checked_add(length)
        .filter(|&end| end <= array.len())
        .ok_or_else(|| {
            host_error!(
                Range,
                "range {start}+{length} out of bounds for array of length {}",
                array.len()
            )
        })?;
    let mut units = Vec::with_capacity(length as usize);
    for index in start..end {
        let unit = array.get(index)?.as_i32().unwrap_or_default();
        units.push(unit as u16);
    }
    Ok(match storage {
        StorageType::I8 => units.iter().map(|&unit| char::from(unit as u8)).collect(),
        _ => String::from_utf16_lossy(&units),
    })
}

/// Builds a new array of the same type as `like` holding the code units of
/// `text`.
pub fn string_to_array(store: &Store, text: &str, like: &Ref) -> HostResult<Ref> {
    let (array, storage) = string_array(store, like)?;
    let units = match storage {
        StorageType::I8 => text
            .chars()
            .map(|c| match u8::try_from(c) {
                Ok(byte) => Ok(Val::I32(byte as i32)),
                Err(_) => Err(host_error!(Range, "{c:?} does not fit an i8 array")),
            })
            .collect::<HostResult<Vec<_>>>()?,
        _ => text.encode_utf16().map(|unit| Val::I32(unit as i32)).collect(),
    };
    Ref::new_array(store, array.type_id(), units)
}
