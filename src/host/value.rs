//! Runtime values and the objects they refer to.

use std::cell::RefCell;
use std::rc::Rc;

use crate::compat::{value_admissible, TypeLookup};
use crate::error::{host_error, HostResult};
use crate::host::Store;
use crate::types::{
    FieldType, FuncType, GlobalType, HeapType, MemoryType, RefType, StorageType, TableType,
    ValType,
};
use crate::wat::WatEmitter;

pub const PAGE_SIZE: usize = 65536;
/// Largest memory the host will allocate, in pages.
pub const MAX_PAGES: u32 = 65536;
/// Largest table the host will allocate, in slots.
pub const MAX_TABLE_SIZE: u32 = 10_000_000;
/// Longest array `array.new` and `array.new_default` will allocate.
pub const MAX_ARRAY_LEN: u32 = 10_000_000;

/// The length operand of an array allocation, as a checked element count.
pub(crate) fn array_len(len: i32) -> HostResult<usize> {
    match u32::try_from(len) {
        Ok(len) if len <= MAX_ARRAY_LEN => Ok(len as usize),
        _ => Err(host_error!(
            Runtime,
            "requested new array is too large: {} elements",
            len as u32
        )),
    }
}

/// A struct or array. Fields of packed storage hold their zero-extended bits.
#[derive(Debug)]
pub struct GcObject {
    type_id: u32,
    values: RefCell<Vec<Val>>,
}

pub type Gc = Rc<GcObject>;

impl GcObject {
    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    pub fn len(&self) -> u32 {
        self.values.borrow().len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }

    pub fn get(&self, index: u32) -> HostResult<Val> {
        self.values
            .borrow()
            .get(index as usize)
            .cloned()
            .ok_or_else(|| host_error!(Runtime, "index {index} out of bounds"))
    }

    /// Packed fields read back sign-extended.
    pub fn get_signed(&self, store: &Store, index: u32) -> HostResult<Val> {
        let value = self.get(index)?;
        match (self.field_type(store, index)?.storage.packed_bits(), value) {
            (Some(bits), Val::I32(v)) => {
                let shift = 32 - bits;
                Ok(Val::I32((v << shift) >> shift))
            }
            (_, value) => Ok(value),
        }
    }

    pub fn set(&self, store: &Store, index: u32, value: Val) -> HostResult<()> {
        let field = self.field_type(store, index)?;
        if !field.mutable {
            return Err(host_error!(Type, "field {index} is immutable"));
        }
        let value = pack(&field.storage, value, store.types())?;
        let mut values = self.values.borrow_mut();
        match values.get_mut(index as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(host_error!(Runtime, "index {index} out of bounds")),
        }
    }

    fn field_type(&self, store: &Store, index: u32) -> HostResult<FieldType> {
        let def = store
            .types()
            .sub_type(self.type_id)
            .ok_or_else(|| host_error!(Type, "unknown type {}", self.type_id))?;
        let field = match (def.as_struct(), def.as_array()) {
            (Some(fields), _) => fields.get(index as usize).copied(),
            (_, Some(element)) => Some(*element),
            _ => None,
        };
        field.ok_or_else(|| host_error!(Runtime, "index {index} out of bounds"))
    }
}

fn pack(storage: &StorageType, value: Val, types: &impl TypeLookup) -> HostResult<Val> {
    match (storage.packed_bits(), storage) {
        (Some(bits), _) => match value {
            Val::I32(v) => Ok(Val::I32(v & ((1 << bits) - 1))),
            other => Err(host_error!(
                Type,
                "expected i32 for {} storage, got {other:?}",
                storage.to_wat()
            )),
        },
        (None, StorageType::Val(ty)) if value.matches(ty, types) => Ok(value),
        (None, _) => Err(host_error!(
            Type,
            "value is not valid for storage of type {}",
            storage.to_wat()
        )),
    }
}

#[derive(Debug)]
struct FuncData {
    type_id: u32,
    name: String,
}

/// A function reference. Identity is the allocation: two references are the
/// same function only if they come from the same export or host definition.
#[derive(Debug, Clone)]
pub struct Func(Rc<FuncData>);

impl Func {
    /// A host-defined function of the given signature.
    pub fn new(store: &mut Store, name: &str, ty: FuncType) -> HostResult<Func> {
        let type_id = store.register_func_type(ty)?;
        Ok(Func::from_parts(type_id, name))
    }

    pub(crate) fn from_parts(type_id: u32, name: &str) -> Func {
        Func(Rc::new(FuncData {
            type_id,
            name: name.to_string(),
        }))
    }

    pub fn type_id(&self) -> u32 {
        self.0.type_id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn ptr_eq(&self, other: &Func) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// An opaque value owned by the host, such as an embedder object.
#[derive(Debug, Clone)]
pub struct HostObject(Rc<str>);

impl HostObject {
    pub fn new(label: &str) -> Self {
        HostObject(Rc::from(label))
    }

    pub fn label(&self) -> &str {
        &self.0
    }

    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// The runtime category an `eqref` classifies into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqKind {
    I31,
    Data,
}

#[derive(Debug, Clone)]
pub enum Ref {
    Null,
    /// An unboxed 31-bit integer, kept sign-extended.
    I31(i32),
    Struct(Gc),
    Array(Gc),
    Func(Func),
    Host(HostObject),
    /// An `any` value seen from the extern side.
    Externalized(Box<Ref>),
    /// A host value seen from the `any` side.
    Internalized(HostObject),
}

impl Ref {
    pub fn i31(value: i32) -> Ref {
        Ref::I31((value << 1) >> 1)
    }

    pub fn new_struct(store: &Store, type_id: u32, fields: Vec<Val>) -> HostResult<Ref> {
        let types = store.types();
        let def = types
            .sub_type(type_id)
            .and_then(|sub| sub.as_struct())
            .ok_or_else(|| host_error!(Type, "type {type_id} is not a struct type"))?;
        if def.len() != fields.len() {
            return Err(host_error!(
                Type,
                "struct type {type_id} has {} fields, got {}",
                def.len(),
                fields.len()
            ));
        }
        let values = def
            .iter()
            .zip(fields)
            .map(|(field, value)| pack(&field.storage, value, types))
            .collect::<HostResult<Vec<_>>>()?;
        Ok(Ref::Struct(Rc::new(GcObject {
            type_id,
            values: RefCell::new(values),
        })))
    }

    pub fn new_array(store: &Store, type_id: u32, elements: Vec<Val>) -> HostResult<Ref> {
        let types = store.types();
        let element = types
            .sub_type(type_id)
            .and_then(|sub| sub.as_array())
            .ok_or_else(|| host_error!(Type, "type {type_id} is not an array type"))?;
        let values = elements
            .into_iter()
            .map(|value| pack(&element.storage, value, types))
            .collect::<HostResult<Vec<_>>>()?;
        Ok(Ref::Array(Rc::new(GcObject {
            type_id,
            values: RefCell::new(values),
        })))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Ref::Null)
    }

    /// The most precise heap type of the referenced value; `None` for null.
    pub fn heap_type(&self) -> Option<HeapType> {
        match self {
            Ref::Null => None,
            Ref::I31(_) => Some(HeapType::I31),
            Ref::Struct(gc) | Ref::Array(gc) => Some(HeapType::Concrete(gc.type_id)),
            Ref::Func(func) => Some(HeapType::Concrete(func.type_id())),
            Ref::Host(_) | Ref::Externalized(_) => Some(HeapType::Extern),
            Ref::Internalized(_) => Some(HeapType::Any),
        }
    }

    pub fn as_gc(&self) -> Option<&Gc> {
        match self {
            Ref::Struct(gc) | Ref::Array(gc) => Some(gc),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<&Func> {
        match self {
            Ref::Func(func) => Some(func),
            _ => None,
        }
    }

    /// `extern.convert_any`
    pub fn externalize(&self) -> HostResult<Ref> {
        match self {
            Ref::Null => Ok(Ref::Null),
            Ref::Internalized(host) => Ok(Ref::Host(host.clone())),
            Ref::I31(_) | Ref::Struct(_) | Ref::Array(_) => {
                Ok(Ref::Externalized(Box::new(self.clone())))
            }
            Ref::Func(_) | Ref::Host(_) | Ref::Externalized(_) => Err(host_error!(
                Type,
                "only anyref values can be externalized"
            )),
        }
    }

    /// `any.convert_extern`
    pub fn internalize(&self) -> HostResult<Ref> {
        match self {
            Ref::Null => Ok(Ref::Null),
            Ref::Externalized(inner) => Ok((**inner).clone()),
            Ref::Host(host) => Ok(Ref::Internalized(host.clone())),
            _ => Err(host_error!(
                Type,
                "only externref values can be internalized"
            )),
        }
    }

    /// Reference identity. Objects compare by allocation, i31 values by value.
    pub fn ref_eq(&self, other: &Ref) -> bool {
        match (self, other) {
            (Ref::Null, Ref::Null) => true,
            (Ref::I31(a), Ref::I31(b)) => a == b,
            (Ref::Struct(a), Ref::Struct(b)) | (Ref::Array(a), Ref::Array(b)) => Rc::ptr_eq(a, b),
            (Ref::Func(a), Ref::Func(b)) => a.ptr_eq(b),
            (Ref::Host(a), Ref::Host(b)) | (Ref::Internalized(a), Ref::Internalized(b)) => {
                a.ptr_eq(b)
            }
            (Ref::Externalized(a), Ref::Externalized(b)) => a.ref_eq(b),
            _ => false,
        }
    }

    /// Splits an `eqref` into i31 and data; anything else traps.
    pub fn classify(&self) -> HostResult<EqKind> {
        match self {
            Ref::I31(_) => Ok(EqKind::I31),
            Ref::Struct(_) | Ref::Array(_) => Ok(EqKind::Data),
            _ => Err(host_error!(Runtime, "unreachable")),
        }
    }

    /// `ref.test`
    pub fn test(&self, ty: &RefType, store: &Store) -> bool {
        value_admissible(self.heap_type(), ty, store.types())
    }

    /// `ref.cast`
    pub fn cast(&self, ty: &RefType, store: &Store) -> HostResult<Ref> {
        if self.test(ty, store) {
            Ok(self.clone())
        } else {
            Err(host_error!(Runtime, "illegal cast to {}", ty.to_wat()))
        }
    }

    pub fn i31_get_s(&self) -> HostResult<i32> {
        match self {
            Ref::I31(value) => Ok(*value),
            Ref::Null => Err(host_error!(Runtime, "dereferencing a null pointer")),
            _ => Err(host_error!(Runtime, "illegal cast to i31ref")),
        }
    }

    pub fn i31_get_u(&self) -> HostResult<i32> {
        self.i31_get_s().map(|value| value & 0x7FFF_FFFF)
    }
}

#[derive(Debug, Clone)]
pub enum Val {
    I32(i32),
    I64(i64),
    /// Raw bits, so that NaN payloads survive.
    F32(u32),
    F64(u64),
    Ref(Ref),
}

impl Val {
    /// The zero value of a type, if it has one.
    pub fn default_for(ty: &ValType) -> Option<Val> {
        match ty {
            ValType::I32 => Some(Val::I32(0)),
            ValType::I64 => Some(Val::I64(0)),
            ValType::F32 => Some(Val::F32(0)),
            ValType::F64 => Some(Val::F64(0)),
            ValType::Ref(ty) if ty.nullable => Some(Val::Ref(Ref::Null)),
            ValType::Ref(_) => None,
        }
    }

    pub fn matches(&self, ty: &ValType, types: &impl TypeLookup) -> bool {
        match (self, ty) {
            (Val::I32(_), ValType::I32)
            | (Val::I64(_), ValType::I64)
            | (Val::F32(_), ValType::F32)
            | (Val::F64(_), ValType::F64) => true,
            (Val::Ref(value), ValType::Ref(ty)) => value_admissible(value.heap_type(), ty, types),
            _ => false,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Val::I32(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<&Ref> {
        match self {
            Val::Ref(value) => Some(value),
            _ => None,
        }
    }
}

impl From<i32> for Val {
    fn from(value: i32) -> Self {
        Val::I32(value)
    }
}

impl From<Ref> for Val {
    fn from(value: Ref) -> Self {
        Val::Ref(value)
    }
}

#[derive(Debug)]
struct TableData {
    ty: TableType,
    /// The element type as the defining module wrote it, for messages.
    display: RefType,
    elements: Vec<Ref>,
}

/// A table shared between the host and any instance that imports it.
#[derive(Debug, Clone)]
pub struct Table(Rc<RefCell<TableData>>);

impl Table {
    /// A host-created table. `ty` is in the store's canonical type space.
    pub fn new(store: &Store, ty: TableType, init: Ref) -> HostResult<Table> {
        Table::with_display(store, ty, ty.element, init)
    }

    pub(crate) fn with_display(
        store: &Store,
        ty: TableType,
        display: RefType,
        init: Ref,
    ) -> HostResult<Table> {
        if ty.maximum.is_some_and(|maximum| ty.initial > maximum) {
            return Err(host_error!(
                Range,
                "initial table size {} exceeds the maximum",
                ty.initial
            ));
        }
        if ty.initial > MAX_TABLE_SIZE {
            return Err(host_error!(
                Range,
                "initial table size {} exceeds the limit {MAX_TABLE_SIZE}",
                ty.initial
            ));
        }
        if ty.initial > 0 && !value_admissible(init.heap_type(), &ty.element, store.types()) {
            return Err(host_error!(
                Type,
                "Argument 2 is invalid for table of type {}",
                display.to_wat()
            ));
        }
        Ok(Table(Rc::new(RefCell::new(TableData {
            ty,
            display,
            elements: vec![init; ty.initial as usize],
        }))))
    }

    /// The current type: the initial size is the current size.
    pub fn ty(&self) -> TableType {
        let data = self.0.borrow();
        TableType {
            initial: data.elements.len() as u32,
            ..data.ty
        }
    }

    pub fn size(&self) -> u32 {
        self.0.borrow().elements.len() as u32
    }

    pub fn get(&self, index: u32) -> HostResult<Ref> {
        let data = self.0.borrow();
        data.elements
            .get(index as usize)
            .cloned()
            .ok_or_else(|| {
                host_error!(
                    Range,
                    "table index {index} out of bounds (size {})",
                    data.elements.len()
                )
            })
    }

    pub fn set(&self, store: &Store, index: u32, value: Ref) -> HostResult<()> {
        let mut data = self.0.borrow_mut();
        let size = data.elements.len();
        if index as usize >= size {
            return Err(host_error!(
                Range,
                "table index {index} out of bounds (size {size})"
            ));
        }
        if !value_admissible(value.heap_type(), &data.ty.element, store.types()) {
            return Err(host_error!(
                Type,
                "Argument 1 is invalid for table of type {}",
                data.display.to_wat()
            ));
        }
        data.elements[index as usize] = value;
        Ok(())
    }

    /// Appends `delta` slots holding `init` and returns the previous size.
    pub fn grow(&self, store: &Store, delta: u32, init: Ref) -> HostResult<u32> {
        let mut data = self.0.borrow_mut();
        let size = data.elements.len() as u32;
        let limit = data.ty.maximum.unwrap_or(MAX_TABLE_SIZE).min(MAX_TABLE_SIZE);
        let new_size = size
            .checked_add(delta)
            .filter(|&new_size| new_size <= limit)
            .ok_or_else(|| host_error!(Range, "failed to grow table by {delta}"))?;
        if delta > 0 && !value_admissible(init.heap_type(), &data.ty.element, store.types()) {
            return Err(host_error!(
                Type,
                "Argument 1 is invalid for table of type {}",
                data.display.to_wat()
            ));
        }
        data.elements.resize(new_size as usize, init);
        Ok(size)
    }

    pub fn ptr_eq(&self, other: &Table) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug)]
struct GlobalData {
    ty: GlobalType,
    value: Val,
}

#[derive(Debug, Clone)]
pub struct Global(Rc<RefCell<GlobalData>>);

impl Global {
    pub fn new(store: &Store, ty: GlobalType, value: Val) -> HostResult<Global> {
        if !value.matches(&ty.ty, store.types()) {
            return Err(host_error!(
                Type,
                "value is not valid for a global of type {}",
                ty.to_wat()
            ));
        }
        Ok(Global(Rc::new(RefCell::new(GlobalData { ty, value }))))
    }

    pub fn ty(&self) -> GlobalType {
        self.0.borrow().ty
    }

    pub fn get(&self) -> Val {
        self.0.borrow().value.clone()
    }

    pub fn set(&self, store: &Store, value: Val) -> HostResult<()> {
        let mut data = self.0.borrow_mut();
        if !data.ty.mutable {
            return Err(host_error!(Type, "Can't set the value of an immutable global"));
        }
        if !value.matches(&data.ty.ty, store.types()) {
            return Err(host_error!(
                Type,
                "value is not valid for a global of type {}",
                data.ty.to_wat()
            ));
        }
        data.value = value;
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryData {
    maximum: Option<u32>,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Memory(Rc<RefCell<MemoryData>>);

impl Memory {
    pub fn new(ty: MemoryType) -> HostResult<Memory> {
        let limit = ty.maximum.unwrap_or(MAX_PAGES).min(MAX_PAGES);
        if ty.initial > limit {
            return Err(host_error!(
                Range,
                "initial memory size {} exceeds the maximum {limit}",
                ty.initial
            ));
        }
        Ok(Memory(Rc::new(RefCell::new(MemoryData {
            maximum: ty.maximum,
            bytes: vec![0; ty.initial as usize * PAGE_SIZE],
        }))))
    }

    pub fn ty(&self) -> MemoryType {
        let data = self.0.borrow();
        MemoryType {
            initial: (data.bytes.len() / PAGE_SIZE) as u32,
            maximum: data.maximum,
        }
    }

    /// Size in pages.
    pub fn size(&self) -> u32 {
        (self.0.borrow().bytes.len() / PAGE_SIZE) as u32
    }

    pub fn grow(&self, delta: u32) -> HostResult<u32> {
        let mut data = self.0.borrow_mut();
        let pages = (data.bytes.len() / PAGE_SIZE) as u32;
        let limit = data.maximum.unwrap_or(MAX_PAGES).min(MAX_PAGES);
        let new_pages = pages
            .checked_add(delta)
            .filter(|&new_pages| new_pages <= limit)
            .ok_or_else(|| host_error!(Range, "failed to grow memory by {delta} pages"))?;
        data.bytes.resize(new_pages as usize * PAGE_SIZE, 0);
        Ok(pages)
    }

    pub fn read(&self, offset: u32, len: u32) -> HostResult<Vec<u8>> {
        let data = self.0.borrow();
        let range = offset as usize..offset as usize + len as usize;
        data.bytes
            .get(range)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| host_error!(Range, "memory access out of bounds"))
    }

    pub fn write(&self, offset: u32, bytes: &[u8]) -> HostResult<()> {
        let mut data = self.0.borrow_mut();
        let range = offset as usize..offset as usize + bytes.len();
        match data.bytes.get_mut(range) {
            Some(target) => {
                target.copy_from_slice(bytes);
                Ok(())
            }
            None => Err(host_error!(Range, "memory access out of bounds")),
        }
    }
}
