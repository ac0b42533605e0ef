
/// The heap half of a reference type.
///
/// `Concrete` names an entry of the type index space. Inside a host store the
/// same variant carries a canonical type id instead of a module-local index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapType {
    Any,
    Eq,
    I31,
    /// Either a struct or an array.
    Data,
    Struct,
    Array,
    None,
    Func,
    NoFunc,
    Extern,
    NoExtern,
    Concrete(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefType {
    pub nullable: bool,
    pub heap_type: HeapType,
}

impl RefType {
    pub const FUNCREF: RefType = RefType::nullable(HeapType::Func);
    pub const EXTERNREF: RefType = RefType::nullable(HeapType::Extern);
    pub const ANYREF: RefType = RefType::nullable(HeapType::Any);
    pub const EQREF: RefType = RefType::nullable(HeapType::Eq);
    pub const I31REF: RefType = RefType::nullable(HeapType::I31);
    pub const DATAREF: RefType = RefType::nullable(HeapType::Data);
    pub const STRUCTREF: RefType = RefType::nullable(HeapType::Struct);
    pub const ARRAYREF: RefType = RefType::nullable(HeapType::Array);
    pub const NULLREF: RefType = RefType::nullable(HeapType::None);
    pub const NULLFUNCREF: RefType = RefType::nullable(HeapType::NoFunc);
    pub const NULLEXTERNREF: RefType = RefType::nullable(HeapType::NoExtern);

    pub const fn nullable(heap_type: HeapType) -> Self {
        RefType {
            nullable: true,
            heap_type,
        }
    }

    pub const fn non_null(heap_type: HeapType) -> Self {
        RefType {
            nullable: false,
            heap_type,
        }
    }

    /// `(ref null $index)`
    pub const fn concrete_nullable(index: u32) -> Self {
        RefType::nullable(HeapType::Concrete(index))
    }

    /// `(ref $index)`
    pub const fn concrete(index: u32) -> Self {
        RefType::non_null(HeapType::Concrete(index))
    }

    pub fn type_index(&self) -> Option<u32> {
        match self.heap_type {
            HeapType::Concrete(index) => Some(index),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    Ref(RefType),
}

impl ValType {
    pub const FUNCREF: ValType = ValType::Ref(RefType::FUNCREF);
    pub const EXTERNREF: ValType = ValType::Ref(RefType::EXTERNREF);
    pub const ANYREF: ValType = ValType::Ref(RefType::ANYREF);
    pub const EQREF: ValType = ValType::Ref(RefType::EQREF);
    pub const I31REF: ValType = ValType::Ref(RefType::I31REF);
    pub const DATAREF: ValType = ValType::Ref(RefType::DATAREF);
    pub const STRUCTREF: ValType = ValType::Ref(RefType::STRUCTREF);
    pub const ARRAYREF: ValType = ValType::Ref(RefType::ARRAYREF);

    pub fn as_ref_type(&self) -> Option<RefType> {
        match self {
            ValType::Ref(ty) => Some(*ty),
            _ => None,
        }
    }
}

impl From<RefType> for ValType {
    fn from(ty: RefType) -> Self {
        ValType::Ref(ty)
    }
}

/// What a struct field or array element holds: a full value or a packed integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    I8,
    I16,
    Val(ValType),
}

impl StorageType {
    /// Number of significant bits for packed storage.
    pub fn packed_bits(&self) -> Option<u32> {
        match self {
            StorageType::I8 => Some(8),
            StorageType::I16 => Some(16),
            StorageType::Val(_) => None,
        }
    }

    pub fn unpacked(&self) -> ValType {
        match self {
            StorageType::I8 | StorageType::I16 => ValType::I32,
            StorageType::Val(ty) => *ty,
        }
    }
}

impl From<ValType> for StorageType {
    fn from(ty: ValType) -> Self {
        StorageType::Val(ty)
    }
}

impl From<RefType> for StorageType {
    fn from(ty: RefType) -> Self {
        StorageType::Val(ValType::Ref(ty))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldType {
    pub storage: StorageType,
    pub mutable: bool,
}

impl FieldType {
    pub fn new(storage: impl Into<StorageType>, mutable: bool) -> Self {
        FieldType {
            storage: storage.into(),
            mutable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

impl FuncType {
    pub fn new(
        params: impl IntoIterator<Item = ValType>,
        results: impl IntoIterator<Item = ValType>,
    ) -> Self {
        FuncType {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CompositeType {
    Func(FuncType),
    Struct(Vec<FieldType>),
    Array(FieldType),
}

/// A type section entry: a composite type plus its place in the declared
/// subtype hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubType {
    pub is_final: bool,
    pub supertype: Option<u32>,
    pub composite: CompositeType,
}

impl SubType {
    pub fn new(composite: CompositeType) -> Self {
        SubType {
            is_final: true,
            supertype: None,
            composite,
        }
    }

    pub fn as_func(&self) -> Option<&FuncType> {
        match &self.composite {
            CompositeType::Func(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&[FieldType]> {
        match &self.composite {
            CompositeType::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&FieldType> {
        match &self.composite {
            CompositeType::Array(element) => Some(element),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableType {
    pub element: RefType,
    pub initial: u32,
    pub maximum: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryType {
    pub initial: u32,
    pub maximum: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalType {
    pub ty: ValType,
    pub mutable: bool,
}

// Type index traversal. Serialization uses `for_each_type_index` to find
// unresolved references; the host uses `map_type_indices` to move a module's
// types into its canonical id space.

impl HeapType {
    pub fn for_each_type_index(&self, f: &mut impl FnMut(u32)) {
        if let HeapType::Concrete(index) = self {
            f(*index)
        }
    }

    pub fn map_type_indices(&self, f: &mut impl FnMut(u32) -> u32) -> Self {
        match self {
            HeapType::Concrete(index) => HeapType::Concrete(f(*index)),
            other => *other,
        }
    }
}

impl RefType {
    pub fn for_each_type_index(&self, f: &mut impl FnMut(u32)) {
        self.heap_type.for_each_type_index(f)
    }

    pub fn map_type_indices(&self, f: &mut impl FnMut(u32) -> u32) -> Self {
        RefType {
            nullable: self.nullable,
            heap_type: self.heap_type.map_type_indices(f),
        }
    }
}

impl ValType {
    pub fn for_each_type_index(&self, f: &mut impl FnMut(u32)) {
        if let ValType::Ref(ty) = self {
            ty.for_each_type_index(f)
        }
    }

    pub fn map_type_indices(&self, f: &mut impl FnMut(u32) -> u32) -> Self {
        match self {
            ValType::Ref(ty) => ValType::Ref(ty.map_type_indices(f)),
            other => *other,
        }
    }
}

impl FieldType {
    fn for_each_type_index(&self, f: &mut impl FnMut(u32)) {
        if let StorageType::Val(ty) = &self.storage {
            ty.for_each_type_index(f)
        }
    }

    fn map_type_indices(&self, f: &mut impl FnMut(u32) -> u32) -> Self {
        let storage = match &self.storage {
            StorageType::Val(ty) => StorageType::Val(ty.map_type_indices(f)),
            packed => *packed,
        };
        FieldType {
            storage,
            mutable: self.mutable,
        }
    }
}

impl SubType {
    pub fn for_each_type_index(&self, f: &mut impl FnMut(u32)) {
        if let Some(supertype) = self.supertype {
            f(supertype);
        }
        match &self.composite {
            CompositeType::Func(ty) => ty
                .params
                .iter()
                .chain(&ty.results)
                .for_each(|val| val.for_each_type_index(f)),
            CompositeType::Struct(fields) => {
                fields.iter().for_each(|field| field.for_each_type_index(f))
            }
            CompositeType::Array(element) => element.for_each_type_index(f),
        }
    }

    pub fn map_type_indices(&self, f: &mut impl FnMut(u32) -> u32) -> Self {
        let supertype = self.supertype.map(&mut *f);
        let composite = match &self.composite {
            CompositeType::Func(ty) => CompositeType::Func(FuncType {
                params: ty.params.iter().map(|val| val.map_type_indices(f)).collect(),
                results: ty.results.iter().map(|val| val.map_type_indices(f)).collect(),
            }),
            CompositeType::Struct(fields) => CompositeType::Struct(
                fields
                    .iter()
                    .map(|field| field.map_type_indices(f))
                    .collect(),
            ),
            CompositeType::Array(element) => CompositeType::Array(element.map_type_indices(f)),
        };
        SubType {
            is_final: self.is_final,
            supertype,
            composite,
        }
    }
}

impl TableType {
    pub fn map_type_indices(&self, f: &mut impl FnMut(u32) -> u32) -> Self {
        TableType {
            element: self.element.map_type_indices(f),
            ..*self
        }
    }
}

impl GlobalType {
    pub fn map_type_indices(&self, f: &mut impl FnMut(u32) -> u32) -> Self {
        GlobalType {
            ty: self.ty.map_type_indices(f),
            mutable: self.mutable,
        }
    }
}
