use std::fmt::{Display, Formatter};
use std::ops::Range;

use crate::compat::TypeLookup;
use crate::instruction::{ConstExpr, Instruction};
use crate::types::{GlobalType, MemoryType, RefType, SubType, TableType, ValType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExternKind {
    Func,
    Table,
    Memory,
    Global,
}

impl Display for ExternKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternKind::Func => write!(f, "function"),
            ExternKind::Table => write!(f, "table"),
            ExternKind::Memory => write!(f, "memory"),
            ExternKind::Global => write!(f, "global"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TypeSlot {
    Declared,
    Defined(SubType),
}

/// The shared type index space.
///
/// Slots may be declared before they are defined so that types can refer to
/// themselves and to each other; serialization rejects slots that stay empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeArena {
    slots: Vec<TypeSlot>,
    rec_groups: Vec<Range<u32>>,
    open_group: Option<u32>,
}

impl TypeArena {
    pub fn len(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&SubType> {
        match self.slots.get(index as usize)? {
            TypeSlot::Defined(sub) => Some(sub),
            TypeSlot::Declared => None,
        }
    }

    pub fn is_defined(&self, index: u32) -> bool {
        self.get(index).is_some()
    }

    pub(crate) fn declare(&mut self) -> u32 {
        self.slots.push(TypeSlot::Declared);
        self.len() - 1
    }

    pub(crate) fn push(&mut self, sub: SubType) -> u32 {
        self.slots.push(TypeSlot::Defined(sub));
        self.len() - 1
    }

    pub(crate) fn slot_mut(&mut self, index: u32) -> Option<&mut TypeSlot> {
        self.slots.get_mut(index as usize)
    }

    pub(crate) fn find_singleton(&self, sub: &SubType) -> Option<u32> {
        (0..self.len()).find(|&index| {
            !self.in_explicit_group(index) && self.get(index).is_some_and(|t| t == sub)
        })
    }

    pub(crate) fn open_group(&self) -> Option<u32> {
        self.open_group
    }

    pub(crate) fn start_group(&mut self) -> bool {
        if self.open_group.is_some() {
            return false;
        }
        self.open_group = Some(self.len());
        true
    }

    pub(crate) fn end_group(&mut self) -> bool {
        let Some(start) = self.open_group.take() else {
            return false;
        };
        self.rec_groups.push(start..self.len());
        true
    }

    fn in_explicit_group(&self, index: u32) -> bool {
        self.rec_groups.iter().any(|group| group.contains(&index))
    }

    /// Recursion groups in index order. A type outside an explicit group forms
    /// a group of its own unless it reaches forward: then it is merged with
    /// every type up to the highest index reachable from the span, so forward
    /// and mutual references encode without a declared `rec`. The flag tells
    /// whether the group is written as a `rec`.
    pub fn groups(&self) -> Vec<(Range<u32>, bool)> {
        let len = self.len();
        let mut groups = Vec::new();
        let mut index = 0;
        while index < len {
            let explicit = self
                .rec_groups
                .iter()
                .find(|group| group.start == index && !group.is_empty());
            if let Some(group) = explicit {
                groups.push((group.clone(), true));
                index = group.end;
                continue;
            }
            let mut end = index + 1;
            let mut cursor = index;
            while cursor < end {
                if let Some(sub) = self.get(cursor) {
                    sub.for_each_type_index(&mut |target| {
                        if target >= end && target < len {
                            end = target + 1;
                        }
                    });
                }
                // An explicit group the span runs into is taken whole.
                if let Some(group) = self
                    .rec_groups
                    .iter()
                    .find(|group| group.start < end && group.end > end)
                {
                    end = group.end;
                }
                cursor += 1;
            }
            groups.push((index..end, end - index > 1));
            index = end;
        }
        groups
    }
}

impl TypeLookup for TypeArena {
    fn sub_type(&self, index: u32) -> Option<&SubType> {
        self.get(index)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub type_index: u32,
    pub locals: Vec<ValType>,
    pub body: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportDesc {
    Func(u32),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

impl ImportDesc {
    pub fn kind(&self) -> ExternKind {
        match self {
            ImportDesc::Func(_) => ExternKind::Func,
            ImportDesc::Table(_) => ExternKind::Table,
            ImportDesc::Memory(_) => ExternKind::Memory,
            ImportDesc::Global(_) => ExternKind::Global,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub desc: ImportDesc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub kind: ExternKind,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub ty: TableType,
    pub init: Option<ConstExpr>,
}

/// How a defined table gets its initial contents.
#[derive(Debug, Clone, PartialEq)]
pub enum TableInit {
    /// Every slot starts with the value of one expression.
    Uniform(ConstExpr),
    /// One expression per slot; the list must cover the initial size.
    PerSlot(Vec<ConstExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalDef {
    pub ty: GlobalType,
    pub init: ConstExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementMode {
    Active { table: u32, offset: ConstExpr },
    Passive,
    Declarative,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementItems {
    Functions(Vec<u32>),
    Expressions(Vec<ConstExpr>),
}

impl ElementItems {
    pub fn len(&self) -> usize {
        match self {
            ElementItems::Functions(functions) => functions.len(),
            ElementItems::Expressions(exprs) => exprs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every entry as a constant expression.
    pub fn to_exprs(&self) -> Vec<ConstExpr> {
        match self {
            ElementItems::Functions(functions) => {
                functions.iter().map(|&f| ConstExpr::ref_func(f)).collect()
            }
            ElementItems::Expressions(exprs) => exprs.clone(),
        }
    }
}

impl From<Vec<u32>> for ElementItems {
    fn from(functions: Vec<u32>) -> Self {
        ElementItems::Functions(functions)
    }
}

impl From<Vec<ConstExpr>> for ElementItems {
    fn from(exprs: Vec<ConstExpr>) -> Self {
        ElementItems::Expressions(exprs)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementSegment {
    pub mode: ElementMode,
    pub element_type: RefType,
    pub items: ElementItems,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataMode {
    Active { memory: u32, offset: ConstExpr },
    Passive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub mode: DataMode,
    pub bytes: Vec<u8>,
}

/// Everything a module declares, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub types: TypeArena,
    pub imports: Vec<Import>,
    pub functions: Vec<FunctionDef>,
    pub tables: Vec<TableDef>,
    pub memories: Vec<MemoryType>,
    pub globals: Vec<GlobalDef>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elements: Vec<ElementSegment>,
    pub data: Vec<DataSegment>,
}

impl Module {
    pub fn imported_count(&self, kind: ExternKind) -> u32 {
        self.imports
            .iter()
            .filter(|import| import.desc.kind() == kind)
            .count() as u32
    }

    pub fn defined_count(&self, kind: ExternKind) -> u32 {
        let count = match kind {
            ExternKind::Func => self.functions.len(),
            ExternKind::Table => self.tables.len(),
            ExternKind::Memory => self.memories.len(),
            ExternKind::Global => self.globals.len(),
        };
        count as u32
    }

    /// Size of an index space: imports first, then definitions.
    pub fn index_space(&self, kind: ExternKind) -> u32 {
        self.imported_count(kind) + self.defined_count(kind)
    }

    pub fn function_type_index(&self, function: u32) -> Option<u32> {
        let imported = self
            .imports
            .iter()
            .filter_map(|import| match import.desc {
                ImportDesc::Func(type_index) => Some(type_index),
                _ => None,
            })
            .collect::<Vec<_>>();
        match imported.get(function as usize) {
            Some(type_index) => Some(*type_index),
            None => self
                .functions
                .get((function as usize).checked_sub(imported.len())?)
                .map(|f| f.type_index),
        }
    }

    pub fn table_type(&self, table: u32) -> Option<TableType> {
        let imported = self
            .imports
            .iter()
            .filter_map(|import| match import.desc {
                ImportDesc::Table(ty) => Some(ty),
                _ => None,
            })
            .collect::<Vec<_>>();
        match imported.get(table as usize) {
            Some(ty) => Some(*ty),
            None => self
                .tables
                .get((table as usize).checked_sub(imported.len())?)
                .map(|t| t.ty),
        }
    }

    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|export| export.name == name)
    }
}

/// The result of a successful build: the binary and the declarations it was
/// serialized from. Neither changes afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct WasmBinary {
    bytes: Vec<u8>,
    module: Module,
}

impl WasmBinary {
    pub(crate) fn new(bytes: Vec<u8>, module: Module) -> Self {
        WasmBinary { bytes, module }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
