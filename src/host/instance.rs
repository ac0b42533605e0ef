use std::collections::HashMap;

use tracing::{debug, trace};

use crate::compat::{
    func_type_matches, global_type_matches, limits_match, table_type_matches, MatchPolicy,
    TypeLookup,
};
use crate::error::{host_error, HostError, HostResult};
use crate::host::value::{array_len, Func, Global, Memory, Ref, Table, Val};
use crate::host::Store;
use crate::instruction::{ConstExpr, Instruction};
use crate::ir::{
    DataMode, ElementMode, ExternKind, FunctionDef, Import, ImportDesc, Module, WasmBinary,
};
use crate::types::{CompositeType, HeapType, RefType, ValType};
use crate::wat::WatEmitter;

#[derive(Debug, Clone)]
pub enum Extern {
    Func(Func),
    Table(Table),
    Memory(Memory),
    Global(Global),
}

impl Extern {
    pub fn kind(&self) -> ExternKind {
        match self {
            Extern::Func(_) => ExternKind::Func,
            Extern::Table(_) => ExternKind::Table,
            Extern::Memory(_) => ExternKind::Memory,
            Extern::Global(_) => ExternKind::Global,
        }
    }
}

impl From<Func> for Extern {
    fn from(func: Func) -> Self {
        Extern::Func(func)
    }
}

impl From<Table> for Extern {
    fn from(table: Table) -> Self {
        Extern::Table(table)
    }
}

impl From<Memory> for Extern {
    fn from(memory: Memory) -> Self {
        Extern::Memory(memory)
    }
}

impl From<Global> for Extern {
    fn from(global: Global) -> Self {
        Extern::Global(global)
    }
}

/// Values offered to a module's imports, keyed by module and field name.
#[derive(Debug, Clone, Default)]
pub struct Imports {
    entries: HashMap<(String, String), Extern>,
}

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, module: &str, field: &str, value: impl Into<Extern>) -> &mut Self {
        self.entries
            .insert((module.to_string(), field.to_string()), value.into());
        self
    }

    pub fn get(&self, module: &str, field: &str) -> Option<&Extern> {
        self.entries.get(&(module.to_string(), field.to_string()))
    }
}

fn link_error(number: usize, import: &Import, reason: &str) -> HostError {
    host_error!(
        Link,
        "Import #{number} module=\"{}\" function=\"{}\" error: {reason}",
        import.module,
        import.field
    )
}

#[derive(Debug)]
pub struct Instance {
    types: Vec<u32>,
    functions: Vec<Func>,
    tables: Vec<Table>,
    memories: Vec<Memory>,
    globals: Vec<Global>,
    exports: Vec<(String, Extern)>,
}

impl Instance {
    /// Validates `binary`, links it against `imports` and initializes its
    /// state. The start function is recorded in the module but not run.
    pub fn new(store: &mut Store, binary: &WasmBinary, imports: &Imports) -> HostResult<Instance> {
        let module = binary.module();
        debug!(
            "instantiating module of {} bytes with {} imports",
            binary.bytes().len(),
            module.imports.len()
        );
        for function in &module.functions {
            check_nesting(function)?;
        }
        let types = store.register_types(&module.types)?;
        let mut instance = Instance {
            types,
            functions: Vec::new(),
            tables: Vec::new(),
            memories: Vec::new(),
            globals: Vec::new(),
            exports: Vec::new(),
        };
        instance.link(store, module, imports)?;
        instance.define(store, module)?;
        instance.run_segments(store, module)?;
        instance.exports = module
            .exports
            .iter()
            .map(|export| {
                let value = instance.entity(export.kind, export.index).ok_or_else(|| {
                    host_error!(Validation, "export '{}' has no entity", export.name)
                })?;
                Ok((export.name.clone(), value))
            })
            .collect::<HostResult<Vec<_>>>()?;
        Ok(instance)
    }

    fn canonical(&self, index: u32) -> HostResult<u32> {
        self.types
            .get(index as usize)
            .copied()
            .ok_or_else(|| host_error!(Validation, "unknown type index {index}"))
    }

    /// Runs `remap` with a mapping from module type indices to store ids.
    /// Fails with the first index the module does not define.
    fn canonical_in<T>(
        &self,
        remap: impl FnOnce(&mut dyn FnMut(u32) -> u32) -> T,
    ) -> HostResult<T> {
        let mut unknown = None;
        let mapped = remap(&mut |index| match self.canonical(index) {
            Ok(id) => id,
            Err(error) => {
                unknown.get_or_insert(error);
                index
            }
        });
        unknown.map_or(Ok(mapped), Err)
    }

    fn link(&mut self, store: &Store, module: &Module, imports: &Imports) -> HostResult<()> {
        let config = store.config();
        for (number, import) in module.imports.iter().enumerate() {
            let provided = imports
                .get(&import.module, &import.field)
                .ok_or_else(|| link_error(number, import, "import is missing"))?;
            let mismatch = |what: ExternKind| {
                link_error(
                    number,
                    import,
                    &format!("imported {what} does not match the expected type"),
                )
            };
            match (&import.desc, provided) {
                (ImportDesc::Func(type_index), Extern::Func(func)) => {
                    let declared = self.canonical(*type_index)?;
                    let policy = config.func_import_policy;
                    if !func_type_matches(func.type_id(), declared, policy, store.types()) {
                        return Err(mismatch(ExternKind::Func));
                    }
                    self.functions.push(func.clone());
                }
                (ImportDesc::Table(declared), Extern::Table(table)) => {
                    let declared =
                        self.canonical_in(|f| declared.map_type_indices(&mut |i| f(i)))?;
                    let policy = config.table_import_policy;
                    if !table_type_matches(&table.ty(), &declared, policy, store.types()) {
                        return Err(mismatch(ExternKind::Table));
                    }
                    self.tables.push(table.clone());
                }
                (ImportDesc::Memory(declared), Extern::Memory(memory)) => {
                    let actual = memory.ty();
                    if !limits_match(
                        (actual.initial, actual.maximum),
                        (declared.initial, declared.maximum),
                        MatchPolicy::Subtype,
                    ) {
                        return Err(mismatch(ExternKind::Memory));
                    }
                    self.memories.push(memory.clone());
                }
                (ImportDesc::Global(declared), Extern::Global(global)) => {
                    let declared =
                        self.canonical_in(|f| declared.map_type_indices(&mut |i| f(i)))?;
                    if !global_type_matches(&global.ty(), &declared, store.types()) {
                        return Err(mismatch(ExternKind::Global));
                    }
                    self.globals.push(global.clone());
                }
                (desc, provided) => {
                    return Err(link_error(
                        number,
                        import,
                        &format!(
                            "{} import requires a {}, got a {}",
                            desc.kind(),
                            desc.kind(),
                            provided.kind()
                        ),
                    ))
                }
            }
            debug!(
                "linked import #{number} {}.{} as {}",
                import.module,
                import.field,
                provided.kind()
            );
        }
        Ok(())
    }

    fn define(&mut self, store: &Store, module: &Module) -> HostResult<()> {
        for function in &module.functions {
            let type_id = self.canonical(function.type_index)?;
            self.functions
                .push(Func::from_parts(type_id, &function.name));
        }
        for global in &module.globals {
            let value = self.eval(store, &global.init)?;
            let ty = self.canonical_in(|f| global.ty.map_type_indices(&mut |i| f(i)))?;
            self.globals.push(Global::new(store, ty, value)?);
        }
        for table in &module.tables {
            let init = match &table.init {
                Some(expr) => self.eval_ref(store, expr)?,
                None => Ref::Null,
            };
            let ty = self.canonical_in(|f| table.ty.map_type_indices(&mut |i| f(i)))?;
            debug!(
                "initializing table of type {} with {} slots",
                table.ty.element.to_wat(),
                ty.initial
            );
            self.tables
                .push(Table::with_display(store, ty, table.ty.element, init)?);
        }
        for memory in &module.memories {
            self.memories.push(Memory::new(*memory)?);
        }
        Ok(())
    }

    fn run_segments(&mut self, store: &Store, module: &Module) -> HostResult<()> {
        for (number, segment) in module.elements.iter().enumerate() {
            let ElementMode::Active { table, offset } = &segment.mode else {
                continue;
            };
            let target = self
                .tables
                .get(*table as usize)
                .cloned()
                .ok_or_else(|| host_error!(Validation, "element segment {number}: unknown table {table}"))?;
            let offset = self.eval_offset(store, offset)?;
            let exprs = segment.items.to_exprs();
            let fits = offset
                .checked_add(exprs.len() as u32)
                .is_some_and(|end| end <= target.size());
            if !fits {
                return Err(host_error!(Runtime, "table initializer is out of bounds"));
            }
            for (slot, expr) in (offset..).zip(&exprs) {
                let value = self.eval_ref(store, expr)?;
                trace!("element segment {number}: slot {slot} <- {value:?}");
                target.set(store, slot, value)?;
            }
        }
        for (number, segment) in module.data.iter().enumerate() {
            let DataMode::Active { memory, offset } = &segment.mode else {
                continue;
            };
            let target = self
                .memories
                .get(*memory as usize)
                .ok_or_else(|| host_error!(Validation, "data segment {number}: unknown memory {memory}"))?;
            let offset = self.eval_offset(store, offset)?;
            target
                .write(offset, &segment.bytes)
                .map_err(|_| host_error!(Runtime, "data segment is out of bounds"))?;
        }
        Ok(())
    }

    fn eval_offset(&self, store: &Store, expr: &ConstExpr) -> HostResult<u32> {
        match self.eval(store, expr)? {
            Val::I32(offset) => Ok(offset as u32),
            other => Err(host_error!(Validation, "offset must be an i32, got {other:?}")),
        }
    }

    fn eval_ref(&self, store: &Store, expr: &ConstExpr) -> HostResult<Ref> {
        match self.eval(store, expr)? {
            Val::Ref(value) => Ok(value),
            other => Err(host_error!(Validation, "expected a reference, got {other:?}")),
        }
    }

    /// Evaluates a constant expression against the entities defined so far.
    fn eval(&self, store: &Store, expr: &ConstExpr) -> HostResult<Val> {
        let mut stack = ConstStack::default();
        for instruction in expr.instructions() {
            use Instruction::*;
            match instruction {
                I32Const(value) => stack.push(Val::I32(*value)),
                I64Const(value) => stack.push(Val::I64(*value)),
                F32Const(value) => stack.push(Val::F32(value.to_bits())),
                F64Const(value) => stack.push(Val::F64(value.to_bits())),
                I32Add | I32Sub | I32Mul => {
                    let (a, b) = (stack.pop_i32()?, stack.pop_i32()?);
                    stack.push(Val::I32(match instruction {
                        I32Add => b.wrapping_add(a),
                        I32Sub => b.wrapping_sub(a),
                        _ => b.wrapping_mul(a),
                    }));
                }
                I64Add | I64Sub | I64Mul => {
                    let (a, b) = (stack.pop_i64()?, stack.pop_i64()?);
                    stack.push(Val::I64(match instruction {
                        I64Add => b.wrapping_add(a),
                        I64Sub => b.wrapping_sub(a),
                        _ => b.wrapping_mul(a),
                    }));
                }
                RefNull(_) => stack.push(Val::Ref(Ref::Null)),
                RefFunc(index) => {
                    let func = self
                        .functions
                        .get(*index as usize)
                        .ok_or_else(|| host_error!(Validation, "unknown function {index}"))?;
                    stack.push(Val::Ref(Ref::Func(func.clone())));
                }
                GlobalGet(index) => {
                    let global = self
                        .globals
                        .get(*index as usize)
                        .ok_or_else(|| host_error!(Validation, "unknown global {index}"))?;
                    stack.push(global.get());
                }
                RefI31 => {
                    let value = stack.pop_i32()?;
                    stack.push(Val::Ref(Ref::i31(value)));
                }
                StructNew(type_index) => {
                    let type_id = self.canonical(*type_index)?;
                    let count = self.struct_fields(store, type_id)?.len();
                    let fields = stack.pop_n(count)?;
                    stack.push(Val::Ref(Ref::new_struct(store, type_id, fields)?));
                }
                StructNewDefault(type_index) => {
                    let type_id = self.canonical(*type_index)?;
                    let fields = self
                        .struct_fields(store, type_id)?
                        .iter()
                        .map(|ty| default_value(ty))
                        .collect::<HostResult<Vec<_>>>()?;
                    stack.push(Val::Ref(Ref::new_struct(store, type_id, fields)?));
                }
                ArrayNew(type_index) => {
                    let type_id = self.canonical(*type_index)?;
                    let len = array_len(stack.pop_i32()?)?;
                    let value = stack.pop()?;
                    let elements = vec![value; len];
                    stack.push(Val::Ref(Ref::new_array(store, type_id, elements)?));
                }
                ArrayNewDefault(type_index) => {
                    let type_id = self.canonical(*type_index)?;
                    let len = array_len(stack.pop_i32()?)?;
                    let element = self.array_element(store, type_id)?;
                    let elements = vec![default_value(&element)?; len];
                    stack.push(Val::Ref(Ref::new_array(store, type_id, elements)?));
                }
                ArrayNewFixed { type_index, len } => {
                    let type_id = self.canonical(*type_index)?;
                    let elements = stack.pop_n(*len as usize)?;
                    stack.push(Val::Ref(Ref::new_array(store, type_id, elements)?));
                }
                AnyConvertExtern => {
                    let value = stack.pop_ref()?;
                    stack.push(Val::Ref(value.internalize()?));
                }
                ExternConvertAny => {
                    let value = stack.pop_ref()?;
                    stack.push(Val::Ref(value.externalize()?));
                }
                other => {
                    return Err(host_error!(
                        Validation,
                        "{} is not a constant instruction",
                        other.name()
                    ))
                }
            }
        }
        stack.finish()
    }

    fn struct_fields(&self, store: &Store, type_id: u32) -> HostResult<Vec<ValType>> {
        match store.types().sub_type(type_id).map(|sub| &sub.composite) {
            Some(CompositeType::Struct(fields)) => {
                Ok(fields.iter().map(|field| field.storage.unpacked()).collect())
            }
            _ => Err(host_error!(Validation, "type {type_id} is not a struct type")),
        }
    }

    fn array_element(&self, store: &Store, type_id: u32) -> HostResult<ValType> {
        match store.types().sub_type(type_id).map(|sub| &sub.composite) {
            Some(CompositeType::Array(element)) => Ok(element.storage.unpacked()),
            _ => Err(host_error!(Validation, "type {type_id} is not an array type")),
        }
    }

    fn entity(&self, kind: ExternKind, index: u32) -> Option<Extern> {
        let index = index as usize;
        match kind {
            ExternKind::Func => self.functions.get(index).cloned().map(Extern::Func),
            ExternKind::Table => self.tables.get(index).cloned().map(Extern::Table),
            ExternKind::Memory => self.memories.get(index).cloned().map(Extern::Memory),
            ExternKind::Global => self.globals.get(index).cloned().map(Extern::Global),
        }
    }

    pub fn export(&self, name: &str) -> Option<&Extern> {
        self.exports
            .iter()
            .find(|(export, _)| export == name)
            .map(|(_, value)| value)
    }

    pub fn get_func(&self, name: &str) -> Option<Func> {
        match self.export(name)? {
            Extern::Func(func) => Some(func.clone()),
            _ => None,
        }
    }

    pub fn get_table(&self, name: &str) -> Option<Table> {
        match self.export(name)? {
            Extern::Table(table) => Some(table.clone()),
            _ => None,
        }
    }

    pub fn get_memory(&self, name: &str) -> Option<Memory> {
        match self.export(name)? {
            Extern::Memory(memory) => Some(memory.clone()),
            _ => None,
        }
    }

    pub fn get_global(&self, name: &str) -> Option<Global> {
        match self.export(name)? {
            Extern::Global(global) => Some(global.clone()),
            _ => None,
        }
    }

    /// The store-wide id of a module type index.
    pub fn type_id(&self, index: u32) -> Option<u32> {
        self.types.get(index as usize).copied()
    }

    /// A module-level reference type moved into the store's id space, for
    /// use with [`Ref::cast`] and [`Ref::test`].
    pub fn ref_type(&self, ty: RefType) -> HostResult<RefType> {
        self.canonical_in(|f| ty.map_type_indices(&mut |i| f(i)))
    }

    /// Shorthand for a concrete heap type of this module.
    pub fn heap_type(&self, index: u32) -> HostResult<HeapType> {
        Ok(HeapType::Concrete(self.canonical(index)?))
    }
}

/// Block structure of a body: every `else` sits in an `if` and every block is
/// closed. The body's own closing `end` is implicit.
fn check_nesting(function: &FunctionDef) -> HostResult<()> {
    let mut open = Vec::new();
    for (offset, instruction) in function.body.iter().enumerate() {
        let unbalanced = |what: &str| {
            host_error!(
                Validation,
                "function '{}' @+{offset}: {what}",
                function.name
            )
        };
        match instruction {
            Instruction::Block(_) | Instruction::Loop(_) => open.push(false),
            Instruction::If(_) => open.push(true),
            Instruction::Else => match open.last_mut() {
                Some(is_if) if *is_if => *is_if = false,
                _ => return Err(unbalanced("else outside of an if block")),
            },
            Instruction::End => {
                if open.pop().is_none() {
                    return Err(unbalanced("end without a matching block"));
                }
            }
            _ => {}
        }
    }
    if !open.is_empty() {
        return Err(host_error!(
            Validation,
            "function '{}': {} blocks are never closed",
            function.name,
            open.len()
        ));
    }
    Ok(())
}

fn default_value(ty: &ValType) -> HostResult<Val> {
    Val::default_for(ty)
        .ok_or_else(|| host_error!(Validation, "type {} has no default value", ty.to_wat()))
}

#[derive(Default)]
struct ConstStack {
    values: Vec<Val>,
}

impl ConstStack {
    fn push(&mut self, value: Val) {
        self.values.push(value);
    }

    fn pop(&mut self) -> HostResult<Val> {
        self.values
            .pop()
            .ok_or_else(|| host_error!(Validation, "constant expression stack underflow"))
    }

    fn pop_n(&mut self, count: usize) -> HostResult<Vec<Val>> {
        let start = self
            .values
            .len()
            .checked_sub(count)
            .ok_or_else(|| host_error!(Validation, "constant expression stack underflow"))?;
        Ok(self.values.split_off(start))
    }

    fn pop_i32(&mut self) -> HostResult<i32> {
        match self.pop()? {
            Val::I32(value) => Ok(value),
            other => Err(host_error!(Validation, "expected i32, got {other:?}")),
        }
    }

    fn pop_i64(&mut self) -> HostResult<i64> {
        match self.pop()? {
            Val::I64(value) => Ok(value),
            other => Err(host_error!(Validation, "expected i64, got {other:?}")),
        }
    }

    fn pop_ref(&mut self) -> HostResult<Ref> {
        match self.pop()? {
            Val::Ref(value) => Ok(value),
            other => Err(host_error!(Validation, "expected a reference, got {other:?}")),
        }
    }

    fn finish(mut self) -> HostResult<Val> {
        let value = self.pop()?;
        if !self.values.is_empty() {
            return Err(host_error!(
                Validation,
                "constant expression leaves {} extra values",
                self.values.len()
            ));
        }
        Ok(value)
    }
}
