//! Module serialization.
//!
//! Index checks run over the whole module before a single byte is written, so
//! a failed build never yields a partial binary.

mod opcode;
#[cfg(test)]
mod test;

use std::collections::BTreeSet;

use tracing::debug;
use wasm_encoder::{Encode, RawSection};

use crate::error::{encoding_error, BuildError, BuildResult};
use crate::instruction::{ConstExpr, Instruction};
use crate::ir::{
    DataMode, DataSegment, ElementItems, ElementMode, ElementSegment, ExternKind, FunctionDef,
    ImportDesc, Module,
};
use crate::types::{CompositeType, RefType, SubType, ValType};
use opcode::{encode_bytes, encode_limits, encode_rec_group, encode_vec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum SectionId {
    Custom = 0,
    Type = 1,
    Import = 2,
    Function = 3,
    Table = 4,
    Memory = 5,
    Global = 6,
    Export = 7,
    Start = 8,
    Element = 9,
    Code = 10,
    Data = 11,
    DataCount = 12,
}

/// Sizes of every index space, used to range-check immediates.
struct IndexSpaces<'m> {
    module: &'m Module,
    functions: u32,
    tables: u32,
    memories: u32,
    globals: u32,
    elements: u32,
    data: u32,
}

impl<'m> IndexSpaces<'m> {
    fn new(module: &'m Module) -> Self {
        IndexSpaces {
            module,
            functions: module.index_space(ExternKind::Func),
            tables: module.index_space(ExternKind::Table),
            memories: module.index_space(ExternKind::Memory),
            globals: module.index_space(ExternKind::Global),
            elements: module.elements.len() as u32,
            data: module.data.len() as u32,
        }
    }

    fn check_type(&self, index: u32) -> BuildResult<&'m SubType> {
        self.module
            .types
            .get(index)
            .ok_or(BuildError::UnresolvedTypeReference { index })
    }

    fn check_func_type(&self, index: u32) -> BuildResult<()> {
        match self.check_type(index)?.composite {
            CompositeType::Func(_) => Ok(()),
            _ => Err(encoding_error!("type {index} is not a function type")),
        }
    }

    fn check_types(&self, f: impl FnOnce(&mut dyn FnMut(u32))) -> BuildResult<()> {
        let mut indices = Vec::new();
        f(&mut |index| indices.push(index));
        for index in indices {
            self.check_type(index)?;
        }
        Ok(())
    }

    fn check_index(&self, what: &str, index: u32, len: u32) -> BuildResult<()> {
        if index >= len {
            return Err(encoding_error!(
                "{what} index {index} out of range ({len} defined)"
            ));
        }
        Ok(())
    }

    fn check_function(&self, index: u32) -> BuildResult<()> {
        self.check_index("function", index, self.functions)
    }

    fn check_table(&self, index: u32) -> BuildResult<()> {
        self.check_index("table", index, self.tables)
    }

    fn check_memory(&self, index: u32) -> BuildResult<()> {
        self.check_index("memory", index, self.memories)
    }

    fn check_global(&self, index: u32) -> BuildResult<()> {
        self.check_index("global", index, self.globals)
    }

    fn check_field(&self, type_index: u32, field: u32) -> BuildResult<()> {
        match self.check_type(type_index)?.as_struct() {
            Some(fields) => self.check_index("field", field, fields.len() as u32),
            None => Err(encoding_error!("type {type_index} is not a struct type")),
        }
    }

    fn check_instruction(&self, instruction: &Instruction, locals: u32) -> BuildResult<()> {
        use Instruction::*;
        instruction.check_immediates()?;
        self.check_types(|f| instruction.for_each_type_index(&mut |index| f(index)))?;
        if let Some((memarg, _)) = instruction.memarg() {
            self.check_memory(memarg.memory_index)?;
        }
        match instruction {
            Call(function) | ReturnCall(function) | RefFunc(function) => {
                self.check_function(*function)
            }
            CallIndirect {
                type_index,
                table_index,
            }
            | ReturnCallIndirect {
                type_index,
                table_index,
            } => {
                self.check_func_type(*type_index)?;
                self.check_table(*table_index)
            }
            CallRef(type_index) | ReturnCallRef(type_index) => self.check_func_type(*type_index),
            LocalGet(local) | LocalSet(local) | LocalTee(local) => {
                self.check_index("local", *local, locals)
            }
            GlobalGet(global) | GlobalSet(global) => self.check_global(*global),
            TableGet(table) | TableSet(table) | TableGrow(table) | TableSize(table)
            | TableFill(table) => self.check_table(*table),
            TableInit {
                elem_index,
                table_index,
            } => {
                self.check_index("element segment", *elem_index, self.elements)?;
                self.check_table(*table_index)
            }
            TableCopy {
                dst_table,
                src_table,
            } => {
                self.check_table(*dst_table)?;
                self.check_table(*src_table)
            }
            ElemDrop(segment) | ArrayNewElem {
                elem_index: segment,
                ..
            } => self.check_index("element segment", *segment, self.elements),
            DataDrop(segment) | ArrayNewData {
                data_index: segment,
                ..
            } => self.check_index("data segment", *segment, self.data),
            MemoryInit { data_index, memory } => {
                self.check_index("data segment", *data_index, self.data)?;
                self.check_memory(*memory)
            }
            MemorySize(memory) | MemoryGrow(memory) | MemoryFill(memory) => {
                self.check_memory(*memory)
            }
            MemoryCopy {
                dst_memory,
                src_memory,
            } => {
                self.check_memory(*dst_memory)?;
                self.check_memory(*src_memory)
            }
            StructGet { type_index, field }
            | StructGetS { type_index, field }
            | StructGetU { type_index, field }
            | StructSet { type_index, field } => self.check_field(*type_index, *field),
            _ => Ok(()),
        }
    }

    fn check_const_expr(&self, expr: &ConstExpr) -> BuildResult<()> {
        expr.instructions()
            .iter()
            .try_for_each(|instruction| self.check_instruction(instruction, 0))
    }

    fn check_val_type(&self, ty: &ValType) -> BuildResult<()> {
        self.check_types(|f| ty.for_each_type_index(&mut |index| f(index)))
    }

    fn check_ref_type(&self, ty: &RefType) -> BuildResult<()> {
        self.check_types(|f| ty.for_each_type_index(&mut |index| f(index)))
    }

    fn check_module(&self) -> BuildResult<()> {
        let module = self.module;
        if let Some(start) = module.types.open_group() {
            return Err(encoding_error!(
                "recursion group starting at type {start} was never closed"
            ));
        }
        for index in 0..module.types.len() {
            let sub = self.check_type(index)?;
            self.check_types(|f| sub.for_each_type_index(&mut |index| f(index)))?;
        }
        for import in &module.imports {
            match &import.desc {
                ImportDesc::Func(type_index) => self.check_func_type(*type_index)?,
                ImportDesc::Table(ty) => self.check_ref_type(&ty.element)?,
                ImportDesc::Global(ty) => self.check_val_type(&ty.ty)?,
                ImportDesc::Memory(_) => {}
            }
        }
        for function in &module.functions {
            self.check_func_type(function.type_index)?;
            let params = self
                .check_type(function.type_index)?
                .as_func()
                .map_or(0, |ty| ty.params.len());
            let locals = (params + function.locals.len()) as u32;
            for local in &function.locals {
                self.check_val_type(local)?;
            }
            for instruction in &function.body {
                self.check_instruction(instruction, locals)?;
            }
        }
        for table in &module.tables {
            self.check_ref_type(&table.ty.element)?;
            if let Some(init) = &table.init {
                self.check_const_expr(init)?;
            }
        }
        for global in &module.globals {
            self.check_val_type(&global.ty.ty)?;
            self.check_const_expr(&global.init)?;
        }
        for export in &module.exports {
            let len = module.index_space(export.kind);
            self.check_index(&export.kind.to_string(), export.index, len)?;
        }
        if let Some(start) = module.start {
            self.check_function(start)?;
        }
        for segment in &module.elements {
            self.check_ref_type(&segment.element_type)?;
            if let ElementMode::Active { table, offset } = &segment.mode {
                self.check_table(*table)?;
                self.check_const_expr(offset)?;
            }
            match &segment.items {
                ElementItems::Functions(functions) => functions
                    .iter()
                    .try_for_each(|function| self.check_function(*function))?,
                ElementItems::Expressions(exprs) => exprs
                    .iter()
                    .try_for_each(|expr| self.check_const_expr(expr))?,
            }
        }
        for segment in &module.data {
            if let DataMode::Active { memory, offset } = &segment.mode {
                self.check_memory(*memory)?;
                self.check_const_expr(offset)?;
            }
        }
        Ok(())
    }
}

fn ref_funcs<'a>(instructions: impl IntoIterator<Item = &'a Instruction>) -> Vec<u32> {
    instructions
        .into_iter()
        .filter_map(|instruction| match instruction {
            Instruction::RefFunc(function) => Some(*function),
            _ => None,
        })
        .collect()
}

/// Functions a body takes a reference to without the module declaring them
/// anywhere else. The binary format requires such a declaration.
fn undeclared_ref_funcs(module: &Module) -> Vec<u32> {
    let mut declared = BTreeSet::new();
    for export in &module.exports {
        if export.kind == ExternKind::Func {
            declared.insert(export.index);
        }
    }
    for segment in &module.elements {
        match &segment.items {
            ElementItems::Functions(functions) => declared.extend(functions),
            ElementItems::Expressions(exprs) => {
                declared.extend(ref_funcs(exprs.iter().flat_map(|e| e.instructions())))
            }
        }
    }
    for global in &module.globals {
        declared.extend(ref_funcs(global.init.instructions()));
    }
    for table in &module.tables {
        if let Some(init) = &table.init {
            declared.extend(ref_funcs(init.instructions()));
        }
    }

    let referenced = module
        .functions
        .iter()
        .flat_map(|function| ref_funcs(&function.body))
        .collect::<BTreeSet<_>>();
    referenced.difference(&declared).copied().collect()
}

fn uses_data_count(module: &Module) -> bool {
    module.functions.iter().any(|function| {
        function.body.iter().any(|instruction| {
            matches!(
                instruction,
                Instruction::MemoryInit { .. }
                    | Instruction::DataDrop(_)
                    | Instruction::ArrayNewData { .. }
            )
        })
    })
}

fn encode_type_section(module: &Module, sink: &mut Vec<u8>) -> BuildResult<u32> {
    let groups = module.types.groups();
    for (range, is_rec) in &groups {
        let types = range
            .clone()
            .map(|index| {
                module
                    .types
                    .get(index)
                    .ok_or(BuildError::UnresolvedTypeReference { index })
            })
            .collect::<BuildResult<Vec<_>>>()?;
        match types.as_slice() {
            [single] if !is_rec => single.encode(sink),
            types => encode_rec_group(types, sink),
        }
    }
    Ok(groups.len() as u32)
}

fn encode_import_section(module: &Module, sink: &mut Vec<u8>) -> u32 {
    for import in &module.imports {
        import.module.as_str().encode(sink);
        import.field.as_str().encode(sink);
        match &import.desc {
            ImportDesc::Func(type_index) => {
                sink.push(0x00);
                type_index.encode(sink);
            }
            ImportDesc::Table(ty) => {
                sink.push(0x01);
                ty.encode(sink);
            }
            ImportDesc::Memory(ty) => {
                sink.push(0x02);
                ty.encode(sink);
            }
            ImportDesc::Global(ty) => {
                sink.push(0x03);
                ty.encode(sink);
            }
        }
    }
    module.imports.len() as u32
}

fn encode_element(segment: &ElementSegment, sink: &mut Vec<u8>) {
    let is_funcref = segment.element_type == RefType::FUNCREF;
    let functions = match &segment.items {
        ElementItems::Functions(functions) if is_funcref => Some(functions),
        _ => None,
    };
    let exprs = || segment.items.to_exprs();
    match (&segment.mode, functions) {
        (ElementMode::Active { table: 0, offset }, Some(functions)) => {
            sink.push(0x00);
            offset.encode(sink);
            encode_vec(functions, sink);
        }
        (ElementMode::Active { table, offset }, Some(functions)) => {
            sink.push(0x02);
            table.encode(sink);
            offset.encode(sink);
            sink.push(0x00);
            encode_vec(functions, sink);
        }
        (ElementMode::Active { table: 0, offset }, None) if is_funcref => {
            sink.push(0x04);
            offset.encode(sink);
            encode_vec(&exprs(), sink);
        }
        (ElementMode::Active { table, offset }, None) => {
            sink.push(0x06);
            table.encode(sink);
            offset.encode(sink);
            segment.element_type.encode(sink);
            encode_vec(&exprs(), sink);
        }
        (ElementMode::Passive, Some(functions)) => {
            sink.push(0x01);
            sink.push(0x00);
            encode_vec(functions, sink);
        }
        (ElementMode::Passive, None) => {
            sink.push(0x05);
            segment.element_type.encode(sink);
            encode_vec(&exprs(), sink);
        }
        (ElementMode::Declarative, Some(functions)) => {
            sink.push(0x03);
            sink.push(0x00);
            encode_vec(functions, sink);
        }
        (ElementMode::Declarative, None) => {
            sink.push(0x07);
            segment.element_type.encode(sink);
            encode_vec(&exprs(), sink);
        }
    }
}

/// Runs of identical local types collapse into `(count, type)` pairs.
fn compress_locals(locals: &[ValType]) -> Vec<(u32, ValType)> {
    let mut compressed: Vec<(u32, ValType)> = Vec::new();
    for local in locals {
        match compressed.last_mut() {
            Some((count, ty)) if ty == local => *count += 1,
            _ => compressed.push((1, *local)),
        }
    }
    compressed
}

fn encode_function_body(function: &FunctionDef, sink: &mut Vec<u8>) {
    let mut body = Vec::new();
    let locals = compress_locals(&function.locals);
    (locals.len() as u32).encode(&mut body);
    for (count, ty) in &locals {
        count.encode(&mut body);
        ty.encode(&mut body);
    }
    for instruction in &function.body {
        instruction.encode(&mut body);
    }
    Instruction::End.encode(&mut body);
    encode_bytes(&body, sink);
}

fn encode_data(segment: &DataSegment, sink: &mut Vec<u8>) {
    match &segment.mode {
        DataMode::Active { memory: 0, offset } => {
            sink.push(0x00);
            offset.encode(sink);
        }
        DataMode::Active { memory, offset } => {
            sink.push(0x02);
            memory.encode(sink);
            offset.encode(sink);
        }
        DataMode::Passive => sink.push(0x01),
    }
    encode_bytes(&segment.bytes, sink);
}

/// The `name` custom section with a function-names subsection.
fn encode_names(module: &Module) -> Option<Vec<u8>> {
    let imported = module.imported_count(ExternKind::Func);
    let named = module
        .functions
        .iter()
        .enumerate()
        .filter(|(_, function)| !function.name.is_empty())
        .map(|(position, function)| (imported + position as u32, function.name.as_str()))
        .collect::<Vec<_>>();
    if named.is_empty() {
        return None;
    }
    let mut names = Vec::new();
    (named.len() as u32).encode(&mut names);
    for (index, name) in named {
        index.encode(&mut names);
        name.encode(&mut names);
    }
    let mut section = Vec::new();
    "name".encode(&mut section);
    section.push(0x01);
    encode_bytes(&names, &mut section);
    Some(section)
}

fn vec_section(id: SectionId, count: u32, items: Vec<u8>) -> Option<(SectionId, Vec<u8>)> {
    if count == 0 {
        return None;
    }
    let mut data = Vec::new();
    count.encode(&mut data);
    data.extend(items);
    Some((id, data))
}

/// Serializes `module` to the binary format.
pub(crate) fn encode_module(module: &Module) -> BuildResult<Vec<u8>> {
    IndexSpaces::new(module).check_module()?;

    let mut sections = Vec::new();

    let mut items = Vec::new();
    let count = encode_type_section(module, &mut items)?;
    sections.extend(vec_section(SectionId::Type, count, items));

    let mut items = Vec::new();
    let count = encode_import_section(module, &mut items);
    sections.extend(vec_section(SectionId::Import, count, items));

    let mut items = Vec::new();
    for function in &module.functions {
        function.type_index.encode(&mut items);
    }
    let count = module.functions.len() as u32;
    sections.extend(vec_section(SectionId::Function, count, items));

    let mut items = Vec::new();
    for table in &module.tables {
        match &table.init {
            Some(init) => {
                items.extend([0x40, 0x00]);
                table.ty.encode(&mut items);
                init.encode(&mut items);
            }
            None => table.ty.encode(&mut items),
        }
    }
    let count = module.tables.len() as u32;
    sections.extend(vec_section(SectionId::Table, count, items));

    let mut items = Vec::new();
    for memory in &module.memories {
        encode_limits(memory.initial, memory.maximum, &mut items);
    }
    let count = module.memories.len() as u32;
    sections.extend(vec_section(SectionId::Memory, count, items));

    let mut items = Vec::new();
    for global in &module.globals {
        global.ty.encode(&mut items);
        global.init.encode(&mut items);
    }
    let count = module.globals.len() as u32;
    sections.extend(vec_section(SectionId::Global, count, items));

    let mut items = Vec::new();
    for export in &module.exports {
        export.name.as_str().encode(&mut items);
        items.push(match export.kind {
            ExternKind::Func => 0x00,
            ExternKind::Table => 0x01,
            ExternKind::Memory => 0x02,
            ExternKind::Global => 0x03,
        });
        export.index.encode(&mut items);
    }
    let count = module.exports.len() as u32;
    sections.extend(vec_section(SectionId::Export, count, items));

    if let Some(start) = module.start {
        let mut data = Vec::new();
        start.encode(&mut data);
        sections.push((SectionId::Start, data));
    }

    let mut items = Vec::new();
    for segment in &module.elements {
        encode_element(segment, &mut items);
    }
    let mut count = module.elements.len() as u32;
    let undeclared = undeclared_ref_funcs(module);
    if !undeclared.is_empty() {
        debug!("declaring functions {undeclared:?} for ref.func");
        let segment = ElementSegment {
            mode: ElementMode::Declarative,
            element_type: RefType::FUNCREF,
            items: ElementItems::Functions(undeclared),
        };
        encode_element(&segment, &mut items);
        count += 1;
    }
    sections.extend(vec_section(SectionId::Element, count, items));

    if uses_data_count(module) {
        let mut data = Vec::new();
        (module.data.len() as u32).encode(&mut data);
        sections.push((SectionId::DataCount, data));
    }

    let mut items = Vec::new();
    for function in &module.functions {
        encode_function_body(function, &mut items);
    }
    let count = module.functions.len() as u32;
    sections.extend(vec_section(SectionId::Code, count, items));

    let mut items = Vec::new();
    for segment in &module.data {
        encode_data(segment, &mut items);
    }
    let count = module.data.len() as u32;
    sections.extend(vec_section(SectionId::Data, count, items));

    if let Some(names) = encode_names(module) {
        sections.push((SectionId::Custom, names));
    }

    let mut wasm = wasm_encoder::Module::new();
    for (id, data) in &sections {
        debug!("section {id:?}: {} bytes", data.len());
        wasm.section(&RawSection {
            id: *id as u8,
            data,
        });
    }
    let bytes = wasm.finish();
    debug!("built module: {} bytes", bytes.len());
    Ok(bytes)
}
