//! Text rendering of types, instructions and modules.
//!
//! The output follows the text format closely enough to read, and is used in
//! error messages and logs. It is not meant to be parsed back.

#[cfg(test)]
mod test;

use crate::instruction::{BlockType, ConstExpr, Instruction, MemArg};
use crate::ir::{
    DataMode, DataSegment, ElementItems, ElementMode, ElementSegment, Export, ExternKind,
    FunctionDef, Import, ImportDesc, Module,
};
use crate::types::{
    CompositeType, FieldType, FuncType, GlobalType, HeapType, MemoryType, RefType, StorageType,
    SubType, TableType, ValType,
};

pub trait WatEmitter {
    fn to_wat(&self) -> String;
}

impl<T> WatEmitter for Vec<T>
where
    T: WatEmitter,
{
    fn to_wat(&self) -> String {
        self.iter()
            .map(|element| element.to_wat())
            .collect::<Vec<String>>()
            .join(" ")
    }
}

fn quote(s: &str) -> String {
    let mut quoted = String::from("\"");
    for c in s.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            c if c.is_ascii_graphic() || c == ' ' => quoted.push(c),
            c => {
                let mut buf = [0; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    quoted.push_str(&format!("\\{byte:02x}"));
                }
            }
        }
    }
    quoted.push('"');
    quoted
}

fn quote_bytes(bytes: &[u8]) -> String {
    let mut quoted = String::from("\"");
    for &byte in bytes {
        if (byte.is_ascii_graphic() && byte != b'"' && byte != b'\\') || byte == b' ' {
            quoted.push(byte as char);
        } else {
            quoted.push_str(&format!("\\{byte:02x}"));
        }
    }
    quoted.push('"');
    quoted
}

fn join(parts: impl IntoIterator<Item = String>) -> String {
    parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl WatEmitter for HeapType {
    fn to_wat(&self) -> String {
        match self {
            HeapType::Any => "any".to_string(),
            HeapType::Eq => "eq".to_string(),
            HeapType::I31 => "i31".to_string(),
            HeapType::Data => "data".to_string(),
            HeapType::Struct => "struct".to_string(),
            HeapType::Array => "array".to_string(),
            HeapType::None => "none".to_string(),
            HeapType::Func => "func".to_string(),
            HeapType::NoFunc => "nofunc".to_string(),
            HeapType::Extern => "extern".to_string(),
            HeapType::NoExtern => "noextern".to_string(),
            HeapType::Concrete(index) => index.to_string(),
        }
    }
}

impl WatEmitter for RefType {
    fn to_wat(&self) -> String {
        match (self.nullable, self.heap_type) {
            (true, HeapType::None) => "nullref".to_string(),
            (true, HeapType::NoFunc) => "nullfuncref".to_string(),
            (true, HeapType::NoExtern) => "nullexternref".to_string(),
            (true, HeapType::Concrete(index)) => format!("(ref null {index})"),
            (true, heap_type) => format!("{}ref", heap_type.to_wat()),
            (false, heap_type) => format!("(ref {})", heap_type.to_wat()),
        }
    }
}

impl WatEmitter for ValType {
    fn to_wat(&self) -> String {
        match self {
            ValType::I32 => "i32".to_string(),
            ValType::I64 => "i64".to_string(),
            ValType::F32 => "f32".to_string(),
            ValType::F64 => "f64".to_string(),
            ValType::Ref(ty) => ty.to_wat(),
        }
    }
}

impl WatEmitter for StorageType {
    fn to_wat(&self) -> String {
        match self {
            StorageType::I8 => "i8".to_string(),
            StorageType::I16 => "i16".to_string(),
            StorageType::Val(ty) => ty.to_wat(),
        }
    }
}

impl WatEmitter for FieldType {
    fn to_wat(&self) -> String {
        if self.mutable {
            format!("(mut {})", self.storage.to_wat())
        } else {
            self.storage.to_wat()
        }
    }
}

impl WatEmitter for FuncType {
    fn to_wat(&self) -> String {
        let params = match self.params.is_empty() {
            true => String::new(),
            false => format!("(param {})", self.params.to_wat()),
        };
        let results = match self.results.is_empty() {
            true => String::new(),
            false => format!("(result {})", self.results.to_wat()),
        };
        join(["func".to_string(), params, results])
    }
}

impl WatEmitter for CompositeType {
    fn to_wat(&self) -> String {
        match self {
            CompositeType::Func(ty) => format!("({})", ty.to_wat()),
            CompositeType::Struct(fields) => {
                let fields = fields
                    .iter()
                    .map(|field| format!("(field {})", field.to_wat()))
                    .collect::<Vec<_>>();
                format!("({})", join(std::iter::once("struct".to_string()).chain(fields)))
            }
            CompositeType::Array(element) => format!("(array {})", element.to_wat()),
        }
    }
}

impl WatEmitter for SubType {
    fn to_wat(&self) -> String {
        if self.is_final && self.supertype.is_none() {
            return self.composite.to_wat();
        }
        let keyword = if self.is_final { "sub final" } else { "sub" };
        let supertype = self.supertype.map(|s| s.to_string()).unwrap_or_default();
        format!(
            "({})",
            join([keyword.to_string(), supertype, self.composite.to_wat()])
        )
    }
}

fn limits(initial: u32, maximum: Option<u32>) -> String {
    match maximum {
        Some(maximum) => format!("{initial} {maximum}"),
        None => initial.to_string(),
    }
}

impl WatEmitter for TableType {
    fn to_wat(&self) -> String {
        format!(
            "{} {}",
            limits(self.initial, self.maximum),
            self.element.to_wat()
        )
    }
}

impl WatEmitter for MemoryType {
    fn to_wat(&self) -> String {
        limits(self.initial, self.maximum)
    }
}

impl WatEmitter for GlobalType {
    fn to_wat(&self) -> String {
        if self.mutable {
            format!("(mut {})", self.ty.to_wat())
        } else {
            self.ty.to_wat()
        }
    }
}

impl WatEmitter for BlockType {
    fn to_wat(&self) -> String {
        match self {
            BlockType::Empty => String::new(),
            BlockType::Result(ty) => format!("(result {})", ty.to_wat()),
            BlockType::FunctionType(index) => format!("(type {index})"),
        }
    }
}

impl WatEmitter for MemArg {
    fn to_wat(&self) -> String {
        let memory = match self.memory_index {
            0 => String::new(),
            index => index.to_string(),
        };
        let offset = match self.offset {
            0 => String::new(),
            offset => format!("offset={offset}"),
        };
        join([memory, offset, format!("align={}", 1u64.checked_shl(self.align).unwrap_or(0))])
    }
}

impl Instruction {
    /// The text-format mnemonic.
    pub fn name(&self) -> &'static str {
        use Instruction::*;
        match self {
            Unreachable => "unreachable",
            Nop => "nop",
            Block(_) => "block",
            Loop(_) => "loop",
            If(_) => "if",
            Else => "else",
            End => "end",
            Br(_) => "br",
            BrIf(_) => "br_if",
            BrTable(..) => "br_table",
            Return => "return",
            Call(_) => "call",
            CallIndirect { .. } => "call_indirect",
            ReturnCall(_) => "return_call",
            ReturnCallIndirect { .. } => "return_call_indirect",
            CallRef(_) => "call_ref",
            ReturnCallRef(_) => "return_call_ref",
            RefNull(_) => "ref.null",
            RefIsNull => "ref.is_null",
            RefFunc(_) => "ref.func",
            RefEq => "ref.eq",
            RefAsNonNull => "ref.as_non_null",
            BrOnNull(_) => "br_on_null",
            BrOnNonNull(_) => "br_on_non_null",
            Drop => "drop",
            Select | TypedSelect(_) => "select",
            LocalGet(_) => "local.get",
            LocalSet(_) => "local.set",
            LocalTee(_) => "local.tee",
            GlobalGet(_) => "global.get",
            GlobalSet(_) => "global.set",
            TableGet(_) => "table.get",
            TableSet(_) => "table.set",
            TableInit { .. } => "table.init",
            ElemDrop(_) => "elem.drop",
            TableCopy { .. } => "table.copy",
            TableGrow(_) => "table.grow",
            TableSize(_) => "table.size",
            TableFill(_) => "table.fill",
            I32Load(_) => "i32.load",
            I64Load(_) => "i64.load",
            F32Load(_) => "f32.load",
            F64Load(_) => "f64.load",
            I32Load8S(_) => "i32.load8_s",
            I32Load8U(_) => "i32.load8_u",
            I32Load16S(_) => "i32.load16_s",
            I32Load16U(_) => "i32.load16_u",
            I32Store(_) => "i32.store",
            I64Store(_) => "i64.store",
            F32Store(_) => "f32.store",
            F64Store(_) => "f64.store",
            I32Store8(_) => "i32.store8",
            I32Store16(_) => "i32.store16",
            MemorySize(_) => "memory.size",
            MemoryGrow(_) => "memory.grow",
            MemoryInit { .. } => "memory.init",
            DataDrop(_) => "data.drop",
            MemoryCopy { .. } => "memory.copy",
            MemoryFill(_) => "memory.fill",
            I32Const(_) => "i32.const",
            I64Const(_) => "i64.const",
            F32Const(_) => "f32.const",
            F64Const(_) => "f64.const",
            I32Eqz => "i32.eqz",
            I32Eq => "i32.eq",
            I32Ne => "i32.ne",
            I32LtS => "i32.lt_s",
            I32LtU => "i32.lt_u",
            I32GtS => "i32.gt_s",
            I32GtU => "i32.gt_u",
            I32LeS => "i32.le_s",
            I32LeU => "i32.le_u",
            I32GeS => "i32.ge_s",
            I32GeU => "i32.ge_u",
            I64Eqz => "i64.eqz",
            I64Eq => "i64.eq",
            I64Ne => "i64.ne",
            I32Add => "i32.add",
            I32Sub => "i32.sub",
            I32Mul => "i32.mul",
            I32DivS => "i32.div_s",
            I32DivU => "i32.div_u",
            I32RemS => "i32.rem_s",
            I32RemU => "i32.rem_u",
            I32And => "i32.and",
            I32Or => "i32.or",
            I32Xor => "i32.xor",
            I32Shl => "i32.shl",
            I32ShrS => "i32.shr_s",
            I32ShrU => "i32.shr_u",
            I64Add => "i64.add",
            I64Sub => "i64.sub",
            I64Mul => "i64.mul",
            F32Add => "f32.add",
            F32Sub => "f32.sub",
            F32Mul => "f32.mul",
            F32Div => "f32.div",
            F64Add => "f64.add",
            F64Sub => "f64.sub",
            F64Mul => "f64.mul",
            F64Div => "f64.div",
            I32WrapI64 => "i32.wrap_i64",
            I64ExtendI32S => "i64.extend_i32_s",
            I64ExtendI32U => "i64.extend_i32_u",
            StructNew(_) => "struct.new",
            StructNewDefault(_) => "struct.new_default",
            StructGet { .. } => "struct.get",
            StructGetS { .. } => "struct.get_s",
            StructGetU { .. } => "struct.get_u",
            StructSet { .. } => "struct.set",
            ArrayNew(_) => "array.new",
            ArrayNewDefault(_) => "array.new_default",
            ArrayNewFixed { .. } => "array.new_fixed",
            ArrayNewData { .. } => "array.new_data",
            ArrayNewElem { .. } => "array.new_elem",
            ArrayGet(_) => "array.get",
            ArrayGetS(_) => "array.get_s",
            ArrayGetU(_) => "array.get_u",
            ArraySet(_) => "array.set",
            ArrayLen => "array.len",
            ArrayFill(_) => "array.fill",
            ArrayCopy { .. } => "array.copy",
            RefTest(_) => "ref.test",
            RefCast(_) => "ref.cast",
            BrOnCast { .. } => "br_on_cast",
            BrOnCastFail { .. } => "br_on_cast_fail",
            AnyConvertExtern => "any.convert_extern",
            ExternConvertAny => "extern.convert_any",
            RefI31 => "ref.i31",
            I31GetS => "i31.get_s",
            I31GetU => "i31.get_u",
        }
    }

    fn immediates(&self) -> String {
        use Instruction::*;
        match self {
            Block(bt) | Loop(bt) | If(bt) => bt.to_wat(),
            BrTable(labels, default) => join(
                labels
                    .iter()
                    .chain(std::iter::once(default))
                    .map(|l| l.to_string()),
            ),
            CallIndirect {
                type_index,
                table_index,
            }
            | ReturnCallIndirect {
                type_index,
                table_index,
            } => format!("{table_index} (type {type_index})"),
            RefNull(heap_type) => heap_type.to_wat(),
            TypedSelect(ty) => format!("(result {})", ty.to_wat()),
            Br(i) | BrIf(i) | Call(i) | ReturnCall(i) | CallRef(i) | ReturnCallRef(i)
            | RefFunc(i) | BrOnNull(i) | BrOnNonNull(i) | LocalGet(i) | LocalSet(i)
            | LocalTee(i) | GlobalGet(i) | GlobalSet(i) | TableGet(i) | TableSet(i)
            | ElemDrop(i) | TableGrow(i) | TableSize(i) | TableFill(i) | DataDrop(i)
            | StructNew(i) | StructNewDefault(i) | ArrayNew(i) | ArrayNewDefault(i)
            | ArrayGet(i) | ArrayGetS(i) | ArrayGetU(i) | ArraySet(i) | ArrayFill(i) => {
                i.to_string()
            }
            MemorySize(memory) | MemoryGrow(memory) | MemoryFill(memory) => match memory {
                0 => String::new(),
                memory => memory.to_string(),
            },
            TableInit {
                elem_index,
                table_index,
            } => format!("{table_index} {elem_index}"),
            TableCopy {
                dst_table,
                src_table,
            } => format!("{dst_table} {src_table}"),
            MemoryInit { data_index, memory } => format!("{memory} {data_index}"),
            MemoryCopy {
                dst_memory,
                src_memory,
            } => format!("{dst_memory} {src_memory}"),
            I32Const(value) => value.to_string(),
            I64Const(value) => value.to_string(),
            F32Const(value) => value.to_string(),
            F64Const(value) => value.to_string(),
            StructGet { type_index, field }
            | StructGetS { type_index, field }
            | StructGetU { type_index, field }
            | StructSet { type_index, field } => format!("{type_index} {field}"),
            ArrayNewFixed { type_index, len } => format!("{type_index} {len}"),
            ArrayNewData {
                type_index,
                data_index,
            } => format!("{type_index} {data_index}"),
            ArrayNewElem {
                type_index,
                elem_index,
            } => format!("{type_index} {elem_index}"),
            ArrayCopy { dst_type, src_type } => format!("{dst_type} {src_type}"),
            RefTest(ty) | RefCast(ty) => ty.to_wat(),
            BrOnCast { label, from, to } | BrOnCastFail { label, from, to } => {
                format!("{label} {} {}", from.to_wat(), to.to_wat())
            }
            other => match other.memarg() {
                Some((memarg, _)) => memarg.to_wat(),
                None => String::new(),
            },
        }
    }
}

impl WatEmitter for Instruction {
    fn to_wat(&self) -> String {
        join([self.name().to_string(), self.immediates()])
    }
}

impl WatEmitter for ConstExpr {
    fn to_wat(&self) -> String {
        self.instructions()
            .iter()
            .map(|instruction| format!("({})", instruction.to_wat()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl WatEmitter for ImportDesc {
    fn to_wat(&self) -> String {
        match self {
            ImportDesc::Func(type_index) => format!("(func (type {type_index}))"),
            ImportDesc::Table(ty) => format!("(table {})", ty.to_wat()),
            ImportDesc::Memory(ty) => format!("(memory {})", ty.to_wat()),
            ImportDesc::Global(ty) => format!("(global {})", ty.to_wat()),
        }
    }
}

impl WatEmitter for Import {
    fn to_wat(&self) -> String {
        format!(
            "(import {} {} {})",
            quote(&self.module),
            quote(&self.field),
            self.desc.to_wat()
        )
    }
}

impl WatEmitter for Export {
    fn to_wat(&self) -> String {
        format!(
            "(export {} ({} {}))",
            quote(&self.name),
            match self.kind {
                ExternKind::Func => "func",
                ExternKind::Table => "table",
                ExternKind::Memory => "memory",
                ExternKind::Global => "global",
            },
            self.index
        )
    }
}

impl WatEmitter for FunctionDef {
    fn to_wat(&self) -> String {
        let name = match self.name.is_empty() {
            true => String::new(),
            false => format!("${}", self.name),
        };
        let locals = match self.locals.is_empty() {
            true => String::new(),
            false => format!("(local {})", self.locals.to_wat()),
        };
        join([
            "(func".to_string(),
            name,
            format!("(type {})", self.type_index),
            locals,
            self.body.to_wat(),
        ]) + ")"
    }
}

impl WatEmitter for ElementSegment {
    fn to_wat(&self) -> String {
        let mode = match &self.mode {
            ElementMode::Active { table, offset } => {
                format!("(table {table}) (offset {})", offset.to_wat())
            }
            ElementMode::Passive => String::new(),
            ElementMode::Declarative => "declare".to_string(),
        };
        let items = match &self.items {
            ElementItems::Functions(functions) => join(
                std::iter::once("func".to_string()).chain(functions.iter().map(|f| f.to_string())),
            ),
            ElementItems::Expressions(exprs) => join(
                std::iter::once(self.element_type.to_wat())
                    .chain(exprs.iter().map(|e| format!("(item {})", e.to_wat()))),
            ),
        };
        format!("({})", join(["elem".to_string(), mode, items]))
    }
}

impl WatEmitter for DataSegment {
    fn to_wat(&self) -> String {
        let mode = match &self.mode {
            DataMode::Active { memory, offset } => {
                format!("(memory {memory}) (offset {})", offset.to_wat())
            }
            DataMode::Passive => String::new(),
        };
        format!(
            "({})",
            join(["data".to_string(), mode, quote_bytes(&self.bytes)])
        )
    }
}

impl WatEmitter for Module {
    fn to_wat(&self) -> String {
        let mut parts = vec!["(module".to_string()];
        for (range, is_rec) in self.types.groups() {
            let types = range
                .map(|index| match self.types.get(index) {
                    Some(sub) => format!("(type (;{index};) {})", sub.to_wat()),
                    None => format!("(type (;{index};) undefined)"),
                })
                .collect::<Vec<_>>();
            if is_rec {
                parts.push(format!("(rec {})", types.join(" ")));
            } else {
                parts.extend(types);
            }
        }
        parts.extend(self.imports.iter().map(|import| import.to_wat()));
        parts.extend(self.functions.iter().map(|function| function.to_wat()));
        for table in &self.tables {
            let init = table.init.as_ref().map(|init| init.to_wat());
            parts.push(format!(
                "({})",
                join(["table".to_string(), table.ty.to_wat(), init.unwrap_or_default()])
            ));
        }
        parts.extend(
            self.memories
                .iter()
                .map(|memory| format!("(memory {})", memory.to_wat())),
        );
        parts.extend(self.globals.iter().map(|global| {
            format!("(global {} {})", global.ty.to_wat(), global.init.to_wat())
        }));
        parts.extend(self.exports.iter().map(|export| export.to_wat()));
        if let Some(start) = self.start {
            parts.push(format!("(start {start})"));
        }
        parts.extend(self.elements.iter().map(|segment| segment.to_wat()));
        parts.extend(self.data.iter().map(|segment| segment.to_wat()));
        parts.join("\n  ") + ")"
    }
}
