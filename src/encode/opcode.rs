//! Binary encodings of types and instructions.

use wasm_encoder::Encode;

use crate::instruction::{BlockType, ConstExpr, Instruction, MemArg};
use crate::types::{
    CompositeType, FieldType, FuncType, GlobalType, HeapType, MemoryType, RefType, StorageType,
    SubType, TableType, ValType,
};

pub(super) const GC_PREFIX: u8 = 0xFB;
pub(super) const MISC_PREFIX: u8 = 0xFC;

const REC_GROUP: u8 = 0x4E;
const SUB: u8 = 0x50;
const SUB_FINAL: u8 = 0x4F;
const FUNC_TYPE: u8 = 0x60;
const STRUCT_TYPE: u8 = 0x5F;
const ARRAY_TYPE: u8 = 0x5E;
const REF_NULL: u8 = 0x63;
const REF: u8 = 0x64;
const BLOCK_EMPTY: u8 = 0x40;
const END: u8 = 0x0B;
/// Pre-standard code for the struct-or-array heap type.
const DATA_HEAP: u8 = 0x67;

pub(super) fn encode_vec<T: Encode>(items: &[T], sink: &mut Vec<u8>) {
    (items.len() as u32).encode(sink);
    for item in items {
        item.encode(sink);
    }
}

pub(super) fn encode_bytes(bytes: &[u8], sink: &mut Vec<u8>) {
    (bytes.len() as u32).encode(sink);
    sink.extend_from_slice(bytes);
}

pub(super) fn encode_limits(initial: u32, maximum: Option<u32>, sink: &mut Vec<u8>) {
    match maximum {
        None => {
            sink.push(0x00);
            initial.encode(sink);
        }
        Some(maximum) => {
            sink.push(0x01);
            initial.encode(sink);
            maximum.encode(sink);
        }
    }
}

fn abstract_heap_code(heap_type: HeapType) -> Option<u8> {
    Some(match heap_type {
        HeapType::Func => 0x70,
        HeapType::Extern => 0x6F,
        HeapType::Any => 0x6E,
        HeapType::Eq => 0x6D,
        HeapType::I31 => 0x6C,
        HeapType::Struct => 0x6B,
        HeapType::Array => 0x6A,
        HeapType::None => 0x71,
        HeapType::NoExtern => 0x72,
        HeapType::NoFunc => 0x73,
        HeapType::Data => DATA_HEAP,
        HeapType::Concrete(_) => return None,
    })
}

impl Encode for HeapType {
    fn encode(&self, sink: &mut Vec<u8>) {
        match abstract_heap_code(*self) {
            Some(code) => sink.push(code),
            // Type indices are s33.
            None => {
                if let HeapType::Concrete(index) = self {
                    i64::from(*index).encode(sink)
                }
            }
        }
    }
}

impl Encode for RefType {
    fn encode(&self, sink: &mut Vec<u8>) {
        let short = match self.heap_type {
            HeapType::Data | HeapType::Concrete(_) => None,
            heap_type if self.nullable => abstract_heap_code(heap_type),
            _ => None,
        };
        match short {
            Some(code) => sink.push(code),
            None => {
                sink.push(if self.nullable { REF_NULL } else { REF });
                self.heap_type.encode(sink);
            }
        }
    }
}

impl Encode for ValType {
    fn encode(&self, sink: &mut Vec<u8>) {
        match self {
            ValType::I32 => sink.push(0x7F),
            ValType::I64 => sink.push(0x7E),
            ValType::F32 => sink.push(0x7D),
            ValType::F64 => sink.push(0x7C),
            ValType::Ref(ty) => ty.encode(sink),
        }
    }
}

impl Encode for StorageType {
    fn encode(&self, sink: &mut Vec<u8>) {
        match self {
            StorageType::I8 => sink.push(0x78),
            StorageType::I16 => sink.push(0x77),
            StorageType::Val(ty) => ty.encode(sink),
        }
    }
}

impl Encode for FieldType {
    fn encode(&self, sink: &mut Vec<u8>) {
        self.storage.encode(sink);
        sink.push(self.mutable as u8);
    }
}

impl Encode for FuncType {
    fn encode(&self, sink: &mut Vec<u8>) {
        sink.push(FUNC_TYPE);
        encode_vec(&self.params, sink);
        encode_vec(&self.results, sink);
    }
}

impl Encode for CompositeType {
    fn encode(&self, sink: &mut Vec<u8>) {
        match self {
            CompositeType::Func(ty) => ty.encode(sink),
            CompositeType::Struct(fields) => {
                sink.push(STRUCT_TYPE);
                encode_vec(fields, sink);
            }
            CompositeType::Array(element) => {
                sink.push(ARRAY_TYPE);
                element.encode(sink);
            }
        }
    }
}

impl Encode for SubType {
    fn encode(&self, sink: &mut Vec<u8>) {
        if self.is_final && self.supertype.is_none() {
            return self.composite.encode(sink);
        }
        sink.push(if self.is_final { SUB_FINAL } else { SUB });
        let supertypes = self.supertype.iter().copied().collect::<Vec<u32>>();
        encode_vec(&supertypes, sink);
        self.composite.encode(sink);
    }
}

/// A recursion group with more than one member, or one that was declared
/// explicitly.
pub(super) fn encode_rec_group(types: &[&SubType], sink: &mut Vec<u8>) {
    sink.push(REC_GROUP);
    (types.len() as u32).encode(sink);
    for sub in types {
        sub.encode(sink);
    }
}

impl Encode for TableType {
    fn encode(&self, sink: &mut Vec<u8>) {
        self.element.encode(sink);
        encode_limits(self.initial, self.maximum, sink);
    }
}

impl Encode for MemoryType {
    fn encode(&self, sink: &mut Vec<u8>) {
        encode_limits(self.initial, self.maximum, sink);
    }
}

impl Encode for GlobalType {
    fn encode(&self, sink: &mut Vec<u8>) {
        self.ty.encode(sink);
        sink.push(self.mutable as u8);
    }
}

impl Encode for BlockType {
    fn encode(&self, sink: &mut Vec<u8>) {
        match self {
            BlockType::Empty => sink.push(BLOCK_EMPTY),
            BlockType::Result(ty) => ty.encode(sink),
            BlockType::FunctionType(index) => i64::from(*index).encode(sink),
        }
    }
}

impl Encode for MemArg {
    fn encode(&self, sink: &mut Vec<u8>) {
        if self.memory_index == 0 {
            self.align.encode(sink);
        } else {
            (self.align | 0x40).encode(sink);
            self.memory_index.encode(sink);
        }
        self.offset.encode(sink);
    }
}

impl Encode for ConstExpr {
    fn encode(&self, sink: &mut Vec<u8>) {
        for instruction in self.instructions() {
            instruction.encode(sink);
        }
        sink.push(END);
    }
}

fn gc(sink: &mut Vec<u8>, op: u32) {
    sink.push(GC_PREFIX);
    op.encode(sink);
}

fn misc(sink: &mut Vec<u8>, op: u32) {
    sink.push(MISC_PREFIX);
    op.encode(sink);
}

fn cast_flags(from: &RefType, to: &RefType) -> u8 {
    (from.nullable as u8) | ((to.nullable as u8) << 1)
}

impl Encode for Instruction {
    fn encode(&self, sink: &mut Vec<u8>) {
        use Instruction::*;
        match self {
            // Control
            Unreachable => sink.push(0x00),
            Nop => sink.push(0x01),
            Block(bt) => {
                sink.push(0x02);
                bt.encode(sink);
            }
            Loop(bt) => {
                sink.push(0x03);
                bt.encode(sink);
            }
            If(bt) => {
                sink.push(0x04);
                bt.encode(sink);
            }
            Else => sink.push(0x05),
            End => sink.push(END),
            Br(label) => {
                sink.push(0x0C);
                label.encode(sink);
            }
            BrIf(label) => {
                sink.push(0x0D);
                label.encode(sink);
            }
            BrTable(labels, default) => {
                sink.push(0x0E);
                encode_vec(labels, sink);
                default.encode(sink);
            }
            Return => sink.push(0x0F),
            Call(function) => {
                sink.push(0x10);
                function.encode(sink);
            }
            CallIndirect {
                type_index,
                table_index,
            } => {
                sink.push(0x11);
                type_index.encode(sink);
                table_index.encode(sink);
            }
            ReturnCall(function) => {
                sink.push(0x12);
                function.encode(sink);
            }
            ReturnCallIndirect {
                type_index,
                table_index,
            } => {
                sink.push(0x13);
                type_index.encode(sink);
                table_index.encode(sink);
            }
            CallRef(type_index) => {
                sink.push(0x14);
                type_index.encode(sink);
            }
            ReturnCallRef(type_index) => {
                sink.push(0x15);
                type_index.encode(sink);
            }

            // Reference
            RefNull(heap_type) => {
                sink.push(0xD0);
                heap_type.encode(sink);
            }
            RefIsNull => sink.push(0xD1),
            RefFunc(function) => {
                sink.push(0xD2);
                function.encode(sink);
            }
            RefEq => sink.push(0xD3),
            RefAsNonNull => sink.push(0xD4),
            BrOnNull(label) => {
                sink.push(0xD5);
                label.encode(sink);
            }
            BrOnNonNull(label) => {
                sink.push(0xD6);
                label.encode(sink);
            }

            // Parametric
            Drop => sink.push(0x1A),
            Select => sink.push(0x1B),
            TypedSelect(ty) => {
                sink.push(0x1C);
                encode_vec(&[*ty], sink);
            }

            // Variable
            LocalGet(local) => {
                sink.push(0x20);
                local.encode(sink);
            }
            LocalSet(local) => {
                sink.push(0x21);
                local.encode(sink);
            }
            LocalTee(local) => {
                sink.push(0x22);
                local.encode(sink);
            }
            GlobalGet(global) => {
                sink.push(0x23);
                global.encode(sink);
            }
            GlobalSet(global) => {
                sink.push(0x24);
                global.encode(sink);
            }

            // Table
            TableGet(table) => {
                sink.push(0x25);
                table.encode(sink);
            }
            TableSet(table) => {
                sink.push(0x26);
                table.encode(sink);
            }
            TableInit {
                elem_index,
                table_index,
            } => {
                misc(sink, 12);
                elem_index.encode(sink);
                table_index.encode(sink);
            }
            ElemDrop(segment) => {
                misc(sink, 13);
                segment.encode(sink);
            }
            TableCopy {
                dst_table,
                src_table,
            } => {
                misc(sink, 14);
                dst_table.encode(sink);
                src_table.encode(sink);
            }
            TableGrow(table) => {
                misc(sink, 15);
                table.encode(sink);
            }
            TableSize(table) => {
                misc(sink, 16);
                table.encode(sink);
            }
            TableFill(table) => {
                misc(sink, 17);
                table.encode(sink);
            }

            // Memory
            I32Load(m) => memory_access(sink, 0x28, m),
            I64Load(m) => memory_access(sink, 0x29, m),
            F32Load(m) => memory_access(sink, 0x2A, m),
            F64Load(m) => memory_access(sink, 0x2B, m),
            I32Load8S(m) => memory_access(sink, 0x2C, m),
            I32Load8U(m) => memory_access(sink, 0x2D, m),
            I32Load16S(m) => memory_access(sink, 0x2E, m),
            I32Load16U(m) => memory_access(sink, 0x2F, m),
            I32Store(m) => memory_access(sink, 0x36, m),
            I64Store(m) => memory_access(sink, 0x37, m),
            F32Store(m) => memory_access(sink, 0x38, m),
            F64Store(m) => memory_access(sink, 0x39, m),
            I32Store8(m) => memory_access(sink, 0x3A, m),
            I32Store16(m) => memory_access(sink, 0x3B, m),
            MemorySize(memory) => {
                sink.push(0x3F);
                memory.encode(sink);
            }
            MemoryGrow(memory) => {
                sink.push(0x40);
                memory.encode(sink);
            }
            MemoryInit { data_index, memory } => {
                misc(sink, 8);
                data_index.encode(sink);
                memory.encode(sink);
            }
            DataDrop(segment) => {
                misc(sink, 9);
                segment.encode(sink);
            }
            MemoryCopy {
                dst_memory,
                src_memory,
            } => {
                misc(sink, 10);
                dst_memory.encode(sink);
                src_memory.encode(sink);
            }
            MemoryFill(memory) => {
                misc(sink, 11);
                memory.encode(sink);
            }

            // Numeric
            I32Const(value) => {
                sink.push(0x41);
                value.encode(sink);
            }
            I64Const(value) => {
                sink.push(0x42);
                value.encode(sink);
            }
            F32Const(value) => {
                sink.push(0x43);
                sink.extend_from_slice(&value.to_bits().to_le_bytes());
            }
            F64Const(value) => {
                sink.push(0x44);
                sink.extend_from_slice(&value.to_bits().to_le_bytes());
            }
            I32Eqz => sink.push(0x45),
            I32Eq => sink.push(0x46),
            I32Ne => sink.push(0x47),
            I32LtS => sink.push(0x48),
            I32LtU => sink.push(0x49),
            I32GtS => sink.push(0x4A),
            I32GtU => sink.push(0x4B),
            I32LeS => sink.push(0x4C),
            I32LeU => sink.push(0x4D),
            I32GeS => sink.push(0x4E),
            I32GeU => sink.push(0x4F),
            I64Eqz => sink.push(0x50),
            I64Eq => sink.push(0x51),
            I64Ne => sink.push(0x52),
            I32Add => sink.push(0x6A),
            I32Sub => sink.push(0x6B),
            I32Mul => sink.push(0x6C),
            I32DivS => sink.push(0x6D),
            I32DivU => sink.push(0x6E),
            I32RemS => sink.push(0x6F),
            I32RemU => sink.push(0x70),
            I32And => sink.push(0x71),
            I32Or => sink.push(0x72),
            I32Xor => sink.push(0x73),
            I32Shl => sink.push(0x74),
            I32ShrS => sink.push(0x75),
            I32ShrU => sink.push(0x76),
            I64Add => sink.push(0x7C),
            I64Sub => sink.push(0x7D),
            I64Mul => sink.push(0x7E),
            F32Add => sink.push(0x92),
            F32Sub => sink.push(0x93),
            F32Mul => sink.push(0x94),
            F32Div => sink.push(0x95),
            F64Add => sink.push(0xA0),
            F64Sub => sink.push(0xA1),
            F64Mul => sink.push(0xA2),
            F64Div => sink.push(0xA3),
            I32WrapI64 => sink.push(0xA7),
            I64ExtendI32S => sink.push(0xAC),
            I64ExtendI32U => sink.push(0xAD),

            // GC
            StructNew(type_index) => {
                gc(sink, 0);
                type_index.encode(sink);
            }
            StructNewDefault(type_index) => {
                gc(sink, 1);
                type_index.encode(sink);
            }
            StructGet { type_index, field } => {
                gc(sink, 2);
                type_index.encode(sink);
                field.encode(sink);
            }
            StructGetS { type_index, field } => {
                gc(sink, 3);
                type_index.encode(sink);
                field.encode(sink);
            }
            StructGetU { type_index, field } => {
                gc(sink, 4);
                type_index.encode(sink);
                field.encode(sink);
            }
            StructSet { type_index, field } => {
                gc(sink, 5);
                type_index.encode(sink);
                field.encode(sink);
            }
            ArrayNew(type_index) => {
                gc(sink, 6);
                type_index.encode(sink);
            }
            ArrayNewDefault(type_index) => {
                gc(sink, 7);
                type_index.encode(sink);
            }
            ArrayNewFixed { type_index, len } => {
                gc(sink, 8);
                type_index.encode(sink);
                len.encode(sink);
            }
            ArrayNewData {
                type_index,
                data_index,
            } => {
                gc(sink, 9);
                type_index.encode(sink);
                data_index.encode(sink);
            }
            ArrayNewElem {
                type_index,
                elem_index,
            } => {
                gc(sink, 10);
                type_index.encode(sink);
                elem_index.encode(sink);
            }
            ArrayGet(type_index) => {
                gc(sink, 11);
                type_index.encode(sink);
            }
            ArrayGetS(type_index) => {
                gc(sink, 12);
                type_index.encode(sink);
            }
            ArrayGetU(type_index) => {
                gc(sink, 13);
                type_index.encode(sink);
            }
            ArraySet(type_index) => {
                gc(sink, 14);
                type_index.encode(sink);
            }
            ArrayLen => gc(sink, 15),
            ArrayFill(type_index) => {
                gc(sink, 16);
                type_index.encode(sink);
            }
            ArrayCopy { dst_type, src_type } => {
                gc(sink, 17);
                dst_type.encode(sink);
                src_type.encode(sink);
            }
            RefTest(ty) => {
                gc(sink, if ty.nullable { 21 } else { 20 });
                ty.heap_type.encode(sink);
            }
            RefCast(ty) => {
                gc(sink, if ty.nullable { 23 } else { 22 });
                ty.heap_type.encode(sink);
            }
            BrOnCast { label, from, to } => {
                gc(sink, 24);
                sink.push(cast_flags(from, to));
                label.encode(sink);
                from.heap_type.encode(sink);
                to.heap_type.encode(sink);
            }
            BrOnCastFail { label, from, to } => {
                gc(sink, 25);
                sink.push(cast_flags(from, to));
                label.encode(sink);
                from.heap_type.encode(sink);
                to.heap_type.encode(sink);
            }
            AnyConvertExtern => gc(sink, 26),
            ExternConvertAny => gc(sink, 27),
            RefI31 => gc(sink, 28),
            I31GetS => gc(sink, 29),
            I31GetU => gc(sink, 30),
        }
    }
}

fn memory_access(sink: &mut Vec<u8>, opcode: u8, memarg: &MemArg) {
    sink.push(opcode);
    memarg.encode(sink);
}
