
use crate::error::{encoding_error, BuildResult};
use crate::types::{HeapType, RefType, ValType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Result(ValType),
    /// A function type from the type section, for blocks with parameters.
    FunctionType(u32),
}

/// Memory immediate. `align` is the base-2 exponent of the alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemArg {
    pub align: u32,
    pub offset: u32,
    pub memory_index: u32,
}

impl MemArg {
    pub fn new(align: u32, offset: u32) -> Self {
        MemArg {
            align,
            offset,
            memory_index: 0,
        }
    }
}

/// One instruction of a function body or constant expression.
///
/// Control instructions are plain entries: the caller balances `Block`, `Loop`,
/// `If` and `End`. The implicit `end` closing a body is added during
/// serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // Control
    Unreachable,
    Nop,
    Block(BlockType),
    Loop(BlockType),
    If(BlockType),
    Else,
    End,
    Br(u32),
    BrIf(u32),
    BrTable(Vec<u32>, u32),
    Return,
    Call(u32),
    CallIndirect { type_index: u32, table_index: u32 },
    ReturnCall(u32),
    ReturnCallIndirect { type_index: u32, table_index: u32 },
    CallRef(u32),
    ReturnCallRef(u32),

    // Reference
    RefNull(HeapType),
    RefIsNull,
    RefFunc(u32),
    RefEq,
    RefAsNonNull,
    BrOnNull(u32),
    BrOnNonNull(u32),

    // Parametric
    Drop,
    Select,
    TypedSelect(ValType),

    // Variable
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    // Table
    TableGet(u32),
    TableSet(u32),
    TableInit { elem_index: u32, table_index: u32 },
    ElemDrop(u32),
    TableCopy { dst_table: u32, src_table: u32 },
    TableGrow(u32),
    TableSize(u32),
    TableFill(u32),

    // Memory
    I32Load(MemArg),
    I64Load(MemArg),
    F32Load(MemArg),
    F64Load(MemArg),
    I32Load8S(MemArg),
    I32Load8U(MemArg),
    I32Load16S(MemArg),
    I32Load16U(MemArg),
    I32Store(MemArg),
    I64Store(MemArg),
    F32Store(MemArg),
    F64Store(MemArg),
    I32Store8(MemArg),
    I32Store16(MemArg),
    MemorySize(u32),
    MemoryGrow(u32),
    MemoryInit { data_index: u32, memory: u32 },
    DataDrop(u32),
    MemoryCopy { dst_memory: u32, src_memory: u32 },
    MemoryFill(u32),

    // Numeric
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,
    I64Eqz,
    I64Eq,
    I64Ne,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I64Add,
    I64Sub,
    I64Mul,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    I32WrapI64,
    I64ExtendI32S,
    I64ExtendI32U,

    // GC
    StructNew(u32),
    StructNewDefault(u32),
    StructGet { type_index: u32, field: u32 },
    StructGetS { type_index: u32, field: u32 },
    StructGetU { type_index: u32, field: u32 },
    StructSet { type_index: u32, field: u32 },
    ArrayNew(u32),
    ArrayNewDefault(u32),
    ArrayNewFixed { type_index: u32, len: u32 },
    ArrayNewData { type_index: u32, data_index: u32 },
    ArrayNewElem { type_index: u32, elem_index: u32 },
    ArrayGet(u32),
    ArrayGetS(u32),
    ArrayGetU(u32),
    ArraySet(u32),
    ArrayLen,
    ArrayFill(u32),
    ArrayCopy { dst_type: u32, src_type: u32 },
    RefTest(RefType),
    RefCast(RefType),
    BrOnCast { label: u32, from: RefType, to: RefType },
    BrOnCastFail { label: u32, from: RefType, to: RefType },
    /// Internalize: turn an `externref` into an `anyref`.
    AnyConvertExtern,
    /// Externalize: turn an `anyref` into an `externref`.
    ExternConvertAny,
    RefI31,
    I31GetS,
    I31GetU,
}

impl Instruction {
    /// Rejects immediates that can never encode, independent of the module
    /// they end up in.
    pub(crate) fn check_immediates(&self) -> BuildResult<()> {
        match self.memarg() {
            Some((memarg, natural)) if memarg.align > natural => Err(encoding_error!(
                "alignment 2^{} exceeds the natural alignment 2^{natural} of {:?}",
                memarg.align,
                self
            )),
            _ => Ok(()),
        }
    }

    /// The memory immediate and natural alignment exponent of a load or store.
    pub(crate) fn memarg(&self) -> Option<(&MemArg, u32)> {
        use Instruction::*;
        match self {
            I32Load8S(m) | I32Load8U(m) | I32Store8(m) => Some((m, 0)),
            I32Load16S(m) | I32Load16U(m) | I32Store16(m) => Some((m, 1)),
            I32Load(m) | F32Load(m) | I32Store(m) | F32Store(m) => Some((m, 2)),
            I64Load(m) | F64Load(m) | I64Store(m) | F64Store(m) => Some((m, 3)),
            _ => None,
        }
    }

    /// Heap types named by this instruction's immediates.
    pub(crate) fn for_each_type_index(&self, f: &mut impl FnMut(u32)) {
        use Instruction::*;
        match self {
            Block(bt) | Loop(bt) | If(bt) => match bt {
                BlockType::Result(ty) => ty.for_each_type_index(f),
                BlockType::FunctionType(index) => f(*index),
                BlockType::Empty => {}
            },
            CallIndirect { type_index, .. }
            | ReturnCallIndirect { type_index, .. }
            | CallRef(type_index)
            | ReturnCallRef(type_index)
            | StructNew(type_index)
            | StructNewDefault(type_index)
            | StructGet { type_index, .. }
            | StructGetS { type_index, .. }
            | StructGetU { type_index, .. }
            | StructSet { type_index, .. }
            | ArrayNew(type_index)
            | ArrayNewDefault(type_index)
            | ArrayNewFixed { type_index, .. }
            | ArrayNewData { type_index, .. }
            | ArrayNewElem { type_index, .. }
            | ArrayGet(type_index)
            | ArrayGetS(type_index)
            | ArrayGetU(type_index)
            | ArraySet(type_index)
            | ArrayFill(type_index) => f(*type_index),
            ArrayCopy { dst_type, src_type } => {
                f(*dst_type);
                f(*src_type);
            }
            RefNull(heap) => heap.for_each_type_index(f),
            TypedSelect(ty) => ty.for_each_type_index(f),
            RefTest(ty) | RefCast(ty) => ty.for_each_type_index(f),
            BrOnCast { from, to, .. } | BrOnCastFail { from, to, .. } => {
                from.for_each_type_index(f);
                to.for_each_type_index(f);
            }
            _ => {}
        }
    }
}

/// A constant expression: table offsets, element entries and initializers.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstExpr(pub Vec<Instruction>);

impl ConstExpr {
    pub fn new(instructions: impl IntoIterator<Item = Instruction>) -> Self {
        ConstExpr(instructions.into_iter().collect())
    }

    pub fn i32_const(value: i32) -> Self {
        ConstExpr(vec![Instruction::I32Const(value)])
    }

    pub fn ref_null(heap_type: HeapType) -> Self {
        ConstExpr(vec![Instruction::RefNull(heap_type)])
    }

    pub fn ref_func(function_index: u32) -> Self {
        ConstExpr(vec![Instruction::RefFunc(function_index)])
    }

    pub fn global_get(global_index: u32) -> Self {
        ConstExpr(vec![Instruction::GlobalGet(global_index)])
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.0
    }

    /// The function index when this expression is exactly `ref.func x`.
    pub fn as_ref_func(&self) -> Option<u32> {
        match self.0.as_slice() {
            [Instruction::RefFunc(index)] => Some(*index),
            _ => None,
        }
    }
}

impl From<Vec<Instruction>> for ConstExpr {
    fn from(instructions: Vec<Instruction>) -> Self {
        ConstExpr(instructions)
    }
}
