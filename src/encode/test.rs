use wasm_encoder::Encode;
use wasmparser::{Validator, WasmFeatures};

use crate::builder::ModuleBuilder;
use crate::error::BuildError;
use crate::instruction::{BlockType, ConstExpr, Instruction, MemArg};
use crate::ir::TableInit;
use crate::types::{
    CompositeType, FieldType, FuncType, HeapType, RefType, StorageType, SubType, ValType,
};

const HEADER: [u8; 8] = [0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];

fn validate(bytes: &[u8]) -> anyhow::Result<()> {
    Validator::new_with_features(WasmFeatures::all()).validate_all(bytes)?;
    Ok(())
}

fn encoded(value: &impl Encode) -> Vec<u8> {
    let mut sink = Vec::new();
    value.encode(&mut sink);
    sink
}

#[test]
fn test_type_section_bytes() -> anyhow::Result<()> {
    let mut builder = ModuleBuilder::new();
    builder.add_type(FuncType::new([ValType::I32], [ValType::I32]));
    let bytes = builder.build()?;

    let mut expected = HEADER.to_vec();
    expected.extend([0x01, 0x06, 0x01, 0x60, 0x01, 0x7F, 0x01, 0x7F]);
    assert_eq!(bytes, expected);
    Ok(())
}

#[test]
fn test_deterministic() -> anyhow::Result<()> {
    let mut builder = ModuleBuilder::new();
    let point = builder.add_struct([
        FieldType::new(ValType::I32, true),
        FieldType::new(ValType::F64, false),
    ]);
    builder
        .add_function("make", FuncType::new([], [RefType::concrete(point).into()]))
        .add_body([
            Instruction::I32Const(1),
            Instruction::F64Const(2.5),
            Instruction::StructNew(point),
        ])?
        .export_func()?;

    let first = builder.build()?;
    let second = builder.build()?;
    assert_eq!(first, second);
    validate(&first)
}

#[test]
fn test_type_encodings() {
    assert_eq!(encoded(&ValType::ANYREF), [0x6E]);
    assert_eq!(encoded(&ValType::I31REF), [0x6C]);
    assert_eq!(encoded(&RefType::NULLREF), [0x71]);
    assert_eq!(encoded(&RefType::non_null(HeapType::Eq)), [0x64, 0x6D]);
    assert_eq!(encoded(&RefType::DATAREF), [0x63, 0x67]);
    assert_eq!(encoded(&RefType::concrete_nullable(3)), [0x63, 0x03]);
    assert_eq!(encoded(&RefType::concrete(64)), [0x64, 0xC0, 0x00]);
    assert_eq!(encoded(&StorageType::I16), [0x77]);

    let open_struct = SubType {
        is_final: false,
        supertype: None,
        composite: CompositeType::Struct(vec![FieldType::new(StorageType::I8, true)]),
    };
    assert_eq!(encoded(&open_struct), [0x50, 0x00, 0x5F, 0x01, 0x78, 0x01]);

    let final_child = SubType {
        is_final: true,
        supertype: Some(0),
        composite: CompositeType::Array(FieldType::new(ValType::I64, false)),
    };
    assert_eq!(encoded(&final_child), [0x4F, 0x01, 0x00, 0x5E, 0x7E, 0x00]);
}

#[test]
fn test_instruction_encodings() {
    assert_eq!(encoded(&Instruction::I32Const(-1)), [0x41, 0x7F]);
    assert_eq!(encoded(&Instruction::Block(BlockType::Empty)), [0x02, 0x40]);
    assert_eq!(
        encoded(&Instruction::ArrayNewFixed {
            type_index: 0,
            len: 5
        }),
        [0xFB, 0x08, 0x00, 0x05]
    );
    assert_eq!(
        encoded(&Instruction::StructGet {
            type_index: 1,
            field: 2
        }),
        [0xFB, 0x02, 0x01, 0x02]
    );
    assert_eq!(
        encoded(&Instruction::RefCast(RefType::I31REF)),
        [0xFB, 0x17, 0x6C]
    );
    assert_eq!(
        encoded(&Instruction::RefTest(RefType::concrete(2))),
        [0xFB, 0x14, 0x02]
    );
    assert_eq!(
        encoded(&Instruction::BrOnCast {
            label: 0,
            from: RefType::ANYREF,
            to: RefType::non_null(HeapType::I31),
        }),
        [0xFB, 0x18, 0x01, 0x00, 0x6E, 0x6C]
    );
    assert_eq!(encoded(&Instruction::AnyConvertExtern), [0xFB, 0x1A]);
    assert_eq!(encoded(&Instruction::ExternConvertAny), [0xFB, 0x1B]);
    assert_eq!(
        encoded(&Instruction::TableInit {
            elem_index: 1,
            table_index: 0
        }),
        [0xFC, 0x0C, 0x01, 0x00]
    );
    let mut memarg = MemArg::new(2, 8);
    assert_eq!(encoded(&Instruction::I32Load(memarg)), [0x28, 0x02, 0x08]);
    memarg.memory_index = 1;
    assert_eq!(
        encoded(&Instruction::I32Load(memarg)),
        [0x28, 0x42, 0x01, 0x08]
    );
    assert_eq!(
        encoded(&ConstExpr::ref_null(HeapType::Func)),
        [0xD0, 0x70, 0x0B]
    );
}

#[test]
fn test_hello_array() -> anyhow::Result<()> {
    let mut builder = ModuleBuilder::new();
    let string = builder.add_array(StorageType::I16, true);
    let body = "HELLO"
        .chars()
        .map(|c| Instruction::I32Const(c as i32))
        .chain([Instruction::ArrayNewFixed {
            type_index: string,
            len: 5,
        }])
        .collect::<Vec<_>>();
    builder
        .add_function("hello", FuncType::new([], [RefType::concrete(string).into()]))
        .add_body(body)?
        .export_func()?;

    validate(&builder.build()?)
}

#[test]
fn test_recursive_types() -> anyhow::Result<()> {
    let mut builder = ModuleBuilder::new();
    builder.start_rec_group()?;
    let node = builder.declare_type();
    let tree = builder.add_struct([
        FieldType::new(RefType::concrete_nullable(node), true),
        FieldType::new(RefType::concrete_nullable(node), true),
    ]);
    builder.define_type(
        node,
        SubType::new(CompositeType::Struct(vec![
            FieldType::new(ValType::I32, false),
            FieldType::new(RefType::concrete_nullable(tree), true),
        ])),
    )?;
    builder.end_rec_group()?;
    let list = builder.add_struct([FieldType::new(RefType::concrete_nullable(2), true)]);
    assert_eq!(list, 2);

    builder
        .add_function("leaf", FuncType::new([], [RefType::concrete(node).into()]))
        .add_body([
            Instruction::I32Const(1),
            Instruction::RefNull(HeapType::Concrete(tree)),
            Instruction::StructNew(node),
        ])?;

    let bytes = builder.build()?;
    // A single rec group of two types, then the self-referencing list.
    assert_eq!(bytes[HEADER.len() + 2..HEADER.len() + 5], [0x02, 0x4E, 0x02]);
    validate(&bytes)
}

#[test]
fn test_forward_references_outside_rec_group() -> anyhow::Result<()> {
    let mut builder = ModuleBuilder::new();
    let left = builder.declare_type();
    let right = builder.add_struct([FieldType::new(RefType::concrete_nullable(left), true)]);
    builder.define_type(
        left,
        SubType::new(CompositeType::Struct(vec![FieldType::new(
            RefType::concrete_nullable(right),
            true,
        )])),
    )?;
    builder
        .add_function("pair", FuncType::new([], [RefType::concrete(right).into()]))
        .add_body([
            Instruction::RefNull(HeapType::Concrete(right)),
            Instruction::StructNew(left),
            Instruction::StructNew(right),
        ])?
        .export_func()?;

    let bytes = builder.build()?;
    // Both types land in one implicit rec group.
    assert_eq!(bytes[HEADER.len() + 2..HEADER.len() + 5], [0x01, 0x4E, 0x02]);
    validate(&bytes)
}

#[test]
fn test_anyref_element_segment() -> anyhow::Result<()> {
    let mut builder = ModuleBuilder::new();
    let bytes = builder.add_array(StorageType::I8, true);
    let point = builder.add_struct([FieldType::new(ValType::I32, false)]);
    let table = builder.add_table(RefType::ANYREF, 4, Some(4), None)?.index();
    builder.add_active_element_segment(
        table,
        ConstExpr::i32_const(0),
        vec![
            ConstExpr::new([
                Instruction::I32Const(10),
                Instruction::I32Const(20),
                Instruction::ArrayNewFixed {
                    type_index: bytes,
                    len: 2,
                },
            ]),
            ConstExpr::new([Instruction::I32Const(42), Instruction::RefI31]),
            ConstExpr::new([Instruction::I32Const(7), Instruction::StructNew(point)]),
            ConstExpr::ref_null(HeapType::None),
        ],
        RefType::ANYREF,
    );
    builder
        .add_function("get", FuncType::new([ValType::I32], [ValType::ANYREF]))
        .add_body([Instruction::LocalGet(0), Instruction::TableGet(table)])?
        .export_func()?;

    validate(&builder.build()?)
}

#[test]
fn test_non_nullable_table() -> anyhow::Result<()> {
    let mut builder = ModuleBuilder::new();
    let sig = builder.add_type(FuncType::new([ValType::I32], [ValType::I32]));
    let id = builder
        .add_function("id", sig)
        .add_body([Instruction::LocalGet(0)])?
        .index();
    let twice = builder
        .add_function("twice", sig)
        .add_body([
            Instruction::LocalGet(0),
            Instruction::LocalGet(0),
            Instruction::I32Add,
        ])?
        .index();
    builder
        .add_table(
            RefType::concrete(sig),
            2,
            None,
            Some(TableInit::PerSlot(vec![
                ConstExpr::ref_func(id),
                ConstExpr::ref_func(twice),
            ])),
        )?
        .export_as("table")?;
    builder
        .add_table(
            RefType::concrete(sig),
            8,
            None,
            Some(TableInit::Uniform(ConstExpr::ref_func(id))),
        )?
        .export_as("uniform")?;

    validate(&builder.build()?)
}

#[test]
fn test_undeclared_ref_func_gets_declared() -> anyhow::Result<()> {
    let mut builder = ModuleBuilder::new();
    let sig = builder.add_type(FuncType::new([], [ValType::I32]));
    let answer = builder
        .add_function("answer", sig)
        .add_body([Instruction::I32Const(42)])?
        .index();
    builder
        .add_function("call_answer", FuncType::new([], [ValType::I32]))
        .add_body([Instruction::RefFunc(answer), Instruction::CallRef(sig)])?
        .export_func()?;

    validate(&builder.build()?)
}

#[test]
fn test_passive_and_declarative_element_segments() -> anyhow::Result<()> {
    let mut builder = ModuleBuilder::new();
    let sig = builder.add_type(FuncType::new([], [ValType::I32]));
    let one = builder
        .add_function("one", sig)
        .add_body([Instruction::I32Const(1)])?
        .index();
    let two = builder
        .add_function("two", sig)
        .add_body([Instruction::I32Const(2)])?
        .index();
    let table = builder.add_table(RefType::FUNCREF, 2, None, None)?.index();
    let passive = builder.add_passive_element_segment(vec![one, two], RefType::FUNCREF);
    let declared = builder.add_declarative_element_segment(vec![two], RefType::FUNCREF);
    assert_eq!((passive, declared), (0, 1));
    builder
        .add_function("load", FuncType::new([], []))
        .add_body([
            Instruction::I32Const(0),
            Instruction::I32Const(0),
            Instruction::I32Const(2),
            Instruction::TableInit {
                elem_index: passive,
                table_index: table,
            },
            Instruction::ElemDrop(passive),
        ])?
        .export_func()?;
    builder
        .add_function("second", FuncType::new([], [ValType::FUNCREF]))
        .add_body([Instruction::RefFunc(two)])?
        .export_func()?;

    let bytes = builder.build()?;
    assert_eq!(builder.module().elements.len(), 2);
    validate(&bytes)
}

#[test]
fn test_passive_data_with_memory_init() -> anyhow::Result<()> {
    let mut builder = ModuleBuilder::new();
    builder.add_memory(1, None).export_as("memory")?;
    let segment = builder.add_passive_data_segment(b"payload");
    builder.add_data_segment(0, ConstExpr::i32_const(64), b"active");
    builder
        .add_function("init", FuncType::new([], []))
        .add_body([
            Instruction::I32Const(0),
            Instruction::I32Const(0),
            Instruction::I32Const(7),
            Instruction::MemoryInit {
                data_index: segment,
                memory: 0,
            },
            Instruction::DataDrop(segment),
        ])?
        .export_func()?;

    validate(&builder.build()?)
}

#[test]
fn test_globals_imports_and_start() -> anyhow::Result<()> {
    let mut builder = ModuleBuilder::new();
    let log = builder.add_imported_function("env", "log", FuncType::new([ValType::I32], []))?;
    let base = builder.add_imported_global("env", "base", ValType::I32, false)?;
    let counter = builder
        .add_global(ValType::I32, true, ConstExpr::global_get(base))
        .index();
    let start = builder
        .add_function("start", FuncType::new([], []))
        .add_body([
            Instruction::GlobalGet(counter),
            Instruction::I32Const(1),
            Instruction::I32Add,
            Instruction::GlobalSet(counter),
            Instruction::GlobalGet(counter),
            Instruction::Call(log),
        ])?
        .index();
    assert_eq!(start, 1);
    builder.set_start(start);

    validate(&builder.build()?)
}

#[test]
fn test_unresolved_type_reference() {
    let mut builder = ModuleBuilder::new();
    builder.add_struct([FieldType::new(RefType::concrete_nullable(5), false)]);
    assert_eq!(
        builder.build(),
        Err(BuildError::UnresolvedTypeReference { index: 5 })
    );

    let mut builder = ModuleBuilder::new();
    let declared = builder.declare_type();
    assert_eq!(
        builder.build(),
        Err(BuildError::UnresolvedTypeReference { index: declared })
    );
}

#[test]
fn test_index_out_of_range() -> anyhow::Result<()> {
    let mut builder = ModuleBuilder::new();
    builder
        .add_function("f", FuncType::new([], []))
        .add_body([Instruction::Call(3)])?;
    assert!(matches!(builder.build(), Err(BuildError::Encoding(_))));

    let mut builder = ModuleBuilder::new();
    builder
        .add_function("f", FuncType::new([ValType::I32], []))
        .add_locals(ValType::I64, 1)
        .add_body([Instruction::LocalGet(2), Instruction::Drop])?;
    assert!(matches!(builder.build(), Err(BuildError::Encoding(_))));

    let mut builder = ModuleBuilder::new();
    let point = builder.add_struct([FieldType::new(ValType::I32, false)]);
    builder
        .add_function("f", FuncType::new([ValType::ANYREF], []))
        .add_body([
            Instruction::LocalGet(0),
            Instruction::RefCast(RefType::concrete(point)),
            Instruction::StructGet {
                type_index: point,
                field: 1,
            },
            Instruction::Drop,
        ])?;
    assert!(matches!(builder.build(), Err(BuildError::Encoding(_))));
    Ok(())
}

#[test]
fn test_unclosed_rec_group() -> anyhow::Result<()> {
    let mut builder = ModuleBuilder::new();
    builder.start_rec_group()?;
    builder.add_struct([]);
    assert!(matches!(builder.build(), Err(BuildError::Encoding(_))));
    builder.end_rec_group()?;
    validate(&builder.build()?)
}

/// Funcref tables and `call_indirect` only need the reference-types
/// extension, so the binary runs on an MVP-era interpreter.
#[test]
fn test_funcref_table_in_wasmi() -> anyhow::Result<()> {
    let mut builder = ModuleBuilder::new();
    let binop = builder.add_type(FuncType::new(
        [ValType::I32, ValType::I32],
        [ValType::I32],
    ));
    let add = builder
        .add_function("add", binop)
        .add_body([
            Instruction::LocalGet(0),
            Instruction::LocalGet(1),
            Instruction::I32Add,
        ])?
        .index();
    let sub = builder
        .add_function("sub", binop)
        .add_body([
            Instruction::LocalGet(0),
            Instruction::LocalGet(1),
            Instruction::I32Sub,
        ])?
        .index();
    let table = builder
        .add_table(RefType::FUNCREF, 2, Some(2), None)?
        .index();
    builder.add_active_element_segment(table, ConstExpr::i32_const(0), vec![add, sub], RefType::FUNCREF);
    builder
        .add_function(
            "call",
            FuncType::new([ValType::I32, ValType::I32, ValType::I32], [ValType::I32]),
        )
        .add_body([
            Instruction::LocalGet(1),
            Instruction::LocalGet(2),
            Instruction::LocalGet(0),
            Instruction::CallIndirect {
                type_index: binop,
                table_index: table,
            },
        ])?
        .export_func()?;
    builder
        .add_function("swap", FuncType::new([], []))
        .add_body([
            Instruction::I32Const(0),
            Instruction::RefFunc(sub),
            Instruction::TableSet(table),
        ])?
        .export_func()?;
    let wasm = builder.build()?;

    let text = wasmprinter::print_bytes(&wasm)?;
    assert!(text.contains("call_indirect"));
    assert!(text.contains("funcref"));
    assert!(text.contains("export \"swap\""));

    let engine = wasmi::Engine::default();
    let module = wasmi::Module::new(&engine, &wasm[..])?;
    let mut store = wasmi::Store::new(&engine, ());
    let linker = <wasmi::Linker<()>>::new(&engine);
    let instance = linker.instantiate(&mut store, &module)?.start(&mut store)?;
    let call = instance.get_typed_func::<(i32, i32, i32), i32>(&store, "call")?;
    let swap = instance.get_typed_func::<(), ()>(&store, "swap")?;

    assert_eq!(call.call(&mut store, (0, 7, 3))?, 10);
    assert_eq!(call.call(&mut store, (1, 7, 3))?, 4);
    swap.call(&mut store, ())?;
    assert_eq!(call.call(&mut store, (0, 7, 3))?, 4);
    Ok(())
}
