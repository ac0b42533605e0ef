use crate::builder::ModuleBuilder;
use crate::instruction::{BlockType, ConstExpr, Instruction, MemArg};
use crate::types::{
    CompositeType, FieldType, FuncType, HeapType, RefType, StorageType, SubType, TableType,
    ValType,
};
use crate::wat::WatEmitter;

#[test]
fn test_types() {
    assert_eq!(RefType::concrete_nullable(0).to_wat(), "(ref null 0)");
    assert_eq!(RefType::concrete(4).to_wat(), "(ref 4)");
    assert_eq!(RefType::ANYREF.to_wat(), "anyref");
    assert_eq!(RefType::DATAREF.to_wat(), "dataref");
    assert_eq!(RefType::NULLREF.to_wat(), "nullref");
    assert_eq!(RefType::non_null(HeapType::Eq).to_wat(), "(ref eq)");
    assert_eq!(FieldType::new(StorageType::I16, true).to_wat(), "(mut i16)");

    let binop = FuncType::new([ValType::I32, ValType::I32], [ValType::I32]);
    assert_eq!(binop.to_wat(), "func (param i32 i32) (result i32)");
    assert_eq!(FuncType::new([], []).to_wat(), "func");

    let child = SubType {
        is_final: false,
        supertype: Some(0),
        composite: CompositeType::Struct(vec![FieldType::new(ValType::I32, false)]),
    };
    assert_eq!(child.to_wat(), "(sub 0 (struct (field i32)))");

    let table = TableType {
        element: RefType::FUNCREF,
        initial: 1,
        maximum: Some(10),
    };
    assert_eq!(table.to_wat(), "1 10 funcref");
}

#[test]
fn test_instructions() {
    assert_eq!(
        Instruction::StructGet {
            type_index: 1,
            field: 2
        }
        .to_wat(),
        "struct.get 1 2"
    );
    assert_eq!(
        Instruction::I32Load(MemArg::new(2, 8)).to_wat(),
        "i32.load offset=8 align=4"
    );
    assert_eq!(Instruction::Block(BlockType::Empty).to_wat(), "block");
    assert_eq!(
        Instruction::If(BlockType::Result(ValType::I32)).to_wat(),
        "if (result i32)"
    );
    assert_eq!(
        Instruction::RefCast(RefType::concrete(3)).to_wat(),
        "ref.cast (ref 3)"
    );
    assert_eq!(
        Instruction::BrOnCast {
            label: 0,
            from: RefType::ANYREF,
            to: RefType::non_null(HeapType::I31),
        }
        .to_wat(),
        "br_on_cast 0 anyref (ref i31)"
    );
    assert_eq!(
        Instruction::CallIndirect {
            type_index: 2,
            table_index: 0
        }
        .to_wat(),
        "call_indirect 0 (type 2)"
    );
    assert_eq!(Instruction::ExternConvertAny.name(), "extern.convert_any");
    assert_eq!(
        ConstExpr::new([Instruction::I32Const(42), Instruction::RefI31]).to_wat(),
        "(i32.const 42) (ref.i31)"
    );
}

#[test]
fn hello_world() -> anyhow::Result<()> {
    let mut builder = ModuleBuilder::new();
    let string = builder.add_array(StorageType::I16, true);
    builder
        .add_function("hello", FuncType::new([], [RefType::concrete(string).into()]))
        .add_body([
            Instruction::I32Const(72),
            Instruction::I32Const(73),
            Instruction::ArrayNewFixed {
                type_index: string,
                len: 2,
            },
        ])?
        .export_func()?;
    builder.add_memory(1, None);
    builder.add_data_segment(0, ConstExpr::i32_const(0), b"Hi \"there\"\n");

    let wat = builder.module().to_wat();
    println!("{wat}");
    assert!(wat.starts_with("(module"));
    assert!(wat.contains("(type (;0;) (array (mut i16)))"));
    assert!(wat.contains("(type (;1;) (func (result (ref 0))))"));
    assert!(wat.contains(
        "(func $hello (type 1) i32.const 72 i32.const 73 array.new_fixed 0 2)"
    ));
    assert!(wat.contains("(export \"hello\" (func 0))"));
    assert!(wat.contains(r#"(data (memory 0) (offset (i32.const 0)) "Hi \22there\22\0a")"#));
    Ok(())
}
