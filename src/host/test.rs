use crate::builder::ModuleBuilder;
use crate::compat::MatchPolicy;
use crate::error::{HostError, HostErrorKind};
use crate::host::{
    array_to_string, string_to_array, EqKind, Func, Global, HostObject, Imports, Instance, Ref,
    Store, StoreConfig, Table, Val, MAX_ARRAY_LEN, MAX_TABLE_SIZE,
};
use crate::instruction::{BlockType, ConstExpr, Instruction};
use crate::ir::{ExternKind, TableInit, WasmBinary};
use crate::types::{
    CompositeType, FieldType, FuncType, GlobalType, HeapType, RefType, StorageType, SubType,
    TableType, ValType,
};

fn instantiate(store: &mut Store, binary: &WasmBinary) -> Instance {
    Instance::new(store, binary, &Imports::new()).unwrap()
}

fn expect_error<T: std::fmt::Debug>(result: Result<T, HostError>, kind: HostErrorKind) -> String {
    let error = result.unwrap_err();
    assert_eq!(error.kind, kind, "unexpected error: {error}");
    error.msg
}

fn table_importer(element: RefType) -> WasmBinary {
    let mut builder = ModuleBuilder::new();
    builder
        .add_imported_table("imports", "table", 1, None, element)
        .unwrap();
    builder.finish().unwrap()
}

#[test]
fn table_imports_must_match_exactly() {
    let kinds = [
        RefType::ANYREF,
        RefType::EQREF,
        RefType::DATAREF,
        RefType::ARRAYREF,
    ];
    for actual in kinds {
        for declared in kinds {
            let mut store = Store::default();
            let ty = TableType {
                element: actual,
                initial: 1,
                maximum: None,
            };
            let table = Table::new(&store, ty, Ref::Null).unwrap();
            let mut imports = Imports::new();
            imports.define("imports", "table", table);

            let result = Instance::new(&mut store, &table_importer(declared), &imports);
            if actual == declared {
                assert!(result.is_ok(), "{actual:?} should link as {declared:?}");
            } else {
                let msg = expect_error(result, HostErrorKind::Link);
                assert_eq!(
                    msg,
                    "Import #0 module=\"imports\" function=\"table\" error: imported table does not match the expected type"
                );
            }
        }
    }
}

#[test]
fn table_imports_with_subtyping() {
    let mut store = Store::new(StoreConfig {
        table_import_policy: MatchPolicy::Subtype,
        ..StoreConfig::default()
    });
    let ty = TableType {
        element: RefType::ARRAYREF,
        initial: 2,
        maximum: Some(4),
    };
    let table = Table::new(&store, ty, Ref::Null).unwrap();
    let mut imports = Imports::new();
    imports.define("imports", "table", table);

    assert!(Instance::new(&mut store, &table_importer(RefType::EQREF), &imports).is_ok());
    assert!(Instance::new(&mut store, &table_importer(RefType::ANYREF), &imports).is_ok());
    let result = Instance::new(&mut store, &table_importer(RefType::I31REF), &imports);
    expect_error(result, HostErrorKind::Link);
}

/// Exports `succ : unary`, `addition : binary`, a funcref table and a table of
/// `(ref null unary)`.
fn function_tables() -> WasmBinary {
    let mut builder = ModuleBuilder::new();
    let unary = builder.add_type(FuncType::new([ValType::I32], [ValType::I32]));
    let binary = builder.add_type(FuncType::new([ValType::I32, ValType::I32], [ValType::I32]));
    builder
        .add_function("succ", unary)
        .add_body([
            Instruction::LocalGet(0),
            Instruction::I32Const(1),
            Instruction::I32Add,
        ])
        .unwrap()
        .export_func()
        .unwrap();
    builder
        .add_function("addition", binary)
        .add_body([
            Instruction::LocalGet(0),
            Instruction::LocalGet(1),
            Instruction::I32Add,
        ])
        .unwrap()
        .export_func()
        .unwrap();
    builder
        .add_table(RefType::FUNCREF, 2, None, None)
        .unwrap()
        .export_as("funcs")
        .unwrap();
    builder
        .add_table(RefType::concrete_nullable(unary), 2, None, None)
        .unwrap()
        .export_as("unaries")
        .unwrap();
    builder.finish().unwrap()
}

#[test]
fn typed_function_tables() {
    let mut store = Store::default();
    let instance = instantiate(&mut store, &function_tables());
    let succ = instance.get_func("succ").unwrap();
    let addition = instance.get_func("addition").unwrap();
    let unaries = instance.get_table("unaries").unwrap();

    unaries.set(&store, 0, Ref::Func(succ.clone())).unwrap();
    assert!(unaries.get(0).unwrap().ref_eq(&Ref::Func(succ)));
    let msg = expect_error(
        unaries.set(&store, 1, Ref::Func(addition.clone())),
        HostErrorKind::Type,
    );
    assert_eq!(msg, "Argument 1 is invalid for table of type (ref null 0)");
    let msg = expect_error(unaries.set(&store, 2, Ref::Func(addition)), HostErrorKind::Range);
    assert!(msg.contains("out of bounds"));
    unaries.set(&store, 1, Ref::Null).unwrap();
}

#[test]
fn typed_function_table_imports() {
    let mut store = Store::default();
    let exporter = instantiate(&mut store, &function_tables());

    let importer = |element: RefType| {
        let mut builder = ModuleBuilder::new();
        builder.add_type(FuncType::new([ValType::I32], [ValType::I32]));
        builder
            .add_imported_table("imports", "table", 2, None, element)
            .unwrap();
        builder.finish().unwrap()
    };
    let imports_of = |name: &str| {
        let mut imports = Imports::new();
        imports.define("imports", "table", exporter.get_table(name).unwrap());
        imports
    };

    let as_unary = importer(RefType::concrete_nullable(0));
    let result = Instance::new(&mut store, &as_unary, &imports_of("funcs"));
    expect_error(result, HostErrorKind::Link);
    let as_funcref = importer(RefType::FUNCREF);
    let result = Instance::new(&mut store, &as_funcref, &imports_of("unaries"));
    expect_error(result, HostErrorKind::Link);

    // The importer's `unary` is the same canonical type as the exporter's.
    assert!(Instance::new(&mut store, &as_unary, &imports_of("unaries")).is_ok());
    assert!(Instance::new(&mut store, &as_funcref, &imports_of("funcs")).is_ok());
}

#[test]
fn non_nullable_table() {
    let mut builder = ModuleBuilder::new();
    let binary = builder.add_type(FuncType::new([ValType::I32, ValType::I32], [ValType::I32]));
    let addition = builder
        .add_function("addition", binary)
        .add_body([
            Instruction::LocalGet(0),
            Instruction::LocalGet(1),
            Instruction::I32Add,
        ])
        .unwrap()
        .export_func()
        .unwrap();
    let init = TableInit::Uniform(ConstExpr::ref_func(addition));
    builder
        .add_table(RefType::concrete(binary), 3, None, Some(init))
        .unwrap()
        .export_as("table")
        .unwrap();

    let mut store = Store::default();
    let instance = instantiate(&mut store, &builder.finish().unwrap());
    let table = instance.get_table("table").unwrap();
    let addition = Ref::Func(instance.get_func("addition").unwrap());
    assert_eq!(table.size(), 3);
    for index in 0..3 {
        assert!(table.get(index).unwrap().ref_eq(&addition));
    }
    let msg = expect_error(table.set(&store, 0, Ref::Null), HostErrorKind::Type);
    assert_eq!(msg, "Argument 1 is invalid for table of type (ref 0)");
}

#[test]
fn per_slot_table_initializers() {
    let mut builder = ModuleBuilder::new();
    let sig = builder.add_type(FuncType::new([ValType::I32], [ValType::I32]));
    let id = builder
        .add_function("id", sig)
        .add_body([Instruction::LocalGet(0)])
        .unwrap()
        .export_func()
        .unwrap();
    let twice = builder
        .add_function("twice", sig)
        .add_body([
            Instruction::LocalGet(0),
            Instruction::LocalGet(0),
            Instruction::I32Add,
        ])
        .unwrap()
        .export_func()
        .unwrap();
    let init = TableInit::PerSlot(vec![ConstExpr::ref_func(id), ConstExpr::ref_func(twice)]);
    builder
        .add_table(RefType::concrete(sig), 2, None, Some(init))
        .unwrap()
        .export_as("table")
        .unwrap();

    let mut store = Store::default();
    let instance = instantiate(&mut store, &builder.finish().unwrap());
    let table = instance.get_table("table").unwrap();
    let id = Ref::Func(instance.get_func("id").unwrap());
    let twice = Ref::Func(instance.get_func("twice").unwrap());
    assert_eq!(table.size(), 2);
    assert!(table.get(0).unwrap().ref_eq(&id));
    assert!(table.get(1).unwrap().ref_eq(&twice));
    assert!(!table.get(1).unwrap().ref_eq(&id));

    table.set(&store, 1, id.clone()).unwrap();
    assert!(table.get(1).unwrap().ref_eq(&id));
    let msg = expect_error(table.set(&store, 1, Ref::Null), HostErrorKind::Type);
    assert_eq!(msg, "Argument 1 is invalid for table of type (ref 0)");
}

#[test]
fn anyref_element_segment() {
    let mut builder = ModuleBuilder::new();
    let numbers = builder.add_array(ValType::I32, true);
    let boxed = builder.add_struct([FieldType::new(ValType::I32, false)]);
    let table = builder
        .add_table(RefType::ANYREF, 4, None, None)
        .unwrap()
        .export_as("table")
        .unwrap();
    let items = vec![
        ConstExpr::new([
            Instruction::I32Const(111),
            Instruction::I32Const(222),
            Instruction::ArrayNewFixed {
                type_index: numbers,
                len: 2,
            },
        ]),
        ConstExpr::new([Instruction::I32Const(-31), Instruction::RefI31]),
        ConstExpr::new([Instruction::I32Const(10), Instruction::StructNew(boxed)]),
        ConstExpr::ref_null(HeapType::Eq),
    ];
    builder.add_active_element_segment(table, ConstExpr::i32_const(0), items, RefType::ANYREF);

    let mut store = Store::default();
    let instance = instantiate(&mut store, &builder.finish().unwrap());
    let table = instance.get_table("table").unwrap();

    let array = table.get(0).unwrap();
    assert_eq!(array.classify().unwrap(), EqKind::Data);
    let gc = array.as_gc().unwrap();
    assert_eq!(gc.len(), 2);
    assert_eq!(gc.get(0).unwrap().as_i32(), Some(111));
    assert_eq!(gc.get(1).unwrap().as_i32(), Some(222));
    assert!(array
        .cast(&instance.ref_type(RefType::concrete(numbers)).unwrap(), &store)
        .is_ok());

    let i31 = table.get(1).unwrap();
    assert_eq!(i31.classify().unwrap(), EqKind::I31);
    assert_eq!(i31.i31_get_s().unwrap(), -31);
    assert_eq!(i31.i31_get_u().unwrap(), 0x7FFF_FFE1);

    let object = table.get(2).unwrap();
    assert_eq!(object.classify().unwrap(), EqKind::Data);
    assert_eq!(object.as_gc().unwrap().get(0).unwrap().as_i32(), Some(10));
    let msg = expect_error(
        object.cast(&instance.ref_type(RefType::concrete(numbers)).unwrap(), &store),
        HostErrorKind::Runtime,
    );
    assert!(msg.starts_with("illegal cast"));

    // Out through the host boundary and back keeps identity.
    let external = object.externalize().unwrap();
    let back = external.internalize().unwrap();
    assert!(back.ref_eq(&object));
    assert!(back
        .cast(&instance.ref_type(RefType::concrete(boxed)).unwrap(), &store)
        .is_ok());

    let null = table.get(3).unwrap();
    assert!(null.is_null());
    assert_eq!(
        expect_error(null.classify(), HostErrorKind::Runtime),
        "unreachable"
    );
}

#[test]
fn element_segment_out_of_bounds() {
    let mut builder = ModuleBuilder::new();
    let f = builder
        .add_function("f", FuncType::new([], []))
        .index();
    let table = builder.add_table(RefType::FUNCREF, 1, None, None).unwrap().index();
    builder.add_active_element_segment(
        table,
        ConstExpr::i32_const(0),
        vec![f, f],
        RefType::FUNCREF,
    );

    let mut store = Store::default();
    let result = Instance::new(&mut store, &builder.finish().unwrap(), &Imports::new());
    let msg = expect_error(result, HostErrorKind::Runtime);
    assert_eq!(msg, "table initializer is out of bounds");
}

#[test]
fn host_values_cross_the_boundary() {
    let mut builder = ModuleBuilder::new();
    let point = builder.add_struct([
        FieldType::new(ValType::I32, true),
        FieldType::new(StorageType::I8, true),
    ]);
    let mut store = Store::default();
    let instance = instantiate(&mut store, &builder.finish().unwrap());
    let point = instance.type_id(point).unwrap();

    let a = Ref::new_struct(&store, point, vec![Val::I32(1), Val::I32(-1)]).unwrap();
    let b = Ref::new_struct(&store, point, vec![Val::I32(1), Val::I32(-1)]).unwrap();
    assert!(a.ref_eq(&a.clone()));
    assert!(!a.ref_eq(&b));

    let gc = a.as_gc().unwrap();
    assert_eq!(gc.get(1).unwrap().as_i32(), Some(0xFF));
    assert_eq!(gc.get_signed(&store, 1).unwrap().as_i32(), Some(-1));
    gc.set(&store, 0, Val::I32(5)).unwrap();
    assert_eq!(gc.get(0).unwrap().as_i32(), Some(5));
    expect_error(gc.set(&store, 0, Val::I64(5)), HostErrorKind::Type);

    let external = a.externalize().unwrap();
    assert_eq!(external.heap_type(), Some(HeapType::Extern));
    assert!(external.internalize().unwrap().ref_eq(&a));

    let host = Ref::Host(HostObject::new("window"));
    let internal = host.internalize().unwrap();
    assert_eq!(internal.heap_type(), Some(HeapType::Any));
    assert!(internal.externalize().unwrap().ref_eq(&host));
    assert_eq!(
        expect_error(internal.classify(), HostErrorKind::Runtime),
        "unreachable"
    );
    expect_error(host.externalize(), HostErrorKind::Type);
}

#[test]
fn recursion_groups_are_canonical() {
    let module = || {
        let mut builder = ModuleBuilder::new();
        builder.start_rec_group().unwrap();
        let list = builder.add_struct([
            FieldType::new(ValType::I32, false),
            FieldType::new(RefType::concrete_nullable(0), false),
        ]);
        builder.end_rec_group().unwrap();
        builder
            .add_global(
                RefType::concrete_nullable(list).into(),
                false,
                ConstExpr::ref_null(HeapType::Concrete(list)),
            )
            .export_as("head")
            .unwrap();
        builder.finish().unwrap()
    };
    let mut store = Store::default();
    let first = instantiate(&mut store, &module());
    let second = instantiate(&mut store, &module());
    assert_eq!(first.type_id(0), second.type_id(0));
    assert_eq!(store.types().len(), 1);

    let list = first.type_id(0).unwrap();
    let tail = Ref::new_struct(&store, list, vec![Val::I32(2), Val::Ref(Ref::Null)]).unwrap();
    let head = Ref::new_struct(&store, list, vec![Val::I32(1), Val::Ref(tail)]).unwrap();
    assert!(head.test(&second.ref_type(RefType::concrete(0)).unwrap(), &store));
    assert!(!head.test(&RefType::non_null(HeapType::Array), &store));
}

#[test]
fn forward_references_outside_rec_groups() {
    let mut builder = ModuleBuilder::new();
    let left = builder.declare_type();
    let right = builder.add_struct([FieldType::new(RefType::concrete_nullable(left), true)]);
    builder
        .define_type(
            left,
            SubType::new(CompositeType::Struct(vec![FieldType::new(
                RefType::concrete_nullable(right),
                true,
            )])),
        )
        .unwrap();
    let mut store = Store::default();
    let instance = instantiate(&mut store, &builder.finish().unwrap());
    assert_eq!(store.types().len(), 2);

    let left_id = instance.type_id(left).unwrap();
    let right_id = instance.type_id(right).unwrap();
    let inner = Ref::new_struct(&store, right_id, vec![Val::Ref(Ref::Null)]).unwrap();
    let middle = Ref::new_struct(&store, left_id, vec![Val::Ref(inner)]).unwrap();
    let outer = Ref::new_struct(&store, right_id, vec![Val::Ref(middle.clone())]).unwrap();
    assert!(outer.test(&instance.ref_type(RefType::concrete(right)).unwrap(), &store));
    assert!(middle.test(&instance.ref_type(RefType::concrete(left)).unwrap(), &store));
    assert!(!middle.test(&instance.ref_type(RefType::concrete(right)).unwrap(), &store));
    expect_error(
        Ref::new_struct(&store, left_id, vec![Val::Ref(middle.clone())]),
        HostErrorKind::Type,
    );

    let msg = expect_error(
        instance.ref_type(RefType::concrete(7)),
        HostErrorKind::Validation,
    );
    assert_eq!(msg, "unknown type index 7");
    expect_error(instance.heap_type(7), HostErrorKind::Validation);
}

#[test]
fn oversized_allocations_are_rejected() {
    let array_global = |init: Vec<Instruction>| {
        let mut builder = ModuleBuilder::new();
        let numbers = builder.add_array(ValType::I32, true);
        builder.add_global(RefType::concrete(numbers).into(), false, ConstExpr::new(init));
        builder.finish().unwrap()
    };
    let mut store = Store::default();
    let negative = array_global(vec![Instruction::I32Const(-1), Instruction::ArrayNewDefault(0)]);
    let msg = expect_error(
        Instance::new(&mut store, &negative, &Imports::new()),
        HostErrorKind::Runtime,
    );
    assert!(msg.starts_with("requested new array is too large"), "{msg}");
    let huge = array_global(vec![
        Instruction::I32Const(0),
        Instruction::I32Const(MAX_ARRAY_LEN as i32 + 1),
        Instruction::ArrayNew(0),
    ]);
    expect_error(
        Instance::new(&mut store, &huge, &Imports::new()),
        HostErrorKind::Runtime,
    );
    let small = array_global(vec![Instruction::I32Const(3), Instruction::ArrayNewDefault(0)]);
    let instance = Instance::new(&mut store, &small, &Imports::new()).unwrap();
    assert!(instance.type_id(0).is_some());

    let unbounded = TableType {
        element: RefType::EQREF,
        initial: MAX_TABLE_SIZE + 1,
        maximum: None,
    };
    expect_error(Table::new(&store, unbounded, Ref::Null), HostErrorKind::Range);
    let empty = Table::new(&store, TableType { initial: 0, ..unbounded }, Ref::Null).unwrap();
    expect_error(
        empty.grow(&store, MAX_TABLE_SIZE + 1, Ref::Null),
        HostErrorKind::Range,
    );
    assert_eq!(empty.grow(&store, 4, Ref::Null).unwrap(), 0);
}

#[test]
fn strings_from_arrays() {
    let mut builder = ModuleBuilder::new();
    let utf16 = builder.add_array(StorageType::I16, true);
    let latin1 = builder.add_array(StorageType::I8, true);
    let mut store = Store::default();
    let instance = instantiate(&mut store, &builder.finish().unwrap());
    let utf16 = instance.type_id(utf16).unwrap();
    let latin1 = instance.type_id(latin1).unwrap();

    let units = "HELLO".encode_utf16().map(|unit| Val::I32(unit as i32)).collect();
    let hello = Ref::new_array(&store, utf16, units).unwrap();
    assert_eq!(array_to_string(&store, &hello, 0, 5).unwrap(), "HELLO");
    assert_eq!(array_to_string(&store, &hello, 1, 4).unwrap(), "ELLO");
    assert_eq!(array_to_string(&store, &hello, 0, 3).unwrap(), "HEL");
    expect_error(array_to_string(&store, &hello, 3, 5), HostErrorKind::Range);

    let foobar = string_to_array(&store, "foobar", &hello).unwrap();
    assert_eq!(foobar.as_gc().unwrap().len(), 6);
    assert_eq!(array_to_string(&store, &foobar, 0, 6).unwrap(), "foobar");

    let bytes = Ref::new_array(&store, latin1, Vec::new()).unwrap();
    let cafe = string_to_array(&store, "café", &bytes).unwrap();
    assert_eq!(array_to_string(&store, &cafe, 0, 4).unwrap(), "café");
    expect_error(string_to_array(&store, "λ", &bytes), HostErrorKind::Range);
    expect_error(
        array_to_string(&store, &Ref::i31(3), 0, 0),
        HostErrorKind::Type,
    );
}

#[test]
fn imported_functions_and_globals() {
    let mut store = Store::default();
    let log = Func::new(&mut store, "log", FuncType::new([ValType::I32], [])).unwrap();
    let counter = Global::new(
        &store,
        GlobalType {
            ty: ValType::I32,
            mutable: false,
        },
        Val::I32(40),
    )
    .unwrap();

    let mut builder = ModuleBuilder::new();
    builder
        .add_imported_function("env", "log", FuncType::new([ValType::I32], []))
        .unwrap();
    builder
        .add_imported_global("env", "counter", ValType::I32, false)
        .unwrap();
    builder
        .add_global(
            ValType::I32,
            false,
            ConstExpr::new([
                Instruction::I32Const(2),
                Instruction::I32Const(3),
                Instruction::I32Mul,
            ]),
        )
        .export_as("six")
        .unwrap();
    builder
        .add_global(ValType::I32, true, ConstExpr::global_get(0))
        .export_as("copy")
        .unwrap();
    builder.add_export("log", ExternKind::Func, 0).unwrap();
    let binary = builder.finish().unwrap();

    let mut imports = Imports::new();
    imports.define("env", "log", log.clone());
    imports.define("env", "counter", counter.clone());
    let instance = Instance::new(&mut store, &binary, &imports).unwrap();
    assert!(instance.get_func("log").unwrap().ptr_eq(&log));
    assert_eq!(instance.get_global("six").unwrap().get().as_i32(), Some(6));

    let copy = instance.get_global("copy").unwrap();
    assert_eq!(copy.get().as_i32(), Some(40));
    copy.set(&store, Val::I32(7)).unwrap();
    assert_eq!(counter.get().as_i32(), Some(40));
    expect_error(copy.set(&store, Val::I64(7)), HostErrorKind::Type);
    let six = instance.get_global("six").unwrap();
    expect_error(six.set(&store, Val::I32(7)), HostErrorKind::Type);

    let mut missing = Imports::new();
    missing.define("env", "log", log.clone());
    let msg = expect_error(
        Instance::new(&mut store, &binary, &missing),
        HostErrorKind::Link,
    );
    assert!(msg.starts_with("Import #1 module=\"env\" function=\"counter\""));

    let mut swapped = Imports::new();
    swapped.define("env", "log", counter.clone());
    swapped.define("env", "counter", counter);
    let msg = expect_error(
        Instance::new(&mut store, &binary, &swapped),
        HostErrorKind::Link,
    );
    assert!(msg.contains("requires a function"));

    let wrong = Func::new(&mut store, "log", FuncType::new([ValType::I64], [])).unwrap();
    let mut mismatched = Imports::new();
    mismatched.define("env", "log", wrong);
    let msg = expect_error(
        Instance::new(&mut store, &binary, &mismatched),
        HostErrorKind::Link,
    );
    assert!(msg.ends_with("imported function does not match the expected type"));
}

#[test]
fn externalized_global() {
    let mut builder = ModuleBuilder::new();
    builder
        .add_global(
            ValType::Ref(RefType::EXTERNREF),
            false,
            ConstExpr::new([
                Instruction::I32Const(5),
                Instruction::RefI31,
                Instruction::ExternConvertAny,
            ]),
        )
        .export_as("boxed")
        .unwrap();
    let mut store = Store::default();
    let instance = instantiate(&mut store, &builder.finish().unwrap());
    let value = instance.get_global("boxed").unwrap().get();
    let value = value.as_ref().unwrap();
    assert!(matches!(value, Ref::Externalized(_)));
    assert_eq!(value.internalize().unwrap().i31_get_s().unwrap(), 5);
}

#[test]
fn memories_and_data() {
    let mut builder = ModuleBuilder::new();
    builder.add_memory(1, Some(2)).export_as("memory").unwrap();
    builder.add_data_segment(0, ConstExpr::i32_const(8), b"hello");
    builder.add_passive_data_segment(b"later");
    let mut store = Store::default();
    let instance = instantiate(&mut store, &builder.finish().unwrap());

    let memory = instance.get_memory("memory").unwrap();
    assert_eq!(memory.read(8, 5).unwrap(), b"hello");
    assert_eq!(memory.read(0, 8).unwrap(), vec![0; 8]);
    assert_eq!(memory.grow(1).unwrap(), 1);
    assert_eq!(memory.size(), 2);
    expect_error(memory.grow(1), HostErrorKind::Range);
    expect_error(memory.read(2 * 65536 - 2, 4), HostErrorKind::Range);

    let mut builder = ModuleBuilder::new();
    builder.add_memory(1, None);
    builder.add_data_segment(0, ConstExpr::i32_const(65534), b"hello");
    let result = Instance::new(&mut store, &builder.finish().unwrap(), &Imports::new());
    let msg = expect_error(result, HostErrorKind::Runtime);
    assert_eq!(msg, "data segment is out of bounds");
}

#[test]
fn table_growth() {
    let store = Store::default();
    let ty = TableType {
        element: RefType::EQREF,
        initial: 1,
        maximum: Some(2),
    };
    let table = Table::new(&store, ty, Ref::i31(1)).unwrap();
    assert_eq!(table.grow(&store, 1, Ref::Null).unwrap(), 1);
    assert_eq!(table.size(), 2);
    assert_eq!(table.ty().initial, 2);
    expect_error(table.grow(&store, 1, Ref::Null), HostErrorKind::Range);
    expect_error(table.get(2), HostErrorKind::Range);
    let host = Ref::Host(HostObject::new("x"));
    let msg = expect_error(table.set(&store, 0, host), HostErrorKind::Type);
    assert_eq!(msg, "Argument 1 is invalid for table of type eqref");

    let too_big = TableType {
        initial: 3,
        ..ty
    };
    expect_error(Table::new(&store, too_big, Ref::Null), HostErrorKind::Range);
    let non_null = TableType {
        element: RefType::non_null(HeapType::Eq),
        ..ty
    };
    expect_error(Table::new(&store, non_null, Ref::Null), HostErrorKind::Type);
}

#[test]
fn unbalanced_bodies_fail_validation() {
    let module = |body: Vec<Instruction>| {
        let mut builder = ModuleBuilder::new();
        builder
            .add_function("f", FuncType::new([], []))
            .add_body(body)
            .unwrap();
        builder.finish().unwrap()
    };
    let mut store = Store::default();
    let balanced = module(vec![
        Instruction::Block(BlockType::Empty),
        Instruction::I32Const(1),
        Instruction::If(BlockType::Empty),
        Instruction::Else,
        Instruction::End,
        Instruction::End,
    ]);
    assert!(Instance::new(&mut store, &balanced, &Imports::new()).is_ok());

    let unclosed = module(vec![Instruction::Loop(BlockType::Empty)]);
    let msg = expect_error(
        Instance::new(&mut store, &unclosed, &Imports::new()),
        HostErrorKind::Validation,
    );
    assert_eq!(msg, "function 'f': 1 blocks are never closed");

    let stray_else = module(vec![Instruction::Block(BlockType::Empty), Instruction::Else]);
    let msg = expect_error(
        Instance::new(&mut store, &stray_else, &Imports::new()),
        HostErrorKind::Validation,
    );
    assert!(msg.ends_with("else outside of an if block"));

    let extra_end = module(vec![Instruction::End]);
    expect_error(
        Instance::new(&mut store, &extra_end, &Imports::new()),
        HostErrorKind::Validation,
    );
}
