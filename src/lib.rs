//! Assembles WebAssembly modules that use the GC and typed reference proposals.
//!
//! A [`ModuleBuilder`] collects types, functions, tables, element segments,
//! imports and exports, and serializes them to the binary format. The [`host`]
//! module is a small reference host that instantiates the result, links imports
//! and enforces the reference-type rules on every table and boundary operation.

pub mod builder;
pub mod compat;
pub mod encode;
pub mod error;
pub mod host;
pub mod instruction;
pub mod ir;
pub mod types;
pub mod wat;

pub use builder::{EntityBuilder, FunctionBuilder, ModuleBuilder};
pub use error::{BuildError, BuildResult, HostError, HostErrorKind, HostResult};
pub use instruction::{BlockType, ConstExpr, Instruction, MemArg};
pub use ir::{ElementItems, ExternKind, TableInit, WasmBinary};
pub use types::{
    CompositeType, FieldType, FuncType, GlobalType, HeapType, MemoryType, RefType, StorageType,
    SubType, TableType, ValType,
};
