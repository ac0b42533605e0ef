
use tracing::trace;

use crate::encode;
use crate::error::{encoding_error, BuildError, BuildResult};
use crate::instruction::{ConstExpr, Instruction};
use crate::ir::{
    DataMode, DataSegment, ElementItems, ElementMode, ElementSegment, Export, ExternKind,
    FunctionDef, GlobalDef, Import, ImportDesc, Module, TableDef, TableInit, TypeSlot,
    WasmBinary,
};
use crate::types::{
    CompositeType, FieldType, FuncType, GlobalType, MemoryType, RefType, StorageType, SubType,
    TableType, ValType,
};
use crate::wat::WatEmitter;

/// The signature of a function: an existing type index or an inline type.
#[derive(Debug, Clone, PartialEq)]
pub enum FuncSig {
    Index(u32),
    Type(FuncType),
}

impl From<u32> for FuncSig {
    fn from(index: u32) -> Self {
        FuncSig::Index(index)
    }
}

impl From<FuncType> for FuncSig {
    fn from(ty: FuncType) -> Self {
        FuncSig::Type(ty)
    }
}

#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn add_type(&mut self, ty: FuncType) -> u32 {
        self.add_sub_type(SubType::new(CompositeType::Func(ty)))
    }

    pub fn add_struct(&mut self, fields: impl IntoIterator<Item = FieldType>) -> u32 {
        self.add_sub_type(SubType::new(CompositeType::Struct(
            fields.into_iter().collect(),
        )))
    }

    pub fn add_array(&mut self, element: impl Into<StorageType>, mutable: bool) -> u32 {
        self.add_sub_type(SubType::new(CompositeType::Array(FieldType::new(
            element, mutable,
        ))))
    }

    /// Adds a type with an explicit supertype and finality.
    pub fn add_sub_type(&mut self, sub: SubType) -> u32 {
        self.module.types.push(sub)
    }

    /// Reserves a type index to be filled in later with [`Self::define_type`].
    pub fn declare_type(&mut self) -> u32 {
        self.module.types.declare()
    }

    pub fn define_type(&mut self, index: u32, sub: SubType) -> BuildResult<()> {
        match self.module.types.slot_mut(index) {
            Some(slot @ TypeSlot::Declared) => {
                *slot = TypeSlot::Defined(sub);
                Ok(())
            }
            Some(TypeSlot::Defined(_)) => Err(encoding_error!("type {index} is already defined")),
            None => Err(BuildError::UnresolvedTypeReference { index }),
        }
    }

    pub fn start_rec_group(&mut self) -> BuildResult<()> {
        if !self.module.types.start_group() {
            return Err(encoding_error!("recursion groups cannot be nested"));
        }
        Ok(())
    }

    pub fn end_rec_group(&mut self) -> BuildResult<()> {
        if !self.module.types.end_group() {
            return Err(encoding_error!("no recursion group is open"));
        }
        Ok(())
    }

    fn signature_index(&mut self, sig: FuncSig) -> u32 {
        match sig {
            FuncSig::Index(index) => index,
            FuncSig::Type(ty) => {
                let sub = SubType::new(CompositeType::Func(ty));
                match self.module.types.find_singleton(&sub) {
                    Some(index) => index,
                    None => self.add_sub_type(sub),
                }
            }
        }
    }

    pub fn add_function(&mut self, name: &str, sig: impl Into<FuncSig>) -> FunctionBuilder<'_> {
        let type_index = self.signature_index(sig.into());
        let index = self.module.index_space(ExternKind::Func);
        self.module.functions.push(FunctionDef {
            name: name.to_string(),
            type_index,
            locals: Vec::new(),
            body: Vec::new(),
        });
        FunctionBuilder {
            module: &mut self.module,
            index,
        }
    }

    fn add_import(&mut self, module: &str, field: &str, desc: ImportDesc) -> BuildResult<u32> {
        let kind = desc.kind();
        if self.module.defined_count(kind) > 0 {
            return Err(BuildError::ImportOrder(kind));
        }
        let index = self.module.imported_count(kind);
        self.module.imports.push(Import {
            module: module.to_string(),
            field: field.to_string(),
            desc,
        });
        Ok(index)
    }

    pub fn add_imported_function(
        &mut self,
        module: &str,
        field: &str,
        sig: impl Into<FuncSig>,
    ) -> BuildResult<u32> {
        let type_index = self.signature_index(sig.into());
        self.add_import(module, field, ImportDesc::Func(type_index))
    }

    pub fn add_imported_table(
        &mut self,
        module: &str,
        field: &str,
        initial: u32,
        maximum: Option<u32>,
        element: RefType,
    ) -> BuildResult<u32> {
        let ty = TableType {
            element,
            initial,
            maximum,
        };
        self.add_import(module, field, ImportDesc::Table(ty))
    }

    pub fn add_imported_memory(
        &mut self,
        module: &str,
        field: &str,
        initial: u32,
        maximum: Option<u32>,
    ) -> BuildResult<u32> {
        let ty = MemoryType { initial, maximum };
        self.add_import(module, field, ImportDesc::Memory(ty))
    }

    pub fn add_imported_global(
        &mut self,
        module: &str,
        field: &str,
        ty: ValType,
        mutable: bool,
    ) -> BuildResult<u32> {
        let ty = GlobalType { ty, mutable };
        self.add_import(module, field, ImportDesc::Global(ty))
    }

    /// Adds a table. Tables of a non-nullable element type cannot start out
    /// null, so they need an initializer; a per-slot list must cover
    /// `initial` slots exactly, and cannot be empty for such a table.
    pub fn add_table(
        &mut self,
        element: RefType,
        initial: u32,
        maximum: Option<u32>,
        init: Option<TableInit>,
    ) -> BuildResult<EntityBuilder<'_>> {
        let ty = TableType {
            element,
            initial,
            maximum,
        };
        let missing = |actual: usize| BuildError::MissingTableInitializer {
            ty: element.to_wat(),
            expected: initial,
            actual: actual as u32,
        };
        let index = self.module.index_space(ExternKind::Table);
        match init {
            None if !element.nullable => return Err(missing(0)),
            None => self.module.tables.push(TableDef { ty, init: None }),
            Some(TableInit::Uniform(expr)) => self.module.tables.push(TableDef {
                ty,
                init: Some(expr),
            }),
            Some(TableInit::PerSlot(exprs)) => {
                if exprs.len() != initial as usize {
                    return Err(missing(exprs.len()));
                }
                // An empty table still needs one expression to stand in as the
                // table initializer when nulls are not allowed.
                if exprs.is_empty() && !element.nullable {
                    return Err(BuildError::MissingTableInitializer {
                        ty: element.to_wat(),
                        expected: 1,
                        actual: 0,
                    });
                }
                // The table initializer covers the binary format's requirement
                // for non-nullable tables; the segment then fills every slot.
                self.module.tables.push(TableDef {
                    ty,
                    init: exprs.first().cloned(),
                });
                self.add_active_element_segment(index, ConstExpr::i32_const(0), exprs, element);
            }
        }
        Ok(EntityBuilder {
            module: &mut self.module,
            kind: ExternKind::Table,
            index,
        })
    }

    pub fn add_memory(&mut self, initial: u32, maximum: Option<u32>) -> EntityBuilder<'_> {
        let index = self.module.index_space(ExternKind::Memory);
        self.module.memories.push(MemoryType { initial, maximum });
        EntityBuilder {
            module: &mut self.module,
            kind: ExternKind::Memory,
            index,
        }
    }

    pub fn add_global(&mut self, ty: ValType, mutable: bool, init: ConstExpr) -> EntityBuilder<'_> {
        let index = self.module.index_space(ExternKind::Global);
        self.module.globals.push(GlobalDef {
            ty: GlobalType { ty, mutable },
            init,
        });
        EntityBuilder {
            module: &mut self.module,
            kind: ExternKind::Global,
            index,
        }
    }

    fn add_element_segment(
        &mut self,
        mode: ElementMode,
        items: ElementItems,
        element_type: RefType,
    ) -> u32 {
        self.module.elements.push(ElementSegment {
            mode,
            element_type,
            items,
        });
        self.module.elements.len() as u32 - 1
    }

    /// Adds a segment copied into `table` at instantiation, starting at the
    /// slot `offset` evaluates to.
    pub fn add_active_element_segment(
        &mut self,
        table: u32,
        offset: ConstExpr,
        items: impl Into<ElementItems>,
        element_type: RefType,
    ) -> u32 {
        self.add_element_segment(
            ElementMode::Active { table, offset },
            items.into(),
            element_type,
        )
    }

    pub fn add_passive_element_segment(
        &mut self,
        items: impl Into<ElementItems>,
        element_type: RefType,
    ) -> u32 {
        self.add_element_segment(ElementMode::Passive, items.into(), element_type)
    }

    pub fn add_declarative_element_segment(
        &mut self,
        items: impl Into<ElementItems>,
        element_type: RefType,
    ) -> u32 {
        self.add_element_segment(ElementMode::Declarative, items.into(), element_type)
    }

    pub fn add_data_segment(&mut self, memory: u32, offset: ConstExpr, bytes: &[u8]) -> u32 {
        self.module.data.push(DataSegment {
            mode: DataMode::Active { memory, offset },
            bytes: bytes.to_vec(),
        });
        self.module.data.len() as u32 - 1
    }

    pub fn add_passive_data_segment(&mut self, bytes: &[u8]) -> u32 {
        self.module.data.push(DataSegment {
            mode: DataMode::Passive,
            bytes: bytes.to_vec(),
        });
        self.module.data.len() as u32 - 1
    }

    pub fn set_start(&mut self, function: u32) {
        self.module.start = Some(function);
    }

    pub fn add_export(&mut self, name: &str, kind: ExternKind, index: u32) -> BuildResult<()> {
        add_export(&mut self.module, name, kind, index)?;
        Ok(())
    }

    /// Serializes the module. Building twice yields the same bytes.
    pub fn build(&self) -> BuildResult<Vec<u8>> {
        encode::encode_module(&self.module)
    }

    /// Serializes the module and freezes it together with its declarations.
    pub fn finish(self) -> BuildResult<WasmBinary> {
        let bytes = self.build()?;
        Ok(WasmBinary::new(bytes, self.module))
    }
}

fn add_export(module: &mut Module, name: &str, kind: ExternKind, index: u32) -> BuildResult<u32> {
    if module.export(name).is_some() {
        return Err(BuildError::DuplicateExportName(name.to_string()));
    }
    module.exports.push(Export {
        name: name.to_string(),
        kind,
        index,
    });
    Ok(index)
}

pub struct FunctionBuilder<'a> {
    module: &'a mut Module,
    index: u32,
}

impl FunctionBuilder<'_> {
    pub fn index(&self) -> u32 {
        self.index
    }

    fn def_mut(&mut self) -> &mut FunctionDef {
        let position = self.index - self.module.imported_count(ExternKind::Func);
        &mut self.module.functions[position as usize]
    }

    pub fn add_locals(mut self, ty: ValType, count: u32) -> Self {
        let def = self.def_mut();
        def.locals.extend(std::iter::repeat(ty).take(count as usize));
        self
    }

    /// Appends instructions to the body. Control structure is not checked
    /// here; the host's validation reports unbalanced blocks.
    pub fn add_body(mut self, body: impl IntoIterator<Item = Instruction>) -> BuildResult<Self> {
        let body = body.into_iter().collect::<Vec<_>>();
        for instruction in &body {
            instruction.check_immediates()?;
        }
        let def = self.def_mut();
        trace!(
            "function '{}': appending {} instructions",
            def.name,
            body.len()
        );
        def.body.extend(body);
        Ok(self)
    }

    /// Exports the function under its own name.
    pub fn export_func(mut self) -> BuildResult<u32> {
        let name = self.def_mut().name.clone();
        self.export_as(&name)
    }

    pub fn export_as(self, name: &str) -> BuildResult<u32> {
        add_export(self.module, name, ExternKind::Func, self.index)
    }
}

/// Handle to a freshly added table, memory or global.
pub struct EntityBuilder<'a> {
    module: &'a mut Module,
    kind: ExternKind,
    index: u32,
}

impl EntityBuilder<'_> {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn export_as(self, name: &str) -> BuildResult<u32> {
        add_export(self.module, name, self.kind, self.index)
    }
}
