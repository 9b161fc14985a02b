//! SSIR module validation.
//!
//! Invoked after lowering and before emission. Catches malformed modules a
//! front end could realistically produce; anything that slips through and
//! breaks the emitter is a compiler bug.
use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};

use crate::constant::Id;
use crate::instr::{Instr, Opcode};
use crate::module::{Function, Module, Stage};
use crate::ty::Type;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ValidationErrorCode {
    UndefinedId,
    UseBeforeDef,
    TypeMismatch,
    ExpectedPointer,
    MissingTerminator,
    MisplacedTerminator,
    MisplacedMerge,
    MissingMerge,
    MisplacedPhi,
    MalformedPhi,
    MalformedInstr,
    UnknownBlock,
    MissingEntryFunction,
    NonVoidEntryFunction,
    ZeroWorkgroupSize,
    BadInterfaceVariable,
}

#[derive(Clone, Debug)]
pub struct ValidationError {
    pub code: ValidationErrorCode,
    pub message: String,
    pub func: Option<Id>,
    pub block: Option<Id>,
    pub inst_index: Option<usize>,
}
impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)?;
        if let Some(func) = self.func {
            write!(f, " (func %{}", func)?;
            if let Some(block) = self.block {
                write!(f, ", block %{}", block)?;
            }
            if let Some(idx) = self.inst_index {
                write!(f, ", instr #{}", idx)?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

struct Validator<'a> {
    module: &'a Module,
    errors: Vec<ValidationError>,
    // Ids visible everywhere: constants, globals, functions.
    module_ids: HashSet<Id>,
}

/// Validate a module, returning every violation found.
pub fn validate(module: &Module) -> Vec<ValidationError> {
    let mut module_ids = HashSet::default();
    for constant in module.constants() {
        module_ids.insert(constant.id);
    }
    for global in module.globals.iter() {
        module_ids.insert(global.id);
    }
    for func in module.functions.iter() {
        module_ids.insert(func.id);
    }
    let mut validator = Validator {
        module,
        errors: Vec::new(),
        module_ids,
    };
    for func in module.functions.iter() {
        validator.check_function(func);
    }
    validator.check_entry_points();
    validator.errors
}

impl<'a> Validator<'a> {
    fn report(
        &mut self,
        code: ValidationErrorCode,
        message: impl Into<String>,
        func: Option<Id>,
        block: Option<Id>,
        inst_index: Option<usize>,
    ) {
        self.errors.push(ValidationError {
            code,
            message: message.into(),
            func,
            block,
            inst_index,
        });
    }

    fn check_function(&mut self, func: &Function) {
        // Map every locally defined value to its definition site so uses can
        // be ordered against it. Params and locals live at position (0, 0);
        // instruction positions are offset by one block so they always order
        // after them.
        let mut def_pos: HashMap<Id, (usize, usize)> = HashMap::default();
        let mut block_ids: HashSet<Id> = HashSet::default();
        for param in func.params.iter() {
            def_pos.insert(param.id, (0, 0));
        }
        for local in func.locals.iter() {
            def_pos.insert(local.id, (0, 0));
        }
        for (block_idx, block) in func.blocks.iter().enumerate() {
            block_ids.insert(block.id);
            for (inst_idx, instr) in block.instrs.iter().enumerate() {
                if let Some(result) = instr.result {
                    def_pos.insert(result, (block_idx + 1, inst_idx));
                }
            }
        }

        let preds = predecessors(func);

        for (block_idx, block) in func.blocks.iter().enumerate() {
            self.check_block_shape(func, block_idx);
            let mut seen_non_phi = false;
            for (inst_idx, instr) in block.instrs.iter().enumerate() {
                if instr.op == Opcode::Phi {
                    if seen_non_phi {
                        self.report(
                            ValidationErrorCode::MisplacedPhi,
                            "phi after a non-phi instruction",
                            Some(func.id),
                            Some(block.id),
                            Some(inst_idx),
                        );
                    }
                    self.check_phi(func, block.id, inst_idx, instr, &preds);
                } else {
                    seen_non_phi = true;
                }
                self.check_operands(
                    func,
                    &def_pos,
                    &block_ids,
                    (block_idx + 1, inst_idx),
                    block.id,
                    instr,
                );
                self.check_types(func, block.id, inst_idx, instr);
            }
        }
    }

    /// Termination and merge placement for one block.
    fn check_block_shape(&mut self, func: &Function, block_idx: usize) {
        let block = &func.blocks[block_idx];
        let n = block.instrs.len();
        let last_is_term = block
            .instrs
            .last()
            .map(|x| x.op.is_terminator())
            .unwrap_or(false);
        if !last_is_term {
            self.report(
                ValidationErrorCode::MissingTerminator,
                "block does not end in a terminator",
                Some(func.id),
                Some(block.id),
                None,
            );
        }
        for (inst_idx, instr) in block.instrs.iter().enumerate() {
            if instr.op.is_terminator() && inst_idx + 1 != n {
                self.report(
                    ValidationErrorCode::MisplacedTerminator,
                    "terminator before the end of the block",
                    Some(func.id),
                    Some(block.id),
                    Some(inst_idx),
                );
            }
            if instr.op.is_merge() && inst_idx + 2 != n {
                self.report(
                    ValidationErrorCode::MisplacedMerge,
                    "merge declaration must immediately precede the terminator",
                    Some(func.id),
                    Some(block.id),
                    Some(inst_idx),
                );
            }
        }
        // Structured control flow: conditional terminators declare a merge.
        if let Some(last) = block.instrs.last() {
            if matches!(last.op, Opcode::BranchCond | Opcode::Switch) {
                let merged = n >= 2 && block.instrs[n - 2].op.is_merge();
                if !merged {
                    self.report(
                        ValidationErrorCode::MissingMerge,
                        "conditional branch without a merge declaration",
                        Some(func.id),
                        Some(block.id),
                        Some(n - 1),
                    );
                }
            }
        }
    }

    fn check_phi(
        &mut self,
        func: &Function,
        block: Id,
        inst_idx: usize,
        instr: &Instr,
        preds: &HashMap<Id, Vec<Id>>,
    ) {
        let empty = Vec::new();
        let preds = preds.get(&block).unwrap_or(&empty);
        if instr.args.len() != 2 * preds.len() {
            self.report(
                ValidationErrorCode::MalformedPhi,
                format!(
                    "phi has {} incoming pairs but the block has {} predecessors",
                    instr.args.len() / 2,
                    preds.len()
                ),
                Some(func.id),
                Some(block),
                Some(inst_idx),
            );
            return;
        }
        for pair in instr.args.chunks(2) {
            if !preds.contains(&pair[1]) {
                self.report(
                    ValidationErrorCode::MalformedPhi,
                    format!("phi incoming block %{} is not a predecessor", pair[1]),
                    Some(func.id),
                    Some(block),
                    Some(inst_idx),
                );
            }
        }
    }

    fn check_operands(
        &mut self,
        func: &Function,
        def_pos: &HashMap<Id, (usize, usize)>,
        block_ids: &HashSet<Id>,
        pos: (usize, usize),
        block: Id,
        instr: &Instr,
    ) {
        for (arg_idx, arg) in instr.args.iter().enumerate() {
            if is_block_operand(instr.op, arg_idx) {
                if !block_ids.contains(arg) {
                    self.report(
                        ValidationErrorCode::UnknownBlock,
                        format!("branch target %{} is not a block of this function", arg),
                        Some(func.id),
                        Some(block),
                        Some(pos.1),
                    );
                }
                continue;
            }
            if self.module_ids.contains(arg) {
                continue;
            }
            match def_pos.get(arg) {
                None => {
                    self.report(
                        ValidationErrorCode::UndefinedId,
                        format!("operand %{} is not defined", arg),
                        Some(func.id),
                        Some(block),
                        Some(pos.1),
                    );
                }
                // Phi incoming values flow along back edges; their defs may
                // legitimately follow the phi in layout order.
                Some(def) if *def >= pos && instr.op != Opcode::Phi => {
                    self.report(
                        ValidationErrorCode::UseBeforeDef,
                        format!("operand %{} is used before it is defined", arg),
                        Some(func.id),
                        Some(block),
                        Some(pos.1),
                    );
                }
                _ => {}
            }
        }
    }

    /// Shallow opcode/type agreement. Exhaustive typing rules live in the
    /// individual front ends; this catches the classes of breakage a
    /// miscompiled lowering actually produces.
    fn check_types(&mut self, func: &Function, block: Id, inst_idx: usize, instr: &Instr) {
        let m = self.module;
        let arg_ty = |i: usize| instr.args.get(i).and_then(|x| m.value_type(*x));
        match instr.op {
            Opcode::Load => {
                if let Some(ptr_ty) = arg_ty(0) {
                    match m.ty(ptr_ty) {
                        Type::Pointer(ptr) => {
                            if instr.ty != Some(ptr.pointee) {
                                self.report(
                                    ValidationErrorCode::TypeMismatch,
                                    "load result type differs from the pointee type",
                                    Some(func.id),
                                    Some(block),
                                    Some(inst_idx),
                                );
                            }
                        }
                        _ => self.report(
                            ValidationErrorCode::ExpectedPointer,
                            "load from a non-pointer operand",
                            Some(func.id),
                            Some(block),
                            Some(inst_idx),
                        ),
                    }
                }
            }
            Opcode::Store => {
                if let Some(ptr_ty) = arg_ty(0) {
                    match m.ty(ptr_ty) {
                        Type::Pointer(ptr) => {
                            if let Some(value_ty) = arg_ty(1) {
                                if value_ty != ptr.pointee {
                                    self.report(
                                        ValidationErrorCode::TypeMismatch,
                                        "stored value type differs from the pointee type",
                                        Some(func.id),
                                        Some(block),
                                        Some(inst_idx),
                                    );
                                }
                            }
                        }
                        _ => self.report(
                            ValidationErrorCode::ExpectedPointer,
                            "store to a non-pointer operand",
                            Some(func.id),
                            Some(block),
                            Some(inst_idx),
                        ),
                    }
                }
            }
            Opcode::Access => {
                if let Some(base_ty) = arg_ty(0) {
                    if !m.ty(base_ty).is_pointer() {
                        self.report(
                            ValidationErrorCode::ExpectedPointer,
                            "access chain base is not a pointer",
                            Some(func.id),
                            Some(block),
                            Some(inst_idx),
                        );
                    }
                }
                if instr.ty.map(|x| !m.ty(x).is_pointer()).unwrap_or(true) {
                    self.report(
                        ValidationErrorCode::ExpectedPointer,
                        "access chain result is not a pointer",
                        Some(func.id),
                        Some(block),
                        Some(inst_idx),
                    );
                }
            }
            Opcode::BranchCond => {
                if let Some(cond_ty) = arg_ty(0) {
                    if !m.ty(cond_ty).is_bool() {
                        self.report(
                            ValidationErrorCode::TypeMismatch,
                            "branch condition is not a bool",
                            Some(func.id),
                            Some(block),
                            Some(inst_idx),
                        );
                    }
                }
            }
            // Mul is exempt: vector-times-scalar and the MatMul family keep
            // mixed operand shapes on purpose.
            Opcode::Add
            | Opcode::Sub
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Rem
            | Opcode::BitAnd
            | Opcode::BitOr
            | Opcode::BitXor
            | Opcode::Eq
            | Opcode::Ne
            | Opcode::Lt
            | Opcode::Le
            | Opcode::Gt
            | Opcode::Ge
            | Opcode::And
            | Opcode::Or => {
                if let (Some(a), Some(b)) = (arg_ty(0), arg_ty(1)) {
                    if a != b {
                        self.report(
                            ValidationErrorCode::TypeMismatch,
                            "binary operands have different types",
                            Some(func.id),
                            Some(block),
                            Some(inst_idx),
                        );
                    }
                }
            }
            Opcode::Return => {
                if arg_ty(0).map(|x| x != func.ret_ty).unwrap_or(false) {
                    self.report(
                        ValidationErrorCode::TypeMismatch,
                        "returned value type differs from the function return type",
                        Some(func.id),
                        Some(block),
                        Some(inst_idx),
                    );
                }
            }
            _ => {}
        }
        // Atomic stores are the one result-less member of their opcode.
        let result_required = instr.op.has_result() && instr.op != Opcode::Atomic;
        if result_required && (instr.result.is_none() || instr.ty.is_none()) {
            self.report(
                ValidationErrorCode::MalformedInstr,
                "instruction is missing its result id or result type",
                Some(func.id),
                Some(block),
                Some(inst_idx),
            );
        }
    }

    fn check_entry_points(&mut self) {
        let m = self.module;
        let mut reported: Vec<ValidationError> = Vec::new();
        for entry in m.entry_points.iter() {
            match m.function(entry.func) {
                None => reported.push(ValidationError {
                    code: ValidationErrorCode::MissingEntryFunction,
                    message: format!("entry point {} names a missing function", entry.name),
                    func: Some(entry.func),
                    block: None,
                    inst_index: None,
                }),
                Some(func) => {
                    if !m.ty(func.ret_ty).is_void() {
                        reported.push(ValidationError {
                            code: ValidationErrorCode::NonVoidEntryFunction,
                            message: format!("entry point {} must return void", entry.name),
                            func: Some(entry.func),
                            block: None,
                            inst_index: None,
                        });
                    }
                }
            }
            if entry.stage == Stage::Compute && entry.workgroup_size.iter().any(|x| *x == 0) {
                reported.push(ValidationError {
                    code: ValidationErrorCode::ZeroWorkgroupSize,
                    message: format!("entry point {} has a zero workgroup dimension", entry.name),
                    func: Some(entry.func),
                    block: None,
                    inst_index: None,
                });
            }
            for id in entry.interface.iter() {
                let ok = m
                    .global(*id)
                    .map(|x| {
                        matches!(
                            x.space,
                            crate::ty::AddressSpace::Input | crate::ty::AddressSpace::Output
                        )
                    })
                    .unwrap_or(false);
                if !ok {
                    reported.push(ValidationError {
                        code: ValidationErrorCode::BadInterfaceVariable,
                        message: format!(
                            "interface id %{} of entry point {} is not an Input/Output global",
                            id, entry.name
                        ),
                        func: Some(entry.func),
                        block: None,
                        inst_index: None,
                    });
                }
            }
        }
        self.errors.extend(reported);
    }
}

/// Is `args[arg_idx]` a block target rather than a value?
fn is_block_operand(op: Opcode, arg_idx: usize) -> bool {
    match op {
        Opcode::Branch | Opcode::SelectionMerge | Opcode::LoopMerge => true,
        Opcode::BranchCond | Opcode::Switch => arg_idx >= 1,
        Opcode::Phi => arg_idx % 2 == 1,
        _ => false,
    }
}

fn predecessors(func: &Function) -> HashMap<Id, Vec<Id>> {
    let mut preds: HashMap<Id, Vec<Id>> = HashMap::default();
    for block in func.blocks.iter() {
        let term = match block.instrs.last() {
            Some(x) if x.op.is_terminator() => x,
            _ => continue,
        };
        let targets: &[Id] = match term.op {
            Opcode::Branch => &term.args[..],
            Opcode::BranchCond => &term.args[1..],
            Opcode::Switch => &term.args[1..],
            _ => &[],
        };
        for target in targets {
            let entry = preds.entry(*target).or_default();
            if !entry.contains(&block.id) {
                entry.push(block.id);
            }
        }
    }
    preds
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::module::{Block, EntryPoint};
    use crate::ty::AddressSpace;

    fn void_func(m: &mut Module) -> Function {
        let void = m.ty_void();
        let id = m.alloc_id();
        Function {
            id,
            name: Some("f".to_owned()),
            ret_ty: void,
            params: Vec::new(),
            locals: Vec::new(),
            blocks: Vec::new(),
        }
    }

    #[test]
    fn test_unterminated_block_reported() {
        let mut m = Module::new();
        let mut func = void_func(&mut m);
        let block_id = m.alloc_id();
        func.blocks.push(Block::new(block_id));
        m.add_function(func);
        let errors = validate(&m);
        assert!(errors
            .iter()
            .any(|x| x.code == ValidationErrorCode::MissingTerminator));
    }

    #[test]
    fn test_minimal_function_passes() {
        let mut m = Module::new();
        let mut func = void_func(&mut m);
        let block_id = m.alloc_id();
        let mut block = Block::new(block_id);
        block.instrs.push(Instr::new(Opcode::ReturnVoid));
        func.blocks.push(block);
        m.add_function(func);
        assert!(validate(&m).is_empty());
    }

    #[test]
    fn test_branch_cond_requires_merge() {
        let mut m = Module::new();
        let mut func = void_func(&mut m);
        let cond = m.const_bool(true);
        let b0 = m.alloc_id();
        let b1 = m.alloc_id();
        let mut entry = Block::new(b0);
        entry
            .instrs
            .push(Instr::new(Opcode::BranchCond).args(&[cond, b1, b1]));
        let mut exit = Block::new(b1);
        exit.instrs.push(Instr::new(Opcode::ReturnVoid));
        func.blocks.push(entry);
        func.blocks.push(exit);
        m.add_function(func);
        let errors = validate(&m);
        assert!(errors
            .iter()
            .any(|x| x.code == ValidationErrorCode::MissingMerge));
    }

    #[test]
    fn test_zero_workgroup_size_reported() {
        let mut m = Module::new();
        let mut func = void_func(&mut m);
        let block_id = m.alloc_id();
        let mut block = Block::new(block_id);
        block.instrs.push(Instr::new(Opcode::ReturnVoid));
        func.blocks.push(block);
        let func_id = m.add_function(func);
        let mut entry = EntryPoint::new("main", Stage::Compute, func_id);
        entry.workgroup_size = [0, 1, 1];
        m.add_entry_point(entry);
        let errors = validate(&m);
        assert!(errors
            .iter()
            .any(|x| x.code == ValidationErrorCode::ZeroWorkgroupSize));
    }

    #[test]
    fn test_interface_must_be_io_global() {
        let mut m = Module::new();
        let mut func = void_func(&mut m);
        let block_id = m.alloc_id();
        let mut block = Block::new(block_id);
        block.instrs.push(Instr::new(Opcode::ReturnVoid));
        func.blocks.push(block);
        let func_id = m.add_function(func);

        let f32_ty = m.ty_f32();
        let ptr = m.ty_ptr(f32_ty, AddressSpace::Uniform);
        let var_id = m.alloc_id();
        m.add_global(crate::module::GlobalVar {
            id: var_id,
            name: None,
            ty: ptr,
            space: AddressSpace::Uniform,
            group: Some(0),
            binding: Some(0),
            location: None,
            builtin: None,
            init: None,
        });

        let mut entry = EntryPoint::new("main", Stage::Compute, func_id);
        entry.interface.push(var_id);
        m.add_entry_point(entry);
        let errors = validate(&m);
        assert!(errors
            .iter()
            .any(|x| x.code == ValidationErrorCode::BadInterfaceVariable));
    }
}
