//! Name resolution over the WGSL AST.
//!
//! Two passes: a declaration pass assigning a symbol to every top-level
//! declaration, then a body pass resolving every identifier occurrence
//! against a lexical scope stack. On top of the symbol tables the resolver
//! derives the artifacts back ends consume: entry-point descriptors, the
//! per-entry-point transitively used binding set, vertex input slots and
//! fragment output slots.
use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};

use crate::ast::*;
use crate::token::SyntaxError;
use ssir_core::instr::BuiltinFn;

pub type SymbolId = u32;

/// Sentinel for identifiers that did not resolve to any symbol.
pub const SYM_UNRESOLVED: SymbolId = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Top-level declaration: global variable, function, struct or constant.
    Global,
    Param,
    Local,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub id: SymbolId,
    pub kind: SymbolKind,
    pub name: String,
    pub group: Option<u32>,
    pub binding: Option<u32>,
    /// Index of the declaring top-level declaration.
    pub decl: Option<usize>,
    /// Index of the enclosing function declaration, for params and locals.
    pub func: Option<usize>,
}
impl Symbol {
    pub fn is_binding(&self) -> bool {
        self.group.is_some() && self.binding.is_some()
    }
}

/// Shader stage as declared by an entry attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Vertex,
    Fragment,
    Compute,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct EntryPointDesc {
    pub name: String,
    pub stage: StageKind,
    /// Index of the function declaration.
    pub decl: usize,
}

/// Numeric category of one vertex input or fragment output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericType {
    F32,
    I32,
    U32,
    F16,
    Bool,
}
impl NumericType {
    fn byte_size(&self) -> u32 {
        match self {
            Self::F16 => 2,
            _ => 4,
        }
    }
}

/// One `@location(n)` interface slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoSlot {
    pub location: u32,
    pub components: u32,
    pub numeric: NumericType,
    pub byte_size: u32,
}

pub struct Resolver {
    pub symbols: Vec<Symbol>,
    /// NodeId-indexed identifier resolutions.
    ident_syms: Vec<SymbolId>,
    pub entry_points: Vec<EntryPointDesc>,
    pub errors: Vec<SyntaxError>,
    /// Per-entry-point transitively used binding symbols, parallel to
    /// `entry_points`.
    used_bindings: Vec<Vec<SymbolId>>,
    /// Vertex input slots, parallel to `entry_points`; empty for non-vertex
    /// entries.
    vertex_inputs: Vec<Vec<IoSlot>>,
    /// Fragment output slots, parallel to `entry_points`.
    fragment_outputs: Vec<Vec<IoSlot>>,
}
impl Resolver {
    pub fn symbol(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id as usize)
    }
    /// Symbol an identifier node resolved to, or `None` for the unresolved
    /// sentinel.
    pub fn symbol_of(&self, node: NodeId) -> Option<&Symbol> {
        let id = *self.ident_syms.get(node as usize)?;
        if id == SYM_UNRESOLVED {
            None
        } else {
            self.symbol(id)
        }
    }
    pub fn used_bindings(&self, entry_index: usize) -> &[SymbolId] {
        &self.used_bindings[entry_index]
    }
    pub fn vertex_inputs(&self, entry_index: usize) -> &[IoSlot] {
        &self.vertex_inputs[entry_index]
    }
    pub fn fragment_outputs(&self, entry_index: usize) -> &[IoSlot] {
        &self.fragment_outputs[entry_index]
    }
}

struct ResolveContext<'a> {
    prog: &'a Program,
    symbols: Vec<Symbol>,
    ident_syms: Vec<SymbolId>,
    errors: Vec<SyntaxError>,
    global_scope: HashMap<String, SymbolId>,
    scopes: Vec<HashMap<String, SymbolId>>,
    struct_decls: HashMap<String, usize>,
    /// decl index -> symbol of the function.
    fn_syms: HashMap<usize, SymbolId>,
    /// decl index -> callee decl indices.
    callees: HashMap<usize, Vec<usize>>,
    /// decl index -> binding symbols referenced directly in the body.
    direct_bindings: HashMap<usize, Vec<SymbolId>>,
    current_fn: Option<usize>,
}

/// Resolve a parsed program. Resolution never fails: unknown names map to
/// the [`SYM_UNRESOLVED`] sentinel and problems accumulate as errors.
pub fn resolve(prog: &Program) -> Resolver {
    let mut ctx = ResolveContext {
        prog,
        symbols: Vec::new(),
        ident_syms: vec![SYM_UNRESOLVED; prog.node_count as usize],
        errors: Vec::new(),
        global_scope: HashMap::default(),
        scopes: Vec::new(),
        struct_decls: HashMap::default(),
        fn_syms: HashMap::default(),
        callees: HashMap::default(),
        direct_bindings: HashMap::default(),
        current_fn: None,
    };
    ctx.declaration_pass();
    ctx.body_pass();
    ctx.finish()
}

impl<'a> ResolveContext<'a> {
    fn add_symbol(&mut self, symbol: Symbol) -> SymbolId {
        let id = self.symbols.len() as SymbolId;
        let mut symbol = symbol;
        symbol.id = id;
        self.symbols.push(symbol);
        id
    }

    fn error_at(&mut self, span: Span, message: impl Into<String>) {
        self.errors.push(SyntaxError {
            message: message.into(),
            line: span.line,
            col: span.col,
        });
    }

    fn declaration_pass(&mut self) {
        let prog = self.prog;
        let mut seen_bindings: HashSet<(u32, u32)> = HashSet::default();
        for (decl_idx, decl) in prog.decls.iter().enumerate() {
            let name = decl.name().to_owned();
            let mut group = None;
            let mut binding = None;
            match decl {
                Decl::GlobalVar(var) => {
                    for attr in var.attrs.iter() {
                        match attr.name.as_str() {
                            "group" => group = attr.int_arg().map(|x| x as u32),
                            "binding" => binding = attr.int_arg().map(|x| x as u32),
                            _ => {}
                        }
                    }
                    if let (Some(g), Some(b)) = (group, binding) {
                        if !seen_bindings.insert((g, b)) {
                            self.error_at(
                                var.span,
                                format!("duplicate binding (group={}, binding={})", g, b),
                            );
                        }
                    }
                }
                Decl::Struct(x) => {
                    self.struct_decls.insert(x.name.clone(), decl_idx);
                }
                _ => {}
            }
            let id = self.add_symbol(Symbol {
                id: 0,
                kind: SymbolKind::Global,
                name: name.clone(),
                group,
                binding,
                decl: Some(decl_idx),
                func: None,
            });
            if let Decl::Fn(_) = decl {
                self.fn_syms.insert(decl_idx, id);
            }
            self.global_scope.insert(name, id);
        }
    }

    fn body_pass(&mut self) {
        let prog = self.prog;
        for (decl_idx, decl) in prog.decls.iter().enumerate() {
            let func = match decl {
                Decl::Fn(x) => x,
                _ => continue,
            };
            self.current_fn = Some(decl_idx);
            self.scopes.clear();
            self.scopes.push(HashMap::default());
            for param in func.params.iter() {
                let id = self.add_symbol(Symbol {
                    id: 0,
                    kind: SymbolKind::Param,
                    name: param.name.clone(),
                    group: None,
                    binding: None,
                    decl: None,
                    func: Some(decl_idx),
                });
                self.scopes.last_mut().unwrap().insert(param.name.clone(), id);
            }
            self.resolve_stmts(&func.body);
            self.current_fn = None;
        }
    }

    fn resolve_stmts(&mut self, stmts: &[Stmt]) {
        self.scopes.push(HashMap::default());
        for stmt in stmts {
            self.resolve_stmt(stmt);
        }
        self.scopes.pop();
    }

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(stmts) => self.resolve_stmts(stmts),
            Stmt::Var { name, init, .. } => {
                if let Some(init) = init {
                    self.resolve_expr(init, false);
                }
                let id = self.add_symbol(Symbol {
                    id: 0,
                    kind: SymbolKind::Local,
                    name: name.clone(),
                    group: None,
                    binding: None,
                    decl: None,
                    func: self.current_fn,
                });
                self.scopes.last_mut().unwrap().insert(name.clone(), id);
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.resolve_expr(value, false);
                }
            }
            Stmt::Expr(expr) => self.resolve_expr(expr, false),
            Stmt::If {
                cond, then, els, ..
            } => {
                self.resolve_expr(cond, false);
                self.resolve_stmts(then);
                if let Some(els) = els {
                    self.resolve_stmt(els);
                }
            }
            Stmt::While { cond, body, .. } => {
                self.resolve_expr(cond, false);
                self.resolve_stmts(body);
            }
            Stmt::For {
                init,
                cond,
                cont,
                body,
                ..
            } => {
                // The init declaration scopes over cond, cont and the body.
                self.scopes.push(HashMap::default());
                if let Some(init) = init {
                    self.resolve_stmt(init);
                }
                if let Some(cond) = cond {
                    self.resolve_expr(cond, false);
                }
                if let Some(cont) = cont {
                    self.resolve_expr(cont, false);
                }
                self.resolve_stmts(body);
                self.scopes.pop();
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<SymbolId> {
        for scope in self.scopes.iter().rev() {
            if let Some(id) = scope.get(name) {
                return Some(*id);
            }
        }
        self.global_scope.get(name).copied()
    }

    fn resolve_expr(&mut self, expr: &Expr, is_callee: bool) {
        match expr {
            Expr::Ident(ident) => {
                match self.lookup(&ident.name) {
                    Some(id) => {
                        self.ident_syms[ident.node as usize] = id;
                        self.note_use(id);
                    }
                    None => {
                        // Intrinsics, constructor names and the bool
                        // literals are not declarations; anything else
                        // unknown is an error (the sentinel stays).
                        let known = is_callee
                            || matches!(ident.name.as_str(), "true" | "false")
                            || BuiltinFn::from_name(&ident.name).is_some();
                        if !known {
                            self.error_at(
                                ident.span,
                                format!("unknown identifier: {}", ident.name),
                            );
                        }
                    }
                }
            }
            Expr::IntLit(_) | Expr::FloatLit(_) | Expr::TypeHead(_) => {}
            Expr::Binary { lhs, rhs, .. } => {
                self.resolve_expr(lhs, false);
                self.resolve_expr(rhs, false);
            }
            Expr::Assign { lhs, rhs, .. } => {
                self.resolve_expr(lhs, false);
                self.resolve_expr(rhs, false);
            }
            Expr::Unary { expr, .. } => self.resolve_expr(expr, false),
            Expr::Ternary {
                cond, then, els, ..
            } => {
                self.resolve_expr(cond, false);
                self.resolve_expr(then, false);
                self.resolve_expr(els, false);
            }
            Expr::Call { callee, args, .. } => {
                self.resolve_expr(callee, true);
                if let Expr::Ident(ident) = &**callee {
                    let target = self.lookup(&ident.name).and_then(|id| {
                        self.symbols[id as usize].decl.filter(|decl_idx| {
                            matches!(self.prog.decls[*decl_idx], Decl::Fn(_))
                        })
                    });
                    if let (Some(caller), Some(callee_idx)) = (self.current_fn, target) {
                        let edges = self.callees.entry(caller).or_default();
                        if !edges.contains(&callee_idx) {
                            edges.push(callee_idx);
                        }
                    }
                }
                for arg in args {
                    self.resolve_expr(arg, false);
                }
            }
            Expr::Member { base, .. } => self.resolve_expr(base, false),
            Expr::Index { base, index, .. } => {
                self.resolve_expr(base, false);
                self.resolve_expr(index, false);
            }
        }
    }

    /// Track direct binding-variable references per function for the
    /// transitive-use computation.
    fn note_use(&mut self, id: SymbolId) {
        let caller = match self.current_fn {
            Some(x) => x,
            None => return,
        };
        let symbol = &self.symbols[id as usize];
        if symbol.is_binding() {
            let uses = self.direct_bindings.entry(caller).or_default();
            if !uses.contains(&id) {
                uses.push(id);
            }
        }
    }

    fn collect_reachable(&self, decl_idx: usize, visited: &mut HashSet<usize>) {
        if !visited.insert(decl_idx) {
            return;
        }
        if let Some(callees) = self.callees.get(&decl_idx) {
            for callee in callees {
                self.collect_reachable(*callee, visited);
            }
        }
    }

    fn finish(mut self) -> Resolver {
        let mut entry_points = Vec::new();
        let mut used_bindings = Vec::new();
        let mut vertex_inputs = Vec::new();
        let mut fragment_outputs = Vec::new();

        for (decl_idx, decl) in self.prog.decls.iter().enumerate() {
            let func = match decl {
                Decl::Fn(x) => x,
                _ => continue,
            };
            let stage = if func.attr("vertex").is_some() {
                StageKind::Vertex
            } else if func.attr("fragment").is_some() {
                StageKind::Fragment
            } else if func.attr("compute").is_some() {
                StageKind::Compute
            } else {
                continue;
            };
            entry_points.push(EntryPointDesc {
                name: func.name.clone(),
                stage,
                decl: decl_idx,
            });

            // Union of binding symbols over the reachable function set.
            let mut reachable = HashSet::default();
            self.collect_reachable(decl_idx, &mut reachable);
            let mut bindings: Vec<SymbolId> = Vec::new();
            for reached in reachable.iter() {
                if let Some(direct) = self.direct_bindings.get(reached) {
                    for id in direct {
                        if !bindings.contains(id) {
                            bindings.push(*id);
                        }
                    }
                }
            }
            bindings.sort();
            used_bindings.push(bindings);

            vertex_inputs.push(if stage == StageKind::Vertex {
                self.collect_vertex_inputs(func)
            } else {
                Vec::new()
            });
            fragment_outputs.push(if stage == StageKind::Fragment {
                self.collect_fragment_outputs(func)
            } else {
                Vec::new()
            });
        }

        Resolver {
            symbols: self.symbols,
            ident_syms: self.ident_syms,
            entry_points,
            errors: self.errors,
            used_bindings,
            vertex_inputs,
            fragment_outputs,
        }
    }

    fn io_slot(&self, location: u32, ty: &TypeExpr) -> Option<IoSlot> {
        let (components, numeric) = match ty.name.as_str() {
            "f32" => (1, NumericType::F32),
            "i32" => (1, NumericType::I32),
            "u32" => (1, NumericType::U32),
            "f16" => (1, NumericType::F16),
            "bool" => (1, NumericType::Bool),
            "vec2" | "vec3" | "vec4" => {
                let count = ty.name[3..].parse::<u32>().ok()?;
                let numeric = match ty.ty_args.first().map(|x| x.name.as_str()) {
                    Some("i32") => NumericType::I32,
                    Some("u32") => NumericType::U32,
                    Some("f16") => NumericType::F16,
                    Some("bool") => NumericType::Bool,
                    _ => NumericType::F32,
                };
                (count, numeric)
            }
            _ => return None,
        };
        Some(IoSlot {
            location,
            components,
            numeric,
            byte_size: components * numeric.byte_size(),
        })
    }

    fn located_slots_of_struct(&self, decl_idx: usize) -> Vec<IoSlot> {
        let mut slots = Vec::new();
        if let Decl::Struct(decl) = &self.prog.decls[decl_idx] {
            for field in decl.fields.iter() {
                let location = field
                    .attrs
                    .iter()
                    .find(|x| x.name == "location")
                    .and_then(|x| x.int_arg());
                if let Some(location) = location {
                    if let Some(slot) = self.io_slot(location as u32, &field.ty) {
                        slots.push(slot);
                    }
                }
            }
        }
        slots
    }

    fn collect_vertex_inputs(&self, func: &FnDecl) -> Vec<IoSlot> {
        let mut slots = Vec::new();
        for param in func.params.iter() {
            let location = param
                .attrs
                .iter()
                .find(|x| x.name == "location")
                .and_then(|x| x.int_arg());
            if let Some(location) = location {
                if let Some(slot) = self.io_slot(location as u32, &param.ty) {
                    slots.push(slot);
                }
            } else if let Some(decl_idx) = self.struct_decls.get(&param.ty.name) {
                slots.extend(self.located_slots_of_struct(*decl_idx));
            }
        }
        slots.sort_by_key(|x| x.location);
        slots
    }

    fn collect_fragment_outputs(&self, func: &FnDecl) -> Vec<IoSlot> {
        let mut slots = Vec::new();
        let ret_ty = match &func.ret_ty {
            Some(x) => x,
            None => return slots,
        };
        let location = func
            .ret_attrs
            .iter()
            .find(|x| x.name == "location")
            .and_then(|x| x.int_arg());
        if let Some(location) = location {
            if let Some(slot) = self.io_slot(location as u32, ret_ty) {
                slots.push(slot);
            }
        } else if let Some(decl_idx) = self.struct_decls.get(&ret_ty.name) {
            slots.extend(self.located_slots_of_struct(*decl_idx));
        }
        slots.sort_by_key(|x| x.location);
        slots
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parse::parse;

    #[test]
    fn test_globals_and_locals_resolve() {
        let prog = parse(
            "@group(0) @binding(0) var<uniform> scale: f32;
            fn f(x: f32) -> f32 {
                let y = x * scale;
                return y;
            }",
        );
        let resolver = resolve(&prog);
        assert!(resolver.errors.is_empty(), "{:?}", resolver.errors);
        let kinds: Vec<_> = resolver.symbols.iter().map(|x| x.kind).collect();
        assert!(kinds.contains(&SymbolKind::Global));
        assert!(kinds.contains(&SymbolKind::Param));
        assert!(kinds.contains(&SymbolKind::Local));
    }

    #[test]
    fn test_unknown_identifier_reported() {
        let prog = parse("fn f() -> f32 { return missing; }");
        let resolver = resolve(&prog);
        assert_eq!(resolver.errors.len(), 1);
        assert!(resolver.errors[0].message.contains("missing"));
    }

    #[test]
    fn test_intrinsic_names_are_not_errors() {
        let prog = parse("fn f(x: f32) -> f32 { return max(x, 0.0); }");
        let resolver = resolve(&prog);
        assert!(resolver.errors.is_empty(), "{:?}", resolver.errors);
    }

    #[test]
    fn test_duplicate_binding_reported() {
        let prog = parse(
            "@group(0) @binding(0) var<uniform> a: f32;
            @group(0) @binding(0) var<uniform> b: f32;",
        );
        let resolver = resolve(&prog);
        assert!(resolver
            .errors
            .iter()
            .any(|x| x.message.contains("duplicate binding")));
    }

    #[test]
    fn test_shadowing_resolves_innermost() {
        let prog = parse(
            "fn f() {
                let x = 1;
                if x > 0 {
                    let x = 2.0;
                    let y = x;
                }
            }",
        );
        let resolver = resolve(&prog);
        assert!(resolver.errors.is_empty(), "{:?}", resolver.errors);
    }

    #[test]
    fn test_entry_points_detected() {
        let prog = parse(
            "@vertex fn vs_main() { }
            @fragment fn fs_main() { }
            @compute @workgroup_size(8) fn cs_main() { }
            fn helper() { }",
        );
        let resolver = resolve(&prog);
        let stages: Vec<_> = resolver.entry_points.iter().map(|x| x.stage).collect();
        assert_eq!(
            stages,
            vec![StageKind::Vertex, StageKind::Fragment, StageKind::Compute]
        );
    }

    #[test]
    fn test_transitive_binding_use() {
        // `main_vs` only reaches the uniform through two calls.
        let prog = parse(
            "@group(0) @binding(0) var<uniform> u: f32;
            fn use_u() -> f32 { return u; }
            fn middle() -> f32 { return use_u(); }
            @vertex fn main_vs() { let x = middle(); }",
        );
        let resolver = resolve(&prog);
        assert!(resolver.errors.is_empty(), "{:?}", resolver.errors);
        let bindings = resolver.used_bindings(0);
        assert_eq!(bindings.len(), 1);
        let symbol = resolver.symbol(bindings[0]).unwrap();
        assert_eq!(symbol.name, "u");
        assert_eq!((symbol.group, symbol.binding), (Some(0), Some(0)));
    }

    #[test]
    fn test_unused_binding_not_in_entry_set() {
        let prog = parse(
            "@group(0) @binding(0) var<uniform> used: f32;
            @group(0) @binding(1) var<uniform> unused: f32;
            @fragment fn fs_main() { let x = used; }",
        );
        let resolver = resolve(&prog);
        let bindings = resolver.used_bindings(0);
        assert_eq!(bindings.len(), 1);
        assert_eq!(resolver.symbol(bindings[0]).unwrap().name, "used");
    }

    #[test]
    fn test_vertex_inputs_from_params() {
        let prog = parse(
            "@vertex fn vs(@location(0) pos: vec3<f32>, @location(1) uv: vec2<f32>) { }",
        );
        let resolver = resolve(&prog);
        let inputs = resolver.vertex_inputs(0);
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].location, 0);
        assert_eq!(inputs[0].components, 3);
        assert_eq!(inputs[0].numeric, NumericType::F32);
        assert_eq!(inputs[0].byte_size, 12);
        assert_eq!(inputs[1].byte_size, 8);
    }

    #[test]
    fn test_vertex_inputs_from_struct() {
        let prog = parse(
            "struct VsIn {
                @location(0) pos: vec3<f32>,
                @location(1) id: u32,
            }
            @vertex fn vs(input: VsIn) { }",
        );
        let resolver = resolve(&prog);
        let inputs = resolver.vertex_inputs(0);
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[1].numeric, NumericType::U32);
        assert_eq!(inputs[1].byte_size, 4);
    }

    #[test]
    fn test_fragment_outputs() {
        let prog = parse("@fragment fn fs() -> @location(0) vec4<f32> { return vec4<f32>(); }");
        let resolver = resolve(&prog);
        let outputs = resolver.fragment_outputs(0);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].components, 4);
        assert_eq!(outputs[0].byte_size, 16);
    }
}
