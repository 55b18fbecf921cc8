// resolve.rs — Symbol and type resolution
//
// Walks every function body, binding names through the scope chain, typing
// every expression, inserting widening casts, instantiating templates on
// demand and invoking high-level inliners at resolved call sites. Template
// instances are cached by their full argument list; an in-flight stack
// turns self-instantiation into a diagnostic instead of a hang.
//
// Preconditions: the unit parsed; the registry installed library symbols.
// Postconditions: every reachable node has a resolved type; every call site
//   carries a function id; all template instances are cached.
// Failure modes: E03xx symbol errors, E04xx type errors, E05xx inliner
//   errors. The first error aborts the pass.
// Side effects: mutates the tree, type table, function table, template
//   store, global symbols and instance layout.

use std::collections::{HashMap, HashSet};

use crate::ast::{
    AssignOp, BinaryOp, CallData, Callee, ConstArg, FunctionDef, GlobalDef, GlobalInit, Intrinsic,
    Item, MemberVarDef, NodeId, Path, StatementKind, StructDef, TemplateArgSyntax,
    TemplateParamKind, TypeName, UnaryOp, VarTarget,
};
use crate::backend::{BlockRef, Event, LayoutBuilder, Value};
use crate::diag::{codes, Diagnostic};
use crate::eval;
use crate::func::{Arg, FunctionBody, FunctionData, FunctionId, FunctionTable, OverloadError};
use crate::inline::{InlineData, Inliner};
use crate::lexer::Span;
use crate::registry::WellKnown;
use crate::scope::{
    GlobalSymbols, ScopeKind, ScopeStack, SymbolEntry, TemplateArg, TemplateId, TemplateKind,
    TemplateStore,
};
use crate::types::{
    can_implicitly_convert, common_type, props, ConstValue, Member, MemberDefault, StructId,
    StructType, Type, TypeTable,
};
use crate::wrap;

pub struct Resolver<'a> {
    pub tree: &'a mut crate::ast::SyntaxTree,
    pub types: &'a mut TypeTable,
    pub funcs: &'a mut FunctionTable,
    pub templates: &'a mut TemplateStore,
    pub globals: &'a mut GlobalSymbols,
    pub layout: &'a mut LayoutBuilder,
    pub well_known: &'a WellKnown,
    scopes: ScopeStack,
    /// Captured template bindings per instantiated function, applied when
    /// its body is resolved.
    fn_envs: HashMap<FunctionId, Vec<(String, SymbolEntry)>>,
    worklist: Vec<FunctionId>,
    done: HashSet<FunctionId>,
    current_class: Option<StructId>,
    current_ret: Type,
}

impl<'a> Resolver<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tree: &'a mut crate::ast::SyntaxTree,
        types: &'a mut TypeTable,
        funcs: &'a mut FunctionTable,
        templates: &'a mut TemplateStore,
        globals: &'a mut GlobalSymbols,
        layout: &'a mut LayoutBuilder,
        well_known: &'a WellKnown,
    ) -> Self {
        Self {
            tree,
            types,
            funcs,
            templates,
            globals,
            layout,
            well_known,
            scopes: ScopeStack::new(),
            fn_envs: HashMap::new(),
            worklist: Vec::new(),
            done: HashSet::new(),
            current_class: None,
            current_ret: Type::Void,
        }
    }

    /// Resolve a whole unit: declarations first, then every function body
    /// (template instantiation feeds the worklist as it goes).
    pub fn run(&mut self, items: &[Item]) -> Result<(), Diagnostic> {
        // declarations
        for item in items {
            match item {
                Item::TemplateStruct(t) => {
                    let tid = self.templates.add(crate::scope::TemplateEntry {
                        name: t.def.name.clone(),
                        params: t.params.clone(),
                        kind: TemplateKind::User(t.clone()),
                    });
                    self.globals
                        .define(&t.def.name, SymbolEntry::Template(tid));
                }
                Item::Struct(def) => {
                    let sid = self.register_struct(def, &def.name.clone(), &[])?;
                    self.globals
                        .define(&def.name, SymbolEntry::TypeSym(Type::Struct(sid)));
                }
                Item::Function(def) => {
                    self.register_free_function(def)?;
                }
                Item::Global(_) => {}
            }
        }
        // globals, after all types are known
        for item in items {
            if let Item::Global(g) = item {
                self.register_global(g)?;
            }
        }
        // bodies
        let initial: Vec<FunctionId> = self.funcs.ids().collect();
        self.worklist.extend(initial);
        while let Some(fid) = self.worklist.pop() {
            self.resolve_function(fid)?;
        }
        Ok(())
    }

    // ── Declaration registration ─────────────────────────────────────────

    fn register_free_function(&mut self, def: &FunctionDef) -> Result<FunctionId, Diagnostic> {
        let mut f = FunctionData::new(def.name.clone(), def.name.clone(), def.span);
        if def.template_params.is_empty() {
            f.ret = self.resolve_type(&def.ret, def.span)?;
            for p in &def.params {
                let ty = self.resolve_type(&p.ty, def.span)?;
                f.args.push(Arg {
                    name: p.name.clone(),
                    ty,
                });
            }
            f.body = Some(FunctionBody {
                root: def.body,
                local_slots: 0,
                num_regs: 0,
            });
        } else {
            f.template_params = def.template_params.clone();
            f.generic = Some(def.clone());
        }
        let fid = self.funcs.add(f);
        self.globals.add_function(&def.name, fid);
        Ok(fid)
    }

    /// Register a struct definition under `name`, resolving member types
    /// and member function signatures. `env` provides template bindings.
    pub fn register_struct(
        &mut self,
        def: &StructDef,
        name: &str,
        env: &[(String, SymbolEntry)],
    ) -> Result<StructId, Diagnostic> {
        self.scopes.push(ScopeKind::Block);
        for (n, e) in env {
            self.scopes.define(n.clone(), e.clone());
        }
        let result = self.register_struct_inner(def, name, env);
        self.scopes.pop();
        result
    }

    fn register_struct_inner(
        &mut self,
        def: &StructDef,
        name: &str,
        env: &[(String, SymbolEntry)],
    ) -> Result<StructId, Diagnostic> {
        let mut st = StructType::new(name);
        for var in &def.vars {
            let ty = self.resolve_type(&var.ty, var.span)?;
            let default = self.member_default(var, ty)?;
            st.members.push(Member {
                name: var.name.clone(),
                ty,
                offset: 0,
                default,
            });
        }
        if def.is_node {
            st.set_property(props::IS_NODE, 1);
            st.set_property(props::GET_SELF_AS_OBJECT, 1);
        }
        let sid = self.types.add_struct(st);

        for fdef in &def.funcs {
            let fid = self.register_member_function(sid, name, fdef, env)?;
            self.types.struct_type_mut(sid).functions.push(fid);
        }
        Ok(sid)
    }

    fn register_member_function(
        &mut self,
        sid: StructId,
        owner: &str,
        def: &FunctionDef,
        env: &[(String, SymbolEntry)],
    ) -> Result<FunctionId, Diagnostic> {
        let qualified = format!("{owner}::{}", def.name);
        let mut f = FunctionData::new(qualified, def.name.clone(), def.span);
        f.object_type = Some(sid);
        f.ret = self.resolve_type(&def.ret, def.span)?;
        f.args.push(Arg {
            name: "this".into(),
            ty: Type::Struct(sid),
        });
        for p in &def.params {
            let ty = self.resolve_type(&p.ty, def.span)?;
            f.args.push(Arg {
                name: p.name.clone(),
                ty,
            });
        }
        if def.template_params.is_empty() {
            f.body = Some(FunctionBody {
                root: def.body,
                local_slots: 0,
                num_regs: 0,
            });
        } else {
            f.template_params = def.template_params.clone();
            f.generic = Some(def.clone());
        }
        let fid = self.funcs.add(f);
        if !env.is_empty() {
            self.fn_envs.insert(fid, env.to_vec());
        }
        self.worklist.push(fid);
        Ok(fid)
    }

    // ── Synthesized member functions ─────────────────────────────────────

    /// Register a compiler-synthesized member function whose body is an
    /// already-built tree fragment. The body resolves through the normal
    /// worklist, with the owning struct as its class scope.
    pub(crate) fn add_synthesized_fn(
        &mut self,
        sid: StructId,
        name: &str,
        ret: Type,
        explicit: Vec<Arg>,
        body_root: NodeId,
        span: Span,
    ) -> FunctionId {
        let fid = self.new_member_fn(sid, name, ret, explicit, span, |f| {
            f.body = Some(FunctionBody {
                root: body_root,
                local_slots: 0,
                num_regs: 0,
            });
        });
        self.worklist.push(fid);
        fid
    }

    /// Register a compiler-synthesized member function implemented entirely
    /// by an inliner.
    pub(crate) fn add_inliner_fn(
        &mut self,
        sid: StructId,
        name: &str,
        ret: Type,
        explicit: Vec<Arg>,
        inliner: Inliner,
        span: Span,
    ) -> FunctionId {
        self.new_member_fn(sid, name, ret, explicit, span, |f| {
            f.inliner = Some(inliner);
        })
    }

    /// Register a compiler-synthesized template member function. Instances
    /// are produced on demand by `instantiate_member_fn`.
    pub(crate) fn add_generic_fn(
        &mut self,
        sid: StructId,
        name: &str,
        ret: Type,
        explicit: Vec<Arg>,
        generic: FunctionDef,
        span: Span,
    ) -> FunctionId {
        self.new_member_fn(sid, name, ret, explicit, span, |f| {
            f.template_params = generic.template_params.clone();
            f.generic = Some(generic);
        })
    }

    fn new_member_fn(
        &mut self,
        sid: StructId,
        name: &str,
        ret: Type,
        explicit: Vec<Arg>,
        span: Span,
        fill: impl FnOnce(&mut FunctionData),
    ) -> FunctionId {
        let owner = self.types.struct_type(sid).name.clone();
        let mut f = FunctionData::new(format!("{owner}::{name}"), name, span);
        f.object_type = Some(sid);
        f.ret = ret;
        f.args.push(Arg {
            name: "this".into(),
            ty: Type::Struct(sid),
        });
        f.args.extend(explicit);
        fill(&mut f);
        let fid = self.funcs.add(f);
        self.types.struct_type_mut(sid).functions.push(fid);
        fid
    }

    fn member_default(
        &mut self,
        var: &MemberVarDef,
        ty: Type,
    ) -> Result<Option<MemberDefault>, Diagnostic> {
        let Some(init) = var.init else {
            return Ok(None);
        };
        let Some(cv) = self.eval_const(init) else {
            return Err(Diagnostic::error(
                codes::E0402,
                var.span,
                format!("member `{}` requires a constant initializer", var.name),
            ));
        };
        match ty {
            Type::Span(id) if var.braced => {
                let (elem, _) = self.types.span_info(id);
                let filled = cv.cast_to(elem).ok_or_else(|| {
                    Diagnostic::error(
                        codes::E0400,
                        var.span,
                        "span fill value is not numeric",
                    )
                })?;
                Ok(Some(MemberDefault::SpanFill(filled)))
            }
            _ => {
                let scalar = cv.cast_to(ty).ok_or_else(|| {
                    Diagnostic::error(
                        codes::E0400,
                        var.span,
                        format!(
                            "cannot initialize `{}` member with this value",
                            self.types.name_of(ty)
                        ),
                    )
                })?;
                Ok(Some(MemberDefault::Scalar(scalar)))
            }
        }
    }

    fn register_global(&mut self, g: &GlobalDef) -> Result<(), Diagnostic> {
        let ty = self.resolve_type(&g.ty, g.span)?;
        let image = match (&g.init, ty) {
            (GlobalInit::None, _) => self.default_image(ty),
            (GlobalInit::Expr(e), _) => {
                let cv = self.require_const(*e)?;
                let cast = cv.cast_to(ty).ok_or_else(|| {
                    Diagnostic::error(codes::E0400, g.span, "initializer type mismatch")
                })?;
                vec![const_value(cast)]
            }
            (GlobalInit::Braced(elems), Type::Span(id)) => {
                let (elem_ty, len) = self.types.span_info(id);
                if elems.len() == 1 {
                    let cv = self.require_const(elems[0])?;
                    let v = cv.cast_to(elem_ty).ok_or_else(|| {
                        Diagnostic::error(codes::E0400, g.span, "span fill value mismatch")
                    })?;
                    vec![const_value(v); len]
                } else if elems.len() == len {
                    let mut out = Vec::with_capacity(len);
                    for &e in elems {
                        let cv = self.require_const(e)?;
                        let v = cv.cast_to(elem_ty).ok_or_else(|| {
                            Diagnostic::error(codes::E0400, g.span, "span element mismatch")
                        })?;
                        out.push(const_value(v));
                    }
                    out
                } else {
                    return Err(Diagnostic::error(
                        codes::E0400,
                        g.span,
                        format!(
                            "initializer has {} elements, span expects 1 or {len}",
                            elems.len()
                        ),
                    ));
                }
            }
            (GlobalInit::Braced(_), _) => {
                return Err(Diagnostic::error(
                    codes::E0400,
                    g.span,
                    "brace initializer requires a span type",
                ))
            }
        };
        let offset = self.layout.alloc(image);
        self.globals.define(
            &g.name,
            SymbolEntry::Var(VarTarget::Global { offset }, ty),
        );
        Ok(())
    }

    /// Initial memory image for a type: defaults materialized recursively.
    fn default_image(&self, ty: Type) -> Vec<Value> {
        match ty {
            Type::Int => vec![Value::Int(0)],
            Type::Float => vec![Value::Float(0.0)],
            Type::Double => vec![Value::Double(0.0)],
            Type::Block => vec![Value::Block(BlockRef::empty())],
            Type::Event => vec![Value::Event(Event::default())],
            Type::Void | Type::Dynamic => Vec::new(),
            Type::Span(id) => {
                let (elem, len) = self.types.span_info(id);
                let one = self.default_image(elem);
                let mut out = Vec::with_capacity(one.len() * len);
                for _ in 0..len {
                    out.extend(one.iter().cloned());
                }
                out
            }
            Type::Struct(sid) => {
                let st = self.types.struct_type(sid);
                let mut out = Vec::new();
                for m in &st.members {
                    match &m.default {
                        Some(MemberDefault::Scalar(cv)) => out.push(const_value(*cv)),
                        Some(MemberDefault::SpanFill(cv)) => {
                            let len = match m.ty {
                                Type::Span(id) => self.types.span_info(id).1,
                                _ => 1,
                            };
                            for _ in 0..len {
                                out.push(const_value(*cv));
                            }
                        }
                        None => out.extend(self.default_image(m.ty)),
                    }
                }
                out
            }
        }
    }

    // ── Types and constants ──────────────────────────────────────────────

    pub fn resolve_type(&mut self, tn: &TypeName, span: Span) -> Result<Type, Diagnostic> {
        match tn {
            TypeName::Void => Ok(Type::Void),
            TypeName::Int => Ok(Type::Int),
            TypeName::Float => Ok(Type::Float),
            TypeName::Double => Ok(Type::Double),
            TypeName::Block => Ok(Type::Block),
            TypeName::Event => Ok(Type::Event),
            TypeName::Span(elem, len) => {
                let elem = self.resolve_type(elem, span)?;
                let len = self.resolve_const_arg(len, span)?;
                if len <= 0 {
                    return Err(Diagnostic::error(
                        codes::E0402,
                        span,
                        "span length must be a positive constant",
                    ));
                }
                let id = self.types.span_type(elem, len as usize);
                Ok(Type::Span(id))
            }
            TypeName::Named(path, args) => {
                let joined = path.to_string();
                if args.is_empty() {
                    let found = if path.is_ident() {
                        self.scopes.lookup(&joined).cloned()
                    } else {
                        None
                    }
                    .or_else(|| self.globals.lookup(&joined).cloned());
                    match found {
                        Some(SymbolEntry::TypeSym(t)) => Ok(t),
                        _ => Err(Diagnostic::error(
                            codes::E0300,
                            span,
                            format!("unresolved type `{joined}`"),
                        )),
                    }
                } else {
                    let Some(SymbolEntry::Template(tid)) =
                        self.globals.lookup(&joined).cloned()
                    else {
                        return Err(Diagnostic::error(
                            codes::E0300,
                            span,
                            format!("unresolved template `{joined}`"),
                        ));
                    };
                    let targs = self.resolve_template_args(args, span)?;
                    let sid = self.instantiate_template(tid, &targs, span)?;
                    Ok(Type::Struct(sid))
                }
            }
        }
    }

    fn resolve_const_arg(&mut self, arg: &ConstArg, span: Span) -> Result<i64, Diagnostic> {
        match arg {
            ConstArg::Literal(v) => Ok(*v),
            ConstArg::Name(name) => {
                let found = self
                    .scopes
                    .lookup(name)
                    .cloned()
                    .or_else(|| self.globals.lookup(name).cloned());
                match found {
                    Some(SymbolEntry::Const(cv)) => Ok(cv.as_i64()),
                    _ => Err(Diagnostic::error(
                        codes::E0402,
                        span,
                        format!("`{name}` is not a compile-time constant"),
                    )),
                }
            }
        }
    }

    fn resolve_template_args(
        &mut self,
        args: &[TemplateArgSyntax],
        span: Span,
    ) -> Result<Vec<TemplateArg>, Diagnostic> {
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            match a {
                TemplateArgSyntax::Const(c) => {
                    out.push(TemplateArg::Const(self.resolve_const_arg(c, span)?))
                }
                TemplateArgSyntax::Type(tn) => {
                    // a bare identifier may name a constant rather than a type
                    if let TypeName::Named(path, inner) = tn {
                        if inner.is_empty() && path.is_ident() {
                            let found = self
                                .scopes
                                .lookup(path.last())
                                .cloned()
                                .or_else(|| self.globals.lookup(path.last()).cloned());
                            if let Some(SymbolEntry::Const(cv)) = found {
                                out.push(TemplateArg::Const(cv.as_i64()));
                                continue;
                            }
                        }
                    }
                    out.push(TemplateArg::Type(self.resolve_type(tn, span)?));
                }
            }
        }
        Ok(out)
    }

    /// Instantiate a template for the given argument list, or return the
    /// cached instance for an identical key.
    pub fn instantiate_template(
        &mut self,
        tid: TemplateId,
        args: &[TemplateArg],
        span: Span,
    ) -> Result<StructId, Diagnostic> {
        if let Some(sid) = self.templates.cached(tid, args) {
            return Ok(sid);
        }
        if self.templates.enter(tid, args).is_err() {
            let chain = self.templates.in_flight_names().join(" -> ");
            return Err(Diagnostic::error(
                codes::E0301,
                span,
                format!(
                    "circular template instantiation of `{}`",
                    self.templates.get(tid).name
                ),
            )
            .with_hint(format!("instantiation chain: {chain}")));
        }
        let entry = self.templates.get(tid).clone();
        let result = match &entry.kind {
            TemplateKind::Builtin(b) => wrap::instantiate_builtin(self, *b, args, span),
            TemplateKind::User(t) => {
                self.check_template_params(&entry.name, &entry.params, args, span)?;
                self.instantiate_user(&entry.name, t, args, span)
            }
        };
        self.templates.exit(tid, args);
        let sid = result?;
        self.templates.insert_cache(tid, args.to_vec(), sid);
        Ok(sid)
    }

    fn check_template_params(
        &self,
        name: &str,
        params: &[crate::ast::TemplateParamDef],
        args: &[TemplateArg],
        span: Span,
    ) -> Result<(), Diagnostic> {
        let ok = params.len() == args.len()
            && params.iter().zip(args).all(|(p, a)| match (p.kind, a) {
                (TemplateParamKind::Type, TemplateArg::Type(_)) => true,
                (TemplateParamKind::Int, TemplateArg::Const(_)) => true,
                _ => false,
            });
        if ok {
            Ok(())
        } else {
            Err(Diagnostic::error(
                codes::E0303,
                span,
                format!(
                    "template `{name}` expects {} parameter(s) with matching kinds, got {}",
                    params.len(),
                    args.len()
                ),
            ))
        }
    }

    fn instantiate_user(
        &mut self,
        name: &str,
        t: &crate::ast::TemplateStructDef,
        args: &[TemplateArg],
        span: Span,
    ) -> Result<StructId, Diagnostic> {
        let env: Vec<(String, SymbolEntry)> = t
            .params
            .iter()
            .zip(args)
            .map(|(p, a)| {
                let entry = match a {
                    TemplateArg::Type(ty) => SymbolEntry::TypeSym(*ty),
                    TemplateArg::Const(v) => SymbolEntry::Const(ConstValue::Int(*v)),
                };
                (p.name.clone(), entry)
            })
            .collect();

        // clone the definition with fresh body/initializer subtrees
        let mut def = t.def.clone();
        for f in &mut def.funcs {
            f.body = self.tree.clone_subtree(f.body);
        }
        for v in &mut def.vars {
            if let Some(init) = v.init {
                v.init = Some(self.tree.clone_subtree(init));
            }
        }
        let _ = span;
        let instance_name = self.instance_name(name, args);
        self.register_struct(&def, &instance_name, &env)
    }

    pub fn instance_name(&self, base: &str, args: &[TemplateArg]) -> String {
        let rendered: Vec<String> = args
            .iter()
            .map(|a| match a {
                TemplateArg::Const(v) => v.to_string(),
                TemplateArg::Type(t) => self.types.name_of(*t),
            })
            .collect();
        format!("{base}<{}>", rendered.join(", "))
    }

    /// Instantiate a member function template for concrete integer
    /// arguments, reusing a cached instance for an identical key.
    fn instantiate_member_fn(
        &mut self,
        base: FunctionId,
        const_args: &[i64],
        span: Span,
    ) -> Result<FunctionId, Diagnostic> {
        if let Some(fid) = self.funcs.cached_instance(base, const_args) {
            return Ok(fid);
        }
        let template = self.funcs.get(base);
        let Some(def) = template.generic.clone() else {
            return Err(Diagnostic::error(
                codes::E0303,
                span,
                format!("`{}` is not a template function", template.name),
            ));
        };
        if def.template_params.len() != const_args.len()
            || def
                .template_params
                .iter()
                .any(|p| p.kind != TemplateParamKind::Int)
        {
            return Err(Diagnostic::error(
                codes::E0303,
                span,
                format!(
                    "template function `{}` expects {} integer parameter(s)",
                    template.name,
                    def.template_params.len()
                ),
            ));
        }
        let sid = template.object_type;
        let qualified = format!(
            "{}<{}>",
            template.qualified,
            const_args
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let ret = template.ret;
        let args = template.args.clone();
        let body_root = self.tree.clone_subtree(def.body);

        let mut f = FunctionData::new(qualified, def.name.clone(), span);
        f.ret = ret;
        f.args = args;
        f.object_type = sid;
        f.body = Some(FunctionBody {
            root: body_root,
            local_slots: 0,
            num_regs: 0,
        });
        let env: Vec<(String, SymbolEntry)> = def
            .template_params
            .iter()
            .zip(const_args)
            .map(|(p, v)| (p.name.clone(), SymbolEntry::Const(ConstValue::Int(*v))))
            .collect();
        let fid = self.funcs.add(f);
        self.fn_envs.insert(fid, env);
        self.worklist.push(fid);
        self.funcs.cache_instance(base, const_args.to_vec(), fid);
        Ok(fid)
    }

    // ── Constant expressions ─────────────────────────────────────────────

    pub fn eval_const(&self, id: NodeId) -> Option<ConstValue> {
        match &self.tree.node(id).kind {
            StatementKind::Immediate(cv) => Some(*cv),
            StatementKind::SymbolRef { path, .. } if path.is_ident() => {
                let found = self
                    .scopes
                    .lookup(path.last())
                    .or_else(|| self.globals.lookup(path.last()));
                match found {
                    Some(SymbolEntry::Const(cv)) => Some(*cv),
                    _ => None,
                }
            }
            StatementKind::Binary { op, lhs, rhs } => {
                let a = self.eval_const(*lhs)?;
                let b = self.eval_const(*rhs)?;
                let common = common_type(a.type_of(), b.type_of())?;
                eval::binary(*op, a.cast_to(common)?, b.cast_to(common)?)
            }
            StatementKind::Unary { op, operand } => eval::unary(*op, self.eval_const(*operand)?),
            StatementKind::Cast { target, operand } => {
                let to = match target {
                    TypeName::Int => Type::Int,
                    TypeName::Float => Type::Float,
                    TypeName::Double => Type::Double,
                    _ => return None,
                };
                eval::cast(self.eval_const(*operand)?, to)
            }
            StatementKind::Ternary {
                cond,
                if_true,
                if_false,
            } => {
                let c = self.eval_const(*cond)?;
                if c.as_i64() != 0 {
                    self.eval_const(*if_true)
                } else {
                    self.eval_const(*if_false)
                }
            }
            _ => None,
        }
    }

    fn require_const(&self, id: NodeId) -> Result<ConstValue, Diagnostic> {
        self.eval_const(id).ok_or_else(|| {
            Diagnostic::error(
                codes::E0402,
                self.tree.span(id),
                "constant expression required",
            )
        })
    }

    // ── Function bodies ──────────────────────────────────────────────────

    fn resolve_function(&mut self, fid: FunctionId) -> Result<(), Diagnostic> {
        if self.done.contains(&fid) {
            return Ok(());
        }
        self.done.insert(fid);
        let f = self.funcs.get(fid);
        if f.is_template() {
            return Ok(());
        }
        let Some(body) = f.body.clone() else {
            return Ok(());
        };
        let args = f.args.clone();
        let ret = f.ret;
        let object_type = f.object_type;
        let env = self.fn_envs.get(&fid).cloned().unwrap_or_default();

        let saved_class = self.current_class;
        let saved_ret = self.current_ret;
        self.current_class = object_type;
        self.current_ret = ret;

        let mut scopes = ScopeStack::new();
        if let Some(sid) = object_type {
            scopes.push(ScopeKind::Class(sid));
        }
        scopes.push(ScopeKind::Function);
        scopes.reset_locals();
        for (n, e) in &env {
            scopes.define(n.clone(), e.clone());
        }
        for (i, a) in args.iter().enumerate() {
            scopes.define(
                a.name.clone(),
                SymbolEntry::Var(VarTarget::Arg { index: i as u16 }, a.ty),
            );
        }
        let saved_scopes = std::mem::replace(&mut self.scopes, scopes);

        let result = self.resolve_stmt(body.root);
        let locals = self.scopes.max_locals();
        self.scopes = saved_scopes;
        self.current_class = saved_class;
        self.current_ret = saved_ret;
        result?;

        if let Some(b) = &mut self.funcs.get_mut(fid).body {
            b.local_slots = locals;
        }
        Ok(())
    }

    fn is_statement(kind: &StatementKind) -> bool {
        matches!(
            kind,
            StatementKind::Block(_)
                | StatementKind::VarDecl { .. }
                | StatementKind::If { .. }
                | StatementKind::Loop { .. }
                | StatementKind::Return { .. }
                | StatementKind::Assignment { .. }
                | StatementKind::Noop
        )
    }

    pub fn resolve_stmt(&mut self, id: NodeId) -> Result<(), Diagnostic> {
        let span = self.tree.span(id);
        match self.tree.node(id).kind.clone() {
            StatementKind::Block(stmts) => {
                self.scopes.push(ScopeKind::Block);
                for s in stmts {
                    let r = self.resolve_stmt(s);
                    if r.is_err() {
                        self.scopes.pop();
                        return r;
                    }
                }
                self.scopes.pop();
                self.tree.set_ty(id, Type::Void);
            }
            StatementKind::VarDecl {
                name,
                declared,
                init,
                ..
            } => {
                let ty = self.resolve_type(&declared, span)?;
                match ty {
                    Type::Int | Type::Float | Type::Double | Type::Block | Type::Event => {}
                    _ => {
                        return Err(Diagnostic::error(
                            codes::E0400,
                            span,
                            format!(
                                "local variables of type `{}` are not supported",
                                self.types.name_of(ty)
                            ),
                        ))
                    }
                }
                let init = match init {
                    Some(e) => {
                        let ety = self.resolve_expr(e)?;
                        Some(self.coerce(e, ety, ty, span)?)
                    }
                    None => None,
                };
                let slot = self.scopes.alloc_local();
                self.scopes.define(
                    name.clone(),
                    SymbolEntry::Var(VarTarget::Local { slot }, ty),
                );
                self.tree.node_mut(id).kind = StatementKind::VarDecl {
                    name,
                    declared,
                    init,
                    target: Some(VarTarget::Local { slot }),
                };
                self.tree.reparent_children(id);
                self.tree.set_ty(id, Type::Void);
            }
            StatementKind::If {
                cond,
                then_body,
                else_body,
            } => {
                self.resolve_condition(cond)?;
                self.resolve_stmt(then_body)?;
                if let Some(e) = else_body {
                    self.resolve_stmt(e)?;
                }
                self.tree.set_ty(id, Type::Void);
            }
            StatementKind::Loop { cond, body } => {
                self.resolve_condition(cond)?;
                self.resolve_stmt(body)?;
                self.tree.set_ty(id, Type::Void);
            }
            StatementKind::Return { value } => {
                let ret = self.current_ret;
                match (value, ret) {
                    (None, Type::Void) => {}
                    (Some(v), r) if r != Type::Void => {
                        let vty = self.resolve_expr(v)?;
                        let coerced = self.coerce(v, vty, r, span)?;
                        self.tree.node_mut(id).kind = StatementKind::Return {
                            value: Some(coerced),
                        };
                        self.tree.reparent_children(id);
                    }
                    (None, _) => {
                        return Err(Diagnostic::error(
                            codes::E0400,
                            span,
                            "return value required",
                        ))
                    }
                    (Some(_), _) => {
                        return Err(Diagnostic::error(
                            codes::E0400,
                            span,
                            "void function cannot return a value",
                        ))
                    }
                }
                self.tree.set_ty(id, Type::Void);
            }
            StatementKind::Assignment { op, target, value } => {
                let tty = self.resolve_lvalue(target)?;
                let vty = self.resolve_expr(value)?;
                if op != AssignOp::Set && !tty.is_numeric() {
                    return Err(Diagnostic::error(
                        codes::E0400,
                        span,
                        "compound assignment requires a numeric target",
                    ));
                }
                let coerced = self.coerce(value, vty, tty, span)?;
                self.tree.node_mut(id).kind = StatementKind::Assignment {
                    op,
                    target,
                    value: coerced,
                };
                self.tree.reparent_children(id);
                self.tree.set_ty(id, Type::Void);
            }
            StatementKind::Noop => {
                self.tree.set_ty(id, Type::Void);
            }
            _ => {
                self.resolve_expr(id)?;
            }
        }
        Ok(())
    }

    fn resolve_condition(&mut self, cond: NodeId) -> Result<(), Diagnostic> {
        let ty = self.resolve_expr(cond)?;
        if ty != Type::Int {
            return Err(Diagnostic::error(
                codes::E0400,
                self.tree.span(cond),
                format!("condition must be `int`, found `{}`", self.types.name_of(ty)),
            ));
        }
        Ok(())
    }

    /// Resolve an expression in lvalue position.
    fn resolve_lvalue(&mut self, id: NodeId) -> Result<Type, Diagnostic> {
        let ty = self.resolve_expr(id)?;
        match &self.tree.node(id).kind {
            StatementKind::SymbolRef {
                target: Some(VarTarget::Arg { .. }),
                ..
            } => Err(Diagnostic::error(
                codes::E0400,
                self.tree.span(id),
                "cannot assign to a function argument",
            )),
            StatementKind::SymbolRef { .. }
            | StatementKind::Member { .. }
            | StatementKind::Subscript { .. }
            | StatementKind::MemoryRef { .. } => Ok(ty),
            _ => Err(Diagnostic::error(
                codes::E0400,
                self.tree.span(id),
                "expression is not assignable",
            )),
        }
    }

    pub fn resolve_expr(&mut self, id: NodeId) -> Result<Type, Diagnostic> {
        let span = self.tree.span(id);
        let kind = self.tree.node(id).kind.clone();
        if Self::is_statement(&kind) {
            self.resolve_stmt(id)?;
            return Ok(Type::Void);
        }
        let ty = match kind {
            StatementKind::Immediate(cv) => cv.type_of(),
            StatementKind::SymbolRef { path, .. } => return self.resolve_symbol(id, &path, span),
            StatementKind::Binary { op, lhs, rhs } => {
                return self.resolve_binary(id, op, lhs, rhs, span)
            }
            StatementKind::Unary { op, operand } => {
                let oty = self.resolve_expr(operand)?;
                match op {
                    UnaryOp::Neg if oty.is_numeric() => oty,
                    UnaryOp::Not if oty == Type::Int => Type::Int,
                    _ => {
                        return Err(Diagnostic::error(
                            codes::E0400,
                            span,
                            format!(
                                "unary operator not applicable to `{}`",
                                self.types.name_of(oty)
                            ),
                        ))
                    }
                }
            }
            StatementKind::Ternary {
                cond,
                if_true,
                if_false,
            } => {
                self.resolve_condition(cond)?;
                let t = self.resolve_expr(if_true)?;
                let f = self.resolve_expr(if_false)?;
                if t == f {
                    t
                } else {
                    let common = common_type(t, f).ok_or_else(|| {
                        Diagnostic::error(codes::E0400, span, "ternary branches have no common type")
                    })?;
                    let new_t = self.coerce(if_true, t, common, span)?;
                    let new_f = self.coerce(if_false, f, common, span)?;
                    self.tree.node_mut(id).kind = StatementKind::Ternary {
                        cond,
                        if_true: new_t,
                        if_false: new_f,
                    };
                    self.tree.reparent_children(id);
                    common
                }
            }
            StatementKind::Cast { target, operand } => {
                let oty = self.resolve_expr(operand)?;
                let to = self.resolve_type(&target, span)?;
                if !oty.is_numeric() || !to.is_numeric() {
                    return Err(Diagnostic::error(
                        codes::E0400,
                        span,
                        format!(
                            "cannot cast `{}` to `{}`",
                            self.types.name_of(oty),
                            self.types.name_of(to)
                        ),
                    ));
                }
                to
            }
            StatementKind::Member { base, name, .. } => {
                let bty = self.resolve_expr(base)?;
                let Type::Struct(sid) = bty else {
                    return Err(Diagnostic::error(
                        codes::E0300,
                        span,
                        format!("`{}` has no members", self.types.name_of(bty)),
                    ));
                };
                let st = self.types.struct_type(sid);
                let Some(m) = st.member(&name) else {
                    return Err(Diagnostic::error(
                        codes::E0300,
                        span,
                        format!("no member `{name}` on `{}`", st.name),
                    ));
                };
                let (mty, offset) = (m.ty, m.offset);
                self.tree.node_mut(id).kind = StatementKind::Member {
                    base,
                    name,
                    offset: Some(offset),
                };
                self.tree.reparent_children(id);
                mty
            }
            StatementKind::Subscript { base, index } => {
                let bty = self.resolve_expr(base)?;
                let ity = self.resolve_expr(index)?;
                if ity != Type::Int {
                    return Err(Diagnostic::error(
                        codes::E0400,
                        self.tree.span(index),
                        format!("index must be `int`, found `{}`", self.types.name_of(ity)),
                    ));
                }
                match bty {
                    Type::Block => Type::Float,
                    Type::Span(sid) => self.types.span_info(sid).0,
                    _ => {
                        return Err(Diagnostic::error(
                            codes::E0400,
                            span,
                            format!("`{}` is not indexable", self.types.name_of(bty)),
                        ))
                    }
                }
            }
            StatementKind::MemoryRef { base, .. } => {
                if let Some(b) = base {
                    self.resolve_expr(b)?;
                }
                // type assigned by the inliner that synthesized the node
                self.tree.ty(id)
            }
            StatementKind::IntrinsicCall { op, object, args } => {
                self.resolve_expr(object)?;
                for a in &args {
                    self.resolve_expr(*a)?;
                }
                match op {
                    Intrinsic::BlockSize => Type::Int,
                    Intrinsic::BlockSub => Type::Block,
                    Intrinsic::ReferBlockTo => Type::Void,
                }
            }
            StatementKind::Call(_) => return self.resolve_call(id, span),
            _ => unreachable!("statement kinds handled above"),
        };
        self.tree.set_ty(id, ty);
        Ok(ty)
    }

    fn resolve_symbol(
        &mut self,
        id: NodeId,
        path: &Path,
        span: Span,
    ) -> Result<Type, Diagnostic> {
        let joined = path.to_string();
        let found = if path.is_ident() {
            self.scopes.lookup(&joined).cloned()
        } else {
            None
        }
        .or_else(|| self.member_symbol(&joined))
        .or_else(|| self.globals.lookup(&joined).cloned());

        match found {
            Some(SymbolEntry::Var(target, ty)) => {
                self.tree.node_mut(id).kind = StatementKind::SymbolRef {
                    path: path.clone(),
                    target: Some(target),
                };
                self.tree.set_ty(id, ty);
                Ok(ty)
            }
            Some(SymbolEntry::Const(cv)) => {
                self.tree.node_mut(id).kind = StatementKind::Immediate(cv);
                let ty = cv.type_of();
                self.tree.set_ty(id, ty);
                Ok(ty)
            }
            Some(_) => Err(Diagnostic::error(
                codes::E0300,
                span,
                format!("`{joined}` is not a value"),
            )),
            None => Err(Diagnostic::error(
                codes::E0300,
                span,
                format!("unresolved symbol `{joined}`"),
            )),
        }
    }

    /// Data member lookup within the enclosing class, if resolving a member
    /// function body.
    fn member_symbol(&self, name: &str) -> Option<SymbolEntry> {
        let sid = self.current_class?;
        let st = self.types.struct_type(sid);
        let m = st.member(name)?;
        Some(SymbolEntry::Var(
            VarTarget::Member { offset: m.offset },
            m.ty,
        ))
    }

    fn resolve_binary(
        &mut self,
        id: NodeId,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
        span: Span,
    ) -> Result<Type, Diagnostic> {
        let lt = self.resolve_expr(lhs)?;
        let rt = self.resolve_expr(rhs)?;
        if op.is_logical() {
            if lt != Type::Int || rt != Type::Int {
                return Err(Diagnostic::error(
                    codes::E0400,
                    span,
                    "logical operators require `int` operands",
                ));
            }
            self.tree.set_ty(id, Type::Int);
            return Ok(Type::Int);
        }
        let common = common_type(lt, rt).ok_or_else(|| {
            Diagnostic::error(
                codes::E0400,
                span,
                format!(
                    "no common type for `{}` and `{}`",
                    self.types.name_of(lt),
                    self.types.name_of(rt)
                ),
            )
        })?;
        let new_l = self.coerce(lhs, lt, common, span)?;
        let new_r = self.coerce(rhs, rt, common, span)?;
        self.tree.node_mut(id).kind = StatementKind::Binary {
            op,
            lhs: new_l,
            rhs: new_r,
        };
        self.tree.reparent_children(id);
        let ty = if op.is_comparison() { Type::Int } else { common };
        self.tree.set_ty(id, ty);
        Ok(ty)
    }

    /// Insert a widening cast when `from != to`. Fails if the conversion is
    /// not implicit.
    fn coerce(
        &mut self,
        id: NodeId,
        from: Type,
        to: Type,
        span: Span,
    ) -> Result<NodeId, Diagnostic> {
        if from == to {
            return Ok(id);
        }
        if !can_implicitly_convert(from, to) {
            return Err(Diagnostic::error(
                codes::E0400,
                span,
                format!(
                    "cannot implicitly convert `{}` to `{}`",
                    self.types.name_of(from),
                    self.types.name_of(to)
                ),
            ));
        }
        Ok(self.make_cast(id, to))
    }

    fn make_cast(&mut self, operand: NodeId, to: Type) -> NodeId {
        let target = match to {
            Type::Int => TypeName::Int,
            Type::Float => TypeName::Float,
            Type::Double => TypeName::Double,
            _ => TypeName::Int,
        };
        let span = self.tree.span(operand);
        let cast = self.tree.alloc(StatementKind::Cast { target, operand }, span);
        self.tree.set_ty(cast, to);
        cast
    }

    // ── Calls ────────────────────────────────────────────────────────────

    /// Read the call payload of a node. Panics on non-call nodes, which is a
    /// compiler bug.
    fn call_data(&self, id: NodeId) -> &CallData {
        match &self.tree.node(id).kind {
            StatementKind::Call(c) => c,
            other => unreachable!("expected call node, found {other:?}"),
        }
    }

    fn call_data_mut(&mut self, id: NodeId) -> &mut CallData {
        match &mut self.tree.node_mut(id).kind {
            StatementKind::Call(c) => c,
            other => unreachable!("expected call node, found {other:?}"),
        }
    }

    /// Resolve one call site. Child nodes are always re-read from the tree
    /// after resolving them: a high-level inliner may have replaced them.
    fn resolve_call(&mut self, id: NodeId, span: Span) -> Result<Type, Diagnostic> {
        // inliner-generated calls come back through here once typed
        if self.call_data(id).resolved.is_some() && self.tree.ty(id) != Type::Dynamic {
            return Ok(self.tree.ty(id));
        }

        // fold `Math.sin(x)` into a namespaced path call; a variable bound
        // to the same name anywhere in the symbol chain shadows the
        // namespace (`block data` vs the `data::` library prefix)
        if let (Callee::Member(name), Some(obj)) =
            (self.call_data(id).callee.clone(), self.call_data(id).object)
        {
            let receiver = match &self.tree.node(obj).kind {
                StatementKind::SymbolRef { path, .. } if path.is_ident() => Some(path.clone()),
                _ => None,
            };
            if let Some(path) = receiver {
                let ident = path.to_string();
                let shadowed = self.scopes.lookup(&ident).is_some()
                    || self.member_symbol(&ident).is_some()
                    || matches!(self.globals.lookup(&ident), Some(SymbolEntry::Var(..)));
                if !shadowed && self.globals.is_namespace(&ident) {
                    let full = path.child(name);
                    let c = self.call_data_mut(id);
                    c.callee = Callee::Path(full);
                    c.object = None;
                }
            }
        }

        let fid = if let Some(fid) = self.call_data(id).resolved {
            if let Some(obj) = self.call_data(id).object {
                self.resolve_expr(obj)?;
            }
            fid
        } else {
            match self.call_data(id).callee.clone() {
                Callee::Member(name) => {
                    let obj = self.call_data(id).object.ok_or_else(|| {
                        Diagnostic::error(codes::E0300, span, "member call without object")
                    })?;
                    let oty = self.resolve_expr(obj)?;
                    let obj = self.call_data(id).object.unwrap_or(obj);
                    match oty {
                        Type::Block => {
                            return self.resolve_block_intrinsic(id, &name, obj, span)
                        }
                        Type::Span(sid) => {
                            if name == "size" {
                                let (_, len) = self.types.span_info(sid);
                                self.tree.node_mut(id).kind =
                                    StatementKind::Immediate(ConstValue::Int(len as i64));
                                self.tree.set_ty(id, Type::Int);
                                return Ok(Type::Int);
                            }
                            return Err(Diagnostic::error(
                                codes::E0300,
                                span,
                                format!("no member function `{name}` on span"),
                            ));
                        }
                        Type::Struct(sid) => {
                            if sid == self.well_known.external_data && name == "referBlockTo" {
                                return self.resolve_refer_block_to(id, obj, span);
                            }
                            self.resolve_member_candidates(id, sid, &name, span)?
                        }
                        _ => {
                            return Err(Diagnostic::error(
                                codes::E0300,
                                span,
                                format!(
                                    "`{}` has no member functions",
                                    self.types.name_of(oty)
                                ),
                            ))
                        }
                    }
                }
                Callee::Path(path) => {
                    let joined = path.to_string();
                    let found = if path.is_ident() {
                        self.scopes.lookup(&joined).cloned()
                    } else {
                        None
                    }
                    .or_else(|| self.globals.lookup(&joined).cloned());
                    let Some(SymbolEntry::Functions(candidates)) = found else {
                        return Err(Diagnostic::error(
                            codes::E0300,
                            span,
                            format!("unresolved function `{joined}`"),
                        ));
                    };
                    let template_args = self.call_data(id).template_args.clone();
                    if !template_args.is_empty() {
                        let base = self.template_candidate(&candidates);
                        let targs = self.resolve_template_args(&template_args, span)?;
                        let consts = const_args(&targs, span)?;
                        self.instantiate_member_fn(base, &consts, span)?
                    } else {
                        self.pick(id, &candidates, span)?
                    }
                }
            }
        };

        // type-check and coerce arguments against the signature
        let f = self.funcs.get(fid);
        let params: Vec<Type> = f.explicit_args().iter().map(|a| a.ty).collect();
        let fname = f.qualified.clone();
        let ret = f.ret;
        let inliner = f.inliner.clone();
        let argc = self.call_data(id).args.len();
        if params.len() != argc {
            return Err(Diagnostic::error(
                codes::E0401,
                span,
                format!(
                    "`{fname}` expects {} argument(s), got {argc}",
                    params.len(),
                ),
            ));
        }
        for (i, &pty) in params.iter().enumerate() {
            let arg = self.call_data(id).args[i];
            let aty = self.resolve_expr(arg)?;
            let arg = self.call_data(id).args[i];
            if aty == pty {
                continue;
            }
            if !can_implicitly_convert(aty, pty) {
                return Err(Diagnostic::error(
                    codes::E0401,
                    self.tree.span(arg),
                    format!(
                        "argument {} of `{fname}`: cannot convert `{}` to `{}`",
                        i + 1,
                        self.types.name_of(aty),
                        self.types.name_of(pty)
                    ),
                ));
            }
            let cast = self.make_cast(arg, pty);
            self.call_data_mut(id).args[i] = cast;
            self.tree.reparent_children(id);
        }
        self.call_data_mut(id).resolved = Some(fid);

        // high-level inliners replace the call with a tree fragment, which
        // is then resolved like hand-written code
        if let Some(Inliner::HighLevel(f)) = inliner {
            let (object, args) = {
                let c = self.call_data(id);
                (c.object, c.args.clone())
            };
            let mut data = InlineData {
                tree: self.tree,
                types: self.types,
                object,
                args,
                template_args: Vec::new(),
                location: span,
            };
            let replacement = f(&mut data)?;
            if !self.tree.replace_in_parent(id, replacement) {
                // call was a root statement; adopt the fragment in place
                let kind = self.tree.node(replacement).kind.clone();
                self.tree.node_mut(id).kind = kind;
                self.tree.reparent_children(id);
                self.resolve_stmt(id)?;
                return Ok(self.tree.ty(id));
            }
            self.resolve_stmt(replacement)?;
            return Ok(self.tree.ty(replacement));
        }

        self.tree.set_ty(id, ret);
        Ok(ret)
    }

    fn resolve_member_candidates(
        &mut self,
        id: NodeId,
        sid: StructId,
        name: &str,
        span: Span,
    ) -> Result<FunctionId, Diagnostic> {
        let st = self.types.struct_type(sid);
        let candidates: Vec<FunctionId> = st
            .functions
            .iter()
            .copied()
            .filter(|&f| self.funcs.get(f).name == name)
            .collect();
        if candidates.is_empty() {
            return Err(Diagnostic::error(
                codes::E0300,
                span,
                format!(
                    "no member function `{name}` on `{}`",
                    self.types.struct_type(sid).name
                ),
            ));
        }
        let template_args = self.call_data(id).template_args.clone();
        if !template_args.is_empty() {
            let base = self.template_candidate(&candidates);
            let targs = self.resolve_template_args(&template_args, span)?;
            let consts = const_args(&targs, span)?;
            return self.instantiate_member_fn(base, &consts, span);
        }
        self.pick(id, &candidates, span)
    }

    /// Explicit template arguments select the template overload; the same
    /// name may also carry non-template overloads.
    fn template_candidate(&self, candidates: &[FunctionId]) -> FunctionId {
        candidates
            .iter()
            .copied()
            .find(|&f| self.funcs.get(f).is_template())
            .unwrap_or(candidates[0])
    }

    fn pick(
        &mut self,
        id: NodeId,
        candidates: &[FunctionId],
        span: Span,
    ) -> Result<FunctionId, Diagnostic> {
        if candidates.len() == 1 {
            return Ok(candidates[0]);
        }
        let argc = self.call_data(id).args.len();
        let mut arg_tys = Vec::with_capacity(argc);
        for i in 0..argc {
            let a = self.call_data(id).args[i];
            arg_tys.push(self.resolve_expr(a)?);
        }
        match self.funcs.pick_overload(candidates, &arg_tys) {
            Ok(fid) => Ok(fid),
            Err(OverloadError::Ambiguous) => Err(Diagnostic::error(
                codes::E0302,
                span,
                format!(
                    "ambiguous call to `{}`",
                    self.funcs.get(candidates[0]).name
                ),
            )),
            Err(OverloadError::NoMatch) => {
                let rendered: Vec<String> =
                    arg_tys.iter().map(|t| self.types.name_of(*t)).collect();
                Err(Diagnostic::error(
                    codes::E0401,
                    span,
                    format!(
                        "no overload of `{}` matches ({})",
                        self.funcs.get(candidates[0]).name,
                        rendered.join(", ")
                    ),
                ))
            }
        }
    }

    fn resolve_block_intrinsic(
        &mut self,
        id: NodeId,
        name: &str,
        obj: NodeId,
        span: Span,
    ) -> Result<Type, Diagnostic> {
        let args = self.call_data(id).args.clone();
        match name {
            "size" if args.is_empty() => {
                self.tree.node_mut(id).kind = StatementKind::IntrinsicCall {
                    op: Intrinsic::BlockSize,
                    object: obj,
                    args: Vec::new(),
                };
                self.tree.reparent_children(id);
                self.tree.set_ty(id, Type::Int);
                Ok(Type::Int)
            }
            "sub" if args.len() == 2 => {
                let mut coerced = Vec::with_capacity(2);
                for i in 0..2 {
                    let a = self.call_data(id).args[i];
                    let ty = self.resolve_expr(a)?;
                    let a = self.call_data(id).args[i];
                    coerced.push(self.coerce(a, ty, Type::Int, span)?);
                }
                self.tree.node_mut(id).kind = StatementKind::IntrinsicCall {
                    op: Intrinsic::BlockSub,
                    object: obj,
                    args: coerced,
                };
                self.tree.reparent_children(id);
                self.tree.set_ty(id, Type::Block);
                Ok(Type::Block)
            }
            _ => Err(Diagnostic::error(
                codes::E0300,
                span,
                format!("no member function `{name}` on block"),
            )),
        }
    }

    fn resolve_refer_block_to(
        &mut self,
        id: NodeId,
        obj: NodeId,
        span: Span,
    ) -> Result<Type, Diagnostic> {
        let args = self.call_data(id).args.clone();
        if args.len() != 2 {
            return Err(Diagnostic::error(
                codes::E0401,
                span,
                "referBlockTo expects (block, int)",
            ));
        }
        let target = args[0];
        let tty = self.resolve_expr(target)?;
        let target = self.call_data(id).args[0];
        if tty != Type::Block {
            return Err(Diagnostic::error(
                codes::E0401,
                self.tree.span(target),
                format!(
                    "argument 1 of `referBlockTo`: cannot convert `{}` to `block`",
                    self.types.name_of(tty)
                ),
            ));
        }
        // the target must be memory-resident: its slot is rebound in place
        let addressable = match &self.tree.node(target).kind {
            StatementKind::Member { .. } | StatementKind::MemoryRef { .. } => true,
            StatementKind::SymbolRef { target, .. } => !matches!(
                target,
                Some(VarTarget::Local { .. }) | Some(VarTarget::Arg { .. })
            ),
            _ => false,
        };
        if !addressable {
            return Err(Diagnostic::error(
                codes::E0401,
                self.tree.span(target),
                "referBlockTo target must be a global or member block",
            ));
        }
        let ity = self.resolve_expr(args[1])?;
        let idx_arg = self.call_data(id).args[1];
        let index = self.coerce(idx_arg, ity, Type::Int, span)?;
        self.tree.node_mut(id).kind = StatementKind::IntrinsicCall {
            op: Intrinsic::ReferBlockTo,
            object: obj,
            args: vec![target, index],
        };
        self.tree.reparent_children(id);
        self.tree.set_ty(id, Type::Void);
        Ok(Type::Void)
    }
}

fn const_args(args: &[TemplateArg], span: Span) -> Result<Vec<i64>, Diagnostic> {
    args.iter()
        .map(|a| match a {
            TemplateArg::Const(v) => Ok(*v),
            TemplateArg::Type(_) => Err(Diagnostic::error(
                codes::E0303,
                span,
                "expected integer template argument",
            )),
        })
        .collect()
}

fn const_value(cv: ConstValue) -> Value {
    match cv {
        ConstValue::Int(v) => Value::Int(v),
        ConstValue::Float(v) => Value::Float(v),
        ConstValue::Double(v) => Value::Double(v),
    }
}
