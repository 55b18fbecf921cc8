// wrap.rs — Builtin wrapper templates
//
// Instantiation logic for the `wrap` node composition library and the
// embedded data table. Each wrapper produces a fresh struct type holding
// the wrapped object as a member, forwards the inner member functions
// through inliners, and synthesizes the functions whose behavior the
// wrapper changes (chunked processing, event routing, descriptor
// construction). Wrapper instances are nodes themselves, so wrappers
// compose to arbitrary depth.
//
// Preconditions: called from the resolver with the cycle guard already
//   entered for this instantiation.
// Postconditions: the returned struct carries `IsNode`, `IsObjectWrapper`
//   and `ObjectIndex`; every synthesized body is on the resolver worklist.
// Failure modes: E0303 for malformed argument lists, E0400 for non-class
//   arguments, E0500 for missing required member functions, E0501 for
//   unsupported event routing widths.
// Side effects: registers types and functions in the session tables.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::{
    CallData, Callee, ConstArg, FunctionDef, NodeId, Path, StatementKind, TemplateArgSyntax,
    TypeName,
};
use crate::backend::FuncHandle;
use crate::diag::{codes, Diagnostic};
use crate::func::{Arg, FunctionId};
use crate::inline::{self, AsmInlineData, InlineData, Inliner};
use crate::lexer::Span;
use crate::parser;
use crate::resolve::Resolver;
use crate::scope::{BuiltinTemplate, TemplateArg};
use crate::types::{props, Member, StructId, StructType, Type, TypeTable};

/// Channel count assumed for nodes that never declare one.
pub const DEFAULT_NUM_CHANNELS: i64 = 2;

/// Getters every wrapper defines itself; never forwarded from the inner
/// object.
const WRAPPER_GETTERS: [&str; 2] = ["getObject", "getWrappedObject"];

/// Entry point called by the resolver for builtin template instantiation.
pub fn instantiate_builtin(
    r: &mut Resolver<'_>,
    b: BuiltinTemplate,
    args: &[TemplateArg],
    span: Span,
) -> Result<StructId, Diagnostic> {
    match b {
        BuiltinTemplate::WrapFix => fix(r, args, span),
        BuiltinTemplate::WrapFrame => frame(r, args, span),
        BuiltinTemplate::WrapFixBlock => fix_block(r, args, span),
        BuiltinTemplate::WrapMod => wrap_mod(r, args, span),
        BuiltinTemplate::WrapEvent => event(r, args, span),
        BuiltinTemplate::WrapData => data(r, args, span),
        BuiltinTemplate::DataEmbeddedTable => embedded_table(r, args, span),
    }
}

// ── Argument validation ──────────────────────────────────────────────────

fn expect_int_type(
    args: &[TemplateArg],
    template: &str,
    span: Span,
) -> Result<(i64, Type), Diagnostic> {
    match args {
        [TemplateArg::Const(n), TemplateArg::Type(t)] => Ok((*n, *t)),
        _ => Err(Diagnostic::error(
            codes::E0303,
            span,
            format!("`{template}` expects <int, class> template arguments"),
        )),
    }
}

fn expect_two_types(
    args: &[TemplateArg],
    template: &str,
    span: Span,
) -> Result<(Type, Type), Diagnostic> {
    match args {
        [TemplateArg::Type(a), TemplateArg::Type(b)] => Ok((*a, *b)),
        _ => Err(Diagnostic::error(
            codes::E0303,
            span,
            format!("`{template}` expects <class, class> template arguments"),
        )),
    }
}

fn expect_one_type(
    args: &[TemplateArg],
    template: &str,
    span: Span,
) -> Result<Type, Diagnostic> {
    match args {
        [TemplateArg::Type(t)] => Ok(*t),
        _ => Err(Diagnostic::error(
            codes::E0303,
            span,
            format!("`{template}` expects a <class> template argument"),
        )),
    }
}

fn plain_struct(
    r: &Resolver<'_>,
    template: &str,
    ty: Type,
    span: Span,
) -> Result<StructId, Diagnostic> {
    match ty {
        Type::Struct(sid) => Ok(sid),
        _ => Err(Diagnostic::error(
            codes::E0400,
            span,
            format!(
                "`{template}` requires a class argument, found `{}`",
                r.types.name_of(ty)
            ),
        )),
    }
}

/// A wrappable argument must be a struct carrying the node marker.
fn node_struct(
    r: &Resolver<'_>,
    template: &str,
    ty: Type,
    span: Span,
) -> Result<StructId, Diagnostic> {
    let sid = plain_struct(r, template, ty, span)?;
    let st = r.types.struct_type(sid);
    if !st.has_property(props::IS_NODE) {
        return Err(Diagnostic::error(
            codes::E0500,
            span,
            format!("{}::{} not defined", st.name, props::IS_NODE),
        ));
    }
    Ok(sid)
}

/// First non-template member function with the given name.
fn member_fn(r: &Resolver<'_>, sid: StructId, name: &str) -> Option<FunctionId> {
    r.types
        .struct_type(sid)
        .functions
        .iter()
        .copied()
        .find(|&f| !r.funcs.get(f).is_template() && r.funcs.get(f).name == name)
}

fn require_member_fn(
    r: &Resolver<'_>,
    sid: StructId,
    name: &str,
    span: Span,
) -> Result<FunctionId, Diagnostic> {
    member_fn(r, sid, name).ok_or_else(|| {
        Diagnostic::error(
            codes::E0500,
            span,
            format!("{}::{name} not defined", r.types.struct_type(sid).name),
        )
    })
}

fn member(name: &str, ty: Type) -> Member {
    Member {
        name: name.into(),
        ty,
        offset: 0,
        default: None,
    }
}

// ── Member forwarding ────────────────────────────────────────────────────

/// Forward every non-template member function of `inner` onto the wrapper
/// as a high-level inliner that redirects the call to the object member.
fn forward_members(
    r: &mut Resolver<'_>,
    sid: StructId,
    inner: StructId,
    obj_offset: usize,
    skip: &[&str],
    span: Span,
) {
    let fids: Vec<FunctionId> = r.types.struct_type(inner).functions.clone();
    for fid in fids {
        let f = r.funcs.get(fid);
        if f.is_template()
            || skip.contains(&f.name.as_str())
            || WRAPPER_GETTERS.contains(&f.name.as_str())
        {
            continue;
        }
        let name = f.name.clone();
        let ret = f.ret;
        let explicit = f.explicit_args().to_vec();
        let inliner = Inliner::HighLevel(Arc::new(move |d: &mut InlineData<'_>| {
            Ok(inline::forward_call(d, fid, obj_offset, Type::Struct(inner)))
        }));
        r.add_inliner_fn(sid, &name, ret, explicit, inliner, span);
    }
}

/// Forward template member functions (`setParameter<P>`) by synthesizing a
/// generic body that re-invokes the inner template with the same constant
/// parameters. Each instance resolves through the normal worklist.
fn forward_template_members(
    r: &mut Resolver<'_>,
    sid: StructId,
    inner: StructId,
    skip: &[&str],
    span: Span,
) {
    let fids: Vec<FunctionId> = r.types.struct_type(inner).functions.clone();
    for fid in fids {
        let f = r.funcs.get(fid);
        if !f.is_template() || skip.contains(&f.name.as_str()) {
            continue;
        }
        let Some(def) = f.generic.clone() else {
            continue;
        };
        let name = f.name.clone();
        let ret = f.ret;
        let explicit = f.explicit_args().to_vec();

        let obj_ref = r.tree.alloc(
            StatementKind::SymbolRef {
                path: Path::ident("obj"),
                target: None,
            },
            span,
        );
        let arg_refs: Vec<NodeId> = explicit
            .iter()
            .map(|a| {
                r.tree.alloc(
                    StatementKind::SymbolRef {
                        path: Path::ident(&a.name),
                        target: None,
                    },
                    span,
                )
            })
            .collect();
        let template_args: Vec<TemplateArgSyntax> = def
            .template_params
            .iter()
            .map(|p| TemplateArgSyntax::Const(ConstArg::Name(p.name.clone())))
            .collect();
        let call = r.tree.alloc(
            StatementKind::Call(CallData {
                callee: Callee::Member(name.clone()),
                object: Some(obj_ref),
                args: arg_refs,
                template_args,
                resolved: None,
            }),
            span,
        );
        let stmt = if ret == Type::Void {
            call
        } else {
            r.tree
                .alloc(StatementKind::Return { value: Some(call) }, span)
        };
        let body = r.tree.alloc(StatementKind::Block(vec![stmt]), span);
        let fwd = FunctionDef {
            name: name.clone(),
            ret: TypeName::Void,
            params: Vec::new(),
            template_params: def.template_params.clone(),
            body,
            span,
        };
        r.add_generic_fn(sid, &name, ret, explicit, fwd, span);
    }
}

/// Walk through wrapper layers to the innermost wrapped object, summing
/// member offsets along the way.
fn innermost_object(types: &TypeTable, sid: StructId, base: usize) -> (usize, StructId) {
    let st = types.struct_type(sid);
    if st.property(props::IS_OBJECT_WRAPPER, 0) == 0 {
        return (base, sid);
    }
    let obj_off = st.property(props::OBJECT_INDEX, 0) as usize;
    let inner = st
        .members
        .iter()
        .find(|m| m.offset == obj_off)
        .map(|m| m.ty);
    match inner {
        Some(Type::Struct(s)) => innermost_object(types, s, base + obj_off),
        _ => (base, sid),
    }
}

/// `getObject` returns the directly wrapped object; `getWrappedObject`
/// unwraps through every wrapper layer.
fn add_object_getters(
    r: &mut Resolver<'_>,
    sid: StructId,
    inner: StructId,
    obj_offset: usize,
    span: Span,
) {
    let direct = Inliner::HighLevel(Arc::new(move |d: &mut InlineData<'_>| {
        Ok(inline::member_ref(
            d.tree,
            d.object,
            obj_offset,
            Type::Struct(inner),
            d.location,
        ))
    }));
    r.add_inliner_fn(sid, "getObject", Type::Struct(inner), Vec::new(), direct, span);

    let (total, deepest) = innermost_object(r.types, inner, obj_offset);
    let unwrap = Inliner::HighLevel(Arc::new(move |d: &mut InlineData<'_>| {
        Ok(inline::member_ref(
            d.tree,
            d.object,
            total,
            Type::Struct(deepest),
            d.location,
        ))
    }));
    r.add_inliner_fn(
        sid,
        "getWrappedObject",
        Type::Struct(deepest),
        Vec::new(),
        unwrap,
        span,
    );
}

// ── wrap::fix ────────────────────────────────────────────────────────────

/// Pins the channel count of a node without changing its behavior.
fn fix(r: &mut Resolver<'_>, args: &[TemplateArg], span: Span) -> Result<StructId, Diagnostic> {
    let (n, t) = expect_int_type(args, "wrap::fix", span)?;
    if n <= 0 {
        return Err(Diagnostic::error(
            codes::E0303,
            span,
            "`wrap::fix` channel count must be positive",
        ));
    }
    let inner = node_struct(r, "wrap::fix", t, span)?;

    let mut st = StructType::new(r.instance_name("wrap::fix", args));
    st.members.push(member("obj", Type::Struct(inner)));
    st.set_property(props::IS_NODE, 1);
    st.set_property(props::IS_OBJECT_WRAPPER, 1);
    st.set_property(props::OBJECT_INDEX, 0);
    st.set_property(props::NUM_CHANNELS, n);
    let sid = r.types.add_struct(st);

    forward_members(r, sid, inner, 0, &[], span);
    forward_template_members(r, sid, inner, &[], span);
    add_object_getters(r, sid, inner, 0, span);
    Ok(sid)
}

// ── wrap::frame / wrap::fix_block ────────────────────────────────────────

/// Shared shape of the chunking wrappers: replace `process` with a loop
/// that feeds the inner callback fixed-size sub-blocks.
fn chunked(
    r: &mut Resolver<'_>,
    template: &str,
    n: i64,
    t: Type,
    args: &[TemplateArg],
    inner_callback: &str,
    span: Span,
) -> Result<StructId, Diagnostic> {
    if n <= 0 {
        return Err(Diagnostic::error(
            codes::E0303,
            span,
            format!("`{template}` size must be positive"),
        ));
    }
    let inner = node_struct(r, template, t, span)?;
    require_member_fn(r, inner, inner_callback, span)?;

    let mut st = StructType::new(r.instance_name(template, args));
    st.members.push(member("obj", Type::Struct(inner)));
    st.set_property(props::IS_NODE, 1);
    st.set_property(props::IS_OBJECT_WRAPPER, 1);
    st.set_property(props::OBJECT_INDEX, 0);
    let nc = r.types.struct_type(inner).property(props::NUM_CHANNELS, 0);
    if nc != 0 {
        st.set_property(props::NUM_CHANNELS, nc);
    }
    let sid = r.types.add_struct(st);

    let src = format!(
        "{{ int i = 0; while (i < data.size()) {{ obj.{inner_callback}(data.sub(i, {n})); i = i + {n}; }} }}"
    );
    let bindings = HashMap::new();
    let body = parser::parse_fragment(r.tree, &src, &bindings)?;
    r.add_synthesized_fn(
        sid,
        "process",
        Type::Void,
        vec![Arg {
            name: "data".into(),
            ty: Type::Block,
        }],
        body,
        span,
    );

    forward_members(r, sid, inner, 0, &["process"], span);
    forward_template_members(r, sid, inner, &[], span);
    add_object_getters(r, sid, inner, 0, span);
    Ok(sid)
}

/// Converts a frame-processing node into a block-processing one.
fn frame(r: &mut Resolver<'_>, args: &[TemplateArg], span: Span) -> Result<StructId, Diagnostic> {
    let (n, t) = expect_int_type(args, "wrap::frame", span)?;
    chunked(r, "wrap::frame", n, t, args, "processFrame", span)
}

/// Splits incoming blocks into fixed-size chunks for the inner `process`.
fn fix_block(
    r: &mut Resolver<'_>,
    args: &[TemplateArg],
    span: Span,
) -> Result<StructId, Diagnostic> {
    let (n, t) = expect_int_type(args, "wrap::fix_block", span)?;
    chunked(r, "wrap::fix_block", n, t, args, "process", span)
}

// ── wrap::mod ────────────────────────────────────────────────────────────

/// Chains a parameter class onto the node's modulation output.
fn wrap_mod(
    r: &mut Resolver<'_>,
    args: &[TemplateArg],
    span: Span,
) -> Result<StructId, Diagnostic> {
    let (p, t) = expect_two_types(args, "wrap::mod", span)?;
    let pid = plain_struct(r, "wrap::mod", p, span)?;
    require_member_fn(r, pid, "call", span)?;
    let inner = node_struct(r, "wrap::mod", t, span)?;
    require_member_fn(r, inner, "getModValue", span)?;

    let obj_off = r.types.size_of(Type::Struct(pid));
    let mut st = StructType::new(r.instance_name("wrap::mod", args));
    st.members.push(member("p", Type::Struct(pid)));
    st.members.push(member("obj", Type::Struct(inner)));
    st.set_property(props::IS_NODE, 1);
    st.set_property(props::IS_OBJECT_WRAPPER, 1);
    st.set_property(props::OBJECT_INDEX, obj_off as i64);
    let nc = r.types.struct_type(inner).property(props::NUM_CHANNELS, 0);
    if nc != 0 {
        st.set_property(props::NUM_CHANNELS, nc);
    }
    let sid = r.types.add_struct(st);

    let bindings = HashMap::new();
    let body = parser::parse_fragment(
        r.tree,
        "{ return p.call(obj.getModValue()); }",
        &bindings,
    )?;
    r.add_synthesized_fn(sid, "getModValue", Type::Double, Vec::new(), body, span);

    forward_members(r, sid, inner, obj_off, &["getModValue"], span);
    forward_template_members(r, sid, inner, &[], span);
    add_object_getters(r, sid, inner, obj_off, span);
    Ok(sid)
}

// ── wrap::event ──────────────────────────────────────────────────────────

/// Routes the inner `process` through the channel-router routine so the
/// call receives the process handle as a hidden argument.
fn event(r: &mut Resolver<'_>, args: &[TemplateArg], span: Span) -> Result<StructId, Diagnostic> {
    let t = expect_one_type(args, "wrap::event", span)?;
    let inner = node_struct(r, "wrap::event", t, span)?;
    let inner_process = require_member_fn(r, inner, "process", span)?;

    let nc = r
        .types
        .struct_type(inner)
        .property(props::NUM_CHANNELS, DEFAULT_NUM_CHANNELS);
    let Some(&router) = r.well_known.event_routers.get(&nc) else {
        return Err(Diagnostic::error(
            codes::E0501,
            span,
            format!("no event router for {nc} channel(s)"),
        )
        .with_hint("supported channel widths: 1, 2, 4, 8"));
    };

    // the object sits at offset 0, so the wrapper address doubles as the
    // inner object address the router receives
    let mut st = StructType::new(r.instance_name("wrap::event", args));
    st.members.push(member("obj", Type::Struct(inner)));
    st.set_property(props::IS_NODE, 1);
    st.set_property(props::IS_OBJECT_WRAPPER, 1);
    st.set_property(props::OBJECT_INDEX, 0);
    st.set_property(props::NUM_CHANNELS, nc);
    let sid = r.types.add_struct(st);

    let routed = Inliner::Assembly(Arc::new(move |d: AsmInlineData<'_>| {
        let inner_idx = d.func_index(inner_process)?;
        let router_idx = d.func_index(router)?;
        let mut splice = d.splice;
        splice.insert_function_ptr_arg(FuncHandle::Prog(inner_idx));
        splice.call_through(FuncHandle::Prog(router_idx));
        Ok(())
    }));
    r.add_inliner_fn(
        sid,
        "process",
        Type::Void,
        vec![Arg {
            name: "data".into(),
            ty: Type::Block,
        }],
        routed,
        span,
    );

    forward_members(r, sid, inner, 0, &["process"], span);
    forward_template_members(r, sid, inner, &[], span);
    add_object_getters(r, sid, inner, 0, span);
    Ok(sid)
}

// ── wrap::data ───────────────────────────────────────────────────────────

/// Locate the float table inside a data handler: the first `span<float, N>`
/// member, searched depth-first through struct members. Returns the slot
/// offset from the handler start and the element count.
fn find_embedded_span(types: &TypeTable, sid: StructId) -> Option<(usize, usize)> {
    for m in &types.struct_type(sid).members {
        match m.ty {
            Type::Span(id) => {
                let (elem, len) = types.span_info(id);
                if elem == Type::Float {
                    return Some((m.offset, len));
                }
            }
            Type::Struct(s) => {
                if let Some((off, len)) = find_embedded_span(types, s) {
                    return Some((m.offset + off, len));
                }
            }
            _ => {}
        }
    }
    None
}

/// Binds a node to an embedded data table. The synthesized
/// `setExternalData` ignores the incoming descriptor and fills the member
/// descriptor to point at the embedded table, then hands it to the inner
/// object. The descriptor offset is relative to the descriptor's own slot,
/// so it stays valid wherever the instance lives in memory.
fn data(r: &mut Resolver<'_>, args: &[TemplateArg], span: Span) -> Result<StructId, Diagnostic> {
    let (t, h) = expect_two_types(args, "wrap::data", span)?;
    let inner = node_struct(r, "wrap::data", t, span)?;
    require_member_fn(r, inner, "setExternalData", span)?;
    let hid = plain_struct(r, "wrap::data", h, span)?;
    let Some((span_off, len)) = find_embedded_span(r.types, hid) else {
        return Err(Diagnostic::error(
            codes::E0500,
            span,
            format!(
                "`{}` contains no embedded float table",
                r.types.struct_type(hid).name
            ),
        ));
    };

    let ed_sid = r.well_known.external_data;
    let ed_off = r.types.size_of(Type::Struct(inner));
    let h_off = ed_off + r.types.size_of(Type::Struct(ed_sid));
    let rel = (h_off + span_off) as i64 - ed_off as i64;

    let mut st = StructType::new(r.instance_name("wrap::data", args));
    st.members.push(member("obj", Type::Struct(inner)));
    st.members.push(member("ed", Type::Struct(ed_sid)));
    st.members.push(member("h", Type::Struct(hid)));
    st.set_property(props::IS_NODE, 1);
    st.set_property(props::IS_OBJECT_WRAPPER, 1);
    st.set_property(props::OBJECT_INDEX, 0);
    let nc = r.types.struct_type(inner).property(props::NUM_CHANNELS, 0);
    if nc != 0 {
        st.set_property(props::NUM_CHANNELS, nc);
    }
    let sid = r.types.add_struct(st);

    let src = format!(
        "{{ ed.kind = 1; ed.size = {len}; ed.offset = {rel}; obj.setExternalData(ed, index); }}"
    );
    let bindings = HashMap::new();
    let body = parser::parse_fragment(r.tree, &src, &bindings)?;
    r.add_synthesized_fn(
        sid,
        "setExternalData",
        Type::Void,
        vec![
            Arg {
                name: "d".into(),
                ty: Type::Struct(ed_sid),
            },
            Arg {
                name: "index".into(),
                ty: Type::Int,
            },
        ],
        body,
        span,
    );

    forward_members(r, sid, inner, 0, &["setExternalData"], span);
    forward_template_members(r, sid, inner, &[], span);
    add_object_getters(r, sid, inner, 0, span);
    Ok(sid)
}

// ── data::embedded::table ────────────────────────────────────────────────

/// Plain carrier struct for an embedded table class, usable as the handler
/// argument of `wrap::data`. The table contents come from the data class's
/// member initializers.
fn embedded_table(
    r: &mut Resolver<'_>,
    args: &[TemplateArg],
    span: Span,
) -> Result<StructId, Diagnostic> {
    let t = expect_one_type(args, "data::embedded::table", span)?;
    let did = plain_struct(r, "data::embedded::table", t, span)?;
    if find_embedded_span(r.types, did).is_none() {
        return Err(Diagnostic::error(
            codes::E0500,
            span,
            format!(
                "`{}` contains no embedded float table",
                r.types.struct_type(did).name
            ),
        ));
    }
    let mut st = StructType::new(r.instance_name("data::embedded::table", args));
    st.members.push(member("item", Type::Struct(did)));
    Ok(r.types.add_struct(st))
}

// ── Tests ────────────────────────────────────────────────────────────────
