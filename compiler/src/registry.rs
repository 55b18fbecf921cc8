// registry.rs — Library installation
//
// Installs everything a fresh compilation session knows before user code is
// resolved: the `Math` native function library, the `ExternalData`
// descriptor type, the builtin `wrap` templates and the channel-router
// routines the event wrapper splices its calls through. Native ids are
// positional: the code generator re-registers `Library::natives` with the
// backend in the same order they were issued here.
//
// Preconditions: the session tables are empty.
// Postconditions: every installed function is resolved; every installed
//   template is reachable through the global path map.
// Failure modes: none (installation is infallible; misuse of the installed
//   entities is diagnosed by later passes).
// Side effects: none outside the session tables.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::{TemplateParamDef, TemplateParamKind};
use crate::backend::{ArgSplice, EmitFn, Emitter, NativeId, NativeImpl, Value};
use crate::func::{Arg, FunctionData, FunctionId, FunctionTable};
use crate::lexer::Span;
use crate::scope::{
    BuiltinTemplate, GlobalSymbols, SymbolEntry, TemplateEntry, TemplateKind, TemplateStore,
};
use crate::types::{Member, StructId, StructType, Type, TypeTable};

/// Channel widths the event routing matrix supports. Instantiating
/// `wrap::event` around a node with any other width fails at compile time.
pub const ROUTER_WIDTHS: [i64; 4] = [1, 2, 4, 8];

/// Span used for library-synthesized entities, which have no source text.
const LIB_SPAN: Span = Span { start: 0, end: 0 };

/// Struct ids and function ids later passes special-case.
#[derive(Debug)]
pub struct WellKnown {
    /// The `ExternalData` descriptor type; `referBlockTo` calls on it lower
    /// to an intrinsic instead of a member call.
    pub external_data: StructId,
    /// Channel-router routines keyed by channel count.
    pub event_routers: HashMap<i64, FunctionId>,
}

/// Everything `install` produced that outlives resolution.
#[derive(Debug)]
pub struct Library {
    /// Native implementations in id order; the code generator registers
    /// them with the backend positionally.
    pub natives: Vec<NativeImpl>,
    pub well_known: WellKnown,
}

/// Install the standard library into a session's tables.
pub fn install(
    types: &mut TypeTable,
    funcs: &mut FunctionTable,
    templates: &mut TemplateStore,
    globals: &mut GlobalSymbols,
) -> Library {
    let natives = install_math(funcs, globals);
    let external_data = install_external_data(types, globals);
    install_templates(templates, globals);
    let event_routers = install_routers(funcs);
    Library {
        natives,
        well_known: WellKnown {
            external_data,
            event_routers,
        },
    }
}

// ── Math ─────────────────────────────────────────────────────────────────

fn sin_d(a: &[Value]) -> Value {
    Value::Double(a[0].as_f64().sin())
}
fn sin_f(a: &[Value]) -> Value {
    Value::Float(a[0].as_f32().sin())
}
fn cos_d(a: &[Value]) -> Value {
    Value::Double(a[0].as_f64().cos())
}
fn cos_f(a: &[Value]) -> Value {
    Value::Float(a[0].as_f32().cos())
}
fn sqrt_d(a: &[Value]) -> Value {
    Value::Double(a[0].as_f64().sqrt())
}
fn sqrt_f(a: &[Value]) -> Value {
    Value::Float(a[0].as_f32().sqrt())
}
fn abs_d(a: &[Value]) -> Value {
    Value::Double(a[0].as_f64().abs())
}
fn abs_f(a: &[Value]) -> Value {
    Value::Float(a[0].as_f32().abs())
}
fn min_d(a: &[Value]) -> Value {
    Value::Double(a[0].as_f64().min(a[1].as_f64()))
}
fn min_f(a: &[Value]) -> Value {
    Value::Float(a[0].as_f32().min(a[1].as_f32()))
}
fn max_d(a: &[Value]) -> Value {
    Value::Double(a[0].as_f64().max(a[1].as_f64()))
}
fn max_f(a: &[Value]) -> Value {
    Value::Float(a[0].as_f32().max(a[1].as_f32()))
}
fn fmod_d(a: &[Value]) -> Value {
    Value::Double(a[0].as_f64() % a[1].as_f64())
}
fn fmod_f(a: &[Value]) -> Value {
    Value::Float(a[0].as_f32() % a[1].as_f32())
}

/// `(path, arity, value type, implementation)` per overload. Float and
/// double overloads coexist; overload selection prefers the exact match.
type MathEntry = (&'static str, usize, Type, fn(&[Value]) -> Value);

const MATH: &[MathEntry] = &[
    ("Math::sin", 1, Type::Double, sin_d),
    ("Math::sin", 1, Type::Float, sin_f),
    ("Math::cos", 1, Type::Double, cos_d),
    ("Math::cos", 1, Type::Float, cos_f),
    ("Math::sqrt", 1, Type::Double, sqrt_d),
    ("Math::sqrt", 1, Type::Float, sqrt_f),
    ("Math::abs", 1, Type::Double, abs_d),
    ("Math::abs", 1, Type::Float, abs_f),
    ("Math::min", 2, Type::Double, min_d),
    ("Math::min", 2, Type::Float, min_f),
    ("Math::max", 2, Type::Double, max_d),
    ("Math::max", 2, Type::Float, max_f),
    ("Math::fmod", 2, Type::Double, fmod_d),
    ("Math::fmod", 2, Type::Float, fmod_f),
];

fn install_math(funcs: &mut FunctionTable, globals: &mut GlobalSymbols) -> Vec<NativeImpl> {
    let mut natives = Vec::with_capacity(MATH.len());
    for &(path, arity, ty, f) in MATH {
        let nid = NativeId(natives.len() as u32);
        natives.push(NativeImpl { name: path, f });
        let short = path.split("::").last().unwrap_or(path);
        let mut data = FunctionData::new(path, short, LIB_SPAN);
        data.ret = ty;
        data.args = (0..arity)
            .map(|i| Arg {
                name: format!("a{i}"),
                ty,
            })
            .collect();
        data.native = Some(nid);
        let fid = funcs.add(data);
        globals.add_function(path, fid);
    }
    natives
}

// ── ExternalData ─────────────────────────────────────────────────────────

fn install_external_data(types: &mut TypeTable, globals: &mut GlobalSymbols) -> StructId {
    let mut st = StructType::new("ExternalData");
    for field in ["kind", "size", "offset"] {
        st.members.push(Member {
            name: field.into(),
            ty: Type::Int,
            offset: 0,
            default: None,
        });
    }
    let sid = types.add_struct(st);
    globals.define("ExternalData", SymbolEntry::TypeSym(Type::Struct(sid)));
    sid
}

// ── Builtin templates ────────────────────────────────────────────────────

fn install_templates(templates: &mut TemplateStore, globals: &mut GlobalSymbols) {
    let int_p = |name: &str| TemplateParamDef {
        name: name.into(),
        kind: TemplateParamKind::Int,
    };
    let type_p = |name: &str| TemplateParamDef {
        name: name.into(),
        kind: TemplateParamKind::Type,
    };
    let entries: [(&str, Vec<TemplateParamDef>, BuiltinTemplate); 7] = [
        (
            "wrap::fix",
            vec![int_p("NumChannels"), type_p("T")],
            BuiltinTemplate::WrapFix,
        ),
        (
            "wrap::frame",
            vec![int_p("FrameSize"), type_p("T")],
            BuiltinTemplate::WrapFrame,
        ),
        (
            "wrap::fix_block",
            vec![int_p("BlockSize"), type_p("T")],
            BuiltinTemplate::WrapFixBlock,
        ),
        (
            "wrap::mod",
            vec![type_p("ParameterClass"), type_p("T")],
            BuiltinTemplate::WrapMod,
        ),
        ("wrap::event", vec![type_p("T")], BuiltinTemplate::WrapEvent),
        (
            "wrap::data",
            vec![type_p("T"), type_p("DataHandler")],
            BuiltinTemplate::WrapData,
        ),
        (
            "data::embedded::table",
            vec![type_p("DataClass")],
            BuiltinTemplate::DataEmbeddedTable,
        ),
    ];
    for (name, params, kind) in entries {
        let tid = templates.add(TemplateEntry {
            name: name.into(),
            params,
            kind: TemplateKind::Builtin(kind),
        });
        globals.define(name, SymbolEntry::Template(tid));
    }
}

// ── Event routers ────────────────────────────────────────────────────────

/// One router routine per supported channel width. Each receives the inner
/// process handle as a hidden first argument and calls through it; widths
/// outside the matrix fail at `wrap::event` instantiation instead.
fn install_routers(funcs: &mut FunctionTable) -> HashMap<i64, FunctionId> {
    let mut routers = HashMap::new();
    for n in ROUTER_WIDTHS {
        let emit: EmitFn = Arc::new(|em: &mut Emitter| {
            let handle = em.alloc_scratch();
            let obj = em.alloc_scratch();
            let data = em.alloc_scratch();
            em.load_arg(handle, 0);
            em.load_arg(obj, 1);
            em.load_arg(data, 2);
            ArgSplice::new(em, None, vec![obj, data]).call_through_reg(handle);
            Ok(())
        });
        let name = format!("route{n}");
        let mut f = FunctionData::new(name.clone(), name, LIB_SPAN);
        f.ret = Type::Void;
        f.args = vec![
            Arg {
                name: "fn".into(),
                ty: Type::Int,
            },
            Arg {
                name: "obj".into(),
                ty: Type::Int,
            },
            Arg {
                name: "data".into(),
                ty: Type::Block,
            },
        ];
        f.emit = Some(emit);
        routers.insert(n, funcs.add(f));
    }
    routers
}

// ── Tests ────────────────────────────────────────────────────────────────
