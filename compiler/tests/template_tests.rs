// Template instantiation: cache behavior, parameter checking, cycle
// detection and template member functions called through concrete sources.

use snexc::ast::Item;
use snexc::backend::LayoutBuilder;
use snexc::diag::{codes, Diagnostic};
use snexc::func::FunctionTable;
use snexc::pass::PassId;
use snexc::resolve::Resolver;
use snexc::scope::{GlobalSymbols, SymbolEntry, TemplateStore};
use snexc::session::compile;
use snexc::types::{StructId, Type, TypeTable};
use snexc::{parser, registry};

#[derive(Debug)]
struct Resolved {
    types: TypeTable,
    funcs: FunctionTable,
    globals: GlobalSymbols,
}

fn resolve(src: &str) -> Result<Resolved, Diagnostic> {
    let unit = parser::parse_unit(src)?;
    let mut tree = unit.tree;
    let mut types = TypeTable::new();
    let mut funcs = FunctionTable::new();
    let mut templates = TemplateStore::new();
    let mut globals = GlobalSymbols::new();
    let mut layout = LayoutBuilder::new();
    let lib = registry::install(&mut types, &mut funcs, &mut templates, &mut globals);
    let mut r = Resolver::new(
        &mut tree,
        &mut types,
        &mut funcs,
        &mut templates,
        &mut globals,
        &mut layout,
        &lib.well_known,
    );
    let items: Vec<Item> = unit.items;
    r.run(&items)?;
    Ok(Resolved {
        types,
        funcs,
        globals,
    })
}

fn global_struct(s: &Resolved, name: &str) -> StructId {
    match s.globals.lookup(name) {
        Some(SymbolEntry::Var(_, Type::Struct(sid))) => *sid,
        other => panic!("`{name}` is not a struct global: {other:?}"),
    }
}

const HOLDER: &str = "template <typename T, int N> struct Holder\n\
                      {\n\
                          T item;\n\
                          int size() { return N; }\n\
                      };\n\
                      struct Payload { int x = 0; };";

#[test]
fn identical_arguments_reuse_the_cached_instance() {
    let s = resolve(&format!(
        "{HOLDER}\nHolder<Payload, 3> a;\nHolder<Payload, 3> b;\nHolder<Payload, 4> c;"
    ))
    .unwrap();
    let a = global_struct(&s, "a");
    let b = global_struct(&s, "b");
    let c = global_struct(&s, "c");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(s.types.struct_type(a).name, "Holder<Payload, 3>");
}

#[test]
fn parameter_kind_mismatch_is_rejected() {
    let err = resolve(&format!("{HOLDER}\nHolder<3, Payload> g;")).unwrap_err();
    assert_eq!(err.code, Some(codes::E0303));
}

#[test]
fn self_referencing_template_errors_instead_of_hanging() {
    let src = "struct S { int x = 0; };\n\
               template <typename T> struct A { A<T> inner; };\n\
               A<S> a;";
    let err = resolve(src).unwrap_err();
    assert_eq!(err.code, Some(codes::E0301));
    assert!(err.message.contains("circular template instantiation"));
    assert!(err.hint.is_some());
}

#[test]
fn template_member_function_instances_are_shared() {
    let src = "struct Holder\n\
               {\n\
                   int dummy = 0;\n\
                   template <int P> int pick() { return P + dummy; }\n\
               };\n\
               Holder h;\n\
               int first(){ return h.pick<2>(); }\n\
               int second(){ return h.pick<2>() + h.pick<5>(); }";
    let s = resolve(src).unwrap();
    let twos: Vec<_> = s
        .funcs
        .ids()
        .filter(|&f| s.funcs.get(f).qualified == "Holder::pick<2>")
        .collect();
    let fives: Vec<_> = s
        .funcs
        .ids()
        .filter(|&f| s.funcs.get(f).qualified == "Holder::pick<5>")
        .collect();
    // three call sites, two distinct instances
    assert_eq!(twos.len(), 1);
    assert_eq!(fives.len(), 1);
}

#[test]
fn template_member_function_executes_with_substituted_constant() {
    let src = "struct Holder\n\
               {\n\
                   int dummy = 0;\n\
                   template <int P> int pick() { return P + dummy; }\n\
               };\n\
               Holder h;\n\
               int pickTwo(){ return h.pick<2>(); }";
    let obj = compile(src).unwrap();
    let f = obj.entry("pickTwo").unwrap();
    let mut inst = obj.new_instance();
    assert_eq!(f.call(&mut inst, &mut []).as_i64(), 2);
}

#[test]
fn span_length_must_be_a_compile_time_constant() {
    let src = "int len = 4;\nstruct S { span<float, len> d = { 0.0f }; };";
    let err = resolve(src).unwrap_err();
    assert_eq!(err.code, Some(codes::E0402));
    assert!(err.message.contains("not a compile-time constant"));
}

#[test]
fn wrapper_target_without_node_marker_fails_naming_the_property() {
    let err = compile("struct Plain { int x = 0; };\nwrap::fix<2, Plain> g;").unwrap_err();
    assert_eq!(err.failing_pass, PassId::Resolve);
    let d = &err.diagnostics[0];
    assert_eq!(d.code, Some(codes::E0500));
    assert!(d.message.contains("Plain::IsNode not defined"));
}

#[test]
fn template_instantiation_reaches_execution() {
    let src = "template <typename T, int N> struct Repeat\n\
               {\n\
                   T item;\n\
                   int count() { return N; }\n\
               };\n\
               struct Payload { int x = 0; };\n\
               Repeat<Payload, 6> r;\n\
               int count(){ return r.count(); }";
    let obj = compile(src).unwrap();
    let f = obj.entry("count").unwrap();
    let mut inst = obj.new_instance();
    assert_eq!(f.call(&mut inst, &mut []).as_i64(), 6);
}
