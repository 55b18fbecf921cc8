use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

// Benchmark scenarios covering the main compile shapes: scalar code,
// struct member dispatch and wrapper-template composition.

const SCALAR: &str = r#"
int main(int input)
{
    int acc = 0;
    int i = 0;
    while (i < input) { acc = acc + i * 3 - 1; i = i + 1; }
    return acc + 7;
}
"#;

const NODE: &str = r#"
struct Gain
{
    DECLARE_NODE(Gain);
    float value = 0.5f;
    void reset() { value = 0.5f; }
    void processFrame(block data) { data[0] = data[0] * value; }
    void process(block data)
    {
        int i = 0;
        while (i < data.size()) { data[i] = data[i] * value; i = i + 1; }
    }
    void setParameter(int index, double v) { value = (float)v; }
};
Gain node;
void process(block data){ node.process(data); }
void reset(){ node.reset(); }
"#;

const WRAPPED: &str = r#"
struct Para
{
    double depth = 0.5;
    double call(double v) { return v * depth; }
};
struct Osc
{
    DECLARE_NODE(Osc);
    float value = 0.25f;
    double getModValue() { return 0.8; }
    void reset() { value = 0.25f; }
    void processFrame(block data) { data[0] = data[0] * value; }
    void process(block data)
    {
        int i = 0;
        while (i < data.size()) { data[i] = data[i] * value; i = i + 1; }
    }
};
wrap::fix<2, wrap::mod<Para, Osc>> node;
void process(block data){ node.process(data); }
"#;

fn scenarios() -> [(&'static str, &'static str); 3] {
    [("scalar", SCALAR), ("node", NODE), ("wrapped", WRAPPED)]
}

/// Compile-scaling generator: n independent free functions.
fn generate_scaling_unit(n_funcs: usize) -> String {
    let mut src = String::new();
    for i in 0..n_funcs {
        src.push_str(&format!(
            "int f{i}(int x)\n{{\n    return x * {} + {i};\n}}\n\n",
            i + 1
        ));
    }
    src
}

fn bench_parse_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_latency");
    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| {
                let unit = snexc::parser::parse_unit(black_box(source));
                black_box(&unit).as_ref().expect("scenario must parse");
            });
        });
    }
    group.finish();
}

fn bench_full_compile_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_compile_latency");
    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| {
                let obj = snexc::compile(black_box(source)).expect("scenario must compile");
                black_box(obj);
            });
        });
    }
    group.finish();
}

fn bench_compile_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_scaling");
    for n in [8usize, 32, 128] {
        let source = generate_scaling_unit(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &source, |b, source| {
            b.iter(|| {
                let obj = snexc::compile(black_box(source)).expect("generated unit must compile");
                black_box(obj);
            });
        });
    }
    group.finish();
}

fn bench_callback_dispatch(c: &mut Criterion) {
    let obj = snexc::compile(NODE).expect("scenario must compile");
    let process = obj
        .collection
        .best(snexc::object::ProcessType::BlockProcessing)
        .expect("node scenario defines process");
    let mut inst = obj.new_instance();
    let mut samples = vec![0.25f32; 512];

    c.bench_function("process_512_samples", |b| {
        b.iter(|| {
            process.call(
                &mut inst,
                &mut [snexc::backend::ExtArg::Block(black_box(&mut samples))],
            );
        });
    });
}

criterion_group!(
    benches,
    bench_parse_latency,
    bench_full_compile_latency,
    bench_compile_scaling,
    bench_callback_dispatch
);
criterion_main!(benches);
