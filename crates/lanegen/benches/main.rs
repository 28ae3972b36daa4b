use criterion::{Criterion, black_box, criterion_group, criterion_main};
use lanegen::{NoopTracer, parse::parse_unit, target, transform::transform, types::ElemType};

const SOFTMAX: &str = "package simd\n\nfunc BaseSoftmax[T Floats](out []T, in []T) {\n\tn := len(in)\n\tmaxv := in[0]\n\tfor i := 0; i < n; i++ {\n\t\tmaxv = max(maxv, in[i])\n\t}\n\tshifted := make([]T, n)\n\tfor i := 0; i < n; i++ {\n\t\tshifted[i] = in[i] - maxv\n\t}\n\tfor i := 0; i < n; i++ {\n\t\tout[i] = Exp(shifted[i])\n\t}\n\tsum := 0.0\n\tfor i := 0; i < n; i++ {\n\t\tsum += out[i]\n\t}\n\tfor i := 0; i < n; i++ {\n\t\tout[i] = out[i] / sum\n\t}\n}\n";

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse softmax", |b| {
        b.iter(|| parse_unit(black_box(SOFTMAX), "softmax_base.go").expect("parses"));
    });
}

fn bench_transform(c: &mut Criterion) {
    let unit = parse_unit(SOFTMAX, "softmax_base.go").expect("parses");
    let avx2 = target::get("avx2").expect("catalog");
    c.bench_function("transform softmax avx2/f32", |b| {
        b.iter(|| {
            transform(
                black_box(&unit.functions[0]),
                &unit,
                avx2,
                Some(ElemType::F32),
                &mut NoopTracer,
            )
            .expect("transforms")
        });
    });
}

fn bench_fuse(c: &mut Criterion) {
    let unit = parse_unit(SOFTMAX, "softmax_base.go").expect("parses");
    c.bench_function("fuse softmax", |b| {
        b.iter(|| {
            let mut ir = lanegen::dataflow::build::build(black_box(&unit.functions[0]), ElemType::F32);
            lanegen::dataflow::fuse::fuse(&mut ir);
            ir.stats()
        });
    });
}

criterion_group!(benches, bench_parse, bench_transform, bench_fuse);
criterion_main!(benches);
