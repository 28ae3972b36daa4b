use std::fs;

use lanegen::{ErrorKind, GenConfig, Generator, NoopTracer, RecordingTracer, TraceEvent};

const ADD_SLICES: &str = "package simd\n\nfunc BaseAddSlices[T Lanes](result []T, input []T, other []T) {\n\tn := len(input)\n\tfor i := 0; i < n; i += NumLanes() {\n\t\ta := Load(input[i:])\n\t\tb := Load(other[i:])\n\t\tStore(result[i:], Add(a, b))\n\t}\n}\n";

fn workspace(source: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    fs::write(dir.path().join("go.mod"), "module example.com/hwy\n").expect("write go.mod");
    let src = dir.path().join("ops_base.go");
    fs::write(&src, source).expect("write source");
    (dir, src)
}

fn config(src: std::path::PathBuf, targets: &[&str]) -> GenConfig {
    GenConfig {
        source: src,
        targets: targets.iter().map(|s| (*s).to_owned()).collect(),
        ..GenConfig::default()
    }
}

#[test]
fn a_run_produces_target_units_and_dispatchers() {
    let (_dir, src) = workspace(ADD_SLICES);
    let generator = Generator::new(config(src, &["avx2", "fallback"])).expect("valid config");
    let out = generator.run(&mut NoopTracer).expect("runs");
    assert!(out.failures.is_empty(), "failures: {:?}", out.failures);

    let names: Vec<&str> = out.units.names().collect();
    assert!(names.contains(&"ops_avx2.gen"), "got: {names:?}");
    assert!(names.contains(&"ops_fallback.gen"), "got: {names:?}");
    assert!(names.contains(&"dispatch_amd64.gen"), "got: {names:?}");
    assert!(names.contains(&"dispatch_fallback.gen"), "got: {names:?}");

    let avx2 = out.units.get("ops_avx2.gen").expect("unit");
    assert!(avx2.contains("//go:build amd64 && !purego"), "got:\n{avx2}");
    assert!(avx2.contains("BaseAddSlices_f32_avx2"), "got:\n{avx2}");
    let dispatch = out.units.get("dispatch_amd64.gen").expect("unit");
    assert!(dispatch.contains("addSlicesFloat32 = BaseAddSlices_f32_avx2"), "got:\n{dispatch}");
    assert!(dispatch.contains("func AddSlices[T Lanes]"), "got:\n{dispatch}");
}

#[test]
fn selector_order_is_preserved_in_the_output_set() {
    let (_dir, src) = workspace(ADD_SLICES);
    let generator = Generator::new(config(src, &["neon", "avx2", "fallback"])).expect("valid config");
    let out = generator.run(&mut NoopTracer).expect("runs");
    let names: Vec<&str> = out.units.names().collect();
    let neon_at = names.iter().position(|n| *n == "ops_neon.gen").expect("neon unit");
    let avx2_at = names.iter().position(|n| *n == "ops_avx2.gen").expect("avx2 unit");
    assert!(neon_at < avx2_at, "configured order wins: {names:?}");
}

#[test]
fn invalid_configurations_are_rejected() {
    let (_dir, src) = workspace(ADD_SLICES);
    let err = Generator::new(config(src.clone(), &[])).expect_err("no targets");
    assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    let err = Generator::new(config(src.clone(), &["mmx"])).expect_err("unknown target");
    assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    let mut cfg = config(src, &["fallback"]);
    cfg.c_lowering = true;
    let err = Generator::new(cfg).expect_err("no C-capable target selected");
    assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
}

#[test]
fn failed_triples_are_recorded_and_do_not_block_others() {
    let src_text = "package simd\n\nfunc BaseExp2[T Lanes](v hwy.Vec[T]) hwy.Vec[T] {\n\treturn GetExponent(v)\n}\n";
    let (_dir, src) = workspace(src_text);
    let generator = Generator::new(config(src, &["avx2"])).expect("valid config");
    let out = generator.run(&mut NoopTracer).expect("runs");
    assert!(!out.failures.is_empty(), "integer instantiations cannot take exponents");
    let unit = out.units.get("ops_avx2.gen").expect("unit still emitted");
    assert!(unit.contains("BaseExp2_f32_avx2"), "float triples proceed:\n{unit}");
    assert!(!unit.contains("BaseExp2_i32_avx2"), "failed triple writes nothing:\n{unit}");
}

#[test]
fn the_tracer_sees_every_stage() {
    let (_dir, src) = workspace(ADD_SLICES);
    let generator = Generator::new(config(src, &["avx2", "fallback"])).expect("valid config");
    let mut tracer = RecordingTracer::new();
    let out = generator.run(&mut tracer).expect("runs");
    assert!(out.failures.is_empty());
    assert_eq!(tracer.count("admit"), 1);
    assert!(tracer.count("pass") > 0, "pass events recorded");
    assert!(tracer.count("emit") >= 4, "unit events recorded");
    assert!(tracer.events().iter().any(|e| matches!(
        e,
        TraceEvent::FunctionAdmitted { name } if name == "BaseAddSlices"
    )));
}

#[test]
fn write_to_dir_materializes_the_file_set() {
    let (dir, src) = workspace(ADD_SLICES);
    let out_dir = dir.path().join("out");
    let mut cfg = config(src, &["avx2", "fallback"]);
    cfg.out_dir = out_dir.clone();
    let generator = Generator::new(cfg).expect("valid config");
    generator.run_to_dir(&mut NoopTracer).expect("runs and writes");
    assert!(out_dir.join("ops_avx2.gen").is_file());
    assert!(out_dir.join("dispatch_amd64.gen").is_file());
}

#[test]
fn fusion_mode_reports_statistics() {
    let softmax = "package simd\n\nfunc BaseSoftmax[T Floats](out []T, in []T) {\n\tn := len(in)\n\tmaxv := in[0]\n\tfor i := 0; i < n; i++ {\n\t\tmaxv = max(maxv, in[i])\n\t}\n\tshifted := make([]T, n)\n\tfor i := 0; i < n; i++ {\n\t\tshifted[i] = in[i] - maxv\n\t}\n\tfor i := 0; i < n; i++ {\n\t\tout[i] = Exp(shifted[i])\n\t}\n\tsum := 0.0\n\tfor i := 0; i < n; i++ {\n\t\tsum += out[i]\n\t}\n\tfor i := 0; i < n; i++ {\n\t\tout[i] = out[i] / sum\n\t}\n}\n";
    let (_dir, src) = workspace(softmax);
    let mut cfg = config(src, &["avx2", "fallback"]);
    cfg.fusion = true;
    let generator = Generator::new(cfg).expect("valid config");
    let out = generator.run(&mut NoopTracer).expect("runs");
    assert_eq!(out.stats.len(), 1);
    let stats = &out.stats[0];
    assert_eq!(stats.function, "BaseSoftmax");
    assert_eq!(stats.original_passes, 6);
    assert_eq!(stats.fused_passes, 3);
    assert_eq!(stats.eliminated_allocs, 1);
    let json = out.stats_json();
    assert!(json.contains("\"original_passes\": 6"), "got: {json}");
}

#[test]
fn c_lowering_emits_c_source_and_wrappers() {
    let (_dir, src) = workspace(ADD_SLICES);
    let mut cfg = config(src, &["avx2", "fallback"]);
    cfg.c_lowering = true;
    let generator = Generator::new(cfg).expect("valid config");
    let out = generator.run(&mut NoopTracer).expect("runs");
    let c = out.units.get("ops_avx2_amd64.c").expect("C unit");
    assert!(c.contains("#include <immintrin.h>"), "got:\n{c}");
    assert!(c.contains("void BaseAddSlices_f32_avx2_c("), "got:\n{c}");
    assert!(c.contains("_mm256_add_ps"), "got:\n{c}");
    assert!(c.contains("_mm256_storeu_ps(result + i"), "got:\n{c}");
    assert!(c.contains("result[i] = a + b;"), "scalar remainder loop:\n{c}");
    let wrappers = out.units.get("c_wrappers_avx2_amd64.gen").expect("wrapper unit");
    assert!(wrappers.contains("//go:noescape"), "got:\n{wrappers}");
    assert!(wrappers.contains("func BaseAddSlices_f32_avx2_c("), "got:\n{wrappers}");
}

#[test]
fn package_override_replaces_the_source_package() {
    let (_dir, src) = workspace(ADD_SLICES);
    let mut cfg = config(src, &["fallback"]);
    cfg.package = Some("lanes".to_owned());
    let generator = Generator::new(cfg).expect("valid config");
    let out = generator.run(&mut NoopTracer).expect("runs");
    let unit = out.units.get("ops_fallback.gen").expect("unit");
    assert!(unit.contains("package lanes"), "got:\n{unit}");
}
