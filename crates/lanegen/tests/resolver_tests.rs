use std::fs;

use lanegen::{ErrorKind, dataflow::NodeKind, resolve::Resolver, types::ElemType};

/// Lays out a minimal module tree:
///
/// ```text
/// <root>/go.mod
/// <root>/hwy/ops_base.go
/// <root>/contrib/vec/sum_base.go
/// <root>/contrib/algo/map_base.go
/// ```
fn module_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("temp dir");
    let root = dir.path();
    fs::write(root.join("go.mod"), "module example.com/hwy\n\ngo 1.24\n").expect("write go.mod");

    fs::create_dir_all(root.join("hwy")).expect("mkdir hwy");
    fs::write(
        root.join("hwy/ops_base.go"),
        "package hwy\n\nfunc BaseNoop[T Lanes](v hwy.Vec[T]) hwy.Vec[T] {\n\treturn Add(v, v)\n}\n",
    )
    .expect("write hwy");

    fs::create_dir_all(root.join("contrib/vec")).expect("mkdir vec");
    fs::write(
        root.join("contrib/vec/sum_base.go"),
        "package vec\n\nfunc BaseSum[T Lanes](xs []T) T {\n\tn := len(xs)\n\ts := xs[0]\n\tfor i := 0; i < n; i += NumLanes() {\n\t\ts = s + xs[i]\n\t}\n\treturn s\n}\n\nfunc BaseDouble[T Lanes](v hwy.Vec[T]) hwy.Vec[T] {\n\treturn Add(v, v)\n}\n",
    )
    .expect("write vec");

    fs::create_dir_all(root.join("contrib/algo")).expect("mkdir algo");
    fs::write(
        root.join("contrib/algo/map_base.go"),
        "package algo\n\nfunc BaseMap[T Lanes](out []T, in []T, f func(hwy.Vec[T]) hwy.Vec[T]) {\n\tn := len(in)\n\tfor i := 0; i < n; i += NumLanes() {\n\t\tv := f(Load(in[i:]))\n\t\tStore(out[i:], v)\n\t}\n}\n",
    )
    .expect("write algo");
    dir
}

#[test]
fn module_root_is_discovered_from_nested_directories() {
    let dir = module_tree();
    let nested = dir.path().join("contrib/vec");
    let resolver = Resolver::new(&nested).expect("discovers root upward");
    assert_eq!(resolver.module_name(), "example.com/hwy");
}

#[test]
fn missing_manifest_is_an_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = Resolver::new(dir.path()).expect_err("no manifest anywhere");
    assert_eq!(err.kind(), ErrorKind::UnknownImport);
}

#[test]
fn resolving_builds_and_caches_the_ir() {
    let dir = module_tree();
    let mut resolver = Resolver::new(dir.path()).expect("resolver");
    let resolved = resolver.resolve("vec", "BaseSum", ElemType::F32).expect("resolves");
    assert_eq!(resolved.func.name, "BaseSum");
    assert!(!resolved.ir.nodes.is_empty(), "the IR is built on first resolve");
    let first_nodes = resolved.ir.nodes.len();

    // Second resolve serves the cache.
    let again = resolver.resolve("vec", "BaseSum", ElemType::F32).expect("cached");
    assert_eq!(again.ir.nodes.len(), first_nodes);
}

#[test]
fn unknown_aliases_and_externals_are_rejected() {
    let dir = module_tree();
    let mut resolver = Resolver::new(dir.path()).expect("resolver");
    let err = resolver.resolve("numpy", "BaseFoo", ElemType::F32).expect_err("unknown alias");
    assert_eq!(err.kind(), ErrorKind::UnknownAlias);
    let err = resolver.resolve("math", "Sqrt", ElemType::F32).expect_err("external package");
    assert_eq!(err.kind(), ErrorKind::UnknownImport);
}

#[test]
fn missing_functions_report_the_qualified_name() {
    let dir = module_tree();
    let mut resolver = Resolver::new(dir.path()).expect("resolver");
    let err = resolver.resolve("vec", "BaseMissing", ElemType::F32).expect_err("not defined");
    assert!(err.to_string().contains("vec.BaseMissing"), "got: {err}");
}

#[test]
fn higher_order_resolution_clones_and_rewires() {
    let dir = module_tree();
    let mut resolver = Resolver::new(dir.path()).expect("resolver");
    let specialized = resolver
        .resolve_higher_order("algo", "BaseMap", "vec", "BaseDouble", ElemType::F32)
        .expect("resolves host and argument");
    assert_eq!(specialized.ir.name, "BaseMap_BaseDouble");
    let rewired = specialized
        .ir
        .nodes
        .iter()
        .find(|n| n.kind == NodeKind::Call && n.op.as_deref() == Some("BaseDouble"));
    assert!(rewired.is_some(), "the function-parameter call points at the argument");
    assert!(
        !specialized.ir.nodes.iter().any(|n| n.op.as_deref() == Some("f")),
        "no call to the bare parameter survives"
    );

    // The clone aliases nothing: mutating it leaves the cached host intact.
    let host = resolver.resolve("algo", "BaseMap", ElemType::F32).expect("host still cached");
    assert!(
        host.ir.nodes.iter().any(|n| n.op.as_deref() == Some("f")),
        "the original host still calls its parameter"
    );
}
