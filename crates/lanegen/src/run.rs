//! Public interface for running a generation batch.
//!
//! [`Generator`] drives the whole pipeline for one invocation: parse the
//! source unit, transform every `(function, target, element)` triple, emit
//! per-target units, synthesize dispatchers, and optionally run the
//! dataflow-fusion and C-lowering side pipelines. A failed triple is
//! recorded and skipped; the remaining triples proceed independently.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;

use crate::{
    clower,
    dataflow::{FusionStats, build as ir_build, fuse},
    dispatch::{DispatchInput, emit_dispatch_units},
    emit,
    error::{GenError, GenResult},
    parse::{self, ParseResult},
    resolve::Resolver,
    target::{self, Target},
    tracer::GenTracer,
    transform::{self, TransformedFunc},
    types::ElemType,
};

/// Module path used in emitted imports when no module manifest is found
/// above the source unit.
const DEFAULT_MODULE: &str = "github.com/lanegen/hwy";

/// Configuration for one generation run.
#[derive(Debug, Clone)]
pub struct GenConfig {
    /// The source unit (a single file is the entry point).
    pub source: PathBuf,
    /// Ordered target selectors; order is preserved in the output set.
    pub targets: Vec<String>,
    /// Output directory for [`OutputSet::write_to_dir`].
    pub out_dir: PathBuf,
    /// Overrides the package name recovered from the source unit.
    pub package: Option<String>,
    /// File-name prefix for dispatcher units.
    pub dispatch_prefix: String,
    /// Enables the C lowering side pipeline.
    pub c_lowering: bool,
    /// Enables the dataflow-fusion pipeline and statistics.
    pub fusion: bool,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            targets: target::available().iter().map(|s| (*s).to_owned()).collect(),
            out_dir: PathBuf::from("."),
            package: None,
            dispatch_prefix: "dispatch".to_owned(),
            c_lowering: false,
            fusion: false,
        }
    }
}

/// The generated file set, in deterministic emission order.
#[derive(Debug, Clone, Default)]
pub struct OutputSet {
    units: IndexMap<String, String>,
}

impl OutputSet {
    pub fn insert(&mut self, name: impl Into<String>, contents: String) {
        self.units.insert(name.into(), contents);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.units.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.units.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Writes every unit into `dir`, creating it if needed.
    pub fn write_to_dir(&self, dir: &Path) -> GenResult<()> {
        std::fs::create_dir_all(dir).map_err(|e| GenError::io("creating output directory", &e))?;
        for (name, contents) in &self.units {
            std::fs::write(dir.join(name), contents)
                .map_err(|e| GenError::io(&format!("writing unit {name}"), &e))?;
        }
        Ok(())
    }
}

impl fmt::Display for OutputSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in self.units.keys() {
            writeln!(f, "{name}")?;
        }
        Ok(())
    }
}

/// Result of a generation run.
#[derive(Debug, Default)]
pub struct GenOutput {
    pub units: OutputSet,
    /// Per-function fusion summaries (fusion mode only).
    pub stats: Vec<FusionStats>,
    /// Triples that failed and were skipped; empty on a fully clean run.
    pub failures: Vec<GenError>,
}

impl GenOutput {
    /// Serializes the fusion statistics as JSON, for tooling.
    pub fn stats_json(&self) -> String {
        serde_json::to_string_pretty(&self.stats).unwrap_or_else(|_| "[]".to_owned())
    }
}

/// The batch generator: validated configuration plus resolved targets.
#[derive(Debug)]
pub struct Generator {
    config: GenConfig,
    targets: Vec<&'static Target>,
}

impl Generator {
    /// Validates the configuration and resolves target selectors.
    pub fn new(config: GenConfig) -> GenResult<Self> {
        if config.source.as_os_str().is_empty() {
            return Err(GenError::config("no source unit given"));
        }
        if config.targets.is_empty() {
            return Err(GenError::config("no targets selected"));
        }
        let mut targets = Vec::with_capacity(config.targets.len());
        for name in &config.targets {
            targets.push(target::get(name)?);
        }
        if config.c_lowering && !targets.iter().any(|t| clower::supports_target(t)) {
            return Err(GenError::config(
                "C lowering enabled but no selected target supports it",
            ));
        }
        Ok(Self { config, targets })
    }

    pub fn config(&self) -> &GenConfig {
        &self.config
    }

    /// Runs the full pipeline and returns the in-memory output set.
    pub fn run(&self, tracer: &mut dyn GenTracer) -> GenResult<GenOutput> {
        let code = std::fs::read_to_string(&self.config.source)
            .map_err(|e| GenError::io(&format!("reading {}", self.config.source.display()), &e))?;
        let file_name = self
            .config
            .source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("source");
        let unit = parse::parse_unit(&code, file_name)?;
        for func in &unit.functions {
            tracer.on_function_admitted(&func.name);
        }

        let start_dir = self.config.source.parent().unwrap_or_else(|| Path::new("."));
        let resolver = Resolver::new(start_dir).ok();
        let module = resolver
            .as_ref()
            .map(|r| r.module_name().to_owned())
            .unwrap_or_else(|| DEFAULT_MODULE.to_owned());

        let package = self
            .config
            .package
            .clone()
            .unwrap_or_else(|| unit.package_name.clone());
        let base_stem = self.base_stem();

        let mut out = GenOutput::default();
        let mut resolver = resolver;

        if self.config.fusion {
            self.run_fusion(&unit, resolver.as_mut(), &mut out, tracer);
        }

        let mut all_transformed: Vec<TransformedFunc> = Vec::new();
        for &tgt in &self.targets {
            let mut unit_funcs: Vec<TransformedFunc> = Vec::new();
            for func in &unit.functions {
                let expansion = func.expansion();
                let elems: Vec<Option<ElemType>> = if expansion.is_empty() {
                    vec![None]
                } else {
                    expansion.into_iter().map(Some).collect()
                };
                for elem in elems {
                    match transform::transform(func, &unit, tgt, elem, tracer) {
                        Ok(t) => unit_funcs.push(t),
                        Err(err) => {
                            let symbol = transform::symbol_name(&func.name, elem, tgt);
                            tracer.on_triple_failed(&symbol, tgt.name, &err.to_string());
                            out.failures.push(err.in_function(func.name.as_str()).for_target(tgt.name));
                        }
                    }
                }
            }
            let text = emit::emit_unit(tgt, &package, &module, &unit_funcs);
            let name = emit::unit_file_name(&base_stem, tgt);
            tracer.on_unit_emitted(&name, text.len());
            out.units.insert(name, text);
            all_transformed.extend(unit_funcs);
        }

        let input = DispatchInput {
            funcs: unit.functions.iter().collect(),
            transformed: &all_transformed,
        };
        for (name, text) in emit_dispatch_units(&package, &module, &self.config.dispatch_prefix, &self.targets, &input)
        {
            tracer.on_unit_emitted(&name, text.len());
            out.units.insert(name, text);
        }

        if self.config.c_lowering {
            self.run_c_lowering(&unit, &package, &base_stem, &mut out, tracer)?;
        }

        Ok(out)
    }

    /// Convenience: run and write the output set to the configured
    /// directory.
    pub fn run_to_dir(&self, tracer: &mut dyn GenTracer) -> GenResult<GenOutput> {
        let out = self.run(tracer)?;
        out.units.write_to_dir(&self.config.out_dir)?;
        Ok(out)
    }

    /// Source file stem with any `_base` suffix trimmed; the per-target
    /// unit names derive from it.
    fn base_stem(&self) -> String {
        let stem = self
            .config
            .source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unit");
        stem.strip_suffix("_base").unwrap_or(stem).to_owned()
    }

    fn run_fusion(
        &self,
        unit: &ParseResult,
        mut resolver: Option<&mut Resolver>,
        out: &mut GenOutput,
        tracer: &mut dyn GenTracer,
    ) {
        for func in &unit.functions {
            let elem = func.expansion().first().copied().unwrap_or(ElemType::F32);

            // Warm the resolver caches for cross-package calls; a missing
            // alias leaves an unresolved record but does not abort.
            if let Some(resolver) = resolver.as_deref_mut() {
                for call in &func.calls {
                    if let Some(pkg) = &call.pkg
                        && pkg != "hwy"
                        && pkg != "math"
                    {
                        let _ = resolver.resolve(pkg, &call.name, elem);
                    }
                }
            }

            let mut ir = ir_build::build(func, elem);
            fuse::fuse(&mut ir);
            for group in &ir.groups {
                tracer.on_fusion_group(&func.name, &group.pattern, group.members.len());
            }
            out.stats.push(ir.stats());
        }
    }

    fn run_c_lowering(
        &self,
        unit: &ParseResult,
        package: &str,
        base_stem: &str,
        out: &mut GenOutput,
        tracer: &mut dyn GenTracer,
    ) -> GenResult<()> {
        let funcs: Vec<&parse::ParsedFunc> = unit.functions.iter().collect();
        for &tgt in &self.targets {
            if !clower::supports_target(tgt) {
                continue;
            }
            let lowering = clower::lower_unit(&funcs, tgt, package)?;
            if lowering.symbols.is_empty() {
                continue;
            }
            let c_name = format!("{base_stem}_{}_{}.c", tgt.name, tgt.arch);
            let w_name = format!("c_wrappers_{}_{}.gen", tgt.name, tgt.arch);
            tracer.on_unit_emitted(&c_name, lowering.c_source.len());
            tracer.on_unit_emitted(&w_name, lowering.wrappers.len());
            out.units.insert(c_name, lowering.c_source);
            out.units.insert(w_name, lowering.wrappers);
        }
        Ok(())
    }
}
