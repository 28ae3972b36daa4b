//! Cross-package resolution: `alias.Name[T]` to a typed IR function.
//!
//! The resolver owns the process-wide caches for one run: parsed packages
//! keyed by import path and resolved functions keyed by
//! `"pkg.Name[elem]"`. It is an explicit context object threaded through
//! the pipeline, never a global, so the generator stays re-entrant.
//!
//! Module root discovery walks upward from the start directory until a
//! module manifest (`go.mod`) is found. Only the built-in in-repo aliases
//! resolve; fetching external packages is out of scope and errors.

use std::path::{Path, PathBuf};

use ahash::AHashMap;

use crate::{
    dataflow::{self, IRFunction, NodeKind},
    error::{GenError, GenResult},
    parse::{self, ParseResult, ParsedFunc},
    types::{ElemType, TypeExpr},
};

/// A resolved function: the parsed form plus its dataflow IR.
#[derive(Debug, Clone)]
pub struct ResolvedFunc {
    pub func: ParsedFunc,
    pub ir: IRFunction,
}

/// The resolver context with its two caches.
#[derive(Debug)]
pub struct Resolver {
    module_root: PathBuf,
    module_name: String,
    pkg_cache: AHashMap<String, ParseResult>,
    fn_cache: AHashMap<String, ResolvedFunc>,
}

impl Resolver {
    /// Discovers the module root upward from `start_dir` and reads the
    /// module name from the manifest's first `module` line.
    pub fn new(start_dir: &Path) -> GenResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let manifest = dir.join("go.mod");
            if manifest.is_file() {
                let text =
                    std::fs::read_to_string(&manifest).map_err(|e| GenError::io("reading module manifest", &e))?;
                let module_name = text
                    .lines()
                    .find_map(|l| l.trim().strip_prefix("module "))
                    .map(|m| m.trim().to_owned())
                    .ok_or_else(|| GenError::unknown_import("module manifest has no module line"))?;
                return Ok(Self {
                    module_root: dir,
                    module_name,
                    pkg_cache: AHashMap::new(),
                    fn_cache: AHashMap::new(),
                });
            }
            if !dir.pop() {
                return Err(GenError::unknown_import(&format!(
                    "no module manifest found above {}",
                    start_dir.display()
                )));
            }
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Built-in alias-to-path mapping for in-repo packages. External
    /// packages cannot be fetched.
    fn alias_path(&self, alias: &str) -> GenResult<String> {
        match alias {
            "hwy" => Ok(format!("{}/hwy", self.module_name)),
            "vec" | "matvec" | "matmul" | "algo" | "image" | "bitpack" | "sort" => {
                Ok(format!("{}/contrib/{alias}", self.module_name))
            }
            "math" => Err(GenError::unknown_import("math (standard library packages are not resolvable)")),
            other => Err(GenError::unknown_alias(other)),
        }
    }

    fn package_dir(&self, import_path: &str) -> GenResult<PathBuf> {
        let rel = import_path
            .strip_prefix(&self.module_name)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| GenError::unknown_import(import_path))?;
        Ok(self.module_root.join(rel))
    }

    /// Parses (and caches) every relevant file of a package: non-test files
    /// whose stem ends in `_base`, or all non-test files when none do.
    fn load_package(&mut self, import_path: &str) -> GenResult<&ParseResult> {
        if !self.pkg_cache.contains_key(import_path) {
            let dir = self.package_dir(import_path)?;
            let mut sources: Vec<PathBuf> = std::fs::read_dir(&dir)
                .map_err(|e| GenError::io(&format!("reading package dir {}", dir.display()), &e))?
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|p| {
                    p.extension().is_some_and(|ext| ext == "go")
                        && !p
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .is_some_and(|s| s.ends_with("_test"))
                })
                .collect();
            sources.sort();
            let base_only: Vec<PathBuf> = sources
                .iter()
                .filter(|p| {
                    p.file_stem()
                        .and_then(|s| s.to_str())
                        .is_some_and(|s| s.ends_with("_base"))
                })
                .cloned()
                .collect();
            let chosen = if base_only.is_empty() { sources } else { base_only };
            if chosen.is_empty() {
                return Err(GenError::unknown_import(&format!("{import_path} (no sources)")));
            }

            let mut merged: Option<ParseResult> = None;
            for path in chosen {
                let code = std::fs::read_to_string(&path)
                    .map_err(|e| GenError::io(&format!("reading {}", path.display()), &e))?;
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("source").to_owned();
                let result = parse::parse_unit(&code, &name)?;
                match &mut merged {
                    Some(acc) => parse::merge(acc, result),
                    None => merged = Some(result),
                }
            }
            let merged = merged.expect("at least one source parsed");
            self.pkg_cache.insert(import_path.to_owned(), merged);
        }
        Ok(self.pkg_cache.get(import_path).expect("inserted above"))
    }

    /// Resolves `alias.name` at `elem`, building (and caching) its IR.
    pub fn resolve(&mut self, alias: &str, name: &str, elem: ElemType) -> GenResult<&ResolvedFunc> {
        let key = format!("{alias}.{name}[{elem}]");
        if !self.fn_cache.contains_key(&key) {
            let import_path = self.alias_path(alias)?;
            let pkg = self.load_package(&import_path)?;
            let func = pkg
                .functions
                .iter()
                .find(|f| f.name == name)
                .cloned()
                .ok_or_else(|| GenError::unknown_import(&format!("{alias}.{name} not found in {import_path}")))?;
            let ir = dataflow::build::build(&func, elem);
            self.fn_cache.insert(key.clone(), ResolvedFunc { func, ir });
        }
        Ok(self.fn_cache.get(&key).expect("inserted above"))
    }

    /// Higher-order resolution: the host function takes a function argument;
    /// the result is a renumbered deep clone of the host whose call nodes to
    /// the parameter are rewired to the resolved argument. Cached under
    /// `host_arg`.
    pub fn resolve_higher_order(
        &mut self,
        host_alias: &str,
        host_name: &str,
        arg_alias: &str,
        arg_name: &str,
        elem: ElemType,
    ) -> GenResult<&ResolvedFunc> {
        let key = format!("{host_alias}.{host_name}_{arg_alias}.{arg_name}[{elem}]");
        if !self.fn_cache.contains_key(&key) {
            let host = self.resolve(host_alias, host_name, elem)?.clone();
            let param = host
                .func
                .params
                .iter()
                .find(|p| matches!(p.ty, TypeExpr::Func { .. }))
                .map(|p| p.name.clone())
                .ok_or_else(|| {
                    GenError::unsupported(format!("{host_name} takes no function parameter")).in_function(host_name)
                })?;
            let arg = self.resolve(arg_alias, arg_name, elem)?;
            let replacement = arg.func.name.clone();

            let mut ir = host.ir.clone_renumbered(0);
            ir.rewrite_param_calls(&param, &replacement, NodeKind::Call);
            ir.name = format!("{host_name}_{arg_name}");
            self.fn_cache.insert(
                key.clone(),
                ResolvedFunc {
                    func: host.func,
                    ir,
                },
            );
        }
        Ok(self.fn_cache.get(&key).expect("inserted above"))
    }
}
