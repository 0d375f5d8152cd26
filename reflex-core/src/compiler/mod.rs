//! Template compiler.
//!
//! Source text goes through five passes:
//!
//! 1. `parser`: markup to an arena AST, reporting recoverable diagnostics
//! 2. `transform`: `v-if` chains, `v-for` loops, compound text, `v-once`
//! 3. `detect`: expression validation (warnings only)
//! 4. `optimizer`: static roots and children normalization levels
//! 5. `codegen`: the render IR interpreted by `render::interpreter`
//!
//! [`compile`] runs them once. [`Compiler`] adds a concurrent cache keyed
//! by template text and an options fingerprint.

pub mod ast;
pub mod codegen;
pub mod detect;
pub mod errors;
pub mod events;
pub mod expr;
pub mod filter;
pub mod ir;
pub mod optimizer;
pub mod options;
pub mod parser;
pub mod transform;

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

pub use codegen::{generate, CodegenResult};
pub use errors::{CompileError, DiagnosticSink, ErrorCode, Severity};
pub use ir::RenderNode;
pub use options::{CompilerOptions, CompilerOverrides, ParserOptions, Whitespace};
pub use parser::parse;

/// A render tree plus the static subtrees it references by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledTemplate {
    pub render: RenderNode,
    pub static_renders: Vec<RenderNode>,
    /// Everything reported while compiling, in order.
    pub diagnostics: Vec<CompileError>,
}

impl CompiledTemplate {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    /// Compact MessagePack encoding for on-disk caches.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for CompiledTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "with(this){{return {}}}", self.render)?;
        for (i, node) in self.static_renders.iter().enumerate() {
            write!(f, "\nstatic[{i}]: with(this){{return {node}}}")?;
        }
        Ok(())
    }
}

/// Compile `source` with `options`.
///
/// Diagnostics are collected into the result and also forwarded to
/// `options.parser.on_error` when one is installed; otherwise they are
/// logged.
pub fn compile(source: &str, options: &CompilerOptions) -> CompiledTemplate {
    tracing::debug!(len = source.len(), "compiling template");

    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink: DiagnosticSink = {
        let collected = collected.clone();
        let forward = options.parser.on_error.clone();
        Arc::new(move |err: &CompileError| {
            collected.lock().push(err.clone());
            errors::report(forward.as_ref(), err.clone());
        })
    };

    let mut parser_options = options.parser.clone();
    parser_options.on_error = Some(sink.clone());
    let mut ast = parse(source, &parser_options);
    transform::transform(&mut ast, Some(&sink));
    detect::detect_errors(&ast, Some(&sink));
    optimizer::optimize(&mut ast, &options.parser);
    let CodegenResult { render, static_renders } = generate(&ast, options, Some(&sink));

    let diagnostics = std::mem::take(&mut *collected.lock());
    tracing::debug!(
        statics = static_renders.len(),
        diagnostics = diagnostics.len(),
        "compiled template"
    );
    CompiledTemplate {
        render,
        static_renders,
        diagnostics,
    }
}

/// A compiler with fixed options and a shared result cache.
///
/// Option predicates are not part of the fingerprint; compilers built with
/// different predicates should not share a cache.
pub struct Compiler {
    options: CompilerOptions,
    fingerprint: u64,
    cache: DashMap<(u64, String), Arc<CompiledTemplate>>,
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> Self {
        let mut hasher = DefaultHasher::new();
        options.fingerprint(&mut hasher);
        Self {
            options,
            fingerprint: hasher.finish(),
            cache: DashMap::new(),
        }
    }

    /// A compiler whose options are `base` merged with `overrides`.
    pub fn with_overrides(base: &CompilerOptions, overrides: CompilerOverrides) -> Self {
        Self::new(CompilerOptions::merge(base, overrides))
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Compile `source`, reusing a cached result when the same template was
    /// compiled before.
    pub fn compile(&self, source: &str) -> Arc<CompiledTemplate> {
        let key = (self.fingerprint, source.to_string());
        if let Some(hit) = self.cache.get(&key) {
            tracing::trace!(len = source.len(), "compile cache hit");
            return hit.clone();
        }
        let compiled = Arc::new(compile(source, &self.options));
        self.cache.entry(key).or_insert(compiled).clone()
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompilerOptions::default())
    }
}

impl fmt::Debug for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compiler")
            .field("fingerprint", &self.fingerprint)
            .field("cached", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn compile_collects_diagnostics() {
        let compiled = compile("<div>{{ a + }}<p v-else>x</p></div>", &CompilerOptions::default());
        let codes: Vec<_> = compiled.diagnostics.iter().map(|d| d.code).collect();
        assert!(codes.contains(&ErrorCode::ElseWithoutIf));
        assert!(codes.contains(&ErrorCode::InvalidExpression));
    }

    #[test]
    fn diagnostics_reach_the_configured_sink() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let mut options = CompilerOptions::default();
        options.parser.on_error = Some(Arc::new(move |_: &CompileError| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let compiled = compile("<p>a</p><p>b</p>", &options);
        assert_eq!(compiled.diagnostics.len(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cache_reuses_results() {
        let compiler = Compiler::default();
        let first = compiler.compile("<div>{{ msg }}</div>");
        let second = compiler.compile("<div>{{ msg }}</div>");
        assert!(Arc::ptr_eq(&first, &second));
        compiler.compile("<span></span>");
        assert_eq!(compiler.cached(), 2);
        compiler.clear_cache();
        assert_eq!(compiler.cached(), 0);
    }

    #[test]
    fn overrides_change_the_fingerprint() {
        let base = CompilerOptions::default();
        let plain = Compiler::new(base.clone());
        let custom = Compiler::with_overrides(
            &base,
            CompilerOverrides {
                delimiters: Some(("${".into(), "}".into())),
                ..CompilerOverrides::default()
            },
        );
        assert_ne!(plain.fingerprint(), custom.fingerprint());
        let compiled = custom.compile("<p>${ n }</p>");
        assert_eq!(compiled.render.to_string(), "_c(\"p\",[_v(_s(n))])");
    }

    #[test]
    fn artifacts_survive_messagepack() {
        let compiled = compile(
            "<ul><li v-for=\"x in xs\" :key=\"x.id\" @click.stop=\"pick(x)\">{{ x.name | upper }}</li></ul>",
            &CompilerOptions::default(),
        );
        let bytes = compiled.to_bytes().unwrap();
        let decoded = CompiledTemplate::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, compiled);
        assert!(compiled.to_json().unwrap().contains("\"List\""));
    }

    #[test]
    fn display_prints_helper_notation() {
        let compiled = compile("<div><p><b>x</b></p></div>", &CompilerOptions::default());
        assert_eq!(
            compiled.to_string(),
            "with(this){return _m(0)}\nstatic[0]: with(this){return _c(\"div\",[_c(\"p\",[_c(\"b\",[_v(\"x\")])])])}"
        );
    }
}
