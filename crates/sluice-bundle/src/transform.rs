//! Source transforms applied to each module before dependency discovery.

use std::collections::BTreeMap;
use std::path::Path;

use oxc::allocator::Allocator;
use oxc::ast::ast::{Expression, StaticMemberExpression};
use oxc::ast_visit::{walk, Visit};
use oxc::parser::Parser;
use oxc::span::SourceType;

use crate::session::BuildMode;

/// Errors that can occur during transformation.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Transform error: {0}")]
    TransformError(String),
}

/// A source-to-source transform in the bundling chain.
pub trait Transform: Send + Sync {
    /// Transform identifier used in logs.
    fn name(&self) -> &'static str;

    /// Transform one module's source.
    ///
    /// # Arguments
    /// * `path` - The module file, for diagnostics
    /// * `source` - The module source after earlier transforms ran
    fn transform(&self, path: &Path, source: &str) -> Result<String, TransformError>;
}

/// Inlines `process.env.NAME` references as string literals.
///
/// Only names present in the variable table are replaced; anything else is
/// left untouched so it fails loudly in the browser instead of silently
/// becoming `undefined`.
#[derive(Debug, Clone, Default)]
pub struct EnvTransform {
    vars: BTreeMap<String, String>,
}

impl EnvTransform {
    /// Create a transform with an empty variable table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The chain entry every bundle gets: `NODE_ENV` bound to the build mode.
    pub fn for_mode(mode: BuildMode) -> Self {
        Self::new().with_var("NODE_ENV", mode.as_str())
    }

    /// Copy the named variables from the process environment.
    ///
    /// Unset names are skipped. `NODE_ENV` is never taken from the
    /// environment; the build mode owns it.
    pub fn with_process_env<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        for name in names {
            let name = name.as_ref();
            if name == "NODE_ENV" {
                continue;
            }
            if let Ok(value) = std::env::var(name) {
                self.vars.insert(name.to_string(), value);
            }
        }
        self
    }

    /// Define a variable.
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Look up a defined variable.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

impl Transform for EnvTransform {
    fn name(&self) -> &'static str {
        "env"
    }

    fn transform(&self, path: &Path, source: &str) -> Result<String, TransformError> {
        if self.vars.is_empty() || !source.contains("process") {
            return Ok(source.to_string());
        }

        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, source, SourceType::cjs()).parse();
        if !ret.errors.is_empty() {
            let messages: Vec<String> = ret.errors.iter().map(|e| e.to_string()).collect();
            return Err(TransformError::ParseError(format!(
                "{}: {}",
                path.display(),
                messages.join("; ")
            )));
        }

        let mut finder = EnvReferences {
            vars: &self.vars,
            found: Vec::new(),
        };
        finder.visit_program(&ret.program);

        if finder.found.is_empty() {
            return Ok(source.to_string());
        }

        finder.found.sort_by_key(|(start, _, _)| *start);

        let mut output = String::with_capacity(source.len());
        let mut cursor = 0;
        for (start, end, value) in finder.found {
            if start < cursor {
                continue;
            }
            output.push_str(&source[cursor..start]);
            output.push_str(&value);
            cursor = end;
        }
        output.push_str(&source[cursor..]);

        tracing::debug!("{} transform rewrote {}", self.name(), path.display());
        Ok(output)
    }
}

/// Collects spans of `process.env.NAME` expressions with a known NAME.
struct EnvReferences<'v> {
    vars: &'v BTreeMap<String, String>,
    found: Vec<(usize, usize, String)>,
}

impl<'a> Visit<'a> for EnvReferences<'_> {
    fn visit_static_member_expression(&mut self, it: &StaticMemberExpression<'a>) {
        if let Expression::StaticMemberExpression(inner) = &it.object {
            if inner.object.is_specific_id("process") && inner.property.name.as_str() == "env" {
                if let Some(value) = self.vars.get(it.property.name.as_str()) {
                    let literal = serde_json::Value::String(value.clone()).to_string();
                    self.found
                        .push((it.span.start as usize, it.span.end as usize, literal));
                    return;
                }
            }
        }
        walk::walk_static_member_expression(self, it);
    }
}
