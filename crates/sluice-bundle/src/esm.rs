//! ES module to CommonJS lowering.
//!
//! The bundler only follows `require()`, so `import`/`export` statements are
//! rewritten into `require` calls and `exports` assignments before
//! dependency discovery. Sources without module syntax pass through
//! unchanged.

use std::path::Path;

use oxc::allocator::Allocator;
use oxc::ast::ast::{
    Declaration, ExportAllDeclaration, ExportDefaultDeclaration, ExportDefaultDeclarationKind,
    ExportNamedDeclaration, ImportDeclaration, ImportDeclarationSpecifier, Program, Statement,
};
use oxc::parser::Parser;
use oxc::span::{GetSpan, SourceType};

use crate::transform::{Transform, TransformError};

const ES_MODULE_FLAG: &str = "Object.defineProperty(exports, \"__esModule\", { value: true });\n";

/// Rewrites `import` and `export` declarations to CommonJS.
///
/// Imported bindings are copied once when the importing module runs, so a
/// later reassignment of an exported `let` is not observed by importers.
/// Default imports of plain CommonJS modules receive `module.exports`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EsModuleTransform;

impl EsModuleTransform {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for EsModuleTransform {
    fn name(&self) -> &'static str {
        "esmodule"
    }

    fn transform(&self, path: &Path, source: &str) -> Result<String, TransformError> {
        if !source.contains("import") && !source.contains("export") {
            return Ok(source.to_string());
        }

        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, source, SourceType::unambiguous()).parse();
        if !ret.errors.is_empty() {
            // Sloppy-mode scripts can fail the module grammar.
            let script = Parser::new(&allocator, source, SourceType::cjs()).parse();
            if script.errors.is_empty() && !script.module_record.has_module_syntax {
                return Ok(source.to_string());
            }

            let messages: Vec<String> = ret.errors.iter().map(|e| e.to_string()).collect();
            return Err(TransformError::ParseError(format!(
                "{}: {}",
                path.display(),
                messages.join("; ")
            )));
        }

        if !ret.module_record.has_module_syntax {
            return Ok(source.to_string());
        }

        let mut lowering = Lowering::new(source);
        lowering.program(&ret.program).map_err(|message| {
            TransformError::TransformError(format!("{}: {}", path.display(), message))
        })?;

        tracing::debug!("{} transform rewrote {}", self.name(), path.display());
        Ok(lowering.finish(&ret.program))
    }
}

/// Span edits collected from one module's top-level statements.
struct Lowering<'s> {
    source: &'s str,
    edits: Vec<(usize, usize, String)>,
    /// Emitted before the first statement: hoisted imports and function exports.
    header: String,
    /// Emitted after the last statement: `export { .. }` lists.
    footer: String,
    temps: usize,
}

impl<'s> Lowering<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            edits: Vec::new(),
            header: String::from(ES_MODULE_FLAG),
            footer: String::new(),
            temps: 0,
        }
    }

    fn temp(&mut self) -> String {
        let name = format!("__import{}", self.temps);
        self.temps += 1;
        name
    }

    fn program(&mut self, program: &Program<'_>) -> Result<(), String> {
        for stmt in &program.body {
            match stmt {
                Statement::ImportDeclaration(decl) => self.import(decl),
                Statement::ExportNamedDeclaration(decl) => self.export_named(decl)?,
                Statement::ExportDefaultDeclaration(decl) => self.export_default(decl)?,
                Statement::ExportAllDeclaration(decl) => self.export_all(decl),
                Statement::TSExportAssignment(_) | Statement::TSNamespaceExportDeclaration(_) => {
                    return Err("TypeScript export forms are not supported".to_string());
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn remove(&mut self, start: u32, end: u32) {
        self.edits.push((start as usize, end as usize, String::new()));
    }

    fn replace(&mut self, start: u32, end: u32, text: String) {
        self.edits.push((start as usize, end as usize, text));
    }

    /// `import ... from 'm'` becomes a hoisted `require`.
    fn import(&mut self, decl: &ImportDeclaration<'_>) {
        self.remove(decl.span.start, decl.span.end);
        if decl.import_kind.is_type() {
            return;
        }

        let request = require_call(decl.source.value.as_str());
        let Some(specifiers) = &decl.specifiers else {
            self.header.push_str(&format!("{request};\n"));
            return;
        };
        if specifiers.is_empty() {
            self.header.push_str(&format!("{request};\n"));
            return;
        }

        let module = self.temp();
        self.header.push_str(&format!("var {module} = {request};\n"));

        for specifier in specifiers {
            let line = match specifier {
                ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                    format!("var {} = {};\n", s.local.name.as_str(), default_of(&module))
                }
                ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                    format!("var {} = {module};\n", s.local.name.as_str())
                }
                ImportDeclarationSpecifier::ImportSpecifier(s) => {
                    if s.import_kind.is_type() {
                        continue;
                    }
                    let imported = s.imported.name();
                    let value = if imported.as_str() == "default" {
                        default_of(&module)
                    } else {
                        member(&module, imported.as_str())
                    };
                    format!("var {} = {value};\n", s.local.name.as_str())
                }
            };
            self.header.push_str(&line);
        }
    }

    fn export_named(&mut self, decl: &ExportNamedDeclaration<'_>) -> Result<(), String> {
        if decl.export_kind.is_type() {
            self.remove(decl.span.start, decl.span.end);
            return Ok(());
        }

        if let Some(declaration) = &decl.declaration {
            // Drop the `export ` keyword and keep the declaration in place.
            self.remove(decl.span.start, declaration.span().start);
            return self.export_declaration(declaration, decl.span.end);
        }

        let mut lines = String::new();
        let module = match &decl.source {
            Some(source) => {
                let module = self.temp();
                lines.push_str(&format!(
                    "var {module} = {};\n",
                    require_call(source.value.as_str())
                ));
                Some(module)
            }
            None => None,
        };

        for specifier in &decl.specifiers {
            if specifier.export_kind.is_type() {
                continue;
            }
            let exported = specifier.exported.name();
            let local = specifier.local.name();
            let value = match &module {
                Some(module) if local.as_str() == "default" => default_of(module),
                Some(module) => member(module, local.as_str()),
                None => local.as_str().to_string(),
            };
            lines.push_str(&format!("{} = {value};\n", member("exports", exported.as_str())));
        }

        // Re-exports run where they stand; local lists run once every
        // binding in the module is initialized.
        if module.is_some() {
            self.replace(decl.span.start, decl.span.end, lines);
        } else {
            self.remove(decl.span.start, decl.span.end);
            self.footer.push_str(&lines);
        }
        Ok(())
    }

    /// Bindings of `declaration` are assigned to `exports` after `end`, the
    /// end of the whole export statement.
    fn export_declaration(&mut self, declaration: &Declaration<'_>, end: u32) -> Result<(), String> {
        match declaration {
            Declaration::VariableDeclaration(var) => {
                let mut lines = String::new();
                for declarator in &var.declarations {
                    for ident in declarator.id.get_binding_identifiers() {
                        let name = ident.name.as_str();
                        lines.push_str(&format!("\n{} = {name};", member("exports", name)));
                    }
                }
                self.replace(end, end, lines);
            }
            Declaration::FunctionDeclaration(func) => {
                let name = func.name().ok_or("exported function has no name")?;
                self.header.push_str(&format!(
                    "{} = {};\n",
                    member("exports", name.as_str()),
                    name.as_str()
                ));
            }
            Declaration::ClassDeclaration(class) => {
                let name = class.name().ok_or("exported class has no name")?;
                self.replace(
                    end,
                    end,
                    format!("\n{} = {};", member("exports", name.as_str()), name.as_str()),
                );
            }
            _ => {
                if !declaration.is_typescript_syntax() {
                    return Err("unsupported export declaration".to_string());
                }
            }
        }
        Ok(())
    }

    fn export_default(&mut self, decl: &ExportDefaultDeclaration<'_>) -> Result<(), String> {
        let inner = decl.declaration.span();
        let target = member("exports", "default");

        match &decl.declaration {
            ExportDefaultDeclarationKind::FunctionDeclaration(func) => match func.name() {
                Some(name) => {
                    self.remove(decl.span.start, inner.start);
                    self.header.push_str(&format!("{target} = {};\n", name.as_str()));
                }
                None => {
                    self.replace(decl.span.start, inner.start, format!("{target} = "));
                    self.replace(inner.end, inner.end, ";".to_string());
                }
            },
            ExportDefaultDeclarationKind::ClassDeclaration(class) => match class.name() {
                Some(name) => {
                    self.remove(decl.span.start, inner.start);
                    self.replace(
                        inner.end,
                        inner.end,
                        format!("\n{target} = {};", name.as_str()),
                    );
                }
                None => {
                    self.replace(decl.span.start, inner.start, format!("{target} = "));
                    self.replace(inner.end, inner.end, ";".to_string());
                }
            },
            ExportDefaultDeclarationKind::TSInterfaceDeclaration(_) => {
                self.remove(decl.span.start, decl.span.end);
            }
            _ => {
                // Expression: the statement's own `;` (if any) is kept.
                self.replace(decl.span.start, inner.start, format!("{target} = "));
            }
        }
        Ok(())
    }

    fn export_all(&mut self, decl: &ExportAllDeclaration<'_>) {
        if decl.export_kind.is_type() {
            self.remove(decl.span.start, decl.span.end);
            return;
        }

        let request = require_call(decl.source.value.as_str());
        let text = match &decl.exported {
            Some(name) => format!("{} = {request};", member("exports", name.name().as_str())),
            None => {
                let module = self.temp();
                format!(
                    concat!(
                        "var {m} = {r};\n",
                        "Object.keys({m}).forEach(function (key) {{\n",
                        "  if (key === \"default\" || key === \"__esModule\" || ",
                        "Object.prototype.hasOwnProperty.call(exports, key)) return;\n",
                        "  exports[key] = {m}[key];\n",
                        "}});"
                    ),
                    m = module,
                    r = request
                )
            }
        };
        self.replace(decl.span.start, decl.span.end, text);
    }

    /// Apply the edits. The header goes before the first statement so
    /// directives such as `"use strict"` stay in front.
    fn finish(mut self, program: &Program<'_>) -> String {
        let anchor = program
            .body
            .first()
            .map(|stmt| stmt.span().start as usize)
            .unwrap_or(self.source.len());
        let header = std::mem::take(&mut self.header);
        self.edits.push((anchor, anchor, header));

        // Stable sort: an insertion at a statement's start precedes the
        // removal of that statement.
        self.edits
            .sort_by_key(|(start, end, _)| (*start, *end != *start));

        let mut output = String::with_capacity(self.source.len() + 256);
        let mut cursor = 0;
        for (start, end, text) in self.edits {
            if start < cursor {
                continue;
            }
            output.push_str(&self.source[cursor..start]);
            output.push_str(&text);
            cursor = end;
        }
        output.push_str(&self.source[cursor..]);

        if !self.footer.is_empty() {
            if !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&self.footer);
        }
        output
    }
}

fn require_call(specifier: &str) -> String {
    format!(
        "require({})",
        serde_json::Value::String(specifier.to_string())
    )
}

/// `module.default` for transpiled modules, the whole export object otherwise.
fn default_of(module: &str) -> String {
    format!("({module} && {module}.__esModule ? {module}.default : {module})")
}

fn member(object: &str, name: &str) -> String {
    if is_identifier(name) {
        format!("{object}.{name}")
    } else {
        format!("{object}[{}]", serde_json::Value::String(name.to_string()))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
