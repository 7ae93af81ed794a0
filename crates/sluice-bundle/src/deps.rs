//! `require()` discovery.

use oxc::allocator::Allocator;
use oxc::ast::ast::{Argument, CallExpression};
use oxc::ast_visit::{walk, Visit};
use oxc::parser::Parser;
use oxc::span::SourceType;

/// Extract the literal specifiers of every `require("...")` call, in source
/// order and without duplicates.
///
/// Calls with a non-literal argument are skipped; they cannot be resolved at
/// bundle time.
pub fn extract_requires(source: &str) -> Result<Vec<String>, String> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::cjs()).parse();

    if !ret.errors.is_empty() {
        let messages: Vec<String> = ret.errors.iter().map(|e| e.to_string()).collect();
        return Err(messages.join("; "));
    }

    let mut collector = RequireCollector::default();
    collector.visit_program(&ret.program);

    Ok(collector.specifiers)
}

#[derive(Default)]
struct RequireCollector {
    specifiers: Vec<String>,
}

impl<'a> Visit<'a> for RequireCollector {
    fn visit_call_expression(&mut self, it: &CallExpression<'a>) {
        if it.callee.is_specific_id("require") && it.arguments.len() == 1 {
            if let Argument::StringLiteral(lit) = &it.arguments[0] {
                let spec = lit.value.as_str().to_string();
                if !self.specifiers.contains(&spec) {
                    self.specifiers.push(spec);
                }
            }
        }
        walk::walk_call_expression(self, it);
    }
}
