//! Bundle output generation.

use std::collections::BTreeMap;

/// A module ready to be packed into a bundle.
#[derive(Debug, Clone)]
pub struct PackedModule {
    /// Numeric module id
    pub id: usize,

    /// Human-readable label, emitted as a comment
    pub label: String,

    /// Transformed module source
    pub source: String,

    /// Specifier -> module id
    pub deps: BTreeMap<String, usize>,
}

/// Runtime that executes the module table.
///
/// Each factory receives a `require` bound to its own specifier map, so two
/// modules can use the same specifier for different files.
const PRELUDE: &str = r#"(function (modules, entry) {
  'use strict';
  var cache = {};

  function load(id) {
    if (cache[id]) {
      return cache[id].exports;
    }
    var def = modules[id];
    if (!def) {
      throw new Error('Cannot find module #' + id);
    }
    var module = cache[id] = { exports: {} };
    def[0].call(module.exports, function (name) {
      var dep = def[1][name];
      if (dep === undefined) {
        var err = new Error("Cannot find module '" + name + "'");
        err.code = 'MODULE_NOT_FOUND';
        throw err;
      }
      return load(dep);
    }, module, module.exports);
    return module.exports;
  }

  load(entry);
})"#;

/// Pack modules into a single browser script that runs `entry` on load.
pub fn pack(modules: &[PackedModule], entry: usize) -> String {
    let body_len: usize = modules.iter().map(|m| m.source.len() + 64).sum();
    let mut out = String::with_capacity(PRELUDE.len() + body_len);

    out.push_str(PRELUDE);
    out.push_str("({\n");

    for module in modules {
        let deps = serde_json::to_string(&module.deps).unwrap_or_else(|_| "{}".to_string());
        out.push_str(&format!(
            "{}: [function (require, module, exports) {{\n// {}\n{}\n}}, {}],\n",
            module.id, module.label, module.source, deps
        ));
    }

    out.push_str(&format!("}}, {});\n", entry));
    out
}

/// Wrap a JSON document as a CommonJS module.
pub fn json_module(source: &str) -> String {
    format!("module.exports = {};", source.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_modules_with_dependency_maps() {
        let mut deps = BTreeMap::new();
        deps.insert("./util".to_string(), 1);

        let modules = vec![
            PackedModule {
                id: 0,
                label: "main.js".to_string(),
                source: "require('./util')();".to_string(),
                deps,
            },
            PackedModule {
                id: 1,
                label: "util.js".to_string(),
                source: "module.exports = function () {};".to_string(),
                deps: BTreeMap::new(),
            },
        ];

        let js = pack(&modules, 0);

        assert!(js.starts_with("(function (modules, entry)"));
        assert!(js.contains("0: [function (require, module, exports) {\n// main.js"));
        assert!(js.contains(r#"{"./util":1}"#));
        assert!(js.trim_end().ends_with("}, 0);"));
    }

    #[test]
    fn wraps_json() {
        assert_eq!(json_module("{\"a\": 1}\n"), "module.exports = {\"a\": 1};");
    }
}
