//! Joins a module graph into one script and a line-level source map.

use std::collections::BTreeMap;

use oxc_sourcemap::{SourceMap, SourceMapBuilder};

use super::graph::ModuleGraph;

const PRELUDE: &str = r#"(function (modules, entry, global) {
  var cache = {};
  function load(id) {
    if (cache[id]) return cache[id].exports;
    var record = modules[id];
    var module = cache[id] = { exports: {} };
    function require(name) {
      var target = record[1][name];
      if (target === undefined) throw new Error("Cannot find module '" + name + "' from '" + id + "'");
      return load(target);
    }
    record[0].call(module.exports, require, module, module.exports, global);
    return module.exports;
  }
  return load(entry);
})({"#;

/// Generated text plus, for every generated line, the source index and line
/// it came from.
#[derive(Default)]
struct Writer {
    code: String,
    lines: Vec<Option<(usize, usize)>>,
}

impl Writer {
    fn plain(&mut self, text: &str) {
        for line in text.lines() {
            self.code.push_str(line);
            self.code.push('\n');
            self.lines.push(None);
        }
    }

    fn mapped(&mut self, source: usize, code: &str, source_lines: usize) {
        let last = source_lines.saturating_sub(1);
        for (i, line) in code.lines().enumerate() {
            self.code.push_str(line);
            self.code.push('\n');
            self.lines.push(Some((source, i.min(last))));
        }
    }

    /// Line-level source map: each mapped line points at column 0 of its
    /// source line. `sources` are `(name, content)` in index order.
    fn source_map(&self, file: &str, sources: &[(&str, &str)]) -> SourceMap {
        let mut builder = SourceMapBuilder::default();
        builder.set_file(file);

        for (name, content) in sources {
            builder.add_source_and_content(name, content);
        }

        for (line, origin) in self.lines.iter().enumerate() {
            if let Some((source, source_line)) = *origin {
                builder.add_token(line as u32, 0, source_line as u32, 0, Some(source as u32), None);
            }
        }

        builder.into_sourcemap()
    }
}

fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_default()
}

/// Links every module of `graph` in id order, starting execution at
/// `entry`. The output only depends on the graph's contents.
pub(crate) fn link(graph: &ModuleGraph, entry: &str, file: &str) -> (String, SourceMap) {
    let modules = graph.ordered();
    let mut writer = Writer::default();
    writer.plain(PRELUDE);

    for (index, module) in modules.iter().enumerate() {
        let deps: BTreeMap<&str, &str> = module
            .deps
            .iter()
            .filter_map(|(specifier, path)| Some((specifier.as_str(), graph.id_of(path)?)))
            .collect();
        let deps = serde_json::to_string(&deps).unwrap_or_default();
        let separator = if index + 1 < modules.len() { "," } else { "" };

        writer.plain(&format!(
            "{}: [function (require, module, exports, global) {{",
            quote(&module.id)
        ));
        writer.mapped(index, &module.code, module.source.lines().count());
        writer.plain(&format!("}}, {deps}]{separator}"));
    }

    writer.plain(&format!(
        r#"}}, {}, typeof window !== "undefined" ? window : this);"#,
        quote(entry)
    ));

    let sources: Vec<_> = modules
        .iter()
        .map(|m| (m.id.as_str(), m.source.as_str()))
        .collect();
    let map = writer.source_map(file, &sources);

    (writer.code, map)
}
