use std::fs;
use std::time::Instant;

use camino::Utf8PathBuf;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use super::{AssetPipeline, expand, relative_to};
use crate::core::Environment;
use crate::error::PipelineError;
use crate::output::{Output, save_outputs};
use crate::transform;
use crate::utils::as_overhead;

/// Name of the single file all templates are collapsed into.
pub const TEMPLATES_FILE: &str = "templates.min.js";

/// HTML templates checked for syntax, then registered under their relative
/// path in one minified script (`window.templates["stats.html"]`).
#[derive(Debug, Default, Clone, Copy)]
pub struct Templates;

impl AssetPipeline for Templates {
    fn name(&self) -> &'static str {
        "templates"
    }

    fn run(&self, env: &Environment) -> Result<Vec<Utf8PathBuf>, PipelineError> {
        let s = Instant::now();
        let config = &env.config;
        let src_dir = config.path(&config.templates.src_dir);
        let files = expand(&config.patterns(&config.templates))?;

        let mut compiled = files
            .par_iter()
            .map(|path| {
                let source = fs::read_to_string(path).map_err(PipelineError::io(path))?;

                minijinja::Environment::new()
                    .template_from_str(&source)
                    .map_err(|err| PipelineError::Transform {
                        path: path.clone(),
                        message: err.to_string(),
                    })?;

                let name = relative_to(path, &src_dir).as_str().replace('\\', "/");
                Ok((name, source))
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;
        compiled.sort_by(|a, b| a.0.cmp(&b.0));

        let script = register_script(&compiled);
        let script = transform::from_options(&config.script)
            .minify(&script)
            .map_err(|err| PipelineError::Transform {
                path: TEMPLATES_FILE.into(),
                message: format!("{err:#}"),
            })?;

        let written = save_outputs(
            &config.path(&config.templates.dest_dir),
            &[Output::text(TEMPLATES_FILE, script)],
        )?;
        tracing::info!("packed {} template(s) {}", compiled.len(), as_overhead(s));

        Ok(written)
    }
}

fn register_script(templates: &[(String, String)]) -> String {
    let mut script =
        String::from("(function(){var t=window.templates=window.templates||{};\n");

    for (name, source) in templates {
        // serializing a str cannot fail
        let name = serde_json::to_string(name).unwrap_or_default();
        let source = serde_json::to_string(source).unwrap_or_default();
        script.push_str(&format!("t[{name}]={source};\n"));
    }

    script.push_str("})();\n");
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::testing::{Project, rel};

    #[test]
    fn test_templates_collapse_into_one_file() {
        let project = Project::new();
        project
            .write("templates/stats.html", "<span>{{ remaining }} left</span>\n")
            .write(
                "templates/items/todo.html",
                "{% if completed %}<s>{{ title }}</s>{% endif %}",
            );

        let written = Templates.run(&project.env()).unwrap();
        assert_eq!(rel(&project.root, &written), ["dist/templates/templates.min.js"]);

        let script = project.read("dist/templates/templates.min.js");
        assert!(script.contains(r#"t["items/todo.html"]="{% if completed %}"#));
        assert!(script.contains(r#"t["stats.html"]="<span>{{ remaining }} left</span>\n";"#));
    }

    #[test]
    fn test_template_syntax_error() {
        let project = Project::new();
        project.write("templates/bad.html", "{% if open %}never closed");

        let err = Templates.run(&project.env()).unwrap_err();
        assert!(matches!(err, PipelineError::Transform { .. }));
        assert!(!project.exists("dist/templates"));
    }
}
