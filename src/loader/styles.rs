use std::time::Instant;

use camino::Utf8PathBuf;
use grass::{Options, OutputStyle};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use super::{AssetPipeline, expand, relative_to};
use crate::core::{Environment, Profile};
use crate::error::PipelineError;
use crate::lint::{StyleLint, lint_files};
use crate::output::{Output, save_outputs};
use crate::utils::as_overhead;

/// SCSS sources compiled to CSS.
///
/// Development emits expanded CSS, production compressed. Partials
/// (`_name.scss`) are only reachable through `@use`/`@import`. Linting is
/// the separate [`lint`] step the style tasks depend on.
#[derive(Debug, Clone, Copy)]
pub struct Styles {
    pub profile: Profile,
}

/// Runs the style linter over every style source. Any error fails the run.
pub fn lint(env: &Environment) -> Result<(), PipelineError> {
    let config = &env.config;
    let files = expand(&config.patterns(&config.styles))?;
    lint_files(&StyleLint, &files)
}

impl AssetPipeline for Styles {
    fn name(&self) -> &'static str {
        "styles"
    }

    fn run(&self, env: &Environment) -> Result<Vec<Utf8PathBuf>, PipelineError> {
        let s = Instant::now();
        let config = &env.config;
        let src_dir = config.path(&config.styles.src_dir);

        let files = expand(&config.patterns(&config.styles))?;

        let style = match self.profile {
            Profile::Development => OutputStyle::Expanded,
            Profile::Production => OutputStyle::Compressed,
        };

        let outputs = files
            .into_iter()
            .filter(|path| !path.file_name().is_some_and(|name| name.starts_with('_')))
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|path| {
                let options = Options::default().style(style).load_path(&src_dir);
                let css = grass::from_path(&path, &options).map_err(|err| {
                    PipelineError::Transform {
                        path: path.clone(),
                        message: err.to_string(),
                    }
                })?;

                let rel = relative_to(&path, &src_dir).with_extension("css");
                Ok(Output::text(rel, css))
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        let written = save_outputs(&config.path(&config.styles.dest_dir), &outputs)?;
        tracing::info!("compiled {} stylesheet(s) {}", written.len(), as_overhead(s));

        Ok(written)
    }
}
