use std::fs;
use std::time::Instant;

use camino::Utf8PathBuf;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use super::{AssetPipeline, expand, relative_to};
use crate::config::{AssetPaths, Config};
use crate::core::Environment;
use crate::error::PipelineError;
use crate::output::{Output, save_outputs};
use crate::utils::as_overhead;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticKind {
    Images,
    Fonts,
}

impl StaticKind {
    fn paths(self, config: &Config) -> &AssetPaths {
        match self {
            StaticKind::Images => &config.images,
            StaticKind::Fonts => &config.fonts,
        }
    }
}

/// Files copied verbatim, keeping their relative layout.
#[derive(Debug, Clone, Copy)]
pub struct Statics {
    pub kind: StaticKind,
}

impl AssetPipeline for Statics {
    fn name(&self) -> &'static str {
        match self.kind {
            StaticKind::Images => "images",
            StaticKind::Fonts => "fonts",
        }
    }

    fn run(&self, env: &Environment) -> Result<Vec<Utf8PathBuf>, PipelineError> {
        let s = Instant::now();
        let config = &env.config;
        let paths = self.kind.paths(config);
        let src_dir = config.path(&paths.src_dir);

        let outputs = expand(&config.patterns(paths))?
            .into_par_iter()
            .map(|path| {
                let data = fs::read(&path).map_err(PipelineError::io(&path))?;
                Ok(Output::binary(relative_to(&path, &src_dir), data))
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        let written = save_outputs(&config.path(&paths.dest_dir), &outputs)?;
        tracing::info!("copied {} {} {}", written.len(), self.name(), as_overhead(s));

        Ok(written)
    }
}
