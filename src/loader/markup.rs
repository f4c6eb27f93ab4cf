use std::fs;
use std::sync::LazyLock;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use super::{AssetPipeline, expand, relative_to};
use crate::config::Config;
use crate::core::{Environment, Profile};
use crate::error::PipelineError;
use crate::output::{Output, save_outputs};
use crate::utils::as_overhead;

static BUILD_JS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--\s*build:js\s*-->.*?<!--\s*endbuild\s*-->").unwrap());
static ROOT_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\b(href|src)="/([^/"])"#).unwrap());

/// HTML entry files with the script placeholder pointed at the profile's
/// bundle.
///
/// The placeholder is the block between `<!-- build:js -->` and
/// `<!-- endbuild -->`.
#[derive(Debug, Clone, Copy)]
pub struct Markup {
    pub profile: Profile,
}

/// Site-absolute URL of the script bundle for `profile`.
pub fn bundle_href(config: &Config, profile: Profile) -> String {
    let dir = relative_to(&config.scripts.dest_dir, &config.dist);
    if dir.as_str().is_empty() {
        format!("/{}", profile.bundle_name())
    } else {
        format!("/{}/{}", dir, profile.bundle_name())
    }
}

impl Markup {
    fn rewrite(&self, env: &Environment, path: &Utf8Path, html: &str) -> String {
        let config = &env.config;
        let tag = format!(
            r#"<script src="{}"></script>"#,
            bundle_href(config, self.profile)
        );

        let mut html = if BUILD_JS.is_match(html) {
            BUILD_JS.replace_all(html, regex::NoExpand(&tag)).into_owned()
        } else {
            tracing::warn!("{path}: no <!-- build:js --> block, bundle reference left as is");
            html.to_string()
        };

        match self.profile {
            Profile::Development => {
                if let Some(script) = env.get_refresh_script() {
                    html = inject_before_body_end(&html, &script);
                }
            }
            Profile::Production => {
                if let Some(base) = &config.html.base_path {
                    html = rebase(&html, base);
                }
            }
        }

        html
    }
}

fn inject_before_body_end(html: &str, snippet: &str) -> String {
    match html.rfind("</body>") {
        Some(i) => format!("{}{}\n{}", &html[..i], snippet, &html[i..]),
        None => format!("{html}\n{snippet}\n"),
    }
}

/// Prefixes root-absolute `href` and `src` references with `base`.
fn rebase(html: &str, base: &str) -> String {
    let base = base.trim_matches('/');
    if base.is_empty() {
        return html.to_string();
    }

    let replacement = format!("$1=\"/{base}/$2");
    ROOT_REF.replace_all(html, replacement.as_str()).into_owned()
}

impl AssetPipeline for Markup {
    fn name(&self) -> &'static str {
        "markup"
    }

    fn run(&self, env: &Environment) -> Result<Vec<Utf8PathBuf>, PipelineError> {
        let s = Instant::now();
        let config = &env.config;
        let src_dir = config.path(&config.markup.src_dir);

        let outputs = expand(&config.patterns(&config.markup))?
            .into_iter()
            .map(|path| {
                let html = fs::read_to_string(&path).map_err(PipelineError::io(&path))?;
                let html = self.rewrite(env, &path, &html);
                Ok(Output::text(relative_to(&path, &src_dir), html))
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        let written = save_outputs(&config.path(&config.markup.dest_dir), &outputs)?;
        tracing::info!("rewrote {} markup file(s) {}", written.len(), as_overhead(s));

        Ok(written)
    }
}
