//! External script transforms: syntax downleveling and minification.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use camino::Utf8Path;

use crate::config::{ScriptOptions, Transformer};

pub trait Transform: Send + Sync {
    /// Lowers the syntax of one module to the configured target.
    fn downlevel(&self, path: &Utf8Path, source: &str) -> anyhow::Result<String>;

    /// Minifies a complete script. Must be deterministic.
    fn minify(&self, code: &str) -> anyhow::Result<String>;
}

pub fn from_options(options: &ScriptOptions) -> Arc<dyn Transform> {
    match options.transformer {
        Transformer::Esbuild => Arc::new(Esbuild {
            target: options.target.clone(),
        }),
        Transformer::None => Arc::new(Passthrough),
    }
}

/// Leaves code untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Transform for Passthrough {
    fn downlevel(&self, _: &Utf8Path, source: &str) -> anyhow::Result<String> {
        Ok(source.to_string())
    }

    fn minify(&self, code: &str) -> anyhow::Result<String> {
        Ok(code.to_string())
    }
}

/// Calls the `esbuild` binary, which must be available in `PATH`.
#[derive(Debug, Clone)]
pub struct Esbuild {
    pub target: String,
}

impl Esbuild {
    fn call(&self, args: &[String], input: &str) -> anyhow::Result<String> {
        let mut child = Command::new("esbuild")
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("couldn't start esbuild")?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("esbuild stdin unavailable"))?;
        let input = input.to_string();
        let writer = std::thread::spawn(move || stdin.write_all(input.as_bytes()));

        let output = child.wait_with_output()?;
        writer
            .join()
            .map_err(|_| anyhow!("esbuild stdin writer panicked"))??;

        if !output.status.success() {
            return Err(anyhow!(
                "esbuild failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

impl Transform for Esbuild {
    fn downlevel(&self, path: &Utf8Path, source: &str) -> anyhow::Result<String> {
        self.call(
            &[
                "--loader=js".to_string(),
                "--format=cjs".to_string(),
                format!("--target={}", self.target),
                format!("--sourcefile={path}"),
                "--log-level=error".to_string(),
            ],
            source,
        )
    }

    fn minify(&self, code: &str) -> anyhow::Result<String> {
        self.call(
            &[
                "--loader=js".to_string(),
                "--minify".to_string(),
                format!("--target={}", self.target),
                "--log-level=error".to_string(),
            ],
            code,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_is_identity() {
        let code = "const a = () => 1;\n";
        assert_eq!(Passthrough.downlevel(Utf8Path::new("a.js"), code).unwrap(), code);
        assert_eq!(Passthrough.minify(code).unwrap(), code);
    }
}
