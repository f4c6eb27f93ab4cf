//! Output files and how they are written.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::PipelineError;

/// The content of an [`Output`] file.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum OutputData {
    /// Text content (UTF-8).
    Utf8(String),
    /// Binary content (raw bytes).
    Binary(Vec<u8>),
}

impl AsRef<[u8]> for OutputData {
    fn as_ref(&self) -> &[u8] {
        match self {
            OutputData::Utf8(s) => s.as_bytes(),
            OutputData::Binary(b) => b.as_slice(),
        }
    }
}

/// A single file to be written under a destination directory.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Output {
    /// Path relative to the destination directory.
    pub path: Utf8PathBuf,
    pub data: OutputData,
}

impl Output {
    pub fn text(path: impl Into<Utf8PathBuf>, data: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            data: OutputData::Utf8(data.into()),
        }
    }

    pub fn binary(path: impl Into<Utf8PathBuf>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: OutputData::Binary(data.into()),
        }
    }
}

/// Writes every output under `dest`, creating directories on the way.
/// Returns the written paths in input order.
pub(crate) fn save_outputs(
    dest: &Utf8Path,
    outputs: &[Output],
) -> Result<Vec<Utf8PathBuf>, PipelineError> {
    fs::create_dir_all(dest).map_err(PipelineError::io(dest))?;

    let mut written = Vec::with_capacity(outputs.len());

    for output in outputs {
        let file_path = dest.join(&output.path);

        if let Some(parent_dir) = file_path.parent() {
            fs::create_dir_all(parent_dir).map_err(PipelineError::io(parent_dir))?;
        }

        fs::write(&file_path, &output.data).map_err(PipelineError::io(&file_path))?;
        written.push(file_path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_outputs_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let dest = Utf8PathBuf::try_from(dir.path().join("dist/css")).unwrap();

        let written = save_outputs(
            &dest,
            &[
                Output::text("app.css", "a{}"),
                Output::binary("nested/logo.bin", vec![0u8, 1, 2]),
            ],
        )
        .unwrap();

        assert_eq!(written, [dest.join("app.css"), dest.join("nested/logo.bin")]);
        assert_eq!(fs::read(dest.join("nested/logo.bin")).unwrap(), [0, 1, 2]);
    }
}
