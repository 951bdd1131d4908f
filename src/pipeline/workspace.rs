//! Per-submission scratch directory

use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SOURCE_FILE: &str = "source.asm";
const OBJECT_FILE: &str = "source.o";
const BINARY_FILE: &str = "source.run";

/// Temporary directory holding the source, object and binary of one
/// submission. The directory and its contents are removed when the value is
/// dropped, whichever way the pipeline ended.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    source: PathBuf,
    object: PathBuf,
    binary: PathBuf,
}

impl Workspace {
    /// Create a fresh workspace under `root`, or the system temp dir
    pub fn create(root: Option<&Path>) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("asm-kernel-");
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };

        let path = dir.path().to_path_buf();
        tracing::debug!("Created workspace {}", path.display());

        Ok(Self {
            source: path.join(SOURCE_FILE),
            object: path.join(OBJECT_FILE),
            binary: path.join(BINARY_FILE),
            dir,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn source_path(&self) -> &Path {
        &self.source
    }

    pub fn object_path(&self) -> &Path {
        &self.object
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary
    }

    /// Every path this workspace may create, directory last
    pub fn artifact_paths(&self) -> Vec<PathBuf> {
        vec![
            self.source.clone(),
            self.object.clone(),
            self.binary.clone(),
            self.path().to_path_buf(),
        ]
    }

    pub fn write_source(&self, code: &str) -> std::io::Result<()> {
        std::fs::write(&self.source, code)
    }

    /// Remove the workspace now, reporting failures instead of ignoring them
    pub fn close(self) -> std::io::Result<()> {
        let path = self.path().to_path_buf();
        self.dir.close()?;
        tracing::debug!("Removed workspace {}", path.display());
        Ok(())
    }
}
