use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::HsaError;

/// Output directory for per-cluster artifacts, keyed by the derived
/// target name.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: Utf8PathBuf,
}

impl Workspace {
    pub fn new() -> Result<Self, HsaError> {
        let cwd = std::env::current_dir().map_err(|err| HsaError::Filesystem(err.to_string()))?;
        let root = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|_| HsaError::Filesystem("invalid working directory path".to_string()))?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), HsaError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| HsaError::Filesystem(err.to_string()))
    }

    pub fn info_path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(format!("{name}_info.dat"))
    }

    pub fn plot_path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(format!("{name}_footprint.png"))
    }

    pub fn table_path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(format!("{name}_footprint.csv"))
    }

    pub fn script_path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(format!("{name}.sh"))
    }

    pub fn bundle_path(&self, filename: &str) -> Utf8PathBuf {
        self.root.join(format!("{filename}.tar.gz"))
    }

    /// Resume check: a cluster counts as processed once its plot exists.
    /// Trades staleness for idempotence across restarted batch runs.
    pub fn is_processed(&self, name: &str) -> bool {
        self.plot_path(name).as_std_path().exists()
    }

    pub fn write_text_atomic(path: &Utf8Path, content: &str) -> Result<(), HsaError> {
        Self::write_bytes_atomic(path, content.as_bytes())
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HsaError> {
        let parent = path
            .parent()
            .ok_or_else(|| HsaError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HsaError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("hsa-fp")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| HsaError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| HsaError::Filesystem(err.to_string()))?;
        if path.as_std_path().exists() {
            fs::remove_file(path.as_std_path())
                .map_err(|err| HsaError::Filesystem(err.to_string()))?;
        }
        temp.persist(path.as_std_path())
            .map_err(|err| HsaError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
