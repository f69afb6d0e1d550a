use firmware::{FirmwareImage, LoadSource};
use serde::Serialize;
use storage::{classify_source, Classification, FileStore, StorageError, ENTRY_POINT};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;

/// One editing session: the firmware to build against and the filesystem
/// being assembled for it.
///
/// Overwrites are never confirmed here. Callers that want to ask first check
/// [`Session::exists`] (or classify the script) before calling a load method.
pub struct Session {
    config: Config,
    firmware: FirmwareImage,
    store: FileStore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PyLoad {
    ModuleAdded(String),
    ModuleReplaced(String),
    EntryScriptReplaced,
}

#[derive(Debug, Clone)]
pub struct HexLoad {
    /// Contents of the loaded `main.py`, empty if the image had none.
    pub script: String,
    pub files: Vec<String>,
    pub warnings: Vec<String>,
    pub source: LoadSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageUsage {
    pub total: usize,
    pub main: usize,
    pub modules: usize,
    pub other: usize,
    pub free: usize,
    pub almost_full: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileListing {
    pub name: String,
    pub extension: String,
    pub size: usize,
}

impl Session {
    pub fn new(config: Config, firmware_hex: &str) -> Result<Self> {
        config.validate()?;
        let firmware = FirmwareImage::new(firmware_hex, config.layout.clone())?;
        let mut store = firmware.new_store()?;
        if !config.initial_script.is_empty() {
            store.write(ENTRY_POINT, config.initial_script.as_bytes())?;
        }

        info!(
            "Session started with {} byte filesystem at {:#07x}",
            store.storage_total(),
            config.layout.fs_start
        );
        Ok(Self {
            config,
            firmware,
            store,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn firmware(&self) -> &FirmwareImage {
        &self.firmware
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub fn exists(&self, name: &str) -> bool {
        self.store.exists(name)
    }

    pub fn main_script(&self) -> Result<String> {
        let bytes = self.store.read(ENTRY_POINT)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Loads a Python file. Scripts marked as modules are stored under their
    /// own name, anything else replaces `main.py`.
    pub fn load_py(&mut self, filename: &str, code: &str) -> Result<PyLoad> {
        if code.is_empty() {
            return Err(StorageError::EmptyContent(filename.to_string()).into());
        }

        match classify_source(filename, code) {
            Classification::Module(name) => {
                let existed = self.store.exists(&name);
                self.store.write(&name, code.as_bytes())?;
                info!("Loaded module {}", name);
                Ok(if existed {
                    PyLoad::ModuleReplaced(name)
                } else {
                    PyLoad::ModuleAdded(name)
                })
            }
            Classification::EntryScript => {
                self.store.write(ENTRY_POINT, code.as_bytes())?;
                info!("Replaced {} with {}", ENTRY_POINT, filename);
                Ok(PyLoad::EntryScriptReplaced)
            }
        }
    }

    /// Replaces the whole filesystem with the contents of a hex image.
    pub fn load_hex(&mut self, hex: &str) -> Result<HexLoad> {
        let decoded = firmware::decode(hex, &self.config.layout)?;
        for warning in &decoded.warnings {
            warn!("{}", warning);
        }

        self.store = decoded.store;
        let script = if self.store.exists(ENTRY_POINT) {
            self.main_script()?
        } else {
            String::new()
        };

        Ok(HexLoad {
            script,
            files: self.store.list(),
            warnings: decoded.warnings,
            source: decoded.source,
        })
    }

    /// Adds an arbitrary file. Returns true if it replaced `main.py`.
    pub fn load_file(&mut self, name: &str, content: &[u8]) -> Result<bool> {
        self.store.write(name, content)?;
        Ok(name == ENTRY_POINT)
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.store.remove(name)?;
        Ok(())
    }

    /// Writes the editor contents as `main.py` and encodes the image. An empty
    /// editor drops `main.py` so the image carries only the other files.
    pub fn generate_hex(&mut self, editor_code: &str) -> Result<String> {
        if editor_code.is_empty() {
            if self.store.exists(ENTRY_POINT) {
                self.store.remove(ENTRY_POINT)?;
            }
        } else {
            self.store.write(ENTRY_POINT, editor_code.as_bytes())?;
        }

        Ok(self.firmware.encode(&self.store)?)
    }

    pub fn usage(&self) -> StorageUsage {
        let total = self.store.storage_total();
        let mut usage = StorageUsage {
            total,
            main: 0,
            modules: 0,
            other: 0,
            free: 0,
            almost_full: false,
        };

        for name in self.store.ls() {
            let size = self.store.storage_size(&name).unwrap_or(0);
            if name == ENTRY_POINT {
                usage.main += size;
            } else if extension(&name) == "py" {
                usage.modules += size;
            } else {
                usage.other += size;
            }
        }

        let used = usage.main + usage.modules + usage.other;
        usage.free = total.saturating_sub(used);
        usage.almost_full = used as f64 > total as f64 * self.config.almost_full_ratio;
        usage
    }

    /// User files for display, without `main.py`.
    pub fn listing(&self) -> Vec<FileListing> {
        self.store
            .list()
            .into_iter()
            .map(|name| FileListing {
                extension: extension(&name).to_string(),
                size: self.store.size(&name).unwrap_or(0),
                name,
            })
            .collect()
    }
}

fn extension(name: &str) -> &str {
    name.rsplit_once('.').map_or("", |(_, ext)| ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension() {
        assert_eq!(extension("a.py"), "py");
        assert_eq!(extension("archive.tar.gz"), "gz");
        assert_eq!(extension("README"), "");
    }
}
