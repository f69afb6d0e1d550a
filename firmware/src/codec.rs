use sha2::{Digest, Sha256};
use storage::{FileStore, ENTRY_POINT};

use crate::layout::FlashLayout;
use crate::legacy::read_appended;
use crate::memory::ParsedImage;
use crate::record::{data_records, Record};
use crate::{ImageError, Result};

/// Interpreter firmware plus the layout its filesystem is written with.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    prefix: Vec<String>,
    layout: FlashLayout,
}

impl FirmwareImage {
    /// Takes the firmware's Intel HEX text. Its records are kept verbatim, the
    /// end-of-file record is dropped so the filesystem can follow.
    pub fn new(template: &str, layout: FlashLayout) -> Result<Self> {
        layout.validate()?;
        let parsed = ParsedImage::parse(template)?;

        if let Some(address) = parsed.memory.first_overlap(layout.fs_start, layout.fs_size()) {
            return Err(ImageError::RegionOverlap { address });
        }
        if !parsed.trailing_text.is_empty() {
            tracing::warn!("Ignoring text after the end of the firmware template");
        }

        tracing::debug!("Loaded firmware template with {} records", parsed.lines.len());
        Ok(Self {
            prefix: parsed.lines,
            layout,
        })
    }

    pub fn layout(&self) -> &FlashLayout {
        &self.layout
    }

    pub fn prefix_lines(&self) -> &[String] {
        &self.prefix
    }

    /// An empty store sized for this firmware's filesystem region.
    pub fn new_store(&self) -> Result<FileStore> {
        Ok(FileStore::new(self.layout.chunk_count)?)
    }

    /// Firmware records, then every chunk of the region (free ones included),
    /// then the end-of-file record. Identical stores give identical output.
    pub fn encode(&self, store: &FileStore) -> Result<String> {
        if store.chunk_count() != self.layout.chunk_count {
            return Err(ImageError::InvalidLayout(format!(
                "store has {} chunks, layout expects {}",
                store.chunk_count(),
                self.layout.chunk_count
            )));
        }

        let mut lines = self.prefix.clone();
        lines.extend(
            data_records(self.layout.fs_start, store.region_bytes())
                .iter()
                .map(Record::to_line),
        );
        lines.push(Record::end_of_file().to_line());

        tracing::info!(
            "Generated image with {} files ({} of {} bytes used)",
            store.len(),
            store.storage_used(),
            store.storage_total()
        );
        Ok(lines.join("\n") + "\n")
    }
}

/// Where the entry-point script of a decoded image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// `main.py` was present in the filesystem.
    Filesystem,
    /// `main.py` was recovered from a legacy appended script or trailing text.
    AppendedScript,
    /// The filesystem held files but no script was found.
    FilesOnly,
}

#[derive(Debug, Clone)]
pub struct Decoded {
    pub store: FileStore,
    pub warnings: Vec<String>,
    pub source: LoadSource,
}

/// Rebuilds a file store from an image, falling back to an appended script
/// when the filesystem has no `main.py`.
pub fn decode(text: &str, layout: &FlashLayout) -> Result<Decoded> {
    layout.validate()?;
    let parsed = ParsedImage::parse(text)?;
    let mut warnings = Vec::new();

    let (region, covered) = parsed.memory.read(layout.fs_start, layout.fs_size());
    let mut store = if covered > 0 {
        match FileStore::from_region(region) {
            Ok((store, recovered)) => {
                warnings.extend(recovered);
                store
            }
            Err(e) => {
                tracing::warn!("Filesystem region could not be read: {}", e);
                warnings.push(format!("Filesystem region could not be read: {}", e));
                FileStore::new(layout.chunk_count)?
            }
        }
    } else {
        FileStore::new(layout.chunk_count)?
    };

    if store.exists(ENTRY_POINT) {
        return Ok(Decoded {
            store,
            warnings,
            source: LoadSource::Filesystem,
        });
    }
    if !store.is_empty() {
        warnings.push(format!("The filesystem does not contain a {} file", ENTRY_POINT));
    }

    match appended_script(&parsed, layout) {
        Some(script) => {
            tracing::warn!("Loading script from the legacy appended region");
            match store.write(ENTRY_POINT, &script) {
                Ok(()) => Ok(Decoded {
                    store,
                    warnings,
                    source: LoadSource::AppendedScript,
                }),
                Err(e) if store.is_empty() => Err(e.into()),
                Err(e) => {
                    tracing::warn!("Could not store the appended script: {}", e);
                    warnings.push(format!("Could not store the appended script: {}", e));
                    Ok(Decoded {
                        store,
                        warnings,
                        source: LoadSource::FilesOnly,
                    })
                }
            }
        }
        None if store.is_empty() => Err(ImageError::NoScriptFound),
        None => Ok(Decoded {
            store,
            warnings,
            source: LoadSource::FilesOnly,
        }),
    }
}

/// The script of a legacy image: the framed region at the appended script
/// address, or else any plain text after the end-of-file record.
pub fn scan_appended_script(text: &str, layout: &FlashLayout) -> Result<Vec<u8>> {
    let parsed = ParsedImage::parse(text)?;
    appended_script(&parsed, layout).ok_or(ImageError::NoScriptFound)
}

fn appended_script(parsed: &ParsedImage, layout: &FlashLayout) -> Option<Vec<u8>> {
    read_appended(&parsed.memory, layout)
        .or_else(|| parsed.trailing_script().map(|s| s.as_bytes().to_vec()))
}

/// SHA-256 of an encoded image, for logging and fixture comparison.
pub fn fingerprint(image: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image.as_bytes());
    format!("{:x}", hasher.finalize())
}
