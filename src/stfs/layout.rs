use std::fs;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, BE};
use tracing::{debug, info, warn};

use crate::io::{ascii_fixed, utf16_be_fixed};

use super::{Error, Package};

pub const CONTENT_HEADER_SIZE: usize = 0x14c;

/// Where an installed package lands under the emulator's content root.
pub struct ContentLayout {
    base_path: PathBuf,
    title_id: String,
    content_type: String,
    package_name: String,
}

impl ContentLayout {
    pub fn new(base_path: &Path, package: &Package) -> Self {
        Self {
            base_path: base_path.to_path_buf(),
            title_id: package.metadata.title_id_hex(),
            content_type: package.metadata.content_type_hex(),
            package_name: package.install_name().to_owned(),
        }
    }

    fn title_dir_path(&self) -> PathBuf {
        self.base_path.join(&self.title_id)
    }

    pub fn package_dir_path(&self) -> PathBuf {
        self.title_dir_path()
            .join(&self.content_type)
            .join(&self.package_name)
    }

    pub fn header_file_path(&self) -> PathBuf {
        self.title_dir_path()
            .join("Headers")
            .join(&self.content_type)
            .join(format!("{}.header", self.package_name))
    }

    /// Destination of a `/`-separated package path, `None` if a component would
    /// leave the package directory.
    pub fn file_path(&self, relative: &str) -> Option<PathBuf> {
        let mut path = self.package_dir_path();
        for component in relative.split('/').filter(|c| !c.is_empty()) {
            if matches!(component, "." | "..") || component.contains(['\\', '\0']) {
                return None;
            }
            path.push(component);
        }
        Some(path)
    }
}

impl Package {
    /// Folder name used when installing, the source file name or `unknown`.
    pub fn install_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unknown")
    }

    /// The fixed-size header file the emulator keeps next to installed content.
    pub fn content_header(&self) -> [u8; CONTENT_HEADER_SIZE] {
        let mut buf = [0u8; CONTENT_HEADER_SIZE];

        // device id, always the hard drive
        BE::write_u32(&mut buf[0x00..], 1);
        BE::write_u32(&mut buf[0x04..], self.metadata.content_type_raw);

        let display_name: &str = if self.metadata.display_name.is_empty() {
            self.install_name()
        } else {
            &self.metadata.display_name
        };
        buf[0x08..0x108].copy_from_slice(&utf16_be_fixed(display_name, 0x100));
        buf[0x108..0x132].copy_from_slice(&ascii_fixed(self.install_name(), 42));

        BE::write_u32(&mut buf[0x140..], self.metadata.title_id);
        // license mask stays zero

        buf
    }

    /// Installs every file under `out/<title id>/<content type>/<name>/` and writes
    /// the matching header file. Files that fail are logged and skipped.
    pub fn extract_all(&self, out: &Path) -> Result<usize, Error> {
        if self.entries.is_empty() {
            warn!("no files found in '{}'", self.install_name());
            return Ok(0);
        }

        let layout = ContentLayout::new(out, self);

        let package_dir = layout.package_dir_path();
        fs::create_dir_all(&package_dir)?;

        let header_path = layout.header_file_path();
        if let Some(parent) = header_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&header_path, self.content_header())?;
        debug!("wrote header {}", header_path.display());

        let paths = self.entry_paths();
        let mut unsafe_dirs = vec![false; self.entries.len()];
        let mut written = 0;

        for (index, (entry, relative)) in self.entries.iter().zip(&paths).enumerate() {
            let inside_unsafe_dir = entry
                .parent()
                .is_some_and(|p| p < index && unsafe_dirs[p]);

            if !entry.has_safe_name() || inside_unsafe_dir {
                warn!("skipping '{relative}': unsafe entry name");
                unsafe_dirs[index] = true;
                continue;
            }

            if entry.is_directory() {
                continue;
            }

            let Some(dest) = layout.file_path(relative) else {
                warn!("skipping '{relative}': path leaves the package directory");
                continue;
            };
            let result = (|| -> Result<usize, Error> {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                let data = self.extract(entry)?;
                fs::write(&dest, &data)?;
                Ok(data.len())
            })();

            match result {
                Ok(len) => {
                    info!("extracted {relative} ({len} bytes)");
                    written += 1;
                }
                Err(e) => warn!("failed to extract {relative}: {e}"),
            }
        }

        info!("installed {written} files to {}", package_dir.display());
        Ok(written)
    }
}
