//! https://free60.org/System-Software/Formats/STFS/

use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{ReadBytesExt, BE};
use tracing::{debug, info, trace, warn};

use crate::io::{read_ascii, ReadFromRange};

mod entry;
pub use entry::*;

mod hash;
pub use hash::*;

mod layout;
pub use layout::*;

mod metadata;
pub use metadata::*;

const CONTENT_ID_OFFSET: u64 = 0x218;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("data too short to be an STFS package")]
    TooShort,
    #[error("invalid STFS magic {0:?}, expected 'CON ', 'PIRS' or 'LIVE'")]
    UnsupportedMagic(String),
    #[error("truncated STFS header")]
    TruncatedHeader(#[source] io::Error),
    #[error("cannot extract directory '{0}'")]
    IsDirectory(String),
    #[error("no entry at '{0}'")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    Console,
    Pirs,
    Live,
}

impl SignatureKind {
    pub const ALL: &[Self] = &[Self::Console, Self::Pirs, Self::Live];

    pub const fn magic(self) -> &'static [u8; 4] {
        match self {
            Self::Console => b"CON ",
            Self::Pirs => b"PIRS",
            Self::Live => b"LIVE",
        }
    }

    pub const fn default_blocks_per_hash_table(self) -> u32 {
        match self {
            Self::Console => 1,
            Self::Pirs | Self::Live => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub kind: SignatureKind,
    /// Present only on console-signed packages.
    pub certificate: Option<Certificate>,
    pub signature: Box<[u8]>,
}

#[derive(Debug, Clone)]
pub struct Certificate {
    pub size: u16,
    pub console_id: [u8; 5],
    pub part_number: String,
    pub console_type: u8,
    pub date: String,
    pub public_exponent: u32,
    pub modulus: Box<[u8]>,
    pub signature: Box<[u8]>,
    /// The whole certificate block, 0x1a8 bytes starting at offset 4.
    pub raw: Box<[u8]>,
}

impl ReadFromRange for Signature {
    fn read_from_range<R: Read + Seek>(mut r: R, off: u64, _len: u64) -> io::Result<Self> {
        use std::io::{Error, ErrorKind::*};

        r.seek(SeekFrom::Start(off))?;

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;

        let kind = SignatureKind::ALL
            .iter()
            .copied()
            .find(|k| k.magic() == &magic)
            .ok_or_else(|| Error::new(InvalidData, "invalid package magic"))?;

        if kind != SignatureKind::Console {
            let mut signature = vec![0u8; 0x100];
            r.read_exact(&mut signature)?;
            return Ok(Self {
                kind,
                certificate: None,
                signature: signature.into_boxed_slice(),
            });
        }

        let mut raw = vec![0u8; 0x1a8];
        r.read_exact(&mut raw)?;

        let mut c = Cursor::new(&raw);
        let size = c.read_u16::<BE>()?;
        let mut console_id = [0u8; 5];
        c.read_exact(&mut console_id)?;
        let part_number = read_ascii(&mut c, 0x14)?;
        let console_type = c.read_u8()?;
        let date = read_ascii(&mut c, 8)?;
        let public_exponent = c.read_u32::<BE>()?;
        let mut modulus = vec![0u8; 0x80];
        c.read_exact(&mut modulus)?;
        let mut cert_signature = vec![0u8; 0x100];
        c.read_exact(&mut cert_signature)?;

        let mut signature = vec![0u8; 0x80];
        r.read_exact(&mut signature)?;

        Ok(Self {
            kind,
            certificate: Some(Certificate {
                size,
                console_id,
                part_number,
                console_type,
                date,
                public_exponent,
                modulus: modulus.into_boxed_slice(),
                signature: cert_signature.into_boxed_slice(),
                raw: raw.into_boxed_slice(),
            }),
            signature: signature.into_boxed_slice(),
        })
    }
}

/// A parsed STFS package that owns its raw bytes.
#[derive(Debug, Clone)]
pub struct Package {
    /// File name the package was loaded from, used as the install folder name.
    pub name: Option<String>,
    pub signature: Signature,
    pub content_id: [u8; 20],
    pub metadata: Metadata,
    pub entries: Vec<FileEntry>,
    layout: BlockLayout,
    data: Vec<u8>,
}

impl Package {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let mut package = Self::from_bytes(data)?;
        package.name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        Ok(package)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, Error> {
        trace!(len = data.len(), "parsing STFS package");

        if data.len() < 4 {
            return Err(Error::TooShort);
        }

        let magic = &data[..4];
        if !SignatureKind::ALL.iter().any(|k| k.magic() == magic) {
            return Err(Error::UnsupportedMagic(
                String::from_utf8_lossy(magic).into_owned(),
            ));
        }

        let (signature, content_id, metadata) =
            read_header(&data).map_err(Error::TruncatedHeader)?;

        let blocks_per_hash_table = metadata
            .volume_descriptor
            .blocks_per_hash_table(signature.kind);

        let layout = BlockLayout {
            header_size: metadata.header_size as u64,
            blocks_per_hash_table,
        };

        debug!(
            kind = ?signature.kind,
            content_type = %metadata.content_type_hex(),
            title_id = %metadata.title_id_hex(),
            blocks_per_hash_table,
            "read STFS header"
        );

        let mut package = Self {
            name: None,
            signature,
            content_id,
            metadata,
            entries: Vec::new(),
            layout,
            data,
        };

        package.entries = package.read_file_table()?;
        info!(
            "parsed '{}' with {} entries",
            package.metadata.display_name,
            package.entries.len()
        );

        Ok(package)
    }

    pub fn kind(&self) -> SignatureKind {
        self.signature.kind
    }

    pub fn layout(&self) -> BlockLayout {
        self.layout
    }

    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    fn read_file_table(&self) -> io::Result<Vec<FileEntry>> {
        let vd = &self.metadata.volume_descriptor;
        let per_block = BLOCK_SIZE / FileEntry::SIZE;
        let len = self.data.len() as u64;

        let mut entries = Vec::new();
        let mut block = vd.file_table_block_number;

        for _ in 0..vd.file_table_block_count {
            let offset = match self.layout.block_offset(block) {
                Some(offset) if offset < len => offset,
                other => {
                    warn!(
                        "file table block {block} at {:#x} is outside the package ({len} bytes), package may be incomplete",
                        other.unwrap_or(u64::MAX)
                    );
                    return Ok(entries);
                }
            };

            for i in 0..per_block {
                let off = offset + i * FileEntry::SIZE;
                if off + FileEntry::SIZE > len {
                    warn!("not enough data for a file entry at {off:#x}");
                    return Ok(entries);
                }

                let entry = FileEntry::read_from_slice(&self.data, off, FileEntry::SIZE)?;
                if entry.is_terminator() {
                    return Ok(entries);
                }

                trace!(index = entries.len(), ?entry, "file entry");
                entries.push(entry);
            }

            block = match self.hash_entry(block) {
                Some(hash) if hash.is_in_use() => hash.next_block(),
                _ => block + 1,
            };
        }

        Ok(entries)
    }

    /// Level 0 hash record of a data block, if it lies inside the package.
    pub fn hash_entry(&self, block: u32) -> Option<HashEntry> {
        let off = self.layout.hash_entry_offset(block, 0)?;
        if off + HashEntry::SIZE > self.data.len() as u64 {
            return None;
        }
        HashEntry::read_from_slice(&self.data, off, HashEntry::SIZE).ok()
    }

    /// Checks a data block against its level 0 hash, `None` when either is missing.
    pub fn verify_block(&self, block: u32) -> Option<bool> {
        let hash = self.hash_entry(block)?;
        let off = self.layout.block_offset(block)? as usize;
        let data = self.data.get(off..off + BLOCK_SIZE as usize)?;
        Some(hash.matches(data))
    }

    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter().filter(|e| !e.is_directory())
    }

    pub fn directories(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter().filter(|e| e.is_directory())
    }

    /// Entries whose parent is `parent`; `None` selects the root.
    pub fn children(&self, parent: Option<usize>) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter().filter(move |e| e.parent() == parent)
    }

    /// Relative `/`-separated path of every entry, in table order.
    pub fn entry_paths(&self) -> Vec<String> {
        let mut dirs: HashMap<usize, String> = HashMap::new();
        let mut paths = Vec::with_capacity(self.entries.len());

        for (index, entry) in self.entries.iter().enumerate() {
            let parent = match entry.parent() {
                None => "",
                Some(p) => match dirs.get(&p) {
                    Some(path) => path.as_str(),
                    None => {
                        warn!(
                            "'{}' at index {index} has invalid parent index {p}, placing at root",
                            entry.name
                        );
                        ""
                    }
                },
            };

            let path = if parent.is_empty() {
                entry.name.clone()
            } else {
                format!("{parent}/{}", entry.name)
            };

            if entry.is_directory() {
                dirs.insert(index, path.clone());
            }
            paths.push(path);
        }

        paths
    }

    /// Looks up an entry by its relative path, ignoring ASCII case.
    pub fn find(&self, path: &str) -> Option<&FileEntry> {
        let path = path.trim_start_matches('/');
        self.entry_paths()
            .iter()
            .position(|p| p.eq_ignore_ascii_case(path))
            .map(|i| &self.entries[i])
    }

    pub fn extract_path(&self, path: &str) -> Result<Vec<u8>, Error> {
        let entry = self
            .find(path)
            .ok_or_else(|| Error::NotFound(path.to_owned()))?;
        self.extract(entry)
    }

    /// Reads a file's contents. Truncated packages yield the bytes that could be read.
    pub fn extract(&self, entry: &FileEntry) -> Result<Vec<u8>, Error> {
        if entry.is_directory() {
            return Err(Error::IsDirectory(entry.name.clone()));
        }

        if entry.file_size == 0 {
            return Ok(Vec::new());
        }

        let data = if entry.has_consecutive_blocks() {
            self.extract_consecutive(entry)
        } else {
            self.extract_chained(entry)
        };

        if data.len() < entry.file_size as usize {
            warn!(
                "'{}' truncated: read {} of {} bytes",
                entry.name,
                data.len(),
                entry.file_size
            );
        } else {
            debug!("extracted '{}' ({} bytes)", entry.name, data.len());
        }

        Ok(data)
    }

    fn extract_consecutive(&self, entry: &FileEntry) -> Vec<u8> {
        let size = entry.file_size as usize;
        let mut out = Vec::with_capacity(size);
        let mut block = entry.starting_block;

        while out.len() < size {
            let Some(off) = self.layout.block_offset(block) else {
                break;
            };

            let chunk = (size - out.len()).min((BLOCK_SIZE - off % BLOCK_SIZE) as usize);
            let off = off as usize;
            let Some(bytes) = self.data.get(off..off + chunk) else {
                warn!("reached end of package data while extracting '{}'", entry.name);
                break;
            };

            out.extend_from_slice(bytes);
            block += 1;
        }

        out
    }

    fn extract_chained(&self, entry: &FileEntry) -> Vec<u8> {
        let size = entry.file_size as usize;
        let mut out = Vec::with_capacity(size);
        let mut block = entry.starting_block;
        let mut remaining = entry.allocated_block_count;

        while out.len() < size && remaining > 0 && block != END_OF_CHAIN {
            let Some(hash) = self.hash_entry(block) else {
                warn!("hash table out of bounds for block {block}");
                break;
            };

            if !hash.is_in_use() {
                warn!("block {block} is not in use ({:?})", hash.state());
                break;
            }

            let chunk = (size - out.len()).min(BLOCK_SIZE as usize);
            let bytes = self
                .layout
                .block_offset(block)
                .and_then(|off| self.data.get(off as usize..off as usize + chunk));
            let Some(bytes) = bytes else {
                warn!("block {block} is past the end of the package");
                break;
            };

            trace!(block, next = hash.next_block(), "copying block");
            out.extend_from_slice(bytes);
            block = hash.next_block();
            remaining -= 1;
        }

        out
    }
}

fn read_header(data: &[u8]) -> io::Result<(Signature, [u8; 20], Metadata)> {
    let mut r = Cursor::new(data);

    let signature = Signature::read_from_range(&mut r, 0, METADATA_OFFSET)?;

    r.seek(SeekFrom::Start(CONTENT_ID_OFFSET))?;
    let mut content_id = [0u8; 20];
    r.read_exact(&mut content_id)?;

    let metadata = Metadata::read_from_range(&mut r, METADATA_OFFSET, data.len() as u64)?;

    Ok((signature, content_id, metadata))
}
