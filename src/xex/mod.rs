//! https://free60.org/System-Software/Formats/XEX/

use bitflags::bitflags;
use byteorder::{ReadBytesExt, BE};
use num_enum::TryFromPrimitive;
use std::fs;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, info, trace, warn};

use crate::io::{RangeRef, ReadFromRange};

mod security;
pub use security::*;

/// Result of parsing an executable header. Malformed input yields
/// `is_valid == false` and a reason instead of an error.
#[derive(Debug, Clone, Default)]
pub struct XexInfo {
    pub is_valid: bool,
    pub validation_error: Option<String>,
    pub header: Option<XexHeader>,
    pub directory: Vec<DirectoryEntry>,
    pub security: Option<SecurityInfo>,
    pub execution: Option<ExecutionInfo>,

    pub title_id: u32,
    pub media_id: u32,
    pub version: u32,
    pub base_version: u32,
    pub platform: u8,
    pub executable_type: u8,
    pub disc_number: u8,
    pub disc_count: u8,
}

#[derive(Debug, Clone)]
pub struct XexHeader {
    pub module_flags: ModuleFlags,
    pub header_size: u32,
    pub discardable_header_size: u32,
    pub security_offset: u32,
    pub directory_count: u32,
}

bitflags! {
    // based on https://free60.org/System-Software/Formats/XEX/#xex-header
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct ModuleFlags: u32 {
        const TITLE_MODULE = 0x01;
        const EXPORTS_TO_TITLE = 0x02;
        const SYSTEM_DEBUGGER = 0x04;
        const DLL_MODULE = 0x08;
        const MODULE_PATCH = 0x10;
        const FULL_PATCH = 0x20;
        const DELTA_PATCH = 0x40;
        const USER_MODE = 0x80;
    }
}

impl XexHeader {
    pub const SIZE: u64 = 0x18;
    const MAGIC: &[u8; 4] = b"XEX2";
}

impl ReadFromRange for XexHeader {
    fn read_from_range<R: Read + Seek>(mut r: R, off: u64, _len: u64) -> io::Result<Self> {
        r.seek(SeekFrom::Start(off + 4))?;

        Ok(Self {
            module_flags: ModuleFlags::from_bits_retain(r.read_u32::<BE>()?),
            header_size: r.read_u32::<BE>()?,
            discardable_header_size: r.read_u32::<BE>()?,
            security_offset: r.read_u32::<BE>()?,
            directory_count: r.read_u32::<BE>()?,
        })
    }
}

/// One optional header: a key and either an offset or an inline value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub key: u32,
    pub value: u32,
}

impl DirectoryEntry {
    pub const SIZE: u64 = 8;

    pub fn known_key(&self) -> Option<HeaderKey> {
        HeaderKey::try_from(self.key).ok()
    }

    /// Size of the referenced data in 32-bit words, from the low byte of the key.
    /// `0xff` means the data carries its own length, `0` that `value` is inline.
    pub fn len_words(&self) -> u32 {
        self.key & 0xff
    }
}

// based on https://free60.org/System-Software/Formats/XEX/#header-ids
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
pub enum HeaderKey {
    ResourceInfo = 0x_00_00_02_ff,
    BaseFileFormat = 0x_00_00_03_ff,
    BaseReference = 0x_00_00_04_05,
    DeltaPatchDescriptor = 0x_00_00_05_ff,
    BoundingPath = 0x_00_00_80_ff,
    DeviceId = 0x_00_00_81_05,
    OriginalBaseAddress = 0x_00_01_00_01,
    EntryPoint = 0x_00_01_01_00,
    ImageBaseAddress = 0x_00_01_02_01,
    ImportLibraries = 0x_00_01_03_ff,
    ChecksumTimestamp = 0x_00_01_80_02,
    EnabledForCallcap = 0x_00_01_81_02,
    EnabledForFastcap = 0x_00_01_82_00,
    OriginalPeName = 0x_00_01_83_ff,
    StaticLibraries = 0x_00_02_00_ff,
    TlsInfo = 0x_00_02_01_04,
    DefaultStackSize = 0x_00_02_02_00,
    DefaultFilesystemCacheSize = 0x_00_02_03_01,
    DefaultHeapSize = 0x_00_02_04_01,
    PageHeapSizeAndFlags = 0x_00_02_80_02,
    SystemFlags = 0x_00_03_00_00,
    ExecutionInfo = 0x_00_04_00_06,
    ServiceIdList = 0x_00_04_01_ff,
    TitleWorkspaceSize = 0x_00_04_02_01,
    GameRatings = 0x_00_04_03_10,
    LanKey = 0x_00_04_04_04,
    Xbox360Logo = 0x_00_04_05_ff,
    MultidiscMediaIds = 0x_00_04_06_ff,
    AlternateTitleIds = 0x_00_04_07_ff,
    AdditionalTitleMemory = 0x_00_04_08_01,
    ExportsByName = 0x_00_e1_04_02,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionInfo {
    pub media_id: u32,
    pub version: u32,
    pub base_version: u32,
    pub title_id: u32,
    pub platform: u8,
    pub executable_type: u8,
    pub disc_number: u8,
    pub disc_count: u8,
}

impl ExecutionInfo {
    /// Header id 0x400 with the record length in words in the low byte.
    pub const KEY: u32 = (0x400 << 8) | (24 >> 2);
    pub const SIZE: u64 = 20;
}

impl ReadFromRange for ExecutionInfo {
    fn read_from_range<R: Read + Seek>(mut r: R, off: u64, _len: u64) -> io::Result<Self> {
        r.seek(SeekFrom::Start(off))?;

        Ok(Self {
            media_id: r.read_u32::<BE>()?,
            version: r.read_u32::<BE>()?,
            base_version: r.read_u32::<BE>()?,
            title_id: r.read_u32::<BE>()?,
            platform: r.read_u8()?,
            executable_type: r.read_u8()?,
            disc_number: r.read_u8()?,
            disc_count: r.read_u8()?,
        })
    }
}

impl XexInfo {
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read(path) {
            Ok(data) => {
                debug!("loaded {} ({} bytes)", path.display(), data.len());
                Self::parse(&data)
            }
            Err(e) => Self::invalid(format!("Failed to read {}: {e}", path.display())),
        }
    }

    pub fn parse(data: &[u8]) -> Self {
        trace!(len = data.len(), "parsing XEX header");

        let mut info = Self::default();
        if let Err(reason) = info.parse_into(data) {
            warn!("{reason}");
            info.validation_error = Some(reason);
            return info;
        }

        info.is_valid = true;
        info!(
            "parsed XEX, title id {}, media id {}",
            info.title_id_hex(),
            info.media_id_hex()
        );
        info
    }

    fn invalid(reason: String) -> Self {
        warn!("{reason}");
        Self {
            validation_error: Some(reason),
            ..Self::default()
        }
    }

    fn parse_into(&mut self, data: &[u8]) -> Result<(), String> {
        let len = data.len() as u64;
        if len < XexHeader::SIZE {
            return Err("Data too short for XEX header".to_owned());
        }

        let magic = &data[..4];
        if magic != XexHeader::MAGIC {
            let magic = String::from_utf8_lossy(magic);
            return Err(format!(
                "Invalid XEX magic: {} (expected XEX2)",
                magic.trim_end_matches('\0')
            ));
        }

        let header = XexHeader::read_from_slice(data, 0, XexHeader::SIZE)
            .map_err(|e| format!("Failed to parse XEX: {e}"))?;
        let security_offset = header.security_offset as u64;
        let directory_count = header.directory_count;
        self.header = Some(header);

        if security_offset >= len {
            return Err("Invalid security info offset".to_owned());
        }

        let security_ref = RangeRef::<SecurityInfo>::new(security_offset, SecurityInfo::SIZE);
        if !security_ref.fits(len) {
            return Err("Failed to parse XEX: Data too short for security info".to_owned());
        }
        let security = security_ref
            .read(Cursor::new(data))
            .map_err(|e| format!("Failed to parse XEX: {e}"))?;
        debug!(
            image_size = security.image_size,
            game_region = security.image_info.game_region,
            "read security info"
        );
        self.security = Some(security);

        self.directory = read_directory(data, directory_count);

        let execution = self
            .directory
            .iter()
            .filter(|e| e.key == ExecutionInfo::KEY && e.value > 0)
            .map(|e| RangeRef::<ExecutionInfo>::new(e.value as u64, ExecutionInfo::SIZE))
            .find(|r| r.fits(len))
            .and_then(|r| r.read(Cursor::new(data)).ok())
            .ok_or_else(|| "Unable to find execution info".to_owned())?;

        self.title_id = execution.title_id;
        self.media_id = execution.media_id;
        self.version = execution.version;
        self.base_version = execution.base_version;
        self.platform = execution.platform;
        self.executable_type = execution.executable_type;
        self.disc_number = execution.disc_number;
        self.disc_count = execution.disc_count;
        self.execution = Some(execution);

        Ok(())
    }

    pub fn module_flags(&self) -> Option<ModuleFlags> {
        self.header.as_ref().map(|h| h.module_flags)
    }

    /// Empty when no execution info was found.
    pub fn title_id_hex(&self) -> String {
        self.execution
            .map(|e| format!("{:08X}", e.title_id))
            .unwrap_or_default()
    }

    pub fn media_id_hex(&self) -> String {
        self.execution
            .map(|e| format!("{:08X}", e.media_id))
            .unwrap_or_default()
    }
}

/// Reads up to `count` entries, stopping early at the end of the buffer.
fn read_directory(data: &[u8], count: u32) -> Vec<DirectoryEntry> {
    let mut r = Cursor::new(data);
    let mut entries = Vec::new();

    for i in 0..count as u64 {
        let off = XexHeader::SIZE + i * DirectoryEntry::SIZE;
        if off + DirectoryEntry::SIZE > data.len() as u64 {
            debug!("header directory truncated after {i} of {count} entries");
            break;
        }

        r.set_position(off);
        // bounds were checked above
        let (Ok(key), Ok(value)) = (r.read_u32::<BE>(), r.read_u32::<BE>()) else {
            break;
        };
        entries.push(DirectoryEntry { key, value });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECURITY_OFFSET: usize = 0x100;
    const EXECUTION_OFFSET: usize = 0x40;

    fn xex_bytes(entries: &[(u32, u32)]) -> Vec<u8> {
        let mut b = vec![0u8; SECURITY_OFFSET + SecurityInfo::SIZE as usize];
        b[..4].copy_from_slice(b"XEX2");
        b[4..8].copy_from_slice(&ModuleFlags::TITLE_MODULE.bits().to_be_bytes());
        b[8..12].copy_from_slice(&0x3000u32.to_be_bytes());
        b[16..20].copy_from_slice(&(SECURITY_OFFSET as u32).to_be_bytes());
        b[20..24].copy_from_slice(&(entries.len() as u32).to_be_bytes());

        for (i, (key, value)) in entries.iter().enumerate() {
            let off = 0x18 + i * 8;
            b[off..off + 4].copy_from_slice(&key.to_be_bytes());
            b[off + 4..off + 8].copy_from_slice(&value.to_be_bytes());
        }

        let e = EXECUTION_OFFSET;
        b[e..e + 4].copy_from_slice(&0x1122_3344u32.to_be_bytes());
        b[e + 4..e + 8].copy_from_slice(&0x0002_0000u32.to_be_bytes());
        b[e + 12..e + 16].copy_from_slice(&0x4D53_07E6u32.to_be_bytes());
        b[e + 18] = 1;
        b[e + 19] = 2;
        b
    }

    #[test]
    fn key_is_execution_info_id() {
        assert_eq!(ExecutionInfo::KEY, 0x40006);
    }

    #[test]
    fn reads_execution_info() {
        let data = xex_bytes(&[
            (HeaderKey::EntryPoint as u32, 0x8200_0000),
            (ExecutionInfo::KEY, EXECUTION_OFFSET as u32),
        ]);
        let info = XexInfo::parse(&data);

        assert!(info.is_valid, "{:?}", info.validation_error);
        assert_eq!(info.title_id_hex(), "4D5307E6");
        assert_eq!(info.media_id_hex(), "11223344");
        assert_eq!(info.version, 0x0002_0000);
        assert_eq!((info.disc_number, info.disc_count), (1, 2));
        assert_eq!(info.module_flags(), Some(ModuleFlags::TITLE_MODULE));
        assert_eq!(info.directory.len(), 2);
        assert_eq!(info.directory[0].known_key(), Some(HeaderKey::EntryPoint));
        assert_eq!(info.directory[1].len_words(), 6);
        assert!(info.security.is_some());
    }

    #[test]
    fn missing_execution_info_is_invalid() {
        let data = xex_bytes(&[(HeaderKey::EntryPoint as u32, 0x8200_0000)]);
        let info = XexInfo::parse(&data);

        assert!(!info.is_valid);
        assert_eq!(info.title_id, 0);
        assert_eq!(info.media_id, 0);
        assert_eq!(info.title_id_hex(), "");
        assert_eq!(
            info.validation_error.as_deref(),
            Some("Unable to find execution info")
        );
    }

    #[test]
    fn execution_info_past_end_is_skipped() {
        let data = xex_bytes(&[(ExecutionInfo::KEY, 0x0fff_0000)]);
        let info = XexInfo::parse(&data);
        assert!(!info.is_valid);
        assert!(info.execution.is_none());
    }

    #[test]
    fn rejects_short_and_foreign_data() {
        let info = XexInfo::parse(b"XEX2");
        assert_eq!(
            info.validation_error.as_deref(),
            Some("Data too short for XEX header")
        );

        let mut data = xex_bytes(&[]);
        data[..4].copy_from_slice(b"XEX1");
        let info = XexInfo::parse(&data);
        assert_eq!(
            info.validation_error.as_deref(),
            Some("Invalid XEX magic: XEX1 (expected XEX2)")
        );
    }

    #[test]
    fn security_block_must_fit() {
        let mut data = xex_bytes(&[(ExecutionInfo::KEY, EXECUTION_OFFSET as u32)]);
        data.truncate(SECURITY_OFFSET + 0x10);
        let info = XexInfo::parse(&data);
        assert!(!info.is_valid);
        assert_eq!(
            info.validation_error.as_deref(),
            Some("Failed to parse XEX: Data too short for security info")
        );

        let mut data = xex_bytes(&[]);
        data[16..20].copy_from_slice(&0xffffu32.to_be_bytes());
        let info = XexInfo::parse(&data);
        assert_eq!(
            info.validation_error.as_deref(),
            Some("Invalid security info offset")
        );
        assert!(info.header.is_some());
    }

    #[test]
    fn truncated_directory_stops_scanning() {
        let data = xex_bytes(&[]);
        let directory = read_directory(&data[..0x18 + 3 * 8 + 4], u32::MAX);
        assert_eq!(directory.len(), 3);
    }
}
