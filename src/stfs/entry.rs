use bitflags::bitflags;
use byteorder::{ReadBytesExt, BE, LE};
use chrono::{NaiveDate, NaiveDateTime};
use std::io::{self, Read, Seek, SeekFrom};

use crate::io::{ascii_trimmed, ReadFromRange};

/// Path indicator of entries that live in the package root.
pub const ROOT_PATH_INDICATOR: u16 = 0xffff;

/// https://free60.org/System-Software/Formats/STFS/#file-listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub flags: EntryFlags,
    pub valid_block_count: u32,     // u24
    pub allocated_block_count: u32, // u24
    pub starting_block: u32,        // u24
    pub path_indicator: u16,
    pub file_size: u32,
    pub updated: FatTimestamp,
    pub accessed: FatTimestamp,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u8 {
        const CONSECUTIVE = 1 << 6;
        const DIRECTORY = 1 << 7;
    }
}

impl FileEntry {
    pub const SIZE: u64 = 0x40;
    const NAME_LEN: usize = 40;

    pub fn is_directory(&self) -> bool {
        self.flags.contains(EntryFlags::DIRECTORY)
    }

    pub fn has_consecutive_blocks(&self) -> bool {
        self.flags.contains(EntryFlags::CONSECUTIVE)
    }

    pub fn name_len(&self) -> u8 {
        self.flags.bits() & 0x3f
    }

    /// Index of the parent directory entry, or `None` for the root.
    pub fn parent(&self) -> Option<usize> {
        (self.path_indicator != ROOT_PATH_INDICATOR).then_some(self.path_indicator as usize)
    }

    /// An empty name or zero flags marks the end of the file table.
    pub fn is_terminator(&self) -> bool {
        self.name.is_empty() || self.flags.is_empty()
    }

    /// Whether the name can be used as a single path component on disk.
    pub fn has_safe_name(&self) -> bool {
        !matches!(self.name.as_str(), "" | "." | "..")
            && !self.name.contains(['/', '\\', '\0'])
    }
}

impl ReadFromRange for FileEntry {
    fn read_from_range<R: Read + Seek>(mut r: R, off: u64, _len: u64) -> io::Result<Self> {
        r.seek(SeekFrom::Start(off))?;

        let mut name = [0u8; Self::NAME_LEN];
        r.read_exact(&mut name)?;
        let name_end = name.iter().position(|b| *b == 0).unwrap_or(name.len());
        let name = ascii_trimmed(&name[..name_end]);

        let flags = EntryFlags::from_bits_retain(r.read_u8()?);
        let valid_block_count = r.read_u24::<LE>()?;
        let allocated_block_count = r.read_u24::<LE>()?;
        let starting_block = r.read_u24::<LE>()?;
        let path_indicator = r.read_u16::<BE>()?;
        let file_size = r.read_u32::<BE>()?;

        let updated = FatTimestamp::read_from(&mut r)?;
        let accessed = FatTimestamp::read_from(&mut r)?;

        Ok(Self {
            name,
            flags,
            valid_block_count,
            allocated_block_count,
            starting_block,
            path_indicator,
            file_size,
            updated,
            accessed,
        })
    }
}

/// A packed FAT date and time pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FatTimestamp {
    pub date: u16,
    pub time: u16,
}

impl FatTimestamp {
    fn read_from(mut r: impl Read) -> io::Result<Self> {
        Ok(Self {
            date: r.read_u16::<BE>()?,
            time: r.read_u16::<BE>()?,
        })
    }

    pub fn to_datetime(self) -> Option<NaiveDateTime> {
        let day = (self.date & 0x1f) as u32;
        let month = ((self.date >> 5) & 0x0f) as u32;
        let year = 1980 + (self.date >> 9) as i32;

        let second = ((self.time & 0x1f) * 2) as u32;
        let minute = ((self.time >> 5) & 0x3f) as u32;
        let hour = (self.time >> 11) as u32;

        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
    }
}
