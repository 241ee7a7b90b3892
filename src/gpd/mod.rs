//! https://free60.org/System-Software/Formats/GPD/
//!
//! Game profile data: an XDBF table of `(namespace, id) -> (offset, length)`
//! rows over a flat data section. Typed records are decoded on access.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};

mod table;
pub use table::*;

mod record;
pub use record::{datetime_to_filetime, filetime_to_datetime, Image, Record, StringRecord};

mod achievement;
pub use achievement::*;

mod setting;
pub use setting::*;

mod title;
pub use title::*;

mod sync;
pub use sync::*;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("GPD data too short: {len} bytes, expected at least {}", Header::SIZE)]
    TooShort { len: usize },
    #[error("invalid GPD magic: 0x{0:08X}")]
    InvalidMagic(u32),
    #[error("GPD {table} table truncated at row {row}")]
    TruncatedTable { table: &'static str, row: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Records that failed validation, grouped by namespace.
#[derive(Debug, Clone, Default)]
pub struct InvalidEntries {
    pub achievements: Vec<Achievement>,
    pub images: Vec<Image>,
    pub settings: Vec<Setting>,
    pub titles: Vec<Title>,
    pub strings: Vec<StringRecord>,
}

impl InvalidEntries {
    pub fn len(&self) -> usize {
        self.achievements.len()
            + self.images.len()
            + self.settings.len()
            + self.titles.len()
            + self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct Gpd {
    header: Header,
    entries: Vec<EntryRow>,
    free_space: Vec<FreeSpaceRow>,
    data: Vec<u8>,
}

impl Gpd {
    pub const VERSION: u32 = 0x10000;
    pub const DEFAULT_CAPACITY: u32 = 512;

    pub fn create(endian: Endian) -> Self {
        info!("creating empty {endian:?}-endian GPD");
        Self {
            header: Header {
                endian,
                version: Self::VERSION,
                entry_capacity: Self::DEFAULT_CAPACITY,
                entry_count: 0,
                free_space_capacity: Self::DEFAULT_CAPACITY,
                free_space_count: 0,
            },
            entries: Vec::new(),
            free_space: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, Error> {
        let header_bytes: &[u8; Header::SIZE] = buf
            .get(..Header::SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(Error::TooShort { len: buf.len() })?;
        let header = Header::parse(header_bytes).map_err(Error::InvalidMagic)?;
        let endian = header.endian;
        trace!(?header, "read GPD header");

        let entries = read_rows(
            buf,
            Header::SIZE as u64,
            header.entry_count,
            EntryRow::SIZE,
            "entry",
            |b| EntryRow::parse(b, endian),
        )?;

        let free_start = Header::SIZE as u64 + header.entry_capacity as u64 * EntryRow::SIZE as u64;
        let free_space = read_rows(
            buf,
            free_start,
            header.free_space_count,
            FreeSpaceRow::SIZE,
            "free space",
            |b| FreeSpaceRow::parse(b, endian),
        )?;

        let data = usize::try_from(header.data_offset())
            .ok()
            .and_then(|off| buf.get(off..))
            .unwrap_or_default()
            .to_vec();

        debug!(
            "parsed GPD with {} entries, {} free ranges, {} data bytes",
            entries.len(),
            free_space.len(),
            data.len()
        );

        Ok(Self {
            header,
            entries,
            free_space,
            data,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let buf = fs::read(path)?;
        let gpd = Self::from_bytes(&buf)?;
        info!("loaded GPD {} ({} bytes)", path.display(), buf.len());
        Ok(gpd)
    }

    /// Serializes the store. Row counts come from the live tables and a table
    /// that outgrew its capacity is enlarged.
    pub fn to_bytes(&self) -> Vec<u8> {
        let endian = self.header.endian;
        let header = Header {
            entry_count: self.entries.len() as u32,
            entry_capacity: self.header.entry_capacity.max(self.entries.len() as u32),
            free_space_count: self.free_space.len() as u32,
            free_space_capacity: self
                .header
                .free_space_capacity
                .max(self.free_space.len() as u32),
            ..self.header
        };
        if header.entry_capacity != self.header.entry_capacity
            || header.free_space_capacity != self.header.free_space_capacity
        {
            debug!(
                "growing GPD tables to {} entries, {} free ranges",
                header.entry_capacity, header.free_space_capacity
            );
        }

        let mut out = vec![0u8; header.data_offset() as usize];
        out[..Header::SIZE].copy_from_slice(&header.to_bytes());

        let (entry_table, free_table) =
            out[Header::SIZE..].split_at_mut(header.entry_capacity as usize * EntryRow::SIZE);
        for (row, chunk) in self.entries.iter().zip(entry_table.chunks_exact_mut(EntryRow::SIZE)) {
            row.write(chunk, endian);
        }
        for (row, chunk) in self
            .free_space
            .iter()
            .zip(free_table.chunks_exact_mut(FreeSpaceRow::SIZE))
        {
            row.write(chunk, endian);
        }

        out.extend_from_slice(&self.data);
        out
    }

    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let bytes = self.to_bytes();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &bytes)?;

        info!("saved GPD to {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    pub fn endian(&self) -> Endian {
        self.header.endian
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn entries(&self) -> &[EntryRow] {
        &self.entries
    }

    pub fn free_space(&self) -> &[FreeSpaceRow] {
        &self.free_space
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The row's range of the data section, cut short at the end of the data.
    pub fn entry_data(&self, row: &EntryRow) -> &[u8] {
        let start = (row.offset as usize).min(self.data.len());
        let end = start
            .saturating_add(row.length as usize)
            .min(self.data.len());
        &self.data[start..end]
    }

    fn decode<T: Record>(&self, row: &EntryRow) -> T {
        let record = T::decode(row, self.entry_data(row));
        if let Some(err) = record.validation_error() {
            warn!(
                "invalid {:?} entry 0x{:X}: {err}",
                T::NAMESPACE,
                row.id
            );
        }
        record
    }

    /// Every record in `T`'s namespace, including invalid ones.
    pub fn all_records<T: Record>(&self) -> Vec<T> {
        self.entries
            .iter()
            .filter(|row| row.is_in(T::NAMESPACE) && !row.is_sync())
            .map(|row| self.decode(row))
            .collect()
    }

    pub fn records<T: Record>(&self) -> Vec<T> {
        let mut records = self.all_records::<T>();
        records.retain(T::is_valid);
        records
    }

    pub fn achievements(&self) -> Vec<Achievement> {
        self.records()
    }

    pub fn all_achievements(&self) -> Vec<Achievement> {
        self.all_records()
    }

    pub fn images(&self) -> Vec<Image> {
        self.records()
    }

    pub fn all_images(&self) -> Vec<Image> {
        self.all_records()
    }

    pub fn settings(&self) -> Vec<Setting> {
        self.records()
    }

    pub fn all_settings(&self) -> Vec<Setting> {
        self.all_records()
    }

    pub fn titles(&self) -> Vec<Title> {
        self.records()
    }

    pub fn all_titles(&self) -> Vec<Title> {
        self.all_records()
    }

    pub fn strings(&self) -> Vec<StringRecord> {
        self.records()
    }

    pub fn all_strings(&self) -> Vec<StringRecord> {
        self.all_records()
    }

    pub fn invalid_entries(&self) -> InvalidEntries {
        fn invalid<T: Record>(gpd: &Gpd) -> Vec<T> {
            let mut records = gpd.all_records::<T>();
            records.retain(|r| !r.is_valid());
            records
        }

        InvalidEntries {
            achievements: invalid(self),
            images: invalid(self),
            settings: invalid(self),
            titles: invalid(self),
            strings: invalid(self),
        }
    }

    pub fn sync_list(&self) -> Option<SyncList> {
        let row = self.entries.iter().find(|r| r.is_sync_list())?;
        let list = SyncList::decode(self.entry_data(row), row.length, self.header.endian);
        if let Some(err) = &list.validation_error {
            warn!("invalid sync list: {err}");
            return None;
        }
        Some(list)
    }

    pub fn sync_data(&self) -> Option<SyncData> {
        let row = self.entries.iter().find(|r| r.is_sync_data())?;
        let data = SyncData::decode(self.entry_data(row), self.header.endian);
        if let Some(err) = &data.validation_error {
            warn!("invalid sync data: {err}");
            return None;
        }
        Some(data)
    }

    fn find_achievement(&self, id: u32) -> Option<(usize, Achievement)> {
        let index = self.entries.iter().position(|row| {
            row.is_in(Namespace::Achievement) && !row.is_sync() && row.id == u64::from(id)
        })?;
        Some((index, self.decode(&self.entries[index])))
    }

    /// Looks up a valid achievement by id.
    pub fn achievement(&self, id: u32) -> Option<Achievement> {
        self.find_achievement(id)
            .map(|(_, a)| a)
            .filter(Achievement::is_valid)
    }

    /// Marks an achievement as earned at `time`, or now. Returns `false` if
    /// the achievement is missing or invalid.
    pub fn unlock_achievement(&mut self, id: u32, time: Option<DateTime<Utc>>) -> bool {
        self.modify_achievement(id, "unlocked", |a| a.unlock(time.unwrap_or_else(Utc::now)))
    }

    pub fn lock_achievement(&mut self, id: u32) -> bool {
        self.modify_achievement(id, "locked", Achievement::lock)
    }

    fn modify_achievement(
        &mut self,
        id: u32,
        action: &str,
        f: impl FnOnce(&mut Achievement),
    ) -> bool {
        let Some((index, mut achievement)) = self.find_achievement(id) else {
            warn!("achievement 0x{id:08X} not found");
            return false;
        };
        if let Some(err) = &achievement.validation_error {
            warn!("achievement 0x{id:08X} is invalid and cannot be {action}: {err}");
            return false;
        }

        f(&mut achievement);
        self.update_entry(index, &achievement.to_bytes());
        info!("{action} achievement '{}'", achievement.name);
        true
    }

    /// Rewrites an entry's bytes. A record that keeps its size is overwritten
    /// in place, otherwise the new bytes are appended and the old range goes
    /// to the free-space table.
    fn update_entry(&mut self, index: usize, bytes: &[u8]) {
        let row = self.entries[index];
        let start = row.offset as usize;
        let end = start.saturating_add(bytes.len());

        if bytes.len() == row.length as usize && end <= self.data.len() {
            self.data[start..end].copy_from_slice(bytes);
            trace!("rewrote entry 0x{:X} in place", row.id);
            return;
        }

        let offset = self.append_data(bytes);
        self.entries[index].offset = offset;
        self.entries[index].length = bytes.len() as u32;
        self.free_space.push(FreeSpaceRow {
            offset: row.offset,
            length: row.length,
        });
        debug!(
            "moved entry 0x{:X} to offset 0x{offset:X}, freed {} bytes at 0x{:X}",
            row.id, row.length, row.offset
        );
    }

    fn append_data(&mut self, bytes: &[u8]) -> u32 {
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(bytes);
        offset
    }

    fn push_entry(&mut self, namespace: Namespace, id: u64, bytes: &[u8]) {
        let offset = self.append_data(bytes);
        self.entries.push(EntryRow {
            offset,
            length: bytes.len() as u32,
            ..EntryRow::new(namespace, id)
        });
    }

    pub fn add_achievement(&mut self, achievement: &Achievement) {
        self.push_entry(
            Namespace::Achievement,
            achievement.id.into(),
            &achievement.to_bytes(),
        );
        info!(
            "added achievement '{}' (0x{:08X})",
            achievement.name, achievement.id
        );
    }

    pub fn add_image(&mut self, id: u64, png: Vec<u8>) -> Image {
        self.push_entry(Namespace::Image, id, &png);
        info!("added image 0x{id:X} ({} bytes)", png.len());
        Image::new(id, png)
    }

    pub fn add_title(&mut self, title: &Title) {
        self.push_entry(Namespace::Title, title.id.into(), &title.to_bytes());
        info!("added title '{}' (0x{:08X})", title.name, title.id);
    }

    pub fn add_setting(&mut self, setting: &Setting) {
        self.push_entry(Namespace::Setting, setting.id.into(), &setting.to_bytes());
        info!("added setting 0x{:08X}", setting.id);
    }

    pub fn add_string(&mut self, id: u64, value: &str) -> StringRecord {
        let record = StringRecord::new(id, value);
        self.push_entry(Namespace::String, id, &record.to_bytes());
        info!("added string 0x{id:X}");
        record
    }

    /// Drops the achievement's row. Its bytes stay in the data section.
    pub fn remove_achievement(&mut self, id: u32) -> bool {
        let Some((index, _)) = self.find_achievement(id) else {
            warn!("achievement 0x{id:08X} not found");
            return false;
        };
        self.entries.remove(index);
        info!("removed achievement 0x{id:08X}");
        true
    }

    pub fn achievements_for_title(&self, title_id: u32) -> Vec<Achievement> {
        let mut achievements = self.achievements();
        achievements.retain(|a| a.title_id() == title_id);
        achievements
    }

    /// Gamerscore of the earned achievements.
    pub fn total_gamerscore(&self) -> i32 {
        self.achievements()
            .iter()
            .filter(|a| a.is_earned())
            .map(|a| a.gamerscore)
            .sum()
    }

    pub fn unlocked_count(&self) -> usize {
        self.achievements().iter().filter(|a| a.is_earned()).count()
    }

    pub fn possible_gamerscore(&self) -> i32 {
        self.achievements().iter().map(|a| a.gamerscore).sum()
    }

    pub fn achievement_count(&self) -> usize {
        self.achievements().len()
    }
}

fn read_rows<T>(
    buf: &[u8],
    start: u64,
    count: u32,
    size: usize,
    table: &'static str,
    parse: impl Fn(&[u8]) -> T,
) -> Result<Vec<T>, Error> {
    (0..count)
        .map(|row| {
            let off = start + row as u64 * size as u64;
            usize::try_from(off)
                .ok()
                .and_then(|off| buf.get(off..off + size))
                .map(&parse)
                .ok_or(Error::TruncatedTable { table, row })
        })
        .collect()
}
