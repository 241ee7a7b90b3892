use bitflags::bitflags;
use byteorder::{ByteOrder, BE};
use chrono::{DateTime, Utc};

use super::record::{filetime_to_datetime, read_cstr_utf16, write_cstr_utf16, Record};
use super::table::{EntryRow, Namespace};

/// Per-game summary kept in the dashboard GPD.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Title {
    pub id: u32,
    pub achievement_count: i32,
    pub achievement_unlocked_count: i32,
    pub gamerscore_total: i32,
    pub gamerscore_unlocked: i32,
    pub unknown: u8,
    pub achievement_unlocked_online_count: u8,
    pub avatar_assets_earned: u8,
    pub avatar_assets_max: u8,
    pub male_avatar_assets_earned: u8,
    pub male_avatar_assets_max: u8,
    pub female_avatar_assets_earned: u8,
    pub female_avatar_assets_max: u8,
    pub flags: TitleFlags,
    pub last_played: i64,
    pub name: String,
    pub validation_error: Option<String>,
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct TitleFlags: u32 {
        const NEEDS_SYNC = 0x1;
        const IMAGE_NEEDS_DOWNLOAD = 0x2;
        const AVATAR_AWARD_NEEDS_DOWNLOAD = 0x10;
    }
}

impl Title {
    pub const HEADER_SIZE: usize = 0x28;

    pub fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn last_played_at(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.last_played)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::HEADER_SIZE];
        BE::write_u32(&mut out[0x00..], self.id);
        BE::write_i32(&mut out[0x04..], self.achievement_count);
        BE::write_i32(&mut out[0x08..], self.achievement_unlocked_count);
        BE::write_i32(&mut out[0x0c..], self.gamerscore_total);
        BE::write_i32(&mut out[0x10..], self.gamerscore_unlocked);
        out[0x14..0x1c].copy_from_slice(&[
            self.unknown,
            self.achievement_unlocked_online_count,
            self.avatar_assets_earned,
            self.avatar_assets_max,
            self.male_avatar_assets_earned,
            self.male_avatar_assets_max,
            self.female_avatar_assets_earned,
            self.female_avatar_assets_max,
        ]);
        BE::write_u32(&mut out[0x1c..], self.flags.bits());
        BE::write_i64(&mut out[0x20..], self.last_played);
        write_cstr_utf16(&mut out, &self.name);
        out
    }
}

impl Record for Title {
    const NAMESPACE: Namespace = Namespace::Title;

    fn decode(row: &EntryRow, data: &[u8]) -> Self {
        let expected = Self::HEADER_SIZE.max(row.length as usize);
        if data.len() < expected {
            return Self {
                id: row.id as u32,
                validation_error: Some(format!(
                    "Data too short for title entry (expected {expected}, got {})",
                    data.len()
                )),
                ..Default::default()
            };
        }

        Self {
            id: BE::read_u32(&data[0x00..]),
            achievement_count: BE::read_i32(&data[0x04..]),
            achievement_unlocked_count: BE::read_i32(&data[0x08..]),
            gamerscore_total: BE::read_i32(&data[0x0c..]),
            gamerscore_unlocked: BE::read_i32(&data[0x10..]),
            unknown: data[0x14],
            achievement_unlocked_online_count: data[0x15],
            avatar_assets_earned: data[0x16],
            avatar_assets_max: data[0x17],
            male_avatar_assets_earned: data[0x18],
            male_avatar_assets_max: data[0x19],
            female_avatar_assets_earned: data[0x1a],
            female_avatar_assets_max: data[0x1b],
            flags: TitleFlags::from_bits_retain(BE::read_u32(&data[0x1c..])),
            last_played: BE::read_i64(&data[0x20..]),
            name: read_cstr_utf16(data, &mut { Self::HEADER_SIZE }),
            validation_error: None,
        }
    }

    fn validation_error(&self) -> Option<&str> {
        self.validation_error.as_deref()
    }
}
