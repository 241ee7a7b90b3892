use bitflags::bitflags;
use byteorder::{ByteOrder, BE};
use chrono::{DateTime, Utc};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::record::{
    datetime_to_filetime, filetime_to_datetime, read_cstr_utf16, write_cstr_utf16, Record,
};
use super::table::{EntryRow, Namespace};

/// https://free60.org/System-Software/Formats/GPD/#achievement-entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Achievement {
    pub id: u32,
    pub image_id: u32,
    pub gamerscore: i32,
    pub flags: AchievementFlags,
    /// FILETIME, zero while locked.
    pub unlock_time: i64,
    pub name: String,
    pub unlocked_description: String,
    pub locked_description: String,
    pub validation_error: Option<String>,
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct AchievementFlags: u32 {
        const SHOW_UNACHIEVED = 0x8;
        const UNLOCKED_ONLINE = 0x1_0000;
        const EARNED = 0x2_0000;
        const EDITED = 0x10_0000;
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum AchievementType {
    Completion = 1,
    Leveling = 2,
    Unlock = 3,
    Event = 4,
    Tournament = 5,
    Checkpoint = 6,
    Other = 7,
}

impl Achievement {
    pub const HEADER_SIZE: usize = 0x1c;

    const TYPE_MASK: u32 = 0x7;

    /// Title id of the game this achievement belongs to.
    pub fn title_id(&self) -> u32 {
        self.id >> 16
    }

    pub fn achievement_type(&self) -> Option<AchievementType> {
        AchievementType::try_from(self.flags.bits() & Self::TYPE_MASK).ok()
    }

    pub fn set_achievement_type(&mut self, ty: AchievementType) {
        let bits = (self.flags.bits() & !Self::TYPE_MASK) | u32::from(ty);
        self.flags = AchievementFlags::from_bits_retain(bits);
    }

    pub fn is_earned(&self) -> bool {
        self.flags.contains(AchievementFlags::EARNED)
    }

    pub fn unlocked_at(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.unlock_time)
    }

    pub fn unlock(&mut self, time: DateTime<Utc>) {
        self.flags.insert(AchievementFlags::EARNED);
        self.unlock_time = datetime_to_filetime(time);
    }

    pub fn lock(&mut self) {
        self.flags
            .remove(AchievementFlags::EARNED | AchievementFlags::UNLOCKED_ONLINE);
        self.unlock_time = 0;
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::HEADER_SIZE];
        BE::write_u32(&mut out[0x00..], Self::HEADER_SIZE as u32);
        BE::write_u32(&mut out[0x04..], self.id);
        BE::write_u32(&mut out[0x08..], self.image_id);
        BE::write_i32(&mut out[0x0c..], self.gamerscore);
        BE::write_u32(&mut out[0x10..], self.flags.bits());
        BE::write_i64(&mut out[0x14..], self.unlock_time);

        write_cstr_utf16(&mut out, &self.name);
        write_cstr_utf16(&mut out, &self.unlocked_description);
        write_cstr_utf16(&mut out, &self.locked_description);
        out
    }

    fn invalid(row: &EntryRow, reason: String) -> Self {
        Self {
            id: row.id as u32,
            validation_error: Some(reason),
            ..Default::default()
        }
    }
}

impl Record for Achievement {
    const NAMESPACE: Namespace = Namespace::Achievement;

    fn decode(row: &EntryRow, data: &[u8]) -> Self {
        let expected = Self::HEADER_SIZE.max(row.length as usize);
        if data.len() < expected {
            return Self::invalid(
                row,
                format!(
                    "Data too short for achievement entry (expected {expected}, got {})",
                    data.len()
                ),
            );
        }

        let struct_size = BE::read_u32(&data[0x00..]);
        if (struct_size as usize) < Self::HEADER_SIZE {
            return Self::invalid(
                row,
                format!(
                    "Invalid achievement struct size: {struct_size} (minimum: {})",
                    Self::HEADER_SIZE
                ),
            );
        }

        let mut pos = Self::HEADER_SIZE;
        Self {
            id: BE::read_u32(&data[0x04..]),
            image_id: BE::read_u32(&data[0x08..]),
            gamerscore: BE::read_i32(&data[0x0c..]),
            flags: AchievementFlags::from_bits_retain(BE::read_u32(&data[0x10..])),
            unlock_time: BE::read_i64(&data[0x14..]),
            name: read_cstr_utf16(data, &mut pos),
            unlocked_description: read_cstr_utf16(data, &mut pos),
            locked_description: read_cstr_utf16(data, &mut pos),
            validation_error: None,
        }
    }

    fn validation_error(&self) -> Option<&str> {
        self.validation_error.as_deref()
    }
}
