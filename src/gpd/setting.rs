use byteorder::{ByteOrder, BE};
use chrono::{DateTime, Utc};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::record::{datetime_to_filetime, filetime_to_datetime, Record};
use super::table::{EntryRow, Namespace};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum SettingType {
    Context = 0,
    Int32 = 1,
    Int64 = 2,
    Double = 3,
    String = 4,
    Float = 5,
    Binary = 6,
    DateTime = 7,
    Null = 0xff,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Context(u8),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Float(f32),
    Binary(Vec<u8>),
    DateTime(DateTime<Utc>),
    Null,
}

/// https://free60.org/System-Software/Formats/GPD/#setting-entry
///
/// A 16-byte header followed by the value bytes. String and binary values
/// carry a big-endian byte length prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Setting {
    pub id: u32,
    pub dos_time: u16,
    pub unknown: u16,
    pub data_type: u8,
    pub data: Vec<u8>,
    pub validation_error: Option<String>,
}

impl Setting {
    pub const HEADER_SIZE: usize = 16;

    pub fn new(id: u32) -> Self {
        Self {
            id,
            data_type: SettingType::Null.into(),
            ..Default::default()
        }
    }

    pub fn setting_type(&self) -> Option<SettingType> {
        SettingType::try_from(self.data_type).ok()
    }

    /// Decodes the value according to the type byte. `None` for unknown types
    /// and for data too short to hold the value.
    pub fn value(&self) -> Option<SettingValue> {
        let d = &self.data;
        let value = match self.setting_type()? {
            SettingType::Null => SettingValue::Null,
            SettingType::Context => SettingValue::Context(*d.first()?),
            SettingType::Int32 => SettingValue::Int32(BE::read_i32(d.get(..4)?)),
            SettingType::Int64 => SettingValue::Int64(BE::read_i64(d.get(..8)?)),
            SettingType::Float => SettingValue::Float(BE::read_f32(d.get(..4)?)),
            SettingType::Double => SettingValue::Double(BE::read_f64(d.get(..8)?)),
            SettingType::DateTime => {
                SettingValue::DateTime(filetime_to_datetime(BE::read_i64(d.get(..8)?))?)
            }
            SettingType::String => {
                let units: Vec<u16> = self
                    .length_prefixed()?
                    .chunks_exact(2)
                    .map(BE::read_u16)
                    .collect();
                SettingValue::String(String::from_utf16_lossy(&units))
            }
            SettingType::Binary => SettingValue::Binary(self.length_prefixed()?.to_vec()),
        };
        Some(value)
    }

    fn length_prefixed(&self) -> Option<&[u8]> {
        let len = BE::read_i32(self.data.get(..4)?);
        if len <= 0 {
            return None;
        }
        self.data.get(4..4 + len as usize)
    }

    pub fn set_int32(&mut self, value: i32) {
        self.data = value.to_be_bytes().to_vec();
        self.data_type = SettingType::Int32.into();
    }

    pub fn set_int64(&mut self, value: i64) {
        self.data = value.to_be_bytes().to_vec();
        self.data_type = SettingType::Int64.into();
    }

    pub fn set_datetime(&mut self, value: DateTime<Utc>) {
        self.data = datetime_to_filetime(value).to_be_bytes().to_vec();
        self.data_type = SettingType::DateTime.into();
    }

    pub fn set_string(&mut self, value: &str) {
        let bytes: Vec<u8> = value.encode_utf16().flat_map(u16::to_be_bytes).collect();
        self.set_length_prefixed(&bytes);
        self.data_type = SettingType::String.into();
    }

    pub fn set_binary(&mut self, value: &[u8]) {
        self.set_length_prefixed(value);
        self.data_type = SettingType::Binary.into();
    }

    fn set_length_prefixed(&mut self, value: &[u8]) {
        self.data = Vec::with_capacity(4 + value.len());
        self.data
            .extend_from_slice(&(value.len() as i32).to_be_bytes());
        self.data.extend_from_slice(value);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::HEADER_SIZE];
        BE::write_u32(&mut out[0x0..], self.id);
        BE::write_u16(&mut out[0x4..], self.dos_time);
        BE::write_u16(&mut out[0x6..], self.unknown);
        out[0x8] = self.data_type;
        out.extend_from_slice(&self.data);
        out
    }
}

impl Record for Setting {
    const NAMESPACE: Namespace = Namespace::Setting;

    fn decode(row: &EntryRow, data: &[u8]) -> Self {
        let invalid = |reason: String| Self {
            id: row.id as u32,
            validation_error: Some(reason),
            ..Default::default()
        };

        if data.len() < Self::HEADER_SIZE {
            return invalid(format!(
                "Data too short for setting entry (expected {}, got {})",
                Self::HEADER_SIZE,
                data.len()
            ));
        }
        if data.len() < row.length as usize {
            return invalid(format!(
                "Data too short for setting entry (expected {}, got {})",
                row.length,
                data.len()
            ));
        }

        Self {
            id: BE::read_u32(&data[0x0..]),
            dos_time: BE::read_u16(&data[0x4..]),
            unknown: BE::read_u16(&data[0x6..]),
            data_type: data[0x8],
            data: data[Self::HEADER_SIZE..].to_vec(),
            validation_error: None,
        }
    }

    fn validation_error(&self) -> Option<&str> {
        self.validation_error.as_deref()
    }
}
