use byteorder::{ByteOrder, BE};
use chrono::{DateTime, Utc};

use super::table::{EntryRow, Namespace};

/// A typed record decoded from one entry's slice of the data section.
///
/// Decoding never fails. A record that does not fit its slice is kept with
/// a `validation_error` so that callers can still list it.
pub trait Record: Sized {
    const NAMESPACE: Namespace;

    /// `data` is the entry's range clamped to the data section, so it may be
    /// shorter than `row.length`.
    fn decode(row: &EntryRow, data: &[u8]) -> Self;

    fn validation_error(&self) -> Option<&str>;

    fn is_valid(&self) -> bool {
        self.validation_error().is_none()
    }
}

// 100ns intervals between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;
const FILETIME_TICKS_PER_SEC: i64 = 10_000_000;

/// Zero and negative FILETIMEs mean "never".
pub fn filetime_to_datetime(filetime: i64) -> Option<DateTime<Utc>> {
    if filetime <= 0 {
        return None;
    }

    let ticks = filetime - FILETIME_UNIX_EPOCH;
    let secs = ticks.div_euclid(FILETIME_TICKS_PER_SEC);
    let nanos = ticks.rem_euclid(FILETIME_TICKS_PER_SEC) * 100;
    DateTime::from_timestamp(secs, nanos as u32)
}

pub fn datetime_to_filetime(time: DateTime<Utc>) -> i64 {
    time.timestamp()
        .saturating_mul(FILETIME_TICKS_PER_SEC)
        .saturating_add(i64::from(time.timestamp_subsec_nanos() / 100))
        .saturating_add(FILETIME_UNIX_EPOCH)
}

/// Reads a NUL-terminated UTF-16BE string starting at `*pos` and moves past
/// the terminator. Without a terminator the string is empty and `*pos` ends
/// up at the end of `data`.
pub(crate) fn read_cstr_utf16(data: &[u8], pos: &mut usize) -> String {
    let start = *pos;
    let mut end = start;

    while end + 1 < data.len() {
        if data[end] == 0 && data[end + 1] == 0 {
            let units: Vec<u16> = data[start..end].chunks_exact(2).map(BE::read_u16).collect();
            *pos = end + 2;
            return String::from_utf16_lossy(&units);
        }
        end += 2;
    }

    *pos = data.len();
    String::new()
}

pub(crate) fn write_cstr_utf16(out: &mut Vec<u8>, s: &str) {
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out.extend_from_slice(&[0, 0]);
}

fn short_data(data: &[u8], row: &EntryRow) -> Option<String> {
    (data.len() < row.length as usize).then(|| {
        format!(
            "Data too short: expected {} bytes, got {}",
            row.length,
            data.len()
        )
    })
}

/// Raw image bytes, PNG for everything the console writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    pub id: u64,
    pub data: Vec<u8>,
    pub validation_error: Option<String>,
}

impl Image {
    const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    pub fn new(id: u64, data: Vec<u8>) -> Self {
        Self {
            id,
            data,
            validation_error: None,
        }
    }

    pub fn is_png(&self) -> bool {
        self.data.starts_with(&Self::PNG_SIGNATURE)
    }
}

impl Record for Image {
    const NAMESPACE: Namespace = Namespace::Image;

    fn decode(row: &EntryRow, data: &[u8]) -> Self {
        Self {
            id: row.id,
            data: data.to_vec(),
            validation_error: short_data(data, row),
        }
    }

    fn validation_error(&self) -> Option<&str> {
        self.validation_error.as_deref()
    }
}

/// A localized string, stored NUL-terminated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringRecord {
    pub id: u64,
    pub value: String,
    pub validation_error: Option<String>,
}

impl StringRecord {
    pub fn new(id: u64, value: &str) -> Self {
        Self {
            id,
            value: value.to_owned(),
            validation_error: None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity((self.value.len() + 1) * 2);
        write_cstr_utf16(&mut out, &self.value);
        out
    }
}

impl Record for StringRecord {
    const NAMESPACE: Namespace = Namespace::String;

    fn decode(row: &EntryRow, data: &[u8]) -> Self {
        if let Some(err) = short_data(data, row) {
            return Self {
                id: row.id,
                validation_error: Some(err),
                ..Default::default()
            };
        }

        Self {
            id: row.id,
            value: read_cstr_utf16(data, &mut 0),
            validation_error: None,
        }
    }

    fn validation_error(&self) -> Option<&str> {
        self.validation_error.as_deref()
    }
}
