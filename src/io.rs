use std::io::{self, Cursor, Read, Seek};
use std::marker::PhantomData;

use byteorder::{ByteOrder, BE};

pub trait ReadFromRange
where
    Self: Sized,
{
    fn read_from_range<R: Read + Seek>(r: R, off: u64, len: u64) -> io::Result<Self>;

    fn read_from_slice(data: &[u8], off: u64, len: u64) -> io::Result<Self> {
        Self::read_from_range(Cursor::new(data), off, len)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct RangeRef<T> {
    _value: PhantomData<T>,
    offset: u64,
    length: u64,
}

impl<T> Copy for RangeRef<T> {}
impl<T> Clone for RangeRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> RangeRef<T> {
    pub fn new(offset: u64, length: u64) -> Self {
        Self {
            _value: PhantomData,
            offset,
            length,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Whether the range lies entirely inside a buffer of `len` bytes.
    pub fn fits(&self, len: u64) -> bool {
        self.offset.checked_add(self.length).is_some_and(|end| end <= len)
    }
}

impl<T: ReadFromRange> RangeRef<T> {
    pub fn read<R: Read + Seek>(&self, r: R) -> io::Result<T> {
        T::read_from_range(r, self.offset, self.length)
    }
}

pub const fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Reads `len` bytes of big-endian UTF-16, stopping at the first NUL code unit.
/// Short input is padded with zeros.
pub fn read_utf16_be(r: impl Read, len: usize) -> io::Result<String> {
    let mut buf = Vec::with_capacity(len);
    r.take(len as u64).read_to_end(&mut buf)?;
    buf.resize(len, 0);
    Ok(utf16_be_trimmed(&buf))
}

/// Decodes big-endian UTF-16 up to the first NUL code unit.
pub fn utf16_be_trimmed(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(BE::read_u16)
        .take_while(|c| *c != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encodes `s` as big-endian UTF-16 into exactly `len` bytes, truncating or zero-padding.
pub fn utf16_be_fixed(s: &str, len: usize) -> Vec<u8> {
    let mut out: Vec<u8> = s.encode_utf16().flat_map(u16::to_be_bytes).collect();
    out.resize(len, 0);
    out
}

/// Reads `len` bytes of ASCII text with trailing NULs removed.
pub fn read_ascii(r: impl Read, len: usize) -> io::Result<String> {
    let mut buf = Vec::with_capacity(len);
    r.take(len as u64).read_to_end(&mut buf)?;
    buf.resize(len, 0);
    Ok(ascii_trimmed(&buf))
}

pub fn ascii_trimmed(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    bytes[..end]
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}

/// Encodes `s` as ASCII into exactly `len` bytes. Non-ASCII characters become `?`.
pub fn ascii_fixed(s: &str, len: usize) -> Vec<u8> {
    let mut out: Vec<u8> = s
        .chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .take(len)
        .collect();
    out.resize(len, 0);
    out
}
