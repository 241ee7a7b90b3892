use byteorder::{ByteOrder, BE, LE};
use num_enum::TryFromPrimitive;

/// Byte order of the header and tables, chosen by the magic.
/// Console files are big-endian, PC tools write little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    /// `XDBF` read as a big-endian word.
    pub const MAGIC: u32 = 0x5844_4246;

    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            Self::MAGIC => Some(Self::Big),
            m if m == Self::MAGIC.swap_bytes() => Some(Self::Little),
            _ => None,
        }
    }

    pub fn read_u16(self, buf: &[u8]) -> u16 {
        match self {
            Self::Big => BE::read_u16(buf),
            Self::Little => LE::read_u16(buf),
        }
    }

    pub fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Self::Big => BE::read_u32(buf),
            Self::Little => LE::read_u32(buf),
        }
    }

    pub fn read_u64(self, buf: &[u8]) -> u64 {
        match self {
            Self::Big => BE::read_u64(buf),
            Self::Little => LE::read_u64(buf),
        }
    }

    pub fn write_u16(self, buf: &mut [u8], n: u16) {
        match self {
            Self::Big => BE::write_u16(buf, n),
            Self::Little => LE::write_u16(buf, n),
        }
    }

    pub fn write_u32(self, buf: &mut [u8], n: u32) {
        match self {
            Self::Big => BE::write_u32(buf, n),
            Self::Little => LE::write_u32(buf, n),
        }
    }

    pub fn write_u64(self, buf: &mut [u8], n: u64) {
        match self {
            Self::Big => BE::write_u64(buf, n),
            Self::Little => LE::write_u64(buf, n),
        }
    }
}

/// https://free60.org/System-Software/Formats/GPD/#header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub endian: Endian,
    pub version: u32,
    pub entry_capacity: u32,
    pub entry_count: u32,
    pub free_space_capacity: u32,
    pub free_space_count: u32,
}

impl Header {
    pub const SIZE: usize = 24;

    /// Reads the header, or returns the magic that did not match either byte order.
    pub fn parse(buf: &[u8; Self::SIZE]) -> Result<Self, u32> {
        let magic = BE::read_u32(&buf[0..]);
        let endian = Endian::from_magic(magic).ok_or(magic)?;

        Ok(Self {
            endian,
            version: endian.read_u32(&buf[0x04..]),
            entry_capacity: endian.read_u32(&buf[0x08..]),
            entry_count: endian.read_u32(&buf[0x0c..]),
            free_space_capacity: endian.read_u32(&buf[0x10..]),
            free_space_count: endian.read_u32(&buf[0x14..]),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let e = self.endian;
        e.write_u32(&mut buf[0x00..], Endian::MAGIC);
        e.write_u32(&mut buf[0x04..], self.version);
        e.write_u32(&mut buf[0x08..], self.entry_capacity);
        e.write_u32(&mut buf[0x0c..], self.entry_count);
        e.write_u32(&mut buf[0x10..], self.free_space_capacity);
        e.write_u32(&mut buf[0x14..], self.free_space_count);
        buf
    }

    /// Offset of the data section from the start of the file.
    pub fn data_offset(&self) -> u64 {
        Self::SIZE as u64
            + self.entry_capacity as u64 * EntryRow::SIZE as u64
            + self.free_space_capacity as u64 * FreeSpaceRow::SIZE as u64
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum Namespace {
    Achievement = 1,
    Image = 2,
    Setting = 3,
    Title = 4,
    String = 5,
    AvatarAward = 6,
}

/// One row of the entry table. `offset` is relative to the data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRow {
    pub namespace: u16,
    pub id: u64,
    pub offset: u32,
    pub length: u32,
}

impl EntryRow {
    pub const SIZE: usize = 18;

    const SYNC_LIST_ID: u64 = 0x1_0000_0000;
    const SYNC_DATA_ID: u64 = 0x2_0000_0000;

    pub fn new(namespace: Namespace, id: u64) -> Self {
        Self {
            namespace: namespace as u16,
            id,
            offset: 0,
            length: 0,
        }
    }

    pub fn namespace(&self) -> Option<Namespace> {
        Namespace::try_from(self.namespace).ok()
    }

    pub fn is_in(&self, namespace: Namespace) -> bool {
        self.namespace == namespace as u16
    }

    // Older tools used the bare ids 1 and 2, which are ordinary ids for
    // achievements and images.
    fn has_short_sync_ids(&self) -> bool {
        !self.is_in(Namespace::Achievement) && !self.is_in(Namespace::Image)
    }

    pub fn is_sync_list(&self) -> bool {
        self.id == Self::SYNC_LIST_ID || (self.id == 1 && self.has_short_sync_ids())
    }

    pub fn is_sync_data(&self) -> bool {
        self.id == Self::SYNC_DATA_ID || (self.id == 2 && self.has_short_sync_ids())
    }

    pub fn is_sync(&self) -> bool {
        self.is_sync_list() || self.is_sync_data()
    }

    pub fn parse(buf: &[u8], endian: Endian) -> Self {
        Self {
            namespace: endian.read_u16(&buf[0x0..]),
            id: endian.read_u64(&buf[0x2..]),
            offset: endian.read_u32(&buf[0xa..]),
            length: endian.read_u32(&buf[0xe..]),
        }
    }

    pub fn write(&self, buf: &mut [u8], endian: Endian) {
        endian.write_u16(&mut buf[0x0..], self.namespace);
        endian.write_u64(&mut buf[0x2..], self.id);
        endian.write_u32(&mut buf[0xa..], self.offset);
        endian.write_u32(&mut buf[0xe..], self.length);
    }
}

/// A reclaimed range of the data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSpaceRow {
    pub offset: u32,
    pub length: u32,
}

impl FreeSpaceRow {
    pub const SIZE: usize = 8;

    pub fn parse(buf: &[u8], endian: Endian) -> Self {
        Self {
            offset: endian.read_u32(&buf[0..]),
            length: endian.read_u32(&buf[4..]),
        }
    }

    pub fn write(&self, buf: &mut [u8], endian: Endian) {
        endian.write_u32(&mut buf[0..], self.offset);
        endian.write_u32(&mut buf[4..], self.length);
    }
}
