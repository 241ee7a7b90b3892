use bitflags::bitflags;
use byteorder::{ReadBytesExt, BE, LE};
use num_enum::TryFromPrimitive;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Deref;

use crate::io::{read_utf16_be, ReadFromRange};

use super::SignatureKind;

pub const METADATA_OFFSET: u64 = 0x22c;
const LICENSE_COUNT: usize = 0x10;
const THUMBNAIL_OFFSET: u64 = 0x171a;
const TITLE_THUMBNAIL_OFFSET: u64 = 0x571a;

#[derive(Debug, Clone)]
pub struct Metadata {
    pub licenses: Vec<LicenseEntry>,
    pub header_sha1: [u8; 20],
    pub header_size: u32,
    pub content_type_raw: u32,
    pub metadata_version: u32,
    pub content_size: u64,
    pub media_id: u32,
    pub version: u32,
    pub base_version: u32,
    pub title_id: u32,
    pub platform: u8,
    pub executable_type: u8,
    pub disc_number: u8,
    pub disc_in_set: u8,
    pub save_game_id: u32,
    pub console_id: [u8; 5],
    pub profile_id: [u8; 8],
    pub volume_descriptor: VolumeDescriptor,
    pub data_file_count: u32,
    pub data_file_combined_size: u64,
    pub descriptor_type: u32,

    // version 2 fields:
    pub series_id: [u8; 16],
    pub season_id: [u8; 16],
    pub season_number: i16,
    pub episode_number: i16,
    pub additional_display_names: SmallString,
    pub additional_display_descriptions: SmallString,

    pub device_id: [u8; 20],
    pub display_name: SmallString,
    pub display_description: SmallString,
    pub publisher_name: SmallString,
    pub title_name: SmallString,
    pub transfer_flags: TransferFlags,
    pub thumbnail: Box<[u8]>,
    pub title_thumbnail: Box<[u8]>,
}

impl Metadata {
    pub fn content_type(&self) -> Option<ContentType> {
        ContentType::try_from(self.content_type_raw).ok()
    }

    pub fn content_type_hex(&self) -> String {
        format!("{:08X}", self.content_type_raw)
    }

    pub fn title_id_hex(&self) -> String {
        format!("{:08X}", self.title_id)
    }
}

impl ReadFromRange for Metadata {
    fn read_from_range<R: Read + Seek>(mut r: R, off: u64, _len: u64) -> io::Result<Self> {
        // every offset below is absolute within the package header
        let at = |x: u64| SeekFrom::Start(off + x - METADATA_OFFSET);

        r.seek(at(METADATA_OFFSET))?;

        let mut licenses = Vec::new();
        for _ in 0..LICENSE_COUNT {
            let entry = LicenseEntry {
                licensee_id: r.read_u64::<BE>()?,
                bits: r.read_u32::<BE>()?,
                flags: r.read_u32::<BE>()?,
            };
            if !entry.is_empty() {
                licenses.push(entry);
            }
        }

        let mut header_sha1 = [0u8; 20];
        r.read_exact(&mut header_sha1)?;

        let header_size = r.read_u32::<BE>()?;
        let content_type_raw = r.read_u32::<BE>()?;
        let metadata_version = r.read_u32::<BE>()?;
        let content_size = r.read_u64::<BE>()?;
        let media_id = r.read_u32::<BE>()?;
        let version = r.read_u32::<BE>()?;
        let base_version = r.read_u32::<BE>()?;
        let title_id = r.read_u32::<BE>()?;
        let platform = r.read_u8()?;
        let executable_type = r.read_u8()?;
        let disc_number = r.read_u8()?;
        let disc_in_set = r.read_u8()?;
        let save_game_id = r.read_u32::<BE>()?;

        let mut console_id = [0u8; 5];
        r.read_exact(&mut console_id)?;

        let mut profile_id = [0u8; 8];
        r.read_exact(&mut profile_id)?;

        let desc_off = r.stream_position()?;
        let volume_descriptor =
            VolumeDescriptor::read_from_range(&mut r, desc_off, VolumeDescriptor::SIZE)?;

        r.seek(SeekFrom::Start(desc_off + VolumeDescriptor::SIZE))?;
        let data_file_count = r.read_u32::<BE>()?;
        let data_file_combined_size = r.read_u64::<BE>()?;
        let descriptor_type = r.read_u32::<BE>()?;

        let mut series_id = [0u8; 16];
        let mut season_id = [0u8; 16];
        let mut season_number = 0;
        let mut episode_number = 0;

        if metadata_version == 2 {
            r.seek(at(0x3b1))?;
            r.read_exact(&mut series_id)?;
            r.read_exact(&mut season_id)?;
            season_number = r.read_i16::<BE>()?;
            episode_number = r.read_i16::<BE>()?;
        }

        r.seek(at(0x3fd))?;
        let mut device_id = [0u8; 20];
        r.read_exact(&mut device_id)?;

        let display_name = SmallString::read_from(&mut r, 0x900)?;
        let display_description = SmallString::read_from(&mut r, 0x900)?;
        let publisher_name = SmallString::read_from(&mut r, 0x80)?;
        let title_name = SmallString::read_from(&mut r, 0x80)?;

        let transfer_flags = r.read_u8().map(TransferFlags::from_bits_retain)?;
        let thumbnail_len = r.read_u32::<BE>()? as usize;
        let title_thumbnail_len = r.read_u32::<BE>()? as usize;

        let capacity = if metadata_version == 2 { 0x3d00 } else { 0x4000 };

        r.seek(at(THUMBNAIL_OFFSET))?;
        let thumbnail = read_image(&mut r, thumbnail_len, capacity)?;

        r.seek(at(TITLE_THUMBNAIL_OFFSET))?;
        let title_thumbnail = read_image(&mut r, title_thumbnail_len, capacity)?;

        let mut additional_display_names = SmallString::new();
        let mut additional_display_descriptions = SmallString::new();

        if metadata_version == 2 {
            r.seek(at(0x541a))?;
            additional_display_names = SmallString::read_from(&mut r, 0x300)?;

            r.seek(at(0x941a))?;
            additional_display_descriptions = SmallString::read_from(&mut r, 0x300)?;
        }

        Ok(Self {
            licenses,
            header_sha1,
            header_size,
            content_type_raw,
            metadata_version,
            content_size,
            media_id,
            version,
            base_version,
            title_id,
            platform,
            executable_type,
            disc_number,
            disc_in_set,
            save_game_id,
            console_id,
            profile_id,
            volume_descriptor,
            data_file_count,
            data_file_combined_size,
            descriptor_type,
            series_id,
            season_id,
            season_number,
            episode_number,
            additional_display_names,
            additional_display_descriptions,
            device_id,
            display_name,
            display_description,
            publisher_name,
            title_name,
            transfer_flags,
            thumbnail,
            title_thumbnail,
        })
    }
}

// Out-of-range sizes are treated as "no image", same as an empty slot.
fn read_image(r: impl Read, len: usize, capacity: usize) -> io::Result<Box<[u8]>> {
    if len == 0 || len > capacity {
        return Ok(Box::new([]));
    }
    let mut buf = Vec::with_capacity(len);
    r.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf.into_boxed_slice())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LicenseEntry {
    pub licensee_id: u64,
    pub bits: u32,
    pub flags: u32,
}

impl LicenseEntry {
    pub fn is_empty(&self) -> bool {
        self.licensee_id == 0 && self.bits == 0 && self.flags == 0
    }
}

/// https://free60.org/System-Software/Formats/STFS/#stfs-volume-descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeDescriptor {
    pub size: u8,
    pub version: u8,
    pub flags: VolumeFlags,
    pub file_table_block_count: u16,
    pub file_table_block_number: u32, // u24
    pub top_hash_table_hash: [u8; 20],
    pub allocated_block_count: u32,
    pub unallocated_block_count: u32,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VolumeFlags: u8 {
        const READ_ONLY_FORMAT = 1 << 0;
        const ROOT_ACTIVE_INDEX = 1 << 1;
    }
}

impl VolumeDescriptor {
    pub const SIZE: u64 = 0x24;

    /// Hash table density recorded in the package, falling back to what the
    /// signature kind implies when the descriptor is blank.
    pub fn blocks_per_hash_table(&self, kind: SignatureKind) -> u32 {
        if self.size == 0 {
            return kind.default_blocks_per_hash_table();
        }
        if self.flags.contains(VolumeFlags::READ_ONLY_FORMAT) {
            1
        } else {
            2
        }
    }
}

impl ReadFromRange for VolumeDescriptor {
    fn read_from_range<R: Read + Seek>(mut r: R, off: u64, _len: u64) -> io::Result<Self> {
        r.seek(SeekFrom::Start(off))?;

        let size = r.read_u8()?;
        let version = r.read_u8()?;
        let flags = VolumeFlags::from_bits_retain(r.read_u8()?);

        // the block fields are little-endian, unlike everything around them
        let file_table_block_count = r.read_u16::<LE>()?;
        let file_table_block_number = r.read_u24::<LE>()?;

        let mut top_hash_table_hash = [0u8; 20];
        r.read_exact(&mut top_hash_table_hash)?;

        let allocated_block_count = r.read_u32::<BE>()?;
        let unallocated_block_count = r.read_u32::<BE>()?;

        Ok(Self {
            size,
            version,
            flags,
            file_table_block_count,
            file_table_block_number,
            top_hash_table_hash,
            allocated_block_count,
            unallocated_block_count,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum ContentType {
    SavedGame = 0x0000001,
    MarketplaceContent = 0x0000002,
    Publisher = 0x0000003,
    Xbox360Title = 0x0001000,
    IptvPauseBuffer = 0x0002000,
    InstalledGame = 0x0004000,
    XboxOriginalGame = 0x0005000,
    GameOnDemand = 0x0007000,
    AvatarItem = 0x0009000,
    Profile = 0x0010000,
    GamerPicture = 0x0020000,
    Theme = 0x0030000,
    CacheFile = 0x0040000,
    StorageDownload = 0x0050000,
    XboxSavedGame = 0x0060000,
    XboxDownload = 0x0070000,
    GameDemo = 0x0080000,
    Video = 0x0090000,
    GameTitle = 0x00A0000,
    Installer = 0x00B0000,
    GameTrailer = 0x00C0000,
    ArcadeTitle = 0x00D0000,
    Xna = 0x00E0000,
    LicenseStore = 0x00F0000,
    Movie = 0x0100000,
    Tv = 0x0200000,
    MusicVideo = 0x0300000,
    GameVideo = 0x0400000,
    PodcastVideo = 0x0500000,
    ViralVideo = 0x0600000,
    CommunityGame = 0x2000000,
}

impl ContentType {
    pub const fn name(self) -> &'static str {
        match self {
            Self::SavedGame => "Saved Game",
            Self::MarketplaceContent => "Marketplace Content",
            Self::Publisher => "Publisher",
            Self::Xbox360Title => "Xbox 360 Title",
            Self::IptvPauseBuffer => "IPTV Pause Buffer",
            Self::InstalledGame => "Installed Game",
            Self::XboxOriginalGame => "Xbox Original Game",
            Self::GameOnDemand => "Games on Demand",
            Self::AvatarItem => "Avatar Item",
            Self::Profile => "Profile",
            Self::GamerPicture => "Gamer Picture",
            Self::Theme => "Theme",
            Self::CacheFile => "Cache File",
            Self::StorageDownload => "Storage Download",
            Self::XboxSavedGame => "Xbox Saved Game",
            Self::XboxDownload => "Xbox Download",
            Self::GameDemo => "Game Demo",
            Self::Video => "Video",
            Self::GameTitle => "Game Title",
            Self::Installer => "Installer",
            Self::GameTrailer => "Game Trailer",
            Self::ArcadeTitle => "Arcade Title",
            Self::Xna => "XNA",
            Self::LicenseStore => "License Store",
            Self::Movie => "Movie",
            Self::Tv => "TV",
            Self::MusicVideo => "Music Video",
            Self::GameVideo => "Game Video",
            Self::PodcastVideo => "Podcast Video",
            Self::ViralVideo => "Viral Video",
            Self::CommunityGame => "Community Game",
        }
    }

    pub fn to_hex(self) -> String {
        format!("{:08X}", self as u32)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransferFlags: u8 {
        const DEEP_LINK_SUPPORTED = 1 << 2;
        const DISABLE_NETWORK_STORAGE = 1 << 3;
        const KINECT_ENABLED = 1 << 4;
        const MOVE_ONLY_TRANSFER = 1 << 5;
        const DEVICE_ID_TRANSFER = 1 << 6;
        const PROFILE_ID_TRANSFER = 1 << 7;
    }
}

// A UTF-16BE string read from a fixed-width header field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmallString(pub String);

impl SmallString {
    pub fn new() -> Self {
        Self(String::new())
    }

    pub fn read_from(r: impl Read, len: usize) -> io::Result<Self> {
        read_utf16_be(r, len).map(Self)
    }
}

impl Deref for SmallString {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for SmallString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
