use byteorder::{ReadBytesExt, BE};
use std::io::{self, Read, Seek, SeekFrom};

use crate::io::ReadFromRange;

/// https://free60.org/System-Software/Formats/XEX/#security-info
#[derive(Debug, Clone)]
pub struct SecurityInfo {
    pub header_size: u32,
    pub image_size: u32,
    pub image_info: ImageInfo,
    pub allowed_media_types: u32,
    pub page_descriptor_count: u32,
}

#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub signature: Box<[u8]>,
    pub info_size: u32,
    pub image_flags: u32,
    pub load_address: u32,
    pub image_hash: [u8; 0x14],
    pub import_table_count: u32,
    pub import_digest: [u8; 0x14],
    pub media_id: [u8; 0x10],
    pub file_key: [u8; 0x10],
    pub export_table: u32,
    pub header_hash: [u8; 0x14],
    pub game_region: u32,
}

impl SecurityInfo {
    /// Bytes that must be present at the security offset.
    pub const SIZE: u64 = 0x1a0;
}

impl ReadFromRange for SecurityInfo {
    fn read_from_range<R: Read + Seek>(mut r: R, off: u64, _len: u64) -> io::Result<Self> {
        r.seek(SeekFrom::Start(off))?;

        let header_size = r.read_u32::<BE>()?;
        let image_size = r.read_u32::<BE>()?;
        let image_info = ImageInfo::read_from(&mut r)?;
        let allowed_media_types = r.read_u32::<BE>()?;
        let page_descriptor_count = r.read_u32::<BE>()?;

        Ok(Self {
            header_size,
            image_size,
            image_info,
            allowed_media_types,
            page_descriptor_count,
        })
    }
}

impl ImageInfo {
    fn read_from(mut r: impl Read) -> io::Result<Self> {
        let mut signature = vec![0u8; 0x100];
        r.read_exact(&mut signature)?;

        let info_size = r.read_u32::<BE>()?;
        let image_flags = r.read_u32::<BE>()?;
        let load_address = r.read_u32::<BE>()?;

        let mut image_hash = [0u8; 0x14];
        r.read_exact(&mut image_hash)?;

        let import_table_count = r.read_u32::<BE>()?;
        let mut import_digest = [0u8; 0x14];
        r.read_exact(&mut import_digest)?;

        let mut media_id = [0u8; 0x10];
        r.read_exact(&mut media_id)?;
        let mut file_key = [0u8; 0x10];
        r.read_exact(&mut file_key)?;

        let export_table = r.read_u32::<BE>()?;
        let mut header_hash = [0u8; 0x14];
        r.read_exact(&mut header_hash)?;
        let game_region = r.read_u32::<BE>()?;

        Ok(Self {
            signature: signature.into_boxed_slice(),
            info_size,
            image_flags,
            load_address,
            image_hash,
            import_table_count,
            import_digest,
            media_id,
            file_key,
            export_table,
            header_hash,
            game_region,
        })
    }
}
