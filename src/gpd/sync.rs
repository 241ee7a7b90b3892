use super::table::Endian;

/// One (entry, sync) id pair. Unlike the typed records, sync records follow
/// the file's byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncItem {
    pub entry_id: u64,
    pub sync_id: u64,
}

impl SyncItem {
    pub const SIZE: usize = 16;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncList {
    pub items: Vec<SyncItem>,
    pub validation_error: Option<String>,
}

impl SyncList {
    pub fn decode(data: &[u8], length: u32, endian: Endian) -> Self {
        let count = length as usize / SyncItem::SIZE;
        let needed = count * SyncItem::SIZE;
        if data.len() < needed {
            return Self {
                items: Vec::new(),
                validation_error: Some(format!(
                    "Data too short for sync list (expected {needed}, got {})",
                    data.len()
                )),
            };
        }

        let items = data[..needed]
            .chunks_exact(SyncItem::SIZE)
            .map(|c| SyncItem {
                entry_id: endian.read_u64(&c[0..]),
                sync_id: endian.read_u64(&c[8..]),
            })
            .collect();

        Self {
            items,
            validation_error: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validation_error.is_none()
    }

    /// The first item is the list header and is not counted.
    pub fn total_items(&self) -> usize {
        self.items.len().saturating_sub(1)
    }

    pub fn add_item(&mut self, entry_id: u64, sync_id: u64) {
        self.items.push(SyncItem { entry_id, sync_id });
    }

    pub fn remove_item(&mut self, entry_id: u64) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.entry_id != entry_id);
        self.items.len() != before
    }

    pub fn to_bytes(&self, endian: Endian) -> Vec<u8> {
        let mut out = vec![0u8; self.items.len() * SyncItem::SIZE];
        for (item, chunk) in self.items.iter().zip(out.chunks_exact_mut(SyncItem::SIZE)) {
            endian.write_u64(&mut chunk[0..], item.entry_id);
            endian.write_u64(&mut chunk[8..], item.sync_id);
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncData {
    pub next_sync_id: u64,
    pub last_synced_id: u64,
    pub last_synced_time: i64,
    pub validation_error: Option<String>,
}

impl SyncData {
    pub const SIZE: usize = 0x18;

    pub fn decode(data: &[u8], endian: Endian) -> Self {
        if data.len() < Self::SIZE {
            return Self {
                validation_error: Some(format!(
                    "Data too short for sync data entry (expected {}, got {})",
                    Self::SIZE,
                    data.len()
                )),
                ..Default::default()
            };
        }

        Self {
            next_sync_id: endian.read_u64(&data[0x00..]),
            last_synced_id: endian.read_u64(&data[0x08..]),
            last_synced_time: endian.read_u64(&data[0x10..]) as i64,
            validation_error: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validation_error.is_none()
    }

    pub fn to_bytes(&self, endian: Endian) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        endian.write_u64(&mut out[0x00..], self.next_sync_id);
        endian.write_u64(&mut out[0x08..], self.last_synced_id);
        endian.write_u64(&mut out[0x10..], self.last_synced_time as u64);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_counts_exclude_header_item() {
        let mut list = SyncList::default();
        assert_eq!(list.total_items(), 0);
        list.add_item(0, 5);
        assert_eq!(list.total_items(), 0);
        list.add_item(0x4d53_0001, 3);
        list.add_item(0x4d53_0002, 4);
        assert_eq!(list.total_items(), 2);

        assert!(list.remove_item(0x4d53_0001));
        assert!(!list.remove_item(0x4d53_0001));
        assert_eq!(list.total_items(), 1);
    }

    #[test]
    fn list_uses_file_byte_order() {
        let mut list = SyncList::default();
        list.add_item(1, 2);

        let le = list.to_bytes(Endian::Little);
        assert_eq!(le[0], 1);
        assert_eq!(le[8], 2);
        assert_eq!(SyncList::decode(&le, 16, Endian::Little), list);

        let be = list.to_bytes(Endian::Big);
        assert_eq!(be[7], 1);
        assert_eq!(SyncList::decode(&be, 16, Endian::Big), list);
    }

    #[test]
    fn truncated_list_is_invalid() {
        let list = SyncList::decode(&[0u8; 20], 32, Endian::Big);
        assert!(!list.is_valid());
        assert!(list.items.is_empty());
    }

    #[test]
    fn sync_data_fields() {
        let data = SyncData {
            next_sync_id: 7,
            last_synced_id: 6,
            last_synced_time: 129_209_904_000_000_000,
            validation_error: None,
        };
        let bytes = data.to_bytes(Endian::Little);
        assert_eq!(bytes[0], 7);
        assert_eq!(SyncData::decode(&bytes, Endian::Little), data);

        let short = SyncData::decode(&bytes[..10], Endian::Big);
        assert_eq!(
            short.validation_error.as_deref(),
            Some("Data too short for sync data entry (expected 24, got 10)")
        );
    }
}
