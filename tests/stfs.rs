//! Extraction from synthetic console-signed packages.

use proptest::prelude::*;
use sha1::{Digest, Sha1};

use xcontent::stfs::{BlockLayout, Error, Package, SignatureKind, END_OF_CHAIN};

const HEADER_SIZE: u32 = 0x971a;
const BLOCK: usize = 0x1000;
const TITLE_ID: u32 = 0x4d53_07e6;

const CONSECUTIVE: u8 = 0x40;
const DIRECTORY: u8 = 0x80;
const ROOT: u16 = 0xffff;
const IN_USE: u32 = 0x8000_0000;

struct PackageBuilder {
    data: Vec<u8>,
    layout: BlockLayout,
    entries: Vec<[u8; 0x40]>,
    file_table_block: u32,
}

impl PackageBuilder {
    fn new(file_table_block: u32) -> Self {
        let mut data = vec![0u8; 0xa000];
        data[..4].copy_from_slice(b"CON ");
        data[0x218..0x22c].copy_from_slice(&[0xc1; 20]);

        data[0x340..0x344].copy_from_slice(&HEADER_SIZE.to_be_bytes());
        data[0x344..0x348].copy_from_slice(&1u32.to_be_bytes());
        data[0x348..0x34c].copy_from_slice(&1u32.to_be_bytes());
        data[0x354..0x358].copy_from_slice(&0x1234_5678u32.to_be_bytes());
        data[0x360..0x364].copy_from_slice(&TITLE_ID.to_be_bytes());

        // volume descriptor, read-only format means one table per level
        data[0x379] = 0x24;
        data[0x37b] = 0x01;
        data[0x37c..0x37e].copy_from_slice(&1u16.to_le_bytes());
        data[0x37e..0x381].copy_from_slice(&file_table_block.to_le_bytes()[..3]);

        put_utf16(&mut data, 0x411, "Test Save");
        put_utf16(&mut data, 0x1691, "Halo 3");

        Self {
            data,
            layout: BlockLayout {
                header_size: HEADER_SIZE as u64,
                blocks_per_hash_table: 1,
            },
            entries: Vec::new(),
            file_table_block,
        }
    }

    fn block_offset(&self, block: u32) -> usize {
        self.layout.block_offset(block).unwrap() as usize
    }

    fn ensure_len(&mut self, len: usize) {
        if self.data.len() < len {
            self.data.resize(len, 0);
        }
    }

    fn write_block(&mut self, block: u32, bytes: &[u8]) {
        assert!(bytes.len() <= BLOCK);
        let off = self.block_offset(block);
        self.ensure_len(off + BLOCK);
        self.data[off..off + bytes.len()].copy_from_slice(bytes);
    }

    fn set_hash(&mut self, block: u32, info: u32) {
        let off = self.layout.hash_entry_offset(block, 0).unwrap() as usize;
        self.ensure_len(off + 0x18);
        self.data[off + 0x14..off + 0x18].copy_from_slice(&info.to_le_bytes());
    }

    fn set_hash_of_contents(&mut self, block: u32) {
        let off = self.block_offset(block);
        let digest: [u8; 20] = Sha1::digest(&self.data[off..off + BLOCK]).into();
        let hash = self.layout.hash_entry_offset(block, 0).unwrap() as usize;
        self.data[hash..hash + 20].copy_from_slice(&digest);
    }

    fn entry(&mut self, name: &str, flags: u8, blocks: u32, start: u32, parent: u16, size: u32) {
        let mut e = [0u8; 0x40];
        e[..name.len()].copy_from_slice(name.as_bytes());
        e[0x28] = flags | name.len() as u8;
        e[0x29..0x2c].copy_from_slice(&blocks.to_le_bytes()[..3]);
        e[0x2c..0x2f].copy_from_slice(&blocks.to_le_bytes()[..3]);
        e[0x2f..0x32].copy_from_slice(&start.to_le_bytes()[..3]);
        e[0x32..0x34].copy_from_slice(&parent.to_be_bytes());
        e[0x34..0x38].copy_from_slice(&size.to_be_bytes());
        // 2010-06-14 12:00:00
        e[0x38..0x3a].copy_from_slice(&0x3cceu16.to_be_bytes());
        e[0x3a..0x3c].copy_from_slice(&0x6000u16.to_be_bytes());
        self.entries.push(e);
    }

    fn build(mut self) -> Vec<u8> {
        let table: Vec<u8> = self.entries.concat();
        self.write_block(self.file_table_block, &table);
        self.data
    }
}

fn put_utf16(data: &mut [u8], off: usize, s: &str) {
    for (i, unit) in s.encode_utf16().enumerate() {
        data[off + i * 2..off + i * 2 + 2].copy_from_slice(&unit.to_be_bytes());
    }
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
}

/// Block 0 holds the file table, `readme.txt` sits in block 1, and
/// `saves/slot1.bin` is chained through blocks 3 then 2.
fn sample_package() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let readme = pattern(100, 1);
    let slot = pattern(5000, 9);

    let mut b = PackageBuilder::new(0);
    b.entry("saves", DIRECTORY, 0, 0, ROOT, 0);
    b.entry("readme.txt", CONSECUTIVE, 1, 1, ROOT, readme.len() as u32);
    b.entry("slot1.bin", 0, 2, 3, 0, slot.len() as u32);

    b.write_block(1, &readme);
    b.write_block(3, &slot[..BLOCK]);
    b.write_block(2, &slot[BLOCK..]);
    b.set_hash(0, IN_USE | END_OF_CHAIN);
    b.set_hash(1, IN_USE | END_OF_CHAIN);
    b.set_hash(3, IN_USE | 2);
    b.set_hash(2, IN_USE | END_OF_CHAIN);
    b.set_hash_of_contents(1);

    (b.build(), readme, slot)
}

#[test]
fn parses_header_fields() {
    let (data, _, _) = sample_package();
    let package = Package::from_bytes(data).unwrap();

    assert_eq!(package.kind(), SignatureKind::Console);
    assert!(package.signature.certificate.is_some());
    assert_eq!(package.content_id, [0xc1; 20]);
    assert_eq!(package.metadata.title_id, TITLE_ID);
    assert_eq!(package.metadata.title_id_hex(), "4D5307E6");
    assert_eq!(package.metadata.content_type_hex(), "00000001");
    assert_eq!(&*package.metadata.display_name, "Test Save");
    assert_eq!(&*package.metadata.title_name, "Halo 3");
    assert_eq!(package.layout().blocks_per_hash_table, 1);
}

#[test]
fn lists_entries_with_paths() {
    let (data, _, _) = sample_package();
    let package = Package::from_bytes(data).unwrap();

    assert_eq!(
        package.entry_paths(),
        ["saves", "readme.txt", "saves/slot1.bin"]
    );
    assert_eq!(package.files().count(), 2);
    assert_eq!(package.directories().count(), 1);
    assert_eq!(package.children(Some(0)).count(), 1);

    let updated = package.entries[1].updated.to_datetime().unwrap();
    assert_eq!(updated.to_string(), "2010-06-14 12:00:00");
}

#[test]
fn extracts_consecutive_file() {
    let (data, readme, _) = sample_package();
    let package = Package::from_bytes(data).unwrap();

    assert_eq!(package.extract_path("readme.txt").unwrap(), readme);
    assert_eq!(package.extract_path("/README.TXT").unwrap(), readme);
}

#[test]
fn follows_hash_chain_out_of_order() {
    let (data, _, slot) = sample_package();
    let package = Package::from_bytes(data).unwrap();

    let out = package.extract_path("saves/slot1.bin").unwrap();
    assert_eq!(out.len(), 5000);
    assert_eq!(out, slot);
}

#[test]
fn directories_and_missing_paths_are_errors() {
    let (data, _, _) = sample_package();
    let package = Package::from_bytes(data).unwrap();

    assert!(matches!(package.extract_path("saves"), Err(Error::IsDirectory(_))));
    assert!(matches!(package.extract_path("nope"), Err(Error::NotFound(_))));
}

#[test]
fn verifies_block_hashes() {
    let (data, _, _) = sample_package();
    let package = Package::from_bytes(data).unwrap();

    assert_eq!(package.verify_block(1), Some(true));
    assert_eq!(package.verify_block(3), Some(false));
    assert_eq!(package.verify_block(500), None);
}

#[test]
fn unused_block_stops_chain_early() {
    let (mut data, _, slot) = sample_package();
    let layout = Package::from_bytes(data.clone()).unwrap().layout();
    let hash = layout.hash_entry_offset(2, 0).unwrap() as usize;
    data[hash + 0x14..hash + 0x18].copy_from_slice(&END_OF_CHAIN.to_le_bytes());

    let package = Package::from_bytes(data).unwrap();
    let out = package.extract_path("saves/slot1.bin").unwrap();
    assert_eq!(out, &slot[..BLOCK]);
}

#[test]
fn chain_loop_ends_at_allocated_count() {
    let slot = pattern(3 * BLOCK, 3);
    let mut b = PackageBuilder::new(0);
    b.entry("loop.bin", 0, 2, 1, ROOT, slot.len() as u32);
    b.write_block(1, &slot[..BLOCK]);
    // block 1 points at itself
    b.set_hash(1, IN_USE | 1);
    let package = Package::from_bytes(b.build()).unwrap();

    let out = package.extract_path("loop.bin").unwrap();
    assert_eq!(out.len(), 2 * BLOCK);
}

#[test]
fn first_data_block_follows_first_hash_table() {
    let contents = pattern(100, 42);
    let mut b = PackageBuilder::new(1);
    b.entry("data.bin", CONSECUTIVE, 1, 0, ROOT, 100);
    b.write_block(0, &contents);
    let data = b.build();

    assert_eq!(&data[0xb000..0xb000 + 100], &contents[..]);

    let package = Package::from_bytes(data).unwrap();
    let out = package.extract_path("data.bin").unwrap();
    assert_eq!(out.len(), 100);
    assert_eq!(out, contents);
}

#[test]
fn truncated_package_yields_partial_file() {
    let (mut data, _, _) = sample_package();
    let layout = Package::from_bytes(data.clone()).unwrap().layout();
    data.truncate(layout.block_offset(1).unwrap() as usize + 40);

    let package = Package::from_bytes(data).unwrap();
    let out = package.extract_path("readme.txt").unwrap();
    assert!(out.len() < 100);
}

#[test]
fn rejects_foreign_magic() {
    assert!(matches!(Package::from_bytes(vec![0; 2]), Err(Error::TooShort)));
    assert!(matches!(
        Package::from_bytes(b"XEX2....".to_vec()),
        Err(Error::UnsupportedMagic(_))
    ));
    assert!(matches!(
        Package::from_bytes(b"LIVE".to_vec()),
        Err(Error::TruncatedHeader(_))
    ));
}

#[test]
fn installs_into_content_layout() {
    let (data, readme, slot) = sample_package();
    let mut package = Package::from_bytes(data).unwrap();
    package.name = Some("ABCDEF0123456789".to_owned());

    let dir = tempfile::tempdir().unwrap();
    let written = package.extract_all(dir.path()).unwrap();
    assert_eq!(written, 2);

    let root = dir.path().join("4D5307E6");
    let pkg = root.join("00000001").join("ABCDEF0123456789");
    assert_eq!(std::fs::read(pkg.join("readme.txt")).unwrap(), readme);
    assert_eq!(std::fs::read(pkg.join("saves").join("slot1.bin")).unwrap(), slot);

    let header = std::fs::read(
        root.join("Headers")
            .join("00000001")
            .join("ABCDEF0123456789.header"),
    )
    .unwrap();
    assert_eq!(header.len(), 0x14c);
    assert_eq!(&header[0..4], &[0, 0, 0, 1]);
    assert_eq!(&header[0x140..0x144], &TITLE_ID.to_be_bytes());
    assert_eq!(&header[0x08..0x0a], &[0, b'T']);
    assert_eq!(&header[0x108..0x10a], b"AB");
}

#[test]
fn dot_dot_entries_stay_inside_package_dir() {
    let payload = pattern(64, 5);
    let mut b = PackageBuilder::new(0);
    b.entry("..", DIRECTORY, 0, 0, ROOT, 0);
    b.entry("..", DIRECTORY, 0, 0, 0, 0);
    b.entry("..", DIRECTORY, 0, 0, 1, 0);
    b.entry("evil.txt", CONSECUTIVE, 1, 1, 2, payload.len() as u32);
    b.entry("good.txt", CONSECUTIVE, 1, 1, ROOT, payload.len() as u32);
    b.write_block(1, &payload);

    let mut package = Package::from_bytes(b.build()).unwrap();
    package.name = Some("pkg".to_owned());

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let written = package.extract_all(&out).unwrap();
    assert_eq!(written, 1);

    let pkg = out.join("4D5307E6").join("00000001").join("pkg");
    assert_eq!(std::fs::read(pkg.join("good.txt")).unwrap(), payload);
    assert!(!out.join("evil.txt").exists());
    assert!(!dir.path().join("evil.txt").exists());
    assert!(!out.join("4D5307E6").join("evil.txt").exists());
}

#[derive(Debug, Clone)]
struct ChainBlock {
    in_use: bool,
    next: Option<u32>,
}

fn chain(blocks: u32) -> impl Strategy<Value = Vec<ChainBlock>> {
    proptest::collection::vec(
        (any::<bool>(), proptest::option::of(1..=blocks))
            .prop_map(|(in_use, next)| ChainBlock { in_use, next }),
        blocks as usize,
    )
}

prop_compose! {
    fn any_chain()(blocks in 1u32..10)(
        links in chain(blocks),
        start in 1..=blocks,
        allocated in 0u32..16,
    ) -> (Vec<ChainBlock>, u32, u32) {
        (links, start, allocated)
    }
}

proptest! {
    #[test]
    fn chained_extraction_is_bounded_by_allocation((links, start, allocated) in any_chain()) {
        let size = 16 * BLOCK;
        let mut b = PackageBuilder::new(0);
        b.entry("chain.bin", 0, allocated, start, ROOT, size as u32);
        b.set_hash(0, IN_USE | END_OF_CHAIN);

        for (i, link) in links.iter().enumerate() {
            let block = i as u32 + 1;
            b.write_block(block, &pattern(BLOCK, block as u8));
            let next = link.next.unwrap_or(END_OF_CHAIN);
            b.set_hash(block, if link.in_use { IN_USE | next } else { next });
        }

        let package = Package::from_bytes(b.build()).unwrap();
        let out = package.extract_path("chain.bin").unwrap();

        prop_assert_eq!(out.len() % BLOCK, 0);
        prop_assert!(out.len() <= allocated as usize * BLOCK);

        let first = &links[start as usize - 1];
        if allocated > 0 && first.in_use {
            prop_assert_eq!(&out[..BLOCK], &pattern(BLOCK, start as u8)[..]);
        }
    }
}
