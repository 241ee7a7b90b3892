use byteorder::{ReadBytesExt, LE};
use sha1::{Digest, Sha1};
use std::io::{self, Read, Seek, SeekFrom};

use crate::io::{align_up, ReadFromRange};

pub const BLOCK_SIZE: u64 = 0x1000;

/// Marks the last block of a non-consecutive chain.
pub const END_OF_CHAIN: u32 = 0xff_ffff;

pub const MAX_BLOCK: u32 = 0xff_ffff;

/// Blocks covered by one hash table at each level.
const BLOCKS_PER_HASH_LEVEL: [u32; 3] = [170, 28_900, 4_913_000];

/// Maps logical block numbers to file offsets for one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub header_size: u64,
    pub blocks_per_hash_table: u32,
}

impl BlockLayout {
    pub fn data_start(&self) -> u64 {
        align_up(self.header_size, BLOCK_SIZE)
    }

    /// Interleaves the hash table overhead of every level and returns the byte offset of a data block.
    pub fn block_offset(&self, block: u32) -> Option<u64> {
        if block > MAX_BLOCK {
            return None;
        }

        let n = block as u64;
        let mut adjusted = n;
        for base in BLOCKS_PER_HASH_LEVEL.map(u64::from) {
            adjusted += (n + base) / base * self.blocks_per_hash_table as u64;
            if n < base {
                break;
            }
        }

        Some(self.data_start() + (adjusted << 12))
    }

    /// Physical block number of the hash table at `level` covering data block `block`.
    pub fn hash_block_number(&self, block: u32, level: usize) -> u64 {
        let bpht = self.blocks_per_hash_table as u64;
        let [l0, l1, _] = BLOCKS_PER_HASH_LEVEL.map(u64::from);
        let step0 = l0 + bpht;
        let step1 = l1 + (l0 + 1) * bpht;

        if level >= 2 {
            return step1;
        }

        let block = block as u64;
        let cap = BLOCKS_PER_HASH_LEVEL[level] as u64;
        if block < cap {
            return if level == 0 { 0 } else { step0 };
        }

        let mut number = block / cap * if level == 0 { step0 } else { step1 };
        if level == 0 {
            number += (block / l1 + 1) * bpht;
            if block < l1 {
                return number;
            }
        }

        number + bpht
    }

    /// Byte offset of the 24-byte hash record describing `block`.
    pub fn hash_entry_offset(&self, block: u32, level: usize) -> Option<u64> {
        if block > MAX_BLOCK {
            return None;
        }

        let level = level.min(2);
        let table = self.data_start() + (self.hash_block_number(block, level) << 12);

        let per_table = BLOCKS_PER_HASH_LEVEL[0];
        let record = if level == 0 {
            block % per_table
        } else {
            (block / BLOCKS_PER_HASH_LEVEL[level - 1]) % per_table
        };

        Some(table + record as u64 * HashEntry::SIZE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationState {
    Unused = 0,
    FreedPending = 1,
    InUse = 2,
    NewlyAllocated = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEntry {
    pub sha1: [u8; 20],
    pub info: u32,
}

impl HashEntry {
    pub const SIZE: u64 = 0x18;

    pub fn next_block(&self) -> u32 {
        self.info & 0xff_ffff
    }

    pub fn state(&self) -> AllocationState {
        // two bits can only hold 0..=3
        match (self.info >> 30) & 3 {
            0 => AllocationState::Unused,
            1 => AllocationState::FreedPending,
            2 => AllocationState::InUse,
            _ => AllocationState::NewlyAllocated,
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.state() == AllocationState::InUse
    }

    pub fn matches(&self, block: &[u8]) -> bool {
        let digest: [u8; 20] = Sha1::digest(block).into();
        digest == self.sha1
    }
}

impl ReadFromRange for HashEntry {
    fn read_from_range<R: Read + Seek>(mut r: R, off: u64, _len: u64) -> io::Result<Self> {
        r.seek(SeekFrom::Start(off))?;

        let mut sha1 = [0u8; 20];
        r.read_exact(&mut sha1)?;
        let info = r.read_u32::<LE>()?;

        Ok(Self { sha1, info })
    }
}
