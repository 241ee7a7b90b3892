use std::fmt;
use std::ops::Range;

use bitflags::bitflags;
use byteorder::{ByteOrder, BE};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::{debug, warn};

use crate::io::{ascii_fixed, ascii_trimmed, utf16_be_fixed, utf16_be_trimmed};

use super::Xuid;

pub const RECORD_LEN: usize = 380;

const GAMERTAG: Range<usize> = 0x08..0x28;
const SERVICE_PROVIDER: Range<usize> = 0x34..0x38;
const PASSCODE: Range<usize> = 0x38..0x3c;
const ONLINE_DOMAIN: Range<usize> = 0x3c..0x50;
const KERBEROS_REALM: Range<usize> = 0x50..0x68;
const ONLINE_KEY: Range<usize> = 0x68..0x78;
const USER_PASSPORT_MEMBER_NAME: Range<usize> = 0x78..0xea;
const USER_PASSPORT_PASSWORD: Range<usize> = 0xea..0x10a;
const OWNER_PASSPORT_MEMBER_NAME: Range<usize> = 0x10a..RECORD_LEN;

/// The decrypted profile record, all fields big-endian.
///
/// A decoded record remembers its bytes: string fields that still decode to
/// the same text are written back exactly as they were read, including
/// anything after the terminating NUL.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub reserved_flags: ReservedFlags,
    pub live_flags: u32,
    pub gamertag: String,
    pub xuid: Xuid,
    pub cached_user_flags: CachedUserFlags,
    pub service_provider: String,
    /// Raw button codes, see [`AccountRecord::passcode_buttons`].
    pub passcode: [u8; 4],
    pub online_domain: String,
    pub kerberos_realm: String,
    pub online_key: [u8; 16],
    pub user_passport_member_name: String,
    pub user_passport_password: String,
    pub owner_passport_member_name: String,
    decoded_from: Option<RawRecord>,
}

#[derive(Clone, Copy)]
struct RawRecord([u8; RECORD_LEN]);

impl fmt::Debug for RawRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawRecord({} bytes)", self.0.len())
    }
}

impl PartialEq for AccountRecord {
    fn eq(&self, other: &Self) -> bool {
        self.reserved_flags == other.reserved_flags
            && self.live_flags == other.live_flags
            && self.gamertag == other.gamertag
            && self.xuid == other.xuid
            && self.cached_user_flags == other.cached_user_flags
            && self.service_provider == other.service_provider
            && self.passcode == other.passcode
            && self.online_domain == other.online_domain
            && self.kerberos_realm == other.kerberos_realm
            && self.online_key == other.online_key
            && self.user_passport_member_name == other.user_passport_member_name
            && self.user_passport_password == other.user_passport_password
            && self.owner_passport_member_name == other.owner_passport_member_name
    }
}

impl Eq for AccountRecord {}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReservedFlags: u32 {
        const PASSCODE_ENABLED = 0x1000_0000;
        const LIVE_ENABLED = 0x2000_0000;
        const RECOVERING = 0x4000_0000;
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum PasscodeButton {
    Null = 0,
    DPadUp = 1,
    DPadDown = 2,
    DPadLeft = 3,
    DPadRight = 4,
    X = 5,
    Y = 6,
    A = 7,
    B = 8,
    LeftTrigger = 9,
    RightTrigger = 10,
    LeftBumper = 11,
    RightBumper = 12,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum SubscriptionTier {
    None = 0,
    Silver = 3,
    Gold = 6,
    FamilyGold = 9,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum ConsoleLanguage {
    None = 0,
    English = 1,
    Japanese = 2,
    German = 3,
    French = 4,
    Spanish = 5,
    Italian = 6,
    Korean = 7,
    TChinese = 8,
    Portuguese = 9,
    SChinese = 10,
    Polish = 11,
    Russian = 12,
}

/// Packed account state cached on the console.
///
/// | bits  | field               |
/// |-------|---------------------|
/// | 0     | credit card on file |
/// | 8-15  | country             |
/// | 20-23 | subscription tier   |
/// | 24    | parental controls   |
/// | 25-29 | language            |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CachedUserFlags(pub u32);

impl CachedUserFlags {
    const CREDIT_CARD: u32 = 1;
    const PARENTAL_CONTROLS: u32 = 1 << 24;

    fn field(self, shift: u32, mask: u32) -> u8 {
        ((self.0 >> shift) & mask) as u8
    }

    fn set_field(&mut self, shift: u32, mask: u32, value: u8) {
        self.0 = (self.0 & !(mask << shift)) | ((value as u32 & mask) << shift);
    }

    fn set_bit(&mut self, bit: u32, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub fn has_credit_card(self) -> bool {
        self.0 & Self::CREDIT_CARD != 0
    }

    pub fn set_credit_card(&mut self, on: bool) {
        self.set_bit(Self::CREDIT_CARD, on);
    }

    /// Xbox Live country code.
    pub fn country(self) -> u8 {
        self.field(8, 0xff)
    }

    pub fn set_country(&mut self, country: u8) {
        self.set_field(8, 0xff, country);
    }

    pub fn subscription_tier(self) -> Option<SubscriptionTier> {
        SubscriptionTier::try_from(self.field(20, 0xf)).ok()
    }

    pub fn set_subscription_tier(&mut self, tier: SubscriptionTier) {
        self.set_field(20, 0xf, tier.into());
    }

    pub fn parental_controls(self) -> bool {
        self.0 & Self::PARENTAL_CONTROLS != 0
    }

    pub fn set_parental_controls(&mut self, on: bool) {
        self.set_bit(Self::PARENTAL_CONTROLS, on);
    }

    pub fn language(self) -> Option<ConsoleLanguage> {
        ConsoleLanguage::try_from(self.field(25, 0x1f)).ok()
    }

    pub fn set_language(&mut self, language: ConsoleLanguage) {
        self.set_field(25, 0x1f, language.into());
    }
}

impl AccountRecord {
    /// A blank offline profile.
    pub fn new(gamertag: &str, xuid: Xuid) -> Self {
        Self {
            reserved_flags: ReservedFlags::empty(),
            live_flags: 0,
            gamertag: gamertag.to_owned(),
            xuid,
            cached_user_flags: CachedUserFlags::default(),
            service_provider: String::new(),
            passcode: [PasscodeButton::Null.into(); 4],
            online_domain: String::new(),
            kerberos_realm: String::new(),
            online_key: [0; 16],
            user_passport_member_name: String::new(),
            user_passport_password: String::new(),
            owner_passport_member_name: String::new(),
            decoded_from: None,
        }
    }

    pub fn passcode_buttons(&self) -> [Option<PasscodeButton>; 4] {
        self.passcode.map(|b| PasscodeButton::try_from(b).ok())
    }

    pub fn set_passcode(&mut self, buttons: [PasscodeButton; 4]) {
        self.passcode = buttons.map(u8::from);
    }

    pub fn is_passcode_enabled(&self) -> bool {
        self.reserved_flags.contains(ReservedFlags::PASSCODE_ENABLED)
    }

    pub fn is_live_enabled(&self) -> bool {
        self.reserved_flags.contains(ReservedFlags::LIVE_ENABLED)
    }

    pub fn is_recovering(&self) -> bool {
        self.reserved_flags.contains(ReservedFlags::RECOVERING)
    }

    pub fn from_bytes(data: &[u8; RECORD_LEN]) -> Self {
        let mut passcode = [0u8; 4];
        passcode.copy_from_slice(&data[PASSCODE]);
        let mut online_key = [0u8; 16];
        online_key.copy_from_slice(&data[ONLINE_KEY]);

        let record = Self {
            reserved_flags: ReservedFlags::from_bits_retain(BE::read_u32(&data[0x00..])),
            live_flags: BE::read_u32(&data[0x04..]),
            gamertag: utf16_be_trimmed(&data[GAMERTAG]),
            xuid: Xuid(BE::read_u64(&data[0x28..])),
            cached_user_flags: CachedUserFlags(BE::read_u32(&data[0x30..])),
            service_provider: ascii_trimmed(&data[SERVICE_PROVIDER]),
            passcode,
            online_domain: ascii_trimmed(&data[ONLINE_DOMAIN]),
            kerberos_realm: ascii_trimmed(&data[KERBEROS_REALM]),
            online_key,
            user_passport_member_name: ascii_trimmed(&data[USER_PASSPORT_MEMBER_NAME]),
            user_passport_password: ascii_trimmed(&data[USER_PASSPORT_PASSWORD]),
            owner_passport_member_name: ascii_trimmed(&data[OWNER_PASSPORT_MEMBER_NAME]),
            decoded_from: Some(RawRecord(*data)),
        };

        debug!(gamertag = %record.gamertag, xuid = %record.xuid, "read account record");
        if record.gamertag.is_empty() {
            warn!("account record has an empty gamertag");
        }

        record
    }

    /// Serializes into the fixed layout. Over-long strings are truncated to their field.
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut out = self.decoded_from.map_or([0u8; RECORD_LEN], |raw| raw.0);

        BE::write_u32(&mut out[0x00..], self.reserved_flags.bits());
        BE::write_u32(&mut out[0x04..], self.live_flags);
        put_utf16(&mut out[GAMERTAG], &self.gamertag);
        BE::write_u64(&mut out[0x28..], self.xuid.0);
        BE::write_u32(&mut out[0x30..], self.cached_user_flags.0);
        put_ascii(&mut out[SERVICE_PROVIDER], &self.service_provider);
        out[PASSCODE].copy_from_slice(&self.passcode);
        put_ascii(&mut out[ONLINE_DOMAIN], &self.online_domain);
        put_ascii(&mut out[KERBEROS_REALM], &self.kerberos_realm);
        out[ONLINE_KEY].copy_from_slice(&self.online_key);
        put_ascii(&mut out[USER_PASSPORT_MEMBER_NAME], &self.user_passport_member_name);
        put_ascii(&mut out[USER_PASSPORT_PASSWORD], &self.user_passport_password);
        put_ascii(&mut out[OWNER_PASSPORT_MEMBER_NAME], &self.owner_passport_member_name);

        out
    }
}

// Fields are only re-encoded when their text changed.
fn put_utf16(field: &mut [u8], value: &str) {
    if utf16_be_trimmed(field) != value {
        field.copy_from_slice(&utf16_be_fixed(value, field.len()));
    }
}

fn put_ascii(field: &mut [u8], value: &str) {
    if ascii_trimmed(field) != value {
        field.copy_from_slice(&ascii_fixed(value, field.len()));
    }
}
