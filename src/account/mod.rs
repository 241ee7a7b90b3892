//! Encrypted profile `Account` files.
//!
//! On disk: `hmac(16) || rc4(confounder(8) || record(380))`, where the RC4 key
//! is itself an HMAC of the stored HMAC under the console's base key.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

mod crypto;
pub use crypto::*;

mod record;
pub use record::*;

mod xuid;
pub use xuid::*;

pub const HMAC_LEN: usize = 16;
pub const CONFOUNDER_LEN: usize = 8;
pub const PAYLOAD_LEN: usize = CONFOUNDER_LEN + RECORD_LEN;
pub const FILE_LEN: usize = HMAC_LEN + PAYLOAD_LEN;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("account data too short: {len} bytes, expected at least {FILE_LEN}")]
    TooShort { len: usize },
    #[error("account HMAC verification failed")]
    Integrity,
    #[error("account file could not be decrypted with either retail or devkit keys")]
    NoMatchingKey,
    #[error("invalid key length")]
    KeyLength(#[from] hmac::digest::InvalidLength),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Base key used to authenticate and encrypt the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKey {
    Retail,
    Devkit,
}

impl AccountKey {
    pub const ALL: &[Self] = &[Self::Retail, Self::Devkit];

    pub const fn bytes(self) -> &'static [u8; 16] {
        match self {
            Self::Retail => &[
                0xe1, 0xbc, 0x15, 0x9c, 0x73, 0xb1, 0xea, 0xe9, 0xab, 0x31, 0x70, 0xf3, 0xad, 0x47,
                0xeb, 0xf3,
            ],
            Self::Devkit => &[
                0xda, 0xb6, 0x9a, 0xd9, 0x8e, 0x28, 0x76, 0x4f, 0x97, 0x7e, 0xe2, 0x48, 0x7e, 0x4f,
                0x3f, 0x68,
            ],
        }
    }
}

/// A decrypted account. The confounder read from disk is kept so that
/// re-encrypting an unmodified account reproduces the original bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub record: AccountRecord,
    pub confounder: [u8; CONFOUNDER_LEN],
}

impl Account {
    pub fn new(record: AccountRecord) -> Self {
        Self {
            record,
            confounder: [0; CONFOUNDER_LEN],
        }
    }

    /// Creates a fresh offline profile with a random XUID.
    pub fn create(gamertag: &str) -> Self {
        let xuid = Xuid::generate_offline();
        info!("created account '{gamertag}' with XUID {xuid}");
        Self::new(AccountRecord::new(gamertag, xuid))
    }

    pub fn decrypt(data: &[u8], key: AccountKey) -> Result<Self, Error> {
        if data.len() < FILE_LEN {
            return Err(Error::TooShort { len: data.len() });
        }

        let base = key.bytes();
        let mut stored_hmac = [0u8; HMAC_LEN];
        stored_hmac.copy_from_slice(&data[..HMAC_LEN]);

        let rc4_key = hmac_sha1_16(base, &stored_hmac)?;
        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&data[HMAC_LEN..FILE_LEN]);
        rc4_apply(&rc4_key, &mut payload);

        if hmac_sha1_16(base, &payload)? != stored_hmac {
            debug!(?key, "account HMAC mismatch");
            return Err(Error::Integrity);
        }

        let mut confounder = [0u8; CONFOUNDER_LEN];
        confounder.copy_from_slice(&payload[..CONFOUNDER_LEN]);

        let mut record = [0u8; RECORD_LEN];
        record.copy_from_slice(&payload[CONFOUNDER_LEN..]);
        let record = AccountRecord::from_bytes(&record);

        Ok(Self { record, confounder })
    }

    /// Encrypts with a freshly generated confounder.
    pub fn encrypt(&self, key: AccountKey) -> Result<Vec<u8>, Error> {
        let confounder = rand::random::<[u8; CONFOUNDER_LEN]>();
        self.encrypt_with_confounder(key, &confounder)
    }

    /// Encrypts with the given confounder, the output is fully determined by the inputs.
    pub fn encrypt_with_confounder(
        &self,
        key: AccountKey,
        confounder: &[u8; CONFOUNDER_LEN],
    ) -> Result<Vec<u8>, Error> {
        let base = key.bytes();

        let mut payload = [0u8; PAYLOAD_LEN];
        payload[..CONFOUNDER_LEN].copy_from_slice(confounder);
        payload[CONFOUNDER_LEN..].copy_from_slice(&self.record.to_bytes());

        // the RC4 key comes from the HMAC of the plaintext here, and from the
        // stored HMAC on decryption, which is the same value for a valid file
        let hmac = hmac_sha1_16(base, &payload)?;
        let rc4_key = hmac_sha1_16(base, &hmac)?;
        rc4_apply(&rc4_key, &mut payload);

        let mut out = Vec::with_capacity(FILE_LEN);
        out.extend_from_slice(&hmac);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Tries every known key in turn, returning the account and the key that worked.
    pub fn load(data: &[u8]) -> Result<(Self, AccountKey), Error> {
        for &key in AccountKey::ALL {
            match Self::decrypt(data, key) {
                Ok(account) => {
                    info!(
                        "decrypted account '{}' with {key:?} key",
                        account.record.gamertag
                    );
                    return Ok((account, key));
                }
                Err(Error::Integrity) => {
                    warn!("{key:?} key failed to decrypt account, trying next key");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::NoMatchingKey)
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<(Self, AccountKey), Error> {
        let path = path.as_ref();
        debug!("loading account from {}", path.display());
        Self::load(&fs::read(path)?)
    }

    /// Encrypts with a new confounder and writes the file, creating parent directories.
    pub fn save_file(&self, path: impl AsRef<Path>, key: AccountKey) -> Result<(), Error> {
        let path = path.as_ref();
        let bytes = self.encrypt(key)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;

        info!(
            "saved account '{}' to {}",
            self.record.gamertag,
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Account {
        let mut record = AccountRecord::new("TestUser", Xuid(0));
        record.service_provider = "XBL".into();
        record.online_key = [0x5a; 16];
        Account {
            record,
            confounder: *b"CONFOUND",
        }
    }

    #[test]
    fn encrypt_then_decrypt_restores_record() {
        let account = sample();
        let bytes = account.encrypt(AccountKey::Retail).unwrap();
        assert_eq!(bytes.len(), FILE_LEN);

        let back = Account::decrypt(&bytes, AccountKey::Retail).unwrap();
        assert_eq!(back.record.gamertag, "TestUser");
        assert_eq!(back.record, account.record);
    }

    #[test]
    fn reencrypting_with_kept_confounder_is_byte_identical() {
        let bytes = sample()
            .encrypt_with_confounder(AccountKey::Devkit, b"12345678")
            .unwrap();
        let account = Account::decrypt(&bytes, AccountKey::Devkit).unwrap();
        assert_eq!(&account.confounder, b"12345678");

        let again = account
            .encrypt_with_confounder(AccountKey::Devkit, &account.confounder)
            .unwrap();
        assert_eq!(again, bytes);
    }

    #[test]
    fn fresh_confounder_changes_ciphertext() {
        let account = sample();
        let a = account.encrypt(AccountKey::Retail).unwrap();
        let b = account.encrypt(AccountKey::Retail).unwrap();
        // 2^-64 chance of a false failure
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_integrity() {
        let bytes = sample().encrypt(AccountKey::Devkit).unwrap();
        assert!(matches!(
            Account::decrypt(&bytes, AccountKey::Retail),
            Err(Error::Integrity)
        ));
    }

    #[test]
    fn load_falls_back_to_devkit_key() {
        let bytes = sample().encrypt(AccountKey::Devkit).unwrap();
        let (account, key) = Account::load(&bytes).unwrap();
        assert_eq!(key, AccountKey::Devkit);
        assert_eq!(account.record.gamertag, "TestUser");
    }

    #[test]
    fn tampered_file_is_rejected_by_both_keys() {
        let mut bytes = sample().encrypt(AccountKey::Retail).unwrap();
        bytes[0x40] ^= 1;
        assert!(matches!(Account::load(&bytes), Err(Error::NoMatchingKey)));
    }

    #[test]
    fn short_buffer_is_a_length_error() {
        for len in [0, 16, FILE_LEN - 1] {
            let data = vec![0u8; len];
            assert!(matches!(
                Account::decrypt(&data, AccountKey::Retail),
                Err(Error::TooShort { len: l }) if l == len
            ));
        }
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn ascii(max: usize) -> impl Strategy<Value = String> {
            proptest::collection::vec(0x20u8..0x7f, 0..=max)
                .prop_map(|b| b.into_iter().map(char::from).collect())
        }

        proptest! {
            #[test]
            fn round_trip_preserves_fields(
                gamertag in ascii(15),
                xuid in any::<u64>(),
                flags in any::<u32>(),
                domain in ascii(20),
                realm in ascii(24),
                key in any::<[u8; 16]>(),
                devkit in any::<bool>(),
            ) {
                let mut record = AccountRecord::new(&gamertag, Xuid(xuid));
                record.cached_user_flags = CachedUserFlags(flags);
                record.online_domain = domain;
                record.kerberos_realm = realm;
                record.online_key = key;

                let key = if devkit { AccountKey::Devkit } else { AccountKey::Retail };
                let bytes = Account::new(record.clone()).encrypt(key).unwrap();
                let back = Account::decrypt(&bytes, key).unwrap();
                prop_assert_eq!(back.record, record);
            }
        }
    }
}
