use hmac::{Hmac, Mac};
use rc4::consts::U16;
use rc4::{KeyInit, Rc4, StreamCipher};
use sha1::Sha1;

use super::{Error, HMAC_LEN};

type HmacSha1 = Hmac<Sha1>;

/// HMAC-SHA1 of `data`, truncated to the first 16 bytes.
pub fn hmac_sha1_16(key: &[u8; 16], data: &[u8]) -> Result<[u8; HMAC_LEN], Error> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key)?;
    mac.update(data);
    let digest = mac.finalize().into_bytes();

    let mut out = [0u8; HMAC_LEN];
    out.copy_from_slice(&digest[..HMAC_LEN]);
    Ok(out)
}

/// RC4 is symmetric, so this both encrypts and decrypts.
pub fn rc4_apply(key: &[u8; 16], buf: &mut [u8]) {
    let mut cipher = Rc4::<U16>::new(key.into());
    cipher.apply_keystream(buf);
}
