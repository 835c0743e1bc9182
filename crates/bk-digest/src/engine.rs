use std::fmt;

use bk_types::DigestType;
use bytes::BufMut;
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

use crate::error::{DigestError, DigestResult};

type HmacSha1 = Hmac<Sha1>;

/// Length of the per-ledger access key sent with every add request.
pub const ACCESS_KEY_LEN: usize = 20;

const CRC32_LEN: usize = 8;
const CRC32C_LEN: usize = 4;
const HMAC_SHA1_LEN: usize = 20;

/// Domain prefixes mixed into the password before hashing.
const MAC_KEY_DOMAIN: &[u8] = b"mac";
const ACCESS_KEY_DOMAIN: &[u8] = b"ledger";

/// Digest algorithm bound to one ledger.
///
/// The digest type is validated once at construction; afterwards every call
/// dispatches on the enum variant. The HMAC variant holds a pre-keyed MAC that
/// is cloned per computation, so one engine can be shared by all concurrent
/// appends of a ledger.
#[derive(Clone)]
pub enum DigestEngine {
    None,
    Crc32,
    Crc32c,
    Hmac(HmacSha1),
}

impl DigestEngine {
    /// Engine for `digest_type`. The HMAC key is `SHA1("mac" || password)`.
    pub fn new(digest_type: DigestType, password: &[u8]) -> DigestResult<Self> {
        Ok(match digest_type {
            DigestType::None => Self::None,
            DigestType::Crc32 => Self::Crc32,
            DigestType::Crc32c => Self::Crc32c,
            DigestType::Hmac => {
                let key = sha1_with_domain(MAC_KEY_DOMAIN, password);
                let mac = HmacSha1::new_from_slice(&key)
                    .map_err(|e| DigestError::InvalidKey(e.to_string()))?;
                Self::Hmac(mac)
            }
        })
    }

    /// Engine for a digest tag as found in a metadata record.
    pub fn from_wire(tag: i32, password: &[u8]) -> DigestResult<Self> {
        let digest_type =
            DigestType::from_wire_tag(tag).map_err(|_| DigestError::UnsupportedDigestType(tag))?;
        Self::new(digest_type, password)
    }

    pub fn digest_type(&self) -> DigestType {
        match self {
            Self::None => DigestType::None,
            Self::Crc32 => DigestType::Crc32,
            Self::Crc32c => DigestType::Crc32c,
            Self::Hmac(_) => DigestType::Hmac,
        }
    }

    /// Number of bytes [`write_digest`](Self::write_digest) appends.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Crc32 => CRC32_LEN,
            Self::Crc32c => CRC32C_LEN,
            Self::Hmac(_) => HMAC_SHA1_LEN,
        }
    }

    /// Append the digest of `header || payload` to `buf`.
    pub fn write_digest(&self, buf: &mut impl BufMut, header: &[u8], payload: &[u8]) {
        match self {
            Self::None => {}
            Self::Crc32 => {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(header);
                hasher.update(payload);
                // 32-bit value right-justified in a 64-bit field.
                buf.put_u64(u64::from(hasher.finalize()));
            }
            Self::Crc32c => {
                let crc = crc32c::crc32c_append(crc32c::crc32c(header), payload);
                buf.put_u32(crc);
            }
            Self::Hmac(keyed) => {
                let mut mac = keyed.clone();
                mac.update(header);
                mac.update(payload);
                buf.put_slice(&mac.finalize().into_bytes());
            }
        }
    }

    /// Check `expected` against the digest of `header || payload`.
    pub fn verify(&self, header: &[u8], payload: &[u8], expected: &[u8]) -> bool {
        if expected.len() != self.digest_len() {
            return false;
        }
        match self {
            Self::Hmac(keyed) => {
                let mut mac = keyed.clone();
                mac.update(header);
                mac.update(payload);
                mac.verify_slice(expected).is_ok()
            }
            _ => {
                let mut computed = Vec::with_capacity(self.digest_len());
                self.write_digest(&mut computed, header, payload);
                computed == expected
            }
        }
    }
}

impl fmt::Debug for DigestEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DigestEngine({})", self.digest_type())
    }
}

/// Key authorizing writes to a ledger: `SHA1("ledger" || password)`.
pub fn ledger_access_key(password: &[u8]) -> [u8; ACCESS_KEY_LEN] {
    sha1_with_domain(ACCESS_KEY_DOMAIN, password)
}

fn sha1_with_domain(domain: &[u8], password: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(domain);
    hasher.update(password);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hasher.finalize());
    out
}
