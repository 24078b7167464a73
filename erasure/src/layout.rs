//! Layout of a protected file.
//!
//! ```text
//! | header | stripe 0 | stripe 1 | ... | header copy |
//! ```
//!
//! The header is:
//!
//! ```text
//! 0       8             16           20     21       22         24        56
//! | magic | payload_len | shard_size | data | parity | reserved | BLAKE3  |
//! ```
//!
//! where the digest covers the first 24 bytes. Each stripe holds
//! `data + parity` records of a BLAKE3 digest followed by `shard_size`
//! bytes of shard. The last stripe's data shards are zero-padded.

use crate::{Config, Error};

pub const MAGIC: &[u8; 8] = b"WOFSRS01";

const FIELDS_LEN: usize = 24;
pub const DIGEST_LEN: usize = 32;
pub const HEADER_LEN: usize = FIELDS_LEN + DIGEST_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub payload_len: u64,
    pub config: Config,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..8].copy_from_slice(MAGIC);
        buf[8..16].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[16..20].copy_from_slice(&self.config.shard_size.to_be_bytes());
        buf[20] = self.config.data_shards;
        buf[21] = self.config.parity_shards;

        let digest = blake3::hash(&buf[..FIELDS_LEN]);
        buf[FIELDS_LEN..].copy_from_slice(digest.as_bytes());
        buf
    }

    /// Returns `None` unless the magic and the digest check out, and the
    /// configuration is usable.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Option<Self> {
        if &buf[..8] != MAGIC {
            return None;
        }
        if blake3::hash(&buf[..FIELDS_LEN]).as_bytes() != &buf[FIELDS_LEN..] {
            return None;
        }

        let mut payload_len = [0u8; 8];
        payload_len.copy_from_slice(&buf[8..16]);
        let mut shard_size = [0u8; 4];
        shard_size.copy_from_slice(&buf[16..20]);

        let config = Config {
            shard_size: u32::from_be_bytes(shard_size),
            data_shards: buf[20],
            parity_shards: buf[21],
        };
        config.validate().ok()?;

        Some(Header {
            payload_len: u64::from_be_bytes(payload_len),
            config,
        })
    }

    /// Number of payload bytes one stripe carries.
    pub fn stripe_payload(&self) -> u64 {
        u64::from(self.config.data_shards) * u64::from(self.config.shard_size)
    }

    pub fn stripe_count(&self) -> u64 {
        self.payload_len.div_ceil(self.stripe_payload())
    }

    /// Size of one digest-plus-shard record.
    pub fn record_len(&self) -> usize {
        DIGEST_LEN + self.config.shard_size as usize
    }

    /// Length of the whole protected file.
    pub fn protected_len(&self) -> u64 {
        let records = self.stripe_count() * u64::from(self.config.total_shards());
        2 * HEADER_LEN as u64 + records * self.record_len() as u64
    }
}

impl Config {
    pub fn total_shards(&self) -> u8 {
        self.data_shards.saturating_add(self.parity_shards)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.data_shards == 0 || self.parity_shards == 0 {
            return Err(Error::InvalidConfig(
                "at least one data and one parity shard are required".into(),
            ));
        }
        if usize::from(self.data_shards) + usize::from(self.parity_shards) > 255 {
            return Err(Error::InvalidConfig(
                "at most 255 shards per stripe are supported".into(),
            ));
        }
        if self.shard_size == 0 {
            return Err(Error::InvalidConfig("shard size must not be zero".into()));
        }
        Ok(())
    }
}
