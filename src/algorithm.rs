use bitflags::bitflags;
use core::fmt;
use sha1::Sha1;
use sha2::digest::FixedOutput;
use sha2::{Digest, Sha256, Sha384, Sha512};
use sm3::Sm3;

use crate::digest_list::DigestList;
use crate::error::MeasureResult;

pub const TPM_ALG_SHA1: u16 = 0x0004;
pub const TPM_ALG_SHA256: u16 = 0x000B;
pub const TPM_ALG_SHA384: u16 = 0x000C;
pub const TPM_ALG_SHA512: u16 = 0x000D;
pub const TPM_ALG_SM3_256: u16 = 0x0012;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Sm3_256,
}

impl HashAlgorithm {
    /// Every algorithm, ordered by policy bit.
    pub const ALL: [HashAlgorithm; 5] = [
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
        HashAlgorithm::Sm3_256,
    ];

    pub fn digest_length(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
            HashAlgorithm::Sm3_256 => 32,
        }
    }

    pub fn tpm_alg_id(&self) -> u16 {
        match self {
            HashAlgorithm::Sha1 => TPM_ALG_SHA1,
            HashAlgorithm::Sha256 => TPM_ALG_SHA256,
            HashAlgorithm::Sha384 => TPM_ALG_SHA384,
            HashAlgorithm::Sha512 => TPM_ALG_SHA512,
            HashAlgorithm::Sm3_256 => TPM_ALG_SM3_256,
        }
    }

    pub fn from_tpm_alg_id(id: u16) -> Option<Self> {
        HashAlgorithm::ALL
            .into_iter()
            .find(|algorithm| algorithm.tpm_alg_id() == id)
    }

    /// Bit of this algorithm in a [`HashMask`].
    pub fn mask(&self) -> HashMask {
        match self {
            HashAlgorithm::Sha1 => HashMask::SHA1,
            HashAlgorithm::Sha256 => HashMask::SHA256,
            HashAlgorithm::Sha384 => HashMask::SHA384,
            HashAlgorithm::Sha512 => HashMask::SHA512,
            HashAlgorithm::Sm3_256 => HashMask::SM3_256,
        }
    }

    pub fn hash<'a, I>(&self, data: I) -> Vec<u8>
    where
        I: Iterator<Item = &'a [u8]>,
    {
        match self {
            HashAlgorithm::Sha1 => self.accumulate_hash::<Sha1, _>(data),
            HashAlgorithm::Sha256 => self.accumulate_hash::<Sha256, _>(data),
            HashAlgorithm::Sha384 => self.accumulate_hash::<Sha384, _>(data),
            HashAlgorithm::Sha512 => self.accumulate_hash::<Sha512, _>(data),
            HashAlgorithm::Sm3_256 => self.accumulate_hash::<Sm3, _>(data),
        }
    }

    fn accumulate_hash<'a, D: Digest + FixedOutput, I>(&self, data: I) -> Vec<u8>
    where
        I: Iterator<Item = &'a [u8]>,
    {
        let mut hasher = D::new();
        for slice in data {
            Digest::update(&mut hasher, slice);
        }

        hasher.finalize().to_vec()
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha384 => "SHA384",
            HashAlgorithm::Sha512 => "SHA512",
            HashAlgorithm::Sm3_256 => "SM3_256",
        };
        write!(f, "{name}")
    }
}

bitflags! {
    /// Set of hash algorithms, in the EFI_TCG2 hash algorithm bitmap layout.
    /// Platforms may not set bits outside [`HashMask::all`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    #[repr(transparent)]
    pub struct HashMask: u32 {
        const SHA1 = 0x0000_0001;
        const SHA256 = 0x0000_0002;
        const SHA384 = 0x0000_0004;
        const SHA512 = 0x0000_0008;
        const SM3_256 = 0x0000_0010;
    }
}

impl HashMask {
    /// Algorithms in this mask, in policy bit order.
    pub fn algorithms(&self) -> impl Iterator<Item = HashAlgorithm> {
        let mask = *self;
        HashAlgorithm::ALL
            .into_iter()
            .filter(move |algorithm| mask.contains(algorithm.mask()))
    }
}

impl fmt::Display for HashMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:X}", self.bits())
    }
}

impl From<HashAlgorithm> for HashMask {
    fn from(algorithm: HashAlgorithm) -> Self {
        algorithm.mask()
    }
}

/// Computes digests of measured data. Sits in front of the crypto library so
/// that callers can count or replace hashing.
pub trait DigestProvider {
    fn hash_all(&mut self, algorithms: HashMask, data: &[u8]) -> MeasureResult<DigestList>;
}

/// [`DigestProvider`] backed by the RustCrypto hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareDigest;

impl DigestProvider for SoftwareDigest {
    fn hash_all(&mut self, algorithms: HashMask, data: &[u8]) -> MeasureResult<DigestList> {
        let mut digests = DigestList::new();
        for algorithm in algorithms.algorithms() {
            digests.insert(algorithm, algorithm.hash([data].into_iter()));
        }
        Ok(digests)
    }
}
