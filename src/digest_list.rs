//! TPML_DIGEST_VALUES: the set of digests of one event, one per hash
//! algorithm.

use anyhow::{anyhow, bail, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::algorithm::{HashAlgorithm, HashMask};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestList {
    digests: Vec<(HashAlgorithm, Vec<u8>)>,
}

impl DigestList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a digest. A second digest for the same algorithm replaces the
    /// first one in place, keeping its position.
    pub fn insert(&mut self, algorithm: HashAlgorithm, digest: Vec<u8>) {
        match self.digests.iter_mut().find(|(alg, _)| *alg == algorithm) {
            Some(entry) => entry.1 = digest,
            None => self.digests.push((algorithm, digest)),
        }
    }

    pub fn get(&self, algorithm: HashAlgorithm) -> Option<&[u8]> {
        self.digests
            .iter()
            .find(|(alg, _)| *alg == algorithm)
            .map(|(_, digest)| digest.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (HashAlgorithm, &[u8])> {
        self.digests
            .iter()
            .map(|(algorithm, digest)| (*algorithm, digest.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Algorithms present in the list.
    pub fn mask(&self) -> HashMask {
        self.digests
            .iter()
            .fold(HashMask::empty(), |mask, (algorithm, _)| mask | algorithm.mask())
    }

    /// Copy of the list keeping only the algorithms in `mask`.
    pub fn filtered(&self, mask: HashMask) -> DigestList {
        DigestList {
            digests: self
                .digests
                .iter()
                .filter(|(algorithm, _)| mask.contains(algorithm.mask()))
                .cloned()
                .collect(),
        }
    }

    /// Size of the compact encoding: count, then `{alg id, digest}` pairs.
    pub fn size_in_bytes(&self) -> usize {
        4 + self
            .digests
            .iter()
            .map(|(algorithm, _)| 2 + algorithm.digest_length())
            .sum::<usize>()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.size_in_bytes());
        self.write_to(&mut buffer);
        buffer
    }

    /// Compact encoding limited to the algorithms in `mask`.
    pub fn encode_filtered(&self, mask: HashMask) -> Vec<u8> {
        self.filtered(mask).encode()
    }

    pub(crate) fn write_to(&self, buffer: &mut Vec<u8>) {
        // Writes into a Vec cannot fail.
        let _ = buffer.write_u32::<LittleEndian>(self.digests.len() as u32);
        for (algorithm, digest) in &self.digests {
            let _ = buffer.write_u16::<LittleEndian>(algorithm.tpm_alg_id());
            let mut fixed = vec![0u8; algorithm.digest_length()];
            let copy = digest.len().min(fixed.len());
            fixed[..copy].copy_from_slice(&digest[..copy]);
            buffer.extend_from_slice(&fixed);
        }
    }

    /// Parse a compact TPML_DIGEST_VALUES. Returns the list and the number of
    /// bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(DigestList, usize)> {
        let mut cursor = Cursor::new(data);
        let count = cursor.read_u32::<LittleEndian>()?;
        if count as usize > HashAlgorithm::ALL.len() {
            bail!("digest count {count} exceeds the number of known algorithms");
        }

        let mut list = DigestList::new();
        for _ in 0..count {
            let algorithm_id = cursor.read_u16::<LittleEndian>()?;
            let algorithm = HashAlgorithm::from_tpm_alg_id(algorithm_id)
                .ok_or(anyhow!("unknown digest algorithm id: {:#x}", algorithm_id))?;
            let start = cursor.position() as usize;
            let end = start + algorithm.digest_length();
            if end > data.len() {
                bail!("digest for {algorithm} truncated");
            }
            list.insert(algorithm, data[start..end].to_vec());
            cursor.set_position(end as u64);
        }

        Ok((list, cursor.position() as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_duplicate_overwrites() {
        let mut list = DigestList::new();
        list.insert(HashAlgorithm::Sha256, vec![1; 32]);
        list.insert(HashAlgorithm::Sha1, vec![2; 20]);
        list.insert(HashAlgorithm::Sha256, vec![3; 32]);

        assert_eq!(list.len(), 2);
        let order: Vec<_> = list.iter().map(|(alg, _)| alg).collect();
        assert_eq!(order, vec![HashAlgorithm::Sha256, HashAlgorithm::Sha1]);
        assert_eq!(list.get(HashAlgorithm::Sha256), Some(&[3u8; 32][..]));
    }

    #[test]
    fn test_encode_layout() {
        let mut list = DigestList::new();
        list.insert(HashAlgorithm::Sha1, vec![0xAA; 20]);
        list.insert(HashAlgorithm::Sha256, vec![0xBB; 32]);

        let bytes = list.encode();
        assert_eq!(bytes.len(), list.size_in_bytes());
        assert_eq!(bytes.len(), 4 + 2 + 20 + 2 + 32);
        assert_eq!(&bytes[0..4], &[2, 0, 0, 0]);
        assert_eq!(&bytes[4..6], &[0x04, 0x00]);
        assert_eq!(&bytes[26..28], &[0x0B, 0x00]);

        let (decoded, used) = DigestList::decode(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded, list);
    }

    #[test]
    fn test_encode_filtered_drops_inactive_banks() {
        let mut list = DigestList::new();
        list.insert(HashAlgorithm::Sha1, vec![0xAA; 20]);
        list.insert(HashAlgorithm::Sha256, vec![0xBB; 32]);

        let bytes = list.encode_filtered(HashMask::SHA256);
        assert_eq!(bytes.len(), 4 + 2 + 32);
        assert_eq!(&bytes[0..4], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_decode_rejects_unknown_algorithm() {
        let bytes = [1u8, 0, 0, 0, 0x01, 0x00, 0, 0];
        assert!(DigestList::decode(&bytes).is_err());
    }
}
