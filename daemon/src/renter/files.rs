use reed_solomon_erasure::galois_8::ReedSolomon;
use sia_common::crypto::{Hash, PublicKey};
use sia_common::serializer::{read_list, write_list, Reader, ReaderError, Serializer, Writer};

use super::RenterError;

// One erasure-coded piece placed on one host under one contract
#[derive(Clone, Debug)]
pub struct Piece {
    pub chunk: u64,
    pub index: u64,
    pub host_public_key: PublicKey,
    pub contract_id: Hash,
    pub root: Hash,
    pub size: u64,
}

impl Serializer for Piece {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.chunk);
        writer.write_u64(self.index);
        self.host_public_key.write(writer);
        writer.write_hash(&self.contract_id);
        writer.write_hash(&self.root);
        writer.write_u64(self.size);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Piece {
            chunk: reader.read_u64()?,
            index: reader.read_u64()?,
            host_public_key: PublicKey::read(reader)?,
            contract_id: reader.read_hash()?,
            root: reader.read_hash()?,
            size: reader.read_u64()?,
        })
    }
}

// Metadata for one uploaded file. Piece placement is the whole story: the
// bytes themselves live on hosts.
#[derive(Clone, Debug)]
pub struct RenterFile {
    pub siapath: String,
    pub size: u64,
    pub data_pieces: u64,
    pub parity_pieces: u64,
    // local source kept for repairs while it exists
    pub local_path: String,
    pub pieces: Vec<Piece>,
}

impl RenterFile {
    pub fn chunk_count(&self) -> u64 {
        let chunk_size = self.data_pieces * piece_size();
        if self.size == 0 {
            return 1;
        }
        self.size.div_ceil(chunk_size)
    }

    pub fn total_pieces(&self) -> u64 {
        self.chunk_count() * (self.data_pieces + self.parity_pieces)
    }

    pub fn upload_progress(&self) -> f64 {
        let total = self.total_pieces().max(1);
        (self.pieces.len() as f64 / total as f64) * 100.0
    }
}

impl Serializer for RenterFile {
    fn write(&self, writer: &mut Writer) {
        writer.write_string(&self.siapath);
        writer.write_u64(self.size);
        writer.write_u64(self.data_pieces);
        writer.write_u64(self.parity_pieces);
        writer.write_string(&self.local_path);
        write_list(writer, &self.pieces);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(RenterFile {
            siapath: reader.read_string()?,
            size: reader.read_u64()?,
            data_pieces: reader.read_u64()?,
            parity_pieces: reader.read_u64()?,
            local_path: reader.read_string()?,
            pieces: read_list(reader)?,
        })
    }
}

// pieces are sector-sized so each lands in exactly one host sector
pub fn piece_size() -> u64 {
    sia_common::config::SECTOR_SIZE
}

// Split one chunk of plaintext into D + P equally sized shards. Data shards
// are zero-padded to the shard length; parity comes from Reed-Solomon over
// GF(2^8).
pub fn encode_chunk(
    chunk: &[u8],
    data_pieces: usize,
    parity_pieces: usize,
) -> Result<Vec<Vec<u8>>, RenterError> {
    let shard_len = chunk.len().div_ceil(data_pieces).max(1);
    let mut shards: Vec<Vec<u8>> = Vec::with_capacity(data_pieces + parity_pieces);
    for i in 0..data_pieces {
        let start = (i * shard_len).min(chunk.len());
        let end = ((i + 1) * shard_len).min(chunk.len());
        let mut shard = chunk[start..end].to_vec();
        shard.resize(shard_len, 0);
        shards.push(shard);
    }
    for _ in 0..parity_pieces {
        shards.push(vec![0u8; shard_len]);
    }

    if parity_pieces > 0 {
        let coder = ReedSolomon::new(data_pieces, parity_pieces)
            .map_err(|e| RenterError::Erasure(e.to_string()))?;
        coder
            .encode(&mut shards)
            .map_err(|e| RenterError::Erasure(e.to_string()))?;
    }
    Ok(shards)
}

// Rebuild a chunk from any D of its N shards; missing entries are None.
// `chunk_len` trims the padding off the tail shard.
pub fn decode_chunk(
    mut shards: Vec<Option<Vec<u8>>>,
    data_pieces: usize,
    parity_pieces: usize,
    chunk_len: usize,
) -> Result<Vec<u8>, RenterError> {
    let present = shards.iter().filter(|s| s.is_some()).count();
    if present < data_pieces {
        return Err(RenterError::InsufficientHosts);
    }

    if parity_pieces > 0 {
        let coder = ReedSolomon::new(data_pieces, parity_pieces)
            .map_err(|e| RenterError::Erasure(e.to_string()))?;
        coder
            .reconstruct(&mut shards)
            .map_err(|e| RenterError::Erasure(e.to_string()))?;
    }

    let mut chunk = Vec::with_capacity(chunk_len);
    for shard in shards.into_iter().take(data_pieces) {
        let shard = shard.ok_or(RenterError::InsufficientHosts)?;
        chunk.extend_from_slice(&shard);
    }
    chunk.truncate(chunk_len);
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erasure_round_trip_all_shards() {
        let data = b"the quick brown fox jumps over the lazy dog".to_vec();
        let shards = encode_chunk(&data, 2, 4).unwrap();
        assert_eq!(shards.len(), 6);

        let present: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        let decoded = decode_chunk(present, 2, 4, data.len()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_reconstruct_from_any_d_subset() {
        let data: Vec<u8> = (0u8..=255).cycle().take(45_678).collect();
        let shards = encode_chunk(&data, 2, 4).unwrap();

        // drop everything except two parity shards
        let mut partial: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        partial[0] = None;
        partial[1] = None;
        partial[2] = None;
        partial[3] = None;
        let decoded = decode_chunk(partial, 2, 4, data.len()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_too_few_shards_fails() {
        let data = vec![9u8; 1024];
        let shards = encode_chunk(&data, 2, 1).unwrap();
        let mut partial: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        partial[0] = None;
        partial[1] = None;
        assert!(matches!(
            decode_chunk(partial, 2, 1, data.len()),
            Err(RenterError::InsufficientHosts)
        ));
    }

    #[test]
    fn test_no_parity_passthrough() {
        let data = vec![3u8; 100];
        let shards = encode_chunk(&data, 1, 0).unwrap();
        assert_eq!(shards.len(), 1);
        let decoded =
            decode_chunk(shards.into_iter().map(Some).collect(), 1, 0, data.len()).unwrap();
        assert_eq!(decoded, data);
    }
}
