use super::error::MetainfoError;
use super::info_hash::InfoHash;
use crate::bencode::{decode, encode, Value};

/// A parsed torrent descriptor, immutable after parse.
///
/// # Examples
///
/// ```no_run
/// use shoal::metainfo::Metainfo;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let data = std::fs::read("example.torrent")?;
/// let metainfo = Metainfo::from_bytes(&data)?;
/// println!("{}: {} bytes in {} pieces", metainfo.name, metainfo.total_length, metainfo.piece_count());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// Tracker announce URL.
    pub announce: String,
    /// SHA-1 of the canonical `info` encoding.
    pub info_hash: InfoHash,
    /// Target file name.
    pub name: String,
    /// Nominal piece length; every piece but the last has this length.
    pub piece_length: u64,
    /// Total file length.
    pub total_length: u64,
    /// Per-piece SHA-1 digests, in piece order.
    pieces: Vec<[u8; 20]>,
}

impl Metainfo {
    /// Parses a descriptor from raw bytes.
    ///
    /// # Errors
    ///
    /// Fails if the data is not well-formed bencode, a required field is
    /// missing or mistyped, the `pieces` blob does not hold exactly
    /// `ceil(length / piece_length)` 20-byte digests, or the descriptor
    /// lists multiple files.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        let root = decode(data)?;
        let dict = root.as_dict().ok_or(MetainfoError::InvalidField("root"))?;

        let announce = dict
            .get(b"announce".as_slice())
            .ok_or(MetainfoError::MissingField("announce"))?
            .as_str()
            .ok_or(MetainfoError::InvalidField("announce"))?
            .to_string();

        let info = dict
            .get(b"info".as_slice())
            .ok_or(MetainfoError::MissingField("info"))?;
        if info.as_dict().is_none() {
            return Err(MetainfoError::InvalidField("info"));
        }
        if info.get(b"files").is_some() {
            return Err(MetainfoError::MultiFile);
        }

        // The info-hash is taken over the canonical re-encoding, so the key
        // order of the input does not matter.
        let info_hash = InfoHash::from_info_bytes(&encode(info));

        let name = info
            .get(b"name")
            .ok_or(MetainfoError::MissingField("name"))?
            .as_str()
            .ok_or(MetainfoError::InvalidField("name"))?
            .to_string();

        let piece_length = positive_int(info.get(b"piece length"), "piece length")?;
        let total_length = match info
            .get(b"length")
            .ok_or(MetainfoError::MissingField("length"))?
            .as_integer()
        {
            Some(n) if n >= 0 => n as u64,
            _ => return Err(MetainfoError::InvalidField("length")),
        };

        let blob = info
            .get(b"pieces")
            .ok_or(MetainfoError::MissingField("pieces"))?
            .as_bytes()
            .ok_or(MetainfoError::InvalidField("pieces"))?;

        let expected = total_length.div_ceil(piece_length) as usize;
        if blob.len() != expected * 20 {
            return Err(MetainfoError::PieceHashMismatch {
                expected,
                got: blob.len() / 20,
            });
        }

        let pieces = blob
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        Ok(Self {
            announce,
            info_hash,
            name,
            piece_length,
            total_length,
            pieces,
        })
    }

    /// Number of pieces, `ceil(total_length / piece_length)`.
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// The published SHA-1 digest of piece `index`.
    pub fn piece_hash(&self, index: u32) -> Option<&[u8; 20]> {
        self.pieces.get(index as usize)
    }

    /// Actual length of piece `index`; the last piece may be short.
    pub fn piece_length_of(&self, index: u32) -> u64 {
        let offset = self.piece_offset(index);
        self.piece_length.min(self.total_length.saturating_sub(offset))
    }

    /// Byte offset of piece `index` within the file.
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length
    }
}

fn positive_int(value: Option<&Value>, field: &'static str) -> Result<u64, MetainfoError> {
    match value.ok_or(MetainfoError::MissingField(field))?.as_integer() {
        Some(n) if n > 0 => Ok(n as u64),
        _ => Err(MetainfoError::InvalidField(field)),
    }
}
