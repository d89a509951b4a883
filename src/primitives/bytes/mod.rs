#![forbid(unsafe_code)]
//! Fixed-width, order-preserving encoders used by the edge key layout.

pub mod ord {
    //! Order-preserving encoders for numeric and vertex-id key fields.
    //!
    //! All integers are big-endian. Signed integers have their sign bit
    //! flipped so that byte order matches numeric order.

    use core::convert::TryInto;

    use crate::error::{ChainError, Result};

    const I32_SIGN_BIT: u32 = 1 << 31;
    const I64_SIGN_BIT: u64 = 1 << 63;

    /// Appends a big-endian u32.
    pub fn put_u32_be(dst: &mut Vec<u8>, v: u32) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Reads a big-endian u32 from the first four bytes of `src`.
    pub fn get_u32_be(src: &[u8]) -> Result<u32> {
        let head: [u8; 4] = src
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or(ChainError::Decode("u32 field truncated"))?;
        Ok(u32::from_be_bytes(head))
    }

    /// Appends an i32 with the sign bit flipped.
    pub fn put_i32_be(dst: &mut Vec<u8>, v: i32) {
        put_u32_be(dst, (v as u32) ^ I32_SIGN_BIT);
    }

    /// Reads an i32 written by [`put_i32_be`].
    pub fn get_i32_be(src: &[u8]) -> Result<i32> {
        Ok((get_u32_be(src)? ^ I32_SIGN_BIT) as i32)
    }

    /// Appends an i64 with the sign bit flipped.
    pub fn put_i64_be(dst: &mut Vec<u8>, v: i64) {
        dst.extend_from_slice(&((v as u64) ^ I64_SIGN_BIT).to_be_bytes());
    }

    /// Reads an i64 written by [`put_i64_be`].
    pub fn get_i64_be(src: &[u8]) -> Result<i64> {
        let head: [u8; 8] = src
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or(ChainError::Decode("i64 field truncated"))?;
        Ok((u64::from_be_bytes(head) ^ I64_SIGN_BIT) as i64)
    }

    /// Appends `vid` right-padded with zero bytes to exactly `vid_len` bytes.
    ///
    /// Returns false, leaving `dst` untouched, when `vid` is longer than `vid_len`.
    pub fn put_padded_vid(dst: &mut Vec<u8>, vid: &[u8], vid_len: usize) -> bool {
        if vid.len() > vid_len {
            return false;
        }
        dst.extend_from_slice(vid);
        dst.resize(dst.len() + (vid_len - vid.len()), 0);
        true
    }

    /// Reads a padded vertex id of `vid_len` bytes, stripping trailing zero bytes.
    pub fn get_padded_vid(src: &[u8], vid_len: usize) -> Result<Vec<u8>> {
        let raw = src
            .get(..vid_len)
            .ok_or(ChainError::Decode("vertex id truncated"))?;
        let end = raw.iter().rposition(|b| *b != 0).map_or(0, |pos| pos + 1);
        Ok(raw[..end].to_vec())
    }
}
