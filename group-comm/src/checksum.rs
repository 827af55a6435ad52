//! 16-bit Internet checksum (RFC 1071) used to protect every data frame.
//!
//! The checksum travels as the last two bytes of a frame (big-endian) and
//! covers only the serialised envelope in front of it.  Acknowledgments are
//! never checksummed.
//!
//! No I/O happens here; this is pure data transformation.

/// Byte length of the checksum trailer on the wire.
pub const CHECKSUM_LEN: usize = 2;

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// Sum consecutive 16-bit big-endian words, fold the carry, return the
/// one's-complement.  An odd trailing byte is padded with a zero byte on
/// the right.
pub fn compute(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum = sum.wrapping_add(u32::from(u16::from_be_bytes([word[0], word[1]])));
        // Fold eagerly so arbitrarily long inputs cannot overflow the accumulator.
        if sum >> 16 != 0 {
            sum = (sum & 0xffff) + (sum >> 16);
        }
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }

    // Fold 32-bit sum into 16 bits.
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// `true` when `expected` is the checksum of `data`.
pub fn verify(data: &[u8], expected: u16) -> bool {
    compute(data) == expected
}
