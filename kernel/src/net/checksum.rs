/// RFC 1071 Internet checksum over big-endian 16-bit words.
///
/// An odd trailing byte is the high byte of a final, zero-padded word.
/// Write the result into a header with `to_be_bytes`. Running the checksum
/// over a header that already carries its correct checksum yields 0.
pub fn checksum(bytes: &[u8]) -> u16 {
    let mut words = bytes.chunks_exact(2);
    let mut sum: u32 = 0;

    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
        sum = fold(sum);
    }
    if let [last] = words.remainder() {
        sum += (*last as u32) << 8;
    }

    !(fold(fold(sum)) as u16)
}

/// End-around carry.
fn fold(sum: u32) -> u32 {
    (sum & 0xFFFF) + (sum >> 16)
}
