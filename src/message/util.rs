/// Compute the log-base-two of the next power of two: 8 -> 3, 9 -> 4.
///
pub fn ceil_log2(x: usize) -> usize {
    let mut n = 0;
    while 1 << n < x {
        n += 1
    }
    n
}

/// Encode an f64 as its little-endian bytes.
///
pub fn f64_to_bytes(x: f64) -> Vec<u8> {
    x.to_le_bytes().to_vec()
}

/// Decode an f64 from the first eight little-endian bytes of a buffer.
///
pub fn f64_from_bytes(bytes: &[u8]) -> f64 {
    let mut buffer = [0; 8];
    buffer.copy_from_slice(&bytes[..8]);
    f64::from_le_bytes(buffer)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ceil_log2_rounds_up() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(9), 4);
    }

    #[test]
    fn f64_bytes_are_little_endian() {
        assert_eq!(f64_from_bytes(&f64_to_bytes(-2.5)), -2.5);
        assert_eq!(f64_to_bytes(1.0)[7], 0x3f);
    }
}
