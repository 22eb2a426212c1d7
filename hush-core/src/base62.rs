//! Base62 encoding (`0-9A-Za-z`) for opaque tokens.
//!
//! Big-endian: the bytes are treated as one unsigned integer. Leading zero
//! bytes are kept as leading `'0'` characters so the length stays stable
//! for fixed-size inputs.

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Encode bytes as base62.
pub fn encode(bytes: &[u8]) -> String {
    let zeros = bytes.iter().take_while(|&&b| b == 0).count();

    // Repeated division of the big-endian number by 62.
    let mut digits: Vec<u8> = Vec::with_capacity(bytes.len() * 138 / 100 + 1);
    let mut num: Vec<u8> = bytes[zeros..].to_vec();
    while !num.is_empty() {
        let mut rem: u32 = 0;
        let mut quotient = Vec::with_capacity(num.len());
        for &b in &num {
            let acc = (rem << 8) | b as u32;
            let q = acc / 62;
            rem = acc % 62;
            if !(quotient.is_empty() && q == 0) {
                quotient.push(q as u8);
            }
        }
        digits.push(ALPHABET[rem as usize]);
        num = quotient;
    }

    let mut out = String::with_capacity(zeros + digits.len());
    out.extend(std::iter::repeat('0').take(zeros));
    out.extend(digits.iter().rev().map(|&d| d as char));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input() {
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn small_values() {
        assert_eq!(encode(&[0]), "0");
        assert_eq!(encode(&[61]), "z");
        assert_eq!(encode(&[62]), "10");
        assert_eq!(encode(&[0xff]), "47"); // 255 = 4*62 + 7
    }

    #[test]
    fn multi_byte_value() {
        // 0x0100 = 256 = 4*62 + 8
        assert_eq!(encode(&[1, 0]), "48");
    }

    #[test]
    fn leading_zeros_preserved() {
        assert_eq!(encode(&[0, 0, 1]), "001");
    }

    #[test]
    fn output_is_alphanumeric() {
        let bytes: Vec<u8> = (0u8..=255).collect();
        let encoded = encode(&bytes);
        assert!(encoded.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn thirty_two_bytes_is_about_43_chars() {
        let encoded = encode(&[0xff; 32]);
        assert_eq!(encoded.len(), 43);
    }
}
