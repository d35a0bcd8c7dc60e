//! Bijective base-58 codec between 64-bit sequence numbers and short codes.
//!
//! The alphabet omits `0`, `O`, `I`, and `l` to avoid characters that are
//! easily confused with each other in a URL a person has to retype. Encoded
//! output is bounded to 8 symbols, giving an address space of 58^8 values —
//! comfortably larger than any `u64` sequence this service will ever mint.

use crate::error::Error;

const ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BASE: u64 = 58;
const MAX_SYMBOLS: usize = 8;

/// `DIGIT_OF[byte as usize]` is the digit value of `byte`, or -1 if `byte`
/// is not part of the alphabet.
const DIGIT_OF: [i8; 256] = build_digit_table();

const fn build_digit_table() -> [i8; 256] {
    let mut table = [-1i8; 256];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as i8;
        i += 1;
    }
    table
}

/// `POW58[k] == 58u64.pow(k)` for k in 0..=8, used to bound overflow during decode.
const POW58: [u64; MAX_SYMBOLS + 1] = build_pow_table();

const fn build_pow_table() -> [u64; MAX_SYMBOLS + 1] {
    let mut table = [1u64; MAX_SYMBOLS + 1];
    let mut i = 1;
    while i <= MAX_SYMBOLS {
        table[i] = table[i - 1] * BASE;
        i += 1;
    }
    table
}

/// Encode `n` as a short code. `0` encodes to the empty string; callers that
/// mint sequence numbers starting at 1 never observe this.
pub fn encode(mut n: u64) -> String {
    if n == 0 {
        return String::new();
    }
    let mut buf = [0u8; MAX_SYMBOLS];
    let mut i = MAX_SYMBOLS;
    while n > 0 {
        i -= 1;
        buf[i] = ALPHABET[(n % BASE) as usize];
        n /= BASE;
    }
    String::from_utf8(buf[i..].to_vec()).expect("alphabet is ASCII")
}

/// Decode a short code back to its sequence number.
///
/// Returns `InvalidInput` if the code is longer than 8 symbols, contains a
/// byte outside the alphabet, or would overflow the codec's address space.
pub fn decode(code: &str) -> Result<u64, Error> {
    let bytes = code.as_bytes();
    if bytes.len() > MAX_SYMBOLS {
        return Err(Error::invalid_input(format!(
            "short code {code:?} exceeds {MAX_SYMBOLS} characters"
        )));
    }
    let mut n: u64 = 0;
    for &b in bytes {
        let digit = DIGIT_OF[b as usize];
        if digit < 0 {
            return Err(Error::invalid_input(format!(
                "short code {code:?} contains invalid character {:?}",
                b as char
            )));
        }
        n = n
            .checked_mul(BASE)
            .and_then(|v| v.checked_add(digit as u64))
            .ok_or_else(|| {
                Error::invalid_input(format!("short code {code:?} overflows u64"))
            })?;
    }
    // POW58[8] - 1 is the largest representable value in exactly 8 symbols;
    // anything beyond that round-trips to a longer encoding, so reject it
    // explicitly rather than returning a value Encode would never produce.
    if n >= POW58[MAX_SYMBOLS] {
        return Err(Error::invalid_input(format!(
            "short code {code:?} is out of range"
        )));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(decode("").unwrap(), 0);
        assert_eq!(decode("2").unwrap(), 1);
        assert_eq!(decode("z").unwrap(), 57);
        assert_eq!(decode("21").unwrap(), 58);
        assert_eq!(decode("BukQL").unwrap(), 123_456_789);
        assert_eq!(decode("zzzzzzzz").unwrap(), 128_063_081_718_015);
    }

    #[test]
    fn round_trip_sample_range() {
        for n in 1..=100_000u64 {
            let code = encode(n);
            assert!(code.len() <= 8);
            assert_eq!(decode(&code).unwrap(), n);
        }
    }

    #[test]
    fn encode_is_length_minimal() {
        assert_eq!(encode(0), "");
        assert_eq!(encode(1), "2");
        assert_eq!(encode(57), "z");
        assert_eq!(encode(58), "21");
    }

    #[test]
    fn rejects_overlong_input() {
        assert!(decode("zzzzzzzzz").is_err());
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(decode("000").is_err());
        assert!(decode("12345l").is_err());
        assert!(decode("I0Ol").is_err());
    }
}
