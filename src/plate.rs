// 🚗 Plate normalization
//
// Two accepted formats once sanitized:
// - Legacy:   AAA9999  (3 letters + 4 digits)
// - Mercosul: AAA9A99  (3 letters, digit, letter, 2 digits)

/// Uppercase and strip everything that is not an ASCII letter or digit.
///
/// "abc-1d23" → "ABC1D23", " xyz 9876 " → "XYZ9876"
pub fn sanitize_plate(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Validate an already-sanitized plate.
pub fn is_valid_plate(plate: &str) -> bool {
    let bytes = plate.as_bytes();
    if bytes.len() != 7 {
        return false;
    }

    let prefix_ok = bytes[..3].iter().all(u8::is_ascii_uppercase);
    let digit_ok = bytes[3].is_ascii_digit();
    // position 4 is a digit on legacy plates, a letter on Mercosul plates
    let fifth_ok = bytes[4].is_ascii_digit() || bytes[4].is_ascii_uppercase();
    let suffix_ok = bytes[5..].iter().all(u8::is_ascii_digit);

    prefix_ok && digit_ok && fifth_ok && suffix_ok
}
