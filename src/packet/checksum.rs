//! # Frame Checksum
//!
//! NMEA-style checksum: XOR of every byte between `$` and `*`, written as two
//! hex digits. Only consulted when `[packet].verify_checksum` is enabled.

/// Calculate the XOR checksum of a frame body
///
/// # Arguments
///
/// * `body` - Frame text between the leading `$` and the `*` (exclusive)
///
/// # Examples
///
/// ```
/// use flight_tracker::packet::checksum::xor_checksum;
///
/// assert_eq!(xor_checksum("FLT,1,2,3,4,5"), 0x43);
/// ```
pub fn xor_checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, byte| acc ^ byte)
}

/// Check a `$...*XX` frame against its transmitted checksum
///
/// # Arguments
///
/// * `frame` - Frame text with the signal segment already removed
///
/// # Returns
///
/// * `true` if there is no checksum segment, or it matches the body
/// * `false` if the segment is malformed or does not match
pub fn verify(frame: &str) -> bool {
    let Some((body, transmitted)) = frame.split_once('*') else {
        return true;
    };

    let body = body.strip_prefix('$').unwrap_or(body);
    let transmitted = transmitted.trim();

    if transmitted.len() != 2 {
        return false;
    }

    match u8::from_str_radix(transmitted, 16) {
        Ok(expected) => xor_checksum(body) == expected,
        Err(_) => false,
    }
}
