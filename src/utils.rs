/// Number of decimal places implied by a scaling factor: `-floor(log10(factor))`.
///
/// A factor of 0.1 gives 1 place, 0.5 gives 1 place, 1 gives 0 and 10 gives -1 (tens).
/// Returns `None` for factors that cannot describe a precision (zero, negative, NaN).
pub fn decimal_places(factor: f64) -> Option<i32> {
    if !(factor.is_finite() && factor > 0.0) {
        return None;
    }
    Some(-(factor.log10().floor() as i32))
}

/// Round `value` to `places` decimal places, ties to even. Negative `places` round to tens,
/// hundreds, and so on.
pub fn round_to_places(value: f64, places: i32) -> f64 {
    if places >= 0 {
        let scale = 10f64.powi(places);
        (value * scale).round_ties_even() / scale
    } else {
        let scale = 10f64.powi(-places);
        (value / scale).round_ties_even() * scale
    }
}

/// Decode a body as ISO-8859-1. Every byte maps to the code point of the same value, so this
/// never fails, unlike UTF-8 decoding of the same firmware output.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Inverse of [`decode_latin1`]; characters outside the Latin-1 range become `?`.
pub fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars().map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?')).collect()
}
