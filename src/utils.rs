const BINARY_UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

/// Formats a byte count with binary units, e.g. `79 MiB` or `1.5 KiB`.
///
/// Values under ten units keep one decimal; sizes under ten bytes are printed as-is.
pub(crate) fn human_bytes(size: u64) -> String {
    if size < 10 {
        return format!("{} B", size);
    }
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < BINARY_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let value = (value * 10.0 + 0.5).floor() / 10.0;
    if value < 10.0 {
        format!("{:.1} {}", value, BINARY_UNITS[unit])
    } else {
        format!("{:.0} {}", value, BINARY_UNITS[unit])
    }
}

/// Keeps the first `max` code points of `s`, marking a cut with `...`.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}
