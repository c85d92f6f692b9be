//! Byte-count helpers used in quota diagnostics and the CLI listing.

const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];

/// Render a byte count with IEC units, e.g. `5 MiB` or `1.5 KiB`.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        return format!("{bytes} B");
    }

    let rendered = format!("{value:.1}");
    let rendered = rendered.strip_suffix(".0").unwrap_or(&rendered);
    format!("{rendered} {}", UNITS[unit])
}

/// Size a key/value pair the way web storage quotas count it.
pub fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}
