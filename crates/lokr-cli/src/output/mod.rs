//! Terminal output for the `lokr` commands.
//!
//! Status lines (`success`, `info`, `warn`) are styled; `line` prints plain
//! text so ids, URLs and JSON can be piped.

pub mod colors;
pub mod errors;

use colors::ColorSupport;

pub struct OutputHandler {
    colors: ColorSupport,
}

impl OutputHandler {
    pub fn new() -> Self {
        Self {
            colors: ColorSupport::detect(),
        }
    }

    pub fn info(&self, message: &str) {
        println!("{}", self.colors.dim(message));
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", self.colors.green("ok"), message);
    }

    /// Warnings go to stderr so they never mix with piped output
    pub fn warn(&self, message: &str) {
        eprintln!("{} {}", self.colors.yellow("warning:"), message);
    }

    pub fn line(&self, message: &str) {
        println!("{}", message);
    }

    /// Column header of a table listing
    pub fn header(&self, message: &str) {
        println!("{}", self.colors.bold(message));
    }

    pub fn step(&self, marker: &str, message: &str) {
        println!("{} {}", self.colors.bold(marker), message);
    }
}

impl Default for OutputHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Human-readable byte count (`1.5 KB`)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.0 GB");
        assert_eq!(format_bytes(5 * 1024u64.pow(5)), "5120.0 TB");
    }
}
