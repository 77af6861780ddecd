//! Progress rendering for transfers.

use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar for one file
pub struct TransferProgress {
    bar: ProgressBar,
    total_bytes: u64,
}

impl TransferProgress {
    /// Create a bar for `total_bytes`, labelled with the file name
    pub fn new(total_bytes: u64, name: &str) -> Self {
        let bar = ProgressBar::new(total_bytes);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{msg:20.20} [{bar:40.cyan/blue}] {bytes:>10}/{total_bytes:>10} {bytes_per_sec:>12}",
        ) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(name.to_string());
        Self { bar, total_bytes }
    }

    /// Hidden bar, for tests and non-interactive runs
    pub fn hidden(total_bytes: u64) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            total_bytes,
        }
    }

    /// Move to `percent` of the total
    pub fn set_percent(&self, percent: u8) {
        let percent = u64::from(percent.min(100));
        self.bar.set_position(self.total_bytes * percent / 100);
    }

    /// Finish at 100% with a closing message
    pub fn finish_with_message(&self, message: impl Into<String>) {
        self.bar.set_position(self.total_bytes);
        self.bar.finish_with_message(message.into());
    }

    /// Stop where the bar is
    pub fn abandon_with_message(&self, message: impl Into<String>) {
        self.bar.abandon_with_message(message.into());
    }
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}
