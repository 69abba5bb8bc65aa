//! Terminal progress reporting for downloads

use crate::download::{DownloadProgress, ProgressObserver};
use indicatif::{ProgressBar, ProgressStyle};

/// Renders download progress as an `indicatif` bar.
///
/// The bar advances in the same 5% steps the downloader reports. When the
/// server sends no `Content-Length` a spinner is shown instead.
pub struct ProgressBarObserver {
    bar: ProgressBar,
}

impl ProgressBarObserver {
    pub fn new() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl Default for ProgressBarObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for ProgressBarObserver {
    fn on_start(&self, url: &str, total_bytes: Option<u64>) {
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        match total_bytes {
            Some(total) => {
                self.bar.set_length(total);
                self.bar.set_style(bar_style());
            },
            None => {
                self.bar.set_style(spinner_style());
                self.bar.enable_steady_tick(std::time::Duration::from_millis(120));
            },
        }
        self.bar.set_position(0);
        self.bar.set_message(url.to_string());
    }

    fn on_progress(&self, progress: DownloadProgress) {
        self.bar.set_position(progress.bytes_downloaded);
    }

    fn on_finish(&self, bytes_downloaded: u64) {
        self.bar
            .finish_with_message(format!("Downloaded {}", format_bytes(bytes_downloaded)));
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{msg}\n[{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
    )
    .map(|style| style.progress_chars("#>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}]")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Format bytes into a human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}
