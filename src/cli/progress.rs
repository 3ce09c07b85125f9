//! Progress display for the download phase (UI concern only).

use indicatif::{ProgressBar, ProgressStyle};

use crate::download::DownloadEvent;

pub struct DownloadProgress {
    bar: ProgressBar,
}

impl DownloadProgress {
    pub fn new(total: usize) -> anyhow::Result<Self> {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )?
            .progress_chars("=>-"),
        );
        Ok(Self { bar })
    }

    pub fn handle(&self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Started { tariff_id } => {
                self.bar.set_message(format!("downloading {}", tariff_id));
            }
            DownloadEvent::Skipped { tariff_id } => {
                self.bar.set_message(format!("skipped {}", tariff_id));
                self.bar.inc(1);
            }
            DownloadEvent::Completed { tariff_id, .. } => {
                self.bar.set_message(format!("saved {}", tariff_id));
                self.bar.inc(1);
            }
            DownloadEvent::Failed { tariff_id, .. } => {
                self.bar.set_message(format!("failed {}", tariff_id));
                self.bar.inc(1);
            }
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
