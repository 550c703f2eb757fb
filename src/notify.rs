use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

/// Persistent progress indicator shown while a download runs.
///
/// Display is best effort; nothing here reports failure to the caller.
pub trait Notifier: Send + Sync {
    /// Shows an indeterminate indicator.
    fn start(&self, title: &str);

    /// Switches to a determinate 0-100 indicator.
    fn update_progress(&self, title: &str, percent: u8);

    fn stop(&self);
}

/// Terminal progress bar on stderr.
pub struct TerminalNotifier {
    bar: Mutex<Option<ProgressBar>>,
}

impl Default for TerminalNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalNotifier {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner} Zingy: {msg}")
            .unwrap()
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("Zingy: {msg:30} {bar:40} {pos:>3}%")
            .unwrap()
            .progress_chars("=>-")
    }
}

impl Notifier for TerminalNotifier {
    fn start(&self, title: &str) {
        let Ok(mut slot) = self.bar.lock() else {
            return;
        };
        if let Some(old) = slot.take() {
            old.finish_and_clear();
        }
        let pb = ProgressBar::new_spinner();
        pb.set_draw_target(ProgressDrawTarget::stderr());
        pb.set_style(Self::spinner_style());
        pb.set_message(title.to_string());
        pb.enable_steady_tick(Duration::from_millis(120));
        *slot = Some(pb);
    }

    fn update_progress(&self, title: &str, percent: u8) {
        let Ok(mut slot) = self.bar.lock() else {
            return;
        };
        let pb = slot.get_or_insert_with(|| {
            let pb = ProgressBar::new(100);
            pb.set_draw_target(ProgressDrawTarget::stderr());
            pb
        });
        if pb.length() != Some(100) {
            pb.disable_steady_tick();
            pb.set_length(100);
        }
        pb.set_style(Self::bar_style());
        pb.set_message(title.to_string());
        pb.set_position(u64::from(percent.min(100)));
    }

    fn stop(&self) {
        let Ok(mut slot) = self.bar.lock() else {
            return;
        };
        if let Some(pb) = slot.take() {
            pb.finish_and_clear();
        }
    }
}

/// Shows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn start(&self, _title: &str) {}

    fn update_progress(&self, _title: &str, _percent: u8) {}

    fn stop(&self) {}
}
