//! Diagnostics sink of the embedding page.

pub trait Console: Send + Sync {
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards console output to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConsole;

impl Console for LogConsole {
    fn warn(&self, message: &str) {
        log::warn!(target: "domfetch::console", "{message}");
    }

    fn error(&self, message: &str) {
        log::error!(target: "domfetch::console", "{message}");
    }
}
