use std::time::Duration;
use tracing::info;

/// On-screen message area of the host UI
pub trait ScreenMessageSink: Send {
    /// Show `text` for `duration`, replacing the previous notice
    fn post(&mut self, text: &str, duration: Duration);
    fn clear(&mut self);
}

/// Default sink for headless runs: notices go to the log
#[derive(Debug, Default)]
pub struct TracingScreenSink {
    last: Option<String>,
}

impl ScreenMessageSink for TracingScreenSink {
    fn post(&mut self, text: &str, _duration: Duration) {
        // Reposted every interval; only log changes
        if self.last.as_deref() != Some(text) {
            info!("{}", text);
            self.last = Some(text.to_string());
        }
    }

    fn clear(&mut self) {
        self.last = None;
    }
}
