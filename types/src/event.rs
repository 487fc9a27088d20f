//! Events emitted by the protocol client and the backend.

use crate::message::ProgressEnvelope;

/// A progress update for an in-flight request, normalized from the raw
/// min/max/current triple.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub message: String,
    pub minimum: i64,
    pub maximum: i64,
    pub current: i64,
}

impl ProgressUpdate {
    /// Completion in `[0, 1]`, or `None` for a degenerate range.
    #[must_use]
    pub fn fraction(&self) -> Option<f64> {
        let span = self.maximum - self.minimum;
        if span <= 0 {
            return None;
        }
        let done = (self.current - self.minimum).clamp(0, span);
        Some(done as f64 / span as f64)
    }
}

impl From<ProgressEnvelope> for ProgressUpdate {
    fn from(raw: ProgressEnvelope) -> Self {
        Self {
            message: raw.progress_message,
            minimum: raw.progress_minimum,
            maximum: raw.progress_maximum,
            current: raw.progress_current,
        }
    }
}

/// An event emitted by a running protocol client, outside any request's
/// reply channel.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The server signalled that the configuration is out of date.
    Dirty,
    /// The transport ended or the read loop hit a fatal protocol error.
    Closed { reason: String },
    /// The child process exited.
    Exited { exit_code: Option<i32> },
}

/// An event emitted by a backend to its owner.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// A configure+compute cycle finished successfully and the derived
    /// project state was replaced.
    Reconfigured,
    /// The project needs reconfiguring (unsolicited server signal).
    Dirty,
    /// Progress for the in-flight configure or compute step.
    Progress(ProgressUpdate),
    /// A display message from the server for the in-flight request.
    Message { title: String, message: String },
    /// One line of native build tool output.
    BuildOutput(String),
    /// The server process went away.
    ServerExited { exit_code: Option<i32> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_mid_range() {
        let progress = ProgressUpdate {
            message: String::new(),
            minimum: 0,
            maximum: 1000,
            current: 250,
        };
        assert!((progress.fraction().unwrap() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_fraction_degenerate_range() {
        let progress = ProgressUpdate {
            message: String::new(),
            minimum: 5,
            maximum: 5,
            current: 5,
        };
        assert!(progress.fraction().is_none());
    }

    #[test]
    fn test_fraction_clamps_out_of_range() {
        let progress = ProgressUpdate {
            message: String::new(),
            minimum: 0,
            maximum: 10,
            current: 50,
        };
        assert!((progress.fraction().unwrap() - 1.0).abs() < 1e-9);
    }
}
