//! Monitoring reports.
//!
//! A [`Reporter`] is a cheap clonable handle that components use to emit
//! structured reports; the bus drains the paired [`ReportFeed`] and
//! publishes each report on the configured monitoring channel. Handles are
//! passed explicitly, so tests can capture reports without any global state.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Repeated exceptions with the same message are reported at most once per
/// window.
const EXCEPTION_DEDUP_WINDOW: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    #[serde(rename = "type")]
    pub kind: String,
    pub author: String,
    pub hostname: String,
    pub ipv4: Option<String>,
    pub datetime: DateTime<Utc>,
    pub data: Value,
}

#[derive(Clone)]
pub struct Reporter {
    author: String,
    hostname: String,
    ipv4: Option<String>,
    tx: mpsc::UnboundedSender<Report>,
    recent_exceptions: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

/// Receiving end drained by the bus.
pub struct ReportFeed {
    pub(crate) rx: mpsc::UnboundedReceiver<Report>,
}

/// Build a reporter and the feed the bus will publish from.
pub fn channel(author: impl Into<String>) -> (Reporter, ReportFeed) {
    let (tx, rx) = mpsc::unbounded_channel();
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let reporter = Reporter {
        author: author.into(),
        hostname,
        ipv4: local_ipv4(),
        tx,
        recent_exceptions: Arc::new(Mutex::new(HashMap::new())),
    };
    (reporter, ReportFeed { rx })
}

impl Reporter {
    /// Emit a report of an arbitrary kind.
    pub fn send(&self, kind: impl Into<String>, data: Value) {
        let report = Report {
            kind: kind.into(),
            author: self.author.clone(),
            hostname: self.hostname.clone(),
            ipv4: self.ipv4.clone(),
            datetime: Utc::now(),
            data,
        };
        if self.tx.send(report).is_err() {
            debug!("report feed closed, dropping report");
        }
    }

    /// Report an error, deduplicated by message within a one-hour window.
    pub fn exception(&self, error: &dyn std::fmt::Display) {
        let message = error.to_string();
        {
            let mut recent = self
                .recent_exceptions
                .lock()
                .expect("reporter lock poisoned");
            let now = Utc::now();
            if let Some(last) = recent.get(&message) {
                let window = chrono::Duration::from_std(EXCEPTION_DEDUP_WINDOW)
                    .unwrap_or_else(|_| chrono::Duration::hours(1));
                if now - *last < window {
                    debug!(%message, "exception already reported recently");
                    return;
                }
            }
            recent.insert(message.clone(), now);
        }
        self.send("exception", serde_json::json!({ "error": message }));
    }
}

/// Address the host would use to reach the outside; no packet is sent.
fn local_ipv4() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}
