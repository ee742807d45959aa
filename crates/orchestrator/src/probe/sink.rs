#![forbid(unsafe_code)]

use crate::domain::{CaptureRecord, ProbeEvent, Word};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Consumer of probe events.
///
/// `deliver` runs on the thread that made the intercepted call, so it must
/// not block for long. Sinks that need to do real work should forward to a
/// channel.
pub trait CaptureSink: Send + Sync {
    fn deliver(&self, event: ProbeEvent);
}

impl<F> CaptureSink for F
where
    F: Fn(ProbeEvent) + Send + Sync,
{
    fn deliver(&self, event: ProbeEvent) {
        self(event)
    }
}

/// Forwards events to a channel. Events are dropped once the receiver is
/// gone.
#[derive(Debug, Clone)]
pub struct ChannelSink(pub flume::Sender<ProbeEvent>);

impl ChannelSink {
    pub fn new() -> (Self, flume::Receiver<ProbeEvent>) {
        let (tx, rx) = flume::unbounded();
        (Self(tx), rx)
    }
}

impl CaptureSink for ChannelSink {
    fn deliver(&self, event: ProbeEvent) {
        if let Err(flume::SendError(event)) = self.0.send(event) {
            debug!(
                return_value = format_args!("{:#x}", event.return_value()),
                "capture receiver is gone, dropping event"
            );
        }
    }
}

/// Emits one log line per call.
#[derive(Debug, Clone)]
pub struct LogSink {
    function: String,
}

impl LogSink {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
        }
    }
}

impl CaptureSink for LogSink {
    fn deliver(&self, event: ProbeEvent) {
        match &event {
            ProbeEvent::Captured {
                record,
                return_value,
            } => {
                info!(
                    target: "hookprobe::capture",
                    "{}",
                    format_capture_line(Utc::now(), &self.function, record, *return_value)
                );
            }
            ProbeEvent::CaptureFailed {
                arguments,
                error,
                return_value,
            } => {
                warn!(
                    target: "hookprobe::capture",
                    function = %self.function,
                    arguments = %format_arguments(arguments),
                    return_value = format_args!("{return_value:#x}"),
                    %error,
                    "capture failed"
                );
            }
        }
    }
}

/// Hands every event to each of its sinks.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn CaptureSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn CaptureSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl CaptureSink for FanoutSink {
    fn deliver(&self, event: ProbeEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.deliver(event.clone());
            }
            last.deliver(event);
        }
    }
}

/// `<timestamp> <function> called: arg0=<hex>, ..., bytes=<hex> returned: <hex>`
///
/// The `bytes=` field is left out when the record holds no buffer.
pub fn format_capture_line(
    timestamp: DateTime<Utc>,
    function: &str,
    record: &CaptureRecord,
    return_value: Word,
) -> String {
    let mut line = format!(
        "{} {function} called: {}",
        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        format_arguments(record.arguments())
    );
    if record.bytes().is_some() {
        let separator = if record.arguments().is_empty() { "" } else { ", " };
        let _ = write!(line, "{separator}bytes={}", record.hex_digest());
    }
    let _ = write!(line, " returned: {return_value:#x}");
    line
}

/// `arg0=<hex>, arg1=<hex>, ...`
pub fn format_arguments(arguments: &[Word]) -> String {
    let mut out = String::new();
    for (slot, word) in arguments.iter().enumerate() {
        if slot > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "arg{slot}={word:#x}");
    }
    out
}
