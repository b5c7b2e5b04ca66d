//! Telemetry utilities for handler timing and log output.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::Notify;
use tracing::debug;
use tracing_subscriber::fmt::MakeWriter;

/// Guard for timing handler execution.
///
/// Logs the handler latency when dropped, including on panic unwind and abort.
pub struct CommandTimer {
    command: String,
    start: Instant,
}

impl CommandTimer {
    /// Start timing a command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for CommandTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        debug!(command = %self.command, seconds = duration, "Handler finished");
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span for a pipeline worker.
    pub fn worker(name: &str) -> Span {
        info_span!("worker", name = %name)
    }

    /// Span for a command invocation.
    pub fn command(name: &str, nick: Option<&str>, sender: Option<&str>) -> Span {
        info_span!(
            "command",
            name = %name,
            nick = nick.unwrap_or("-"),
            sender = sender.unwrap_or("-"),
        )
    }

    /// Span for an event binding.
    pub fn event(name: &str, command: &str) -> Span {
        info_span!("event", name = %name, command = %command)
    }
}

/// Log writer over stdout that reports when the reading end goes away.
///
/// Once stdout returns `BrokenPipe` every later write is swallowed and
/// [`StdoutWatch::closed`] resolves, letting the bot shut down without
/// attempting further output.
#[derive(Clone, Default)]
pub struct StdoutWatch {
    broken: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StdoutWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether stdout has reported a broken pipe.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Resolves once stdout has reported a broken pipe.
    pub async fn closed(&self) {
        if self.is_broken() {
            return;
        }
        self.notify.notified().await;
    }

    fn trip(&self) {
        if !self.broken.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }
}

/// Writer handed out by [`StdoutWatch`].
pub struct WatchedStdout {
    inner: io::Stdout,
    watch: StdoutWatch,
}

impl WatchedStdout {
    fn check<T>(&self, result: io::Result<T>, fallback: T) -> io::Result<T> {
        match result {
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                self.watch.trip();
                Ok(fallback)
            }
            other => other,
        }
    }
}

impl Write for WatchedStdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.watch.is_broken() {
            return Ok(buf.len());
        }
        let result = self.inner.write(buf);
        self.check(result, buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.watch.is_broken() {
            return Ok(());
        }
        let result = self.inner.flush();
        self.check(result, ())
    }
}

impl<'a> MakeWriter<'a> for StdoutWatch {
    type Writer = WatchedStdout;

    fn make_writer(&'a self) -> Self::Writer {
        WatchedStdout {
            inner: io::stdout(),
            watch: self.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trip_wakes_waiter_once() {
        let watch = StdoutWatch::new();
        assert!(!watch.is_broken());

        let waiter = {
            let watch = watch.clone();
            tokio::spawn(async move { watch.closed().await })
        };
        watch.trip();
        watch.trip();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(watch.is_broken());
        // Already tripped: resolves immediately.
        watch.closed().await;
    }

    #[test]
    fn broken_pipe_is_swallowed() {
        let watch = StdoutWatch::new();
        let writer = watch.make_writer();
        let err = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        assert_eq!(writer.check::<usize>(Err(err), 7).unwrap(), 7);
        assert!(watch.is_broken());

        let other = io::Error::other("boom");
        assert!(writer.check::<usize>(Err(other), 7).is_err());
    }
}
