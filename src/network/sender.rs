//! Outbound line shaping and flood control.

use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter as GovRateLimiter};
use nonzero_ext::nonzero;
use tracing::{debug, warn};

use super::reader::request_restart;
use super::socket::Connection;
use crate::bot::Task;
use crate::config::SenderConfig;
use crate::options::Options;
use crate::process::WorkQueue;

/// Type alias for governor's direct rate limiter.
type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Strip CR/LF, truncate to `max_len` bytes, and terminate with CRLF.
///
/// Truncation backs up to a UTF-8 character boundary.
pub fn prepare_line(line: &str, max_len: usize) -> Vec<u8> {
    let mut clean: String = line.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    if clean.len() > max_len {
        let mut end = max_len;
        while !clean.is_char_boundary(end) {
            end -= 1;
        }
        clean.truncate(end);
    }
    let mut bytes = clean.into_bytes();
    bytes.extend_from_slice(b"\r\n");
    bytes
}

/// Spaces outbound lines at least one interval apart.
pub struct FloodGate {
    limiter: Option<DirectRateLimiter>,
}

impl FloodGate {
    pub fn new(interval: Duration) -> Self {
        let limiter = Quota::with_period(interval)
            .map(|quota| GovRateLimiter::direct(quota.allow_burst(nonzero!(1u32))));
        Self { limiter }
    }

    /// Wait until `line` may be sent. `QUIT` is never delayed, nor is
    /// anything while `flood` is set.
    pub async fn admit(&self, line: &str, flood: bool) {
        if flood || line.starts_with("QUIT") {
            return;
        }
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

/// Write queued lines until stopped or the connection fails. A failed
/// write requests a restart.
pub async fn run(
    connection: Arc<Connection>,
    queue: WorkQueue<String>,
    tasks: WorkQueue<Task>,
    options: Options,
    config: SenderConfig,
) {
    let gate = FloodGate::new(config.min_interval());
    let mut consumer = queue.consumer().await;

    while let Some(line) = consumer.next().await {
        gate.admit(&line, options.flood()).await;
        let bytes = prepare_line(&line, config.max_line_len);
        match connection.write_line(&bytes).await {
            Ok(()) => {
                debug!(line = %String::from_utf8_lossy(&bytes[..bytes.len() - 2]), "SENT");
            }
            Err(e) => {
                warn!(error = %e, "Write failed, sender stopping");
                request_restart(&connection, &tasks).await;
                return;
            }
        }
    }
    debug!("Sender stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::Services;
    use crate::config::Config;
    use std::time::Instant;
    use tempfile::TempDir;

    #[test]
    fn strips_line_breaks() {
        assert_eq!(
            prepare_line("PRIVMSG #c :a\r\nQUIT", 510),
            b"PRIVMSG #c :aQUIT\r\n".to_vec()
        );
    }

    #[test]
    fn truncates_on_char_boundary() {
        let line = format!("{}é", "a".repeat(509));
        let bytes = prepare_line(&line, 510);
        assert_eq!(bytes.len(), 509 + 2);
        assert!(bytes.ends_with(b"a\r\n"));

        let exact = "b".repeat(600);
        assert_eq!(prepare_line(&exact, 510).len(), 512);
    }

    #[tokio::test]
    async fn spaces_lines_apart() {
        let gate = FloodGate::new(Duration::from_millis(500));
        let start = Instant::now();
        for _ in 0..3 {
            gate.admit("PRIVMSG #c :hi", false).await;
        }
        // First line is immediate, the next two wait one interval each.
        assert!(start.elapsed() >= Duration::from_millis(950));
    }

    #[tokio::test]
    async fn quit_and_flood_bypass_limiter() {
        let gate = FloodGate::new(Duration::from_millis(500));
        gate.admit("PRIVMSG #c :first", false).await;

        let start = Instant::now();
        gate.admit("QUIT :bye", false).await;
        gate.admit("PRIVMSG #c :flooding", true).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn write_failure_requests_restart() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.options.flood = true;
        config.database.path = dir.path().join("s.db").display().to_string();
        let services = Services::new(&config).unwrap();
        let queues = &services.queues;
        let connection = Arc::new(Connection::new(
            services.options.clone(),
            services.data.clone(),
            true,
            Duration::ZERO,
        ));

        queues.send.put("PRIVMSG #c :lost".to_string()).await.unwrap();
        queues.send.put("PRIVMSG #c :also lost".to_string()).await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            run(
                Arc::clone(&connection),
                queues.send.clone(),
                queues.tasks.clone(),
                services.options.clone(),
                config.sender.clone(),
            ),
        )
        .await
        .expect("sender exits after a failed write");

        let mut tasks = queues.tasks.consumer().await;
        assert_eq!(tasks.next().await, Some(Task::Restart));
        assert!(queues.tasks.is_empty());
        // The reader failing on the same connection does not ask again.
        assert!(!connection.report_failure());
    }
}
