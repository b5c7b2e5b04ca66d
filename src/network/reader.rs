//! Connection reader: frames, parses, and forwards inbound lines.

use std::sync::Arc;

use futures_util::StreamExt;
use slirc_proto::{LineCodec, Message, MessageParseError};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use super::socket::Connection;
use crate::bot::Task;
use crate::process::WorkQueue;

/// Read until the connection fails, then request a restart.
///
/// Cancellation (a deliberate stop) exits without requesting anything.
pub async fn run(
    connection: Arc<Connection>,
    messages: WorkQueue<Arc<Message>>,
    tasks: WorkQueue<Task>,
) {
    let Some((reader, cancel)) = connection.take_reader() else {
        warn!("No connection to read from");
        request_restart(&connection, &tasks).await;
        return;
    };

    let mut framed = FramedRead::new(reader, LineCodec::new());
    let mut sequence = 0u64;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Reader cancelled");
                return;
            }
            frame = framed.next() => frame,
        };

        let line = match frame {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                warn!(error = %e, "Read failed");
                break;
            }
            None => {
                info!("Server closed the connection");
                break;
            }
        };

        let mut message = match Message::parse(&line) {
            Ok(message) => message,
            Err(MessageParseError::EmptyMessage) => continue,
            Err(e) => {
                warn!(
                    error = %e,
                    code = e.error_code(),
                    line = %String::from_utf8_lossy(&line),
                    "Dropping unparseable line"
                );
                continue;
            }
        };
        sequence += 1;
        message.sequence = sequence;
        debug!(sequence, line = %String::from_utf8_lossy(&message.raw), "RECV");

        tokio::select! {
            _ = cancel.cancelled() => return,
            result = messages.put(Arc::new(message)) => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to forward message");
                }
            }
        }
    }

    request_restart(&connection, &tasks).await;
}

/// Queue a restart, unless the other half of `connection` already did.
pub(super) async fn request_restart(connection: &Connection, tasks: &WorkQueue<Task>) {
    if !connection.report_failure() {
        debug!("Restart already requested for this connection");
        return;
    }
    if let Err(e) = tasks.put(Task::Restart).await {
        warn!(error = %e, "Failed to request restart");
    }
}
