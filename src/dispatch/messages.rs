//! Message dispatcher.
//!
//! Consumes the message queue. A `PRIVMSG` naming a bound command is handed
//! to the executor pool, or dropped with a warning if the pool is full.
//! Every message, command or not, is then forwarded to the event queue.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::json;
use slirc_proto::Message;
use tracing::{Instrument, debug, error, warn};

use crate::bot::Services;
use crate::error::HandlerError;
use crate::handlers::{CommandBinding, Context};
use crate::process::pool::panic_message;
use crate::telemetry::{CommandTimer, spans};

/// Database key of per-command invocation counts.
pub const USAGE_KEY: &str = "usage";

/// Longest error detail echoed back to a channel.
const MAX_ERROR_LEN: usize = 200;

pub async fn run(services: Services) {
    let mut consumer = services.queues.messages.consumer().await;
    let registry = Arc::clone(&services.registry);

    while let Some(message) = consumer.next().await {
        if is_command_candidate(&message) {
            let bindings = registry.current();
            let ctx = bindings.context(Arc::clone(&message), services.clone());
            if let Some(name) = ctx.command.clone()
                && let Some(binding) = bindings.get_command(&name)
            {
                let binding = binding.clone();
                if let Err(e) = services.pool.spawn(&name, invoke_command(ctx, binding)) {
                    warn!(command = %name, error = %e, "Dropping command");
                }
            }
        }

        if let Err(e) = services.queues.events.put(message).await {
            warn!(error = %e, "Failed to forward message to events");
        }
    }
    debug!("Message dispatcher stopped");
}

/// Run one command handler, reporting failures to the sender and counting
/// the invocation.
pub async fn invoke_command(ctx: Context, binding: CommandBinding) {
    let Some(name) = ctx.command.clone() else {
        return;
    };
    let span = spans::command(&name, ctx.nick.as_deref(), ctx.sender.as_deref());
    async move {
        let _timer = CommandTimer::new(name.as_str());
        let reporter = ctx.clone();

        let outcome = AssertUnwindSafe(binding.handler.handle(ctx))
            .catch_unwind()
            .await;
        let report = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(HandlerError::User(text))) => Some(format!("Error: {text}")),
            Ok(Err(e)) => {
                error!(command = %name, code = e.error_code(), error = %e, "Command failed");
                Some(script_error(e.error_code(), &e.to_string()))
            }
            Err(panic) => {
                let text = panic_message(&*panic);
                error!(command = %name, panic = %text, "Command panicked");
                Some(script_error("panic", &text))
            }
        };
        if let Some(report) = report
            && let Err(e) = reporter.say(&report).await
        {
            debug!(command = %name, error = %e, "Could not report command error");
        }

        let counted = reporter.database().with_collection(USAGE_KEY, |usage| {
            if !usage.is_object() {
                *usage = json!({});
            }
            if let Some(map) = usage.as_object_mut() {
                let count = map.get(&name).and_then(|v| v.as_u64()).unwrap_or(0);
                map.insert(name.clone(), json!(count + 1));
            }
        });
        if let Err(e) = counted {
            warn!(command = %name, error = %e, "Failed to record usage");
        }
    }
    .instrument(span)
    .await;
}

/// `Script Error: <kind>: <detail>`, keeping only the first line of detail.
fn script_error(kind: &str, detail: &str) -> String {
    let mut line = detail.lines().next().unwrap_or("").to_string();
    if line.len() > MAX_ERROR_LEN {
        let mut end = MAX_ERROR_LEN;
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        line.truncate(end);
        line.push_str("...");
    }
    format!("Script Error: {kind}: {line}")
}

/// Whether `message` could carry a command.
pub fn is_command_candidate(message: &Message) -> bool {
    message.command.eq_ignore_ascii_case("PRIVMSG") && message.params.len() >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_error_keeps_first_line() {
        assert_eq!(
            script_error("internal_error", "boom\nstack"),
            "Script Error: internal_error: boom"
        );
        let long = "x".repeat(500);
        let text = script_error("panic", &long);
        assert!(text.ends_with("..."));
        assert!(text.len() < 250);
    }

    #[test]
    fn only_privmsg_carries_commands() {
        let privmsg: Message = ":n!u@h PRIVMSG #c :.echo".parse().unwrap();
        let notice: Message = ":n!u@h NOTICE #c :.echo".parse().unwrap();
        assert!(is_command_candidate(&privmsg));
        assert!(!is_command_candidate(&notice));
    }
}
