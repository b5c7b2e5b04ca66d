//! Event dispatcher.
//!
//! For each message the candidate names are `1st` (first message of a
//! connection only), `*`, and the command verb. Bindings run by priority,
//! then by name in that order. Concurrent bindings go to the executor pool;
//! the rest run inline, so a slow inline binding delays later events.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use slirc_proto::Message;
use tracing::{Instrument, debug, error, warn};

use crate::bot::Services;
use crate::handlers::{Context, EventBinding, Priority};
use crate::process::pool::panic_message;
use crate::telemetry::spans;

/// Binding names that apply to `message`, in dispatch order.
pub fn event_names(message: &Message) -> Vec<String> {
    let mut names = Vec::with_capacity(3);
    if message.sequence == 1 {
        names.push("1ST".to_string());
    }
    names.push("*".to_string());
    names.push(message.command.to_ascii_uppercase());
    names
}

pub async fn run(services: Services) {
    let mut consumer = services.queues.events.consumer().await;
    let registry = Arc::clone(&services.registry);

    while let Some(message) = consumer.next().await {
        let bindings = registry.current();
        let names = event_names(&message);
        let ctx = bindings.context(Arc::clone(&message), services.clone());

        for priority in Priority::ALL {
            for name in &names {
                for binding in bindings.events_for(priority, name) {
                    if binding.concurrent {
                        let label = format!("event {name}");
                        let task = invoke_event(ctx.clone(), binding.clone(), name.clone());
                        if let Err(e) = services.pool.spawn(&label, task) {
                            warn!(event = %name, error = %e, "Dropping concurrent event");
                        }
                    } else {
                        invoke_event(ctx.clone(), binding.clone(), name.clone()).await;
                    }
                }
            }
        }
    }
    debug!("Event dispatcher stopped");
}

/// Run one event binding. Errors and panics are logged, never replied to.
async fn invoke_event(ctx: Context, binding: EventBinding, name: String) {
    let span = spans::event(&name, &ctx.event);
    async move {
        let outcome = AssertUnwindSafe(binding.handler.handle(ctx))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(event = %name, module = binding.module, code = e.error_code(), error = %e, "Event handler failed");
            }
            Err(panic) => {
                error!(event = %name, module = binding.module, panic = %panic_message(&*panic), "Event handler panicked");
            }
        }
    }
    .instrument(span)
    .await;
}
