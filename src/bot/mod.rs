//! The bot: pipeline assembly and the main task loop.
//!
//! ```text
//! socket ─► receive ─► messages ─► events ─► handlers
//!                          │                    │
//!                          └──► executor pool ◄─┘
//!                                    │
//!              send ◄── send queue ◄─┼─► schedule queue ─► schedule
//!                                    ▼                        │
//!                               task queue ◄──────────────────┘
//!                                    │
//!                                main loop
//! ```
//!
//! The main loop is the task queue's only consumer. It performs control
//! tasks one at a time and races them against termination signals and the
//! loss of standard output.

mod services;
mod signals;
mod tasks;

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tracing::{error, info, warn};

pub use services::{Queues, Services};
pub use signals::ShutdownSignals;
pub use tasks::{Flow, ReplyTo, Task};

use crate::config::Config;
use crate::dispatch;
use crate::error::BotError;
use crate::network::{Connection, reader, sender};
use crate::process::{Pipeline, Worker};
use crate::scheduler;
use crate::telemetry::StdoutWatch;

pub struct Bot {
    services: Services,
    pipeline: Pipeline,
    stdout: StdoutWatch,
}

/// Cloneable handle for submitting tasks to a running bot.
#[derive(Clone)]
pub struct BotHandle {
    services: Services,
}

impl BotHandle {
    pub async fn task(&self, task: Task) -> Result<(), BotError> {
        self.services.queues.tasks.put(task).await?;
        Ok(())
    }

    pub fn services(&self) -> &Services {
        &self.services
    }
}

impl Bot {
    /// Open storage and assemble the pipeline. Nothing connects until
    /// [`Bot::run`].
    pub fn new(config: Config) -> Result<Self, BotError> {
        let services = Services::new(&config)?;
        let queues = services.queues.clone();

        let connection = Arc::new(Connection::new(
            services.options.clone(),
            services.data.clone(),
            config.connection.verify_cert,
            Duration::from_secs(config.lifecycle.connect_backoff),
        ));

        let receive = Worker::new("receive", connection.clone());
        {
            let connection = Arc::clone(&connection);
            let messages = queues.messages.clone();
            let tasks = queues.tasks.clone();
            receive.set_action(move || {
                reader::run(Arc::clone(&connection), messages.clone(), tasks.clone()).boxed()
            });
        }

        let send = Worker::queue("send", queues.send.clone());
        {
            let connection = Arc::clone(&connection);
            let queue = queues.send.clone();
            let tasks = queues.tasks.clone();
            let options = services.options.clone();
            let config = config.sender.clone();
            send.set_action(move || {
                sender::run(
                    Arc::clone(&connection),
                    queue.clone(),
                    tasks.clone(),
                    options.clone(),
                    config.clone(),
                )
                .boxed()
            });
        }

        let messages = Worker::queue("messages", queues.messages.clone());
        {
            let services = services.clone();
            messages.set_action(move || dispatch::messages::run(services.clone()).boxed());
        }

        let events = Worker::queue("events", queues.events.clone());
        {
            let services = services.clone();
            events.set_action(move || dispatch::events::run(services.clone()).boxed());
        }

        let schedule = Worker::queue("schedule", queues.schedule.clone());
        {
            let services = services.clone();
            let config = config.scheduler.clone();
            schedule.set_action(move || scheduler::run(services.clone(), config.clone()).boxed());
        }

        let pipeline = Pipeline::new(
            receive,
            send,
            vec![messages, events, schedule],
            config.lifecycle.stop_timeout(),
        );

        Ok(Self {
            services,
            pipeline,
            stdout: StdoutWatch::new(),
        })
    }

    /// Shut down quietly if `stdout` reports its reader has gone away.
    #[must_use]
    pub fn with_stdout(mut self, stdout: StdoutWatch) -> Self {
        self.stdout = stdout;
        self
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn handle(&self) -> BotHandle {
        BotHandle {
            services: self.services.clone(),
        }
    }

    /// Connect and run until told to quit.
    pub async fn run(self) -> Result<(), BotError> {
        let mut signals = ShutdownSignals::install().map_err(BotError::Signal)?;
        self.services
            .registry
            .reload(&self.services)
            .map_err(|e| BotError::Reload(e.to_string()))?;

        if let Err(e) = self.pipeline.start().await {
            warn!(error = %e, "Initial connection failed, will retry");
            self.services.queues.tasks.put(Task::Restart).await?;
        }

        let mut tasks = self.services.queues.tasks.consumer().await;
        loop {
            tokio::select! {
                task = tasks.next() => {
                    let Some(task) = task else {
                        warn!("Task queue closed");
                        break;
                    };
                    if self.perform(task).await == Flow::Exit {
                        break;
                    }
                }
                name = signals.recv() => {
                    self.shutdown(name).await;
                    break;
                }
                _ = self.stdout.closed() => {
                    self.pipeline.terminate();
                    self.services.pool.abort_all();
                    return Err(BotError::BrokenPipe);
                }
            }
        }

        info!("Bot exited");
        Ok(())
    }

    /// Quit in response to a termination signal, escalating to aborts.
    async fn shutdown(&self, signal: &'static str) {
        info!(signal, "Received signal, shutting down");
        let user = std::env::var("USER").unwrap_or_else(|_| "a signal".to_string());
        if let Err(e) = self
            .services
            .queues
            .send
            .put(format!("QUIT :{user} made me do it ({signal})"))
            .await
        {
            warn!(error = %e, "Failed to queue QUIT");
        }

        self.pipeline.stop().await;
        let collected = self.services.pool.collect(Duration::ZERO);
        if collected > 0 {
            error!(collected, "Aborted handlers still running at shutdown");
        }
        self.pipeline.terminate();
    }
}
