//! Handles shared by every worker and handler.

use std::sync::Arc;

use slirc_proto::Message;

use super::Task;
use crate::config::Config;
use crate::db::Database;
use crate::error::BotError;
use crate::handlers::{self, Registry};
use crate::options::Options;
use crate::process::{ExecutorPool, WorkQueue};
use crate::scheduler::ScheduleRequest;
use crate::shared::SharedData;

/// The queues connecting pipeline stages.
#[derive(Clone)]
pub struct Queues {
    /// Lines for the sender.
    pub send: WorkQueue<String>,
    /// Parsed lines from the reader.
    pub messages: WorkQueue<Arc<Message>>,
    /// Messages forwarded by the message dispatcher.
    pub events: WorkQueue<Arc<Message>>,
    pub schedule: WorkQueue<ScheduleRequest>,
    /// Control tasks for the main loop.
    pub tasks: WorkQueue<Task>,
}

impl Queues {
    pub fn new(capacity: usize) -> Self {
        Self {
            send: WorkQueue::new("send", capacity),
            messages: WorkQueue::new("messages", capacity),
            events: WorkQueue::new("events", capacity),
            schedule: WorkQueue::new("schedule", capacity),
            tasks: WorkQueue::new("tasks", capacity),
        }
    }
}

#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub options: Options,
    pub db: Database,
    pub data: SharedData,
    pub registry: Arc<Registry>,
    pub pool: Arc<ExecutorPool>,
    pub queues: Queues,
}

impl Services {
    /// Open the database and build every shared handle. The registry starts
    /// with the built-in modules and nothing bound.
    pub fn new(config: &Config) -> Result<Self, BotError> {
        let db = Database::open(&config.database.path)?;
        let queues = Queues::new(config.lifecycle.queue_capacity);
        let options = Options::new(config, db.clone(), queues.send.clone(), queues.tasks.clone());

        Ok(Self {
            config: Arc::new(config.clone()),
            options,
            db,
            data: SharedData::new(),
            registry: Arc::new(Registry::new(handlers::builtin_modules())),
            pool: Arc::new(ExecutorPool::new(config.pool.ceiling)),
            queues,
        })
    }
}
