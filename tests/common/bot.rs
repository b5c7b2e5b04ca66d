//! Bot spawning for integration tests.

use slircbot::bot::{Bot, BotHandle, Task};
use slircbot::config::Config;
use slircbot::error::BotError;
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub const NICK: &str = "testbot";
pub const OWNER: &str = "boss";

/// Config for a bot pointed at `address`, with flood control off and its
/// database under `dir`.
pub fn test_config(address: &str, dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.connection.address = address.to_string();
    config.identity.nick = NICK.to_string();
    config.options.flood = true;
    config.options.channels = vec!["#test".to_string()];
    config.admin.owner = Some(OWNER.to_string());
    config.database.path = dir.path().join("bot.db").display().to_string();
    config
}

/// A bot running in the background.
pub struct TestBot {
    pub handle: BotHandle,
    pub task: JoinHandle<Result<(), BotError>>,
    _dir: TempDir,
}

impl TestBot {
    /// Build a bot from `config` and start it. `dir` must hold its database.
    pub fn spawn(config: Config, dir: TempDir) -> anyhow::Result<Self> {
        let bot = Bot::new(config)?;
        let handle = bot.handle();
        let task = tokio::spawn(bot.run());
        Ok(Self {
            handle,
            task,
            _dir: dir,
        })
    }

    /// Ask the bot to quit and wait for it to exit.
    pub async fn quit(self) -> anyhow::Result<()> {
        self.handle
            .task(Task::Quit {
                by: Some("tester".to_string()),
            })
            .await?;
        tokio::time::timeout(super::server::WAIT, self.task).await???;
        Ok(())
    }
}
