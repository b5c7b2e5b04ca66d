//! Administrative commands and caller credentials.
//!
//! | gate                | commands                                       |
//! |---------------------|------------------------------------------------|
//! | owner, admin place  | `restart`, `quit`, `nick`                      |
//! | owner, private      | `pids`                                         |
//! | admin, admin place  | `reload`, `join`, `part`, `visit`, `prefixes`  |
//! | admin, private      | `msg`, `me`                                    |
//! | admin               | `processes`, `prefix`, `channel-prefix`        |
//! | anyone              | `commands`                                     |
//!
//! An admin place is a private message or one of `admin-channels`.

use serde_json::{Map, Value, json};

use super::core::{Bindings, Context, Module, Priority};
use crate::bot::Task;
use crate::error::{HandlerError, HandlerResult};
use crate::options::{string_list, valid_channel, valid_nick};

const E_ADMIN: &str = "Only available to an admin";
const E_ADMIN_PLACE: &str = "Only available to an admin in an admin place";
const E_ADMIN_PRIVATE: &str = "Only available to an admin in private";
const E_OWNER_PLACE: &str = "Only available to the owner in an admin place";
const E_OWNER_PRIVATE: &str = "Only available to the owner in private";

pub struct AdminModule;

impl Module for AdminModule {
    fn name(&self) -> &'static str {
        "admin"
    }

    fn register(&self, bindings: &mut Bindings) {
        bindings.builder(credentials);

        bindings.command("reload", "Reload the handler modules", reload);
        bindings.command("restart", "Restart the bot", restart);
        bindings.command("quit", "Quit the server and exit", quit);
        bindings.command("processes", "Show running handler tasks", processes);
        bindings.command("pids", "Show the pipeline workers", pids);
        bindings.command("nick", "Change the bot's nickname", nick);
        bindings.command("join", "Join a channel and remember it", join);
        bindings.command("part", "Leave a channel and forget it", part);
        bindings.command("visit", "Join a channel temporarily", visit);
        bindings.command("prefix", "Set the command prefix for all channels", prefix);
        bindings.command(
            "channel-prefix",
            "Set the command prefix for one channel",
            channel_prefix,
        );
        bindings.command("prefixes", "Show the prefixes in use", prefixes);
        bindings.command("msg", "Send a message as the bot", msg);
        bindings.command("me", "Send an action as the bot", me);
        bindings.command("commands", "List the available commands", commands);

        bindings.event("433", Priority::Medium, false, nick_refused);
    }
}

/// Fill in `ctx.credentials` for messages that can carry commands.
fn credentials(ctx: &mut Context) {
    if ctx.event != "PRIVMSG" {
        return;
    }
    let options = ctx.options();
    let nick = ctx.nick.clone().unwrap_or_default();
    let sender = ctx.sender.clone().unwrap_or_default();

    let owner = options
        .string("admin-owner")
        .is_some_and(|owner| !owner.is_empty() && owner.eq_ignore_ascii_case(&nick));
    let user = owner
        || options
            .list("admin-users")
            .iter()
            .any(|u| u.eq_ignore_ascii_case(&nick));
    let channel = options
        .list("admin-channels")
        .iter()
        .any(|c| c.eq_ignore_ascii_case(&sender));

    ctx.credentials.owner = owner;
    ctx.credentials.user = user;
    ctx.credentials.channel = channel;
    ctx.credentials.place = ctx.private || channel;
}

fn require(allowed: bool, denial: &str) -> HandlerResult {
    if allowed {
        Ok(())
    } else {
        Err(HandlerError::user(denial))
    }
}

fn reply_to(ctx: &Context) -> Result<crate::bot::ReplyTo, HandlerError> {
    ctx.reply_to().ok_or(HandlerError::NoReplyTarget)
}

/// Split `arg` into its first word and the rest.
fn split_arg<'a>(arg: &'a str, usage: &str) -> Result<(&'a str, &'a str), HandlerError> {
    match arg.split_once(' ') {
        Some((head, rest)) if !rest.trim().is_empty() => Ok((head, rest.trim())),
        _ => Err(HandlerError::user(format!("Usage: {usage}"))),
    }
}

async fn reload(ctx: Context) -> HandlerResult {
    require(ctx.credentials.admin(), E_ADMIN_PLACE)?;
    let reply_to = Some(reply_to(&ctx)?);
    ctx.task(Task::Reload { reply_to }).await
}

async fn restart(ctx: Context) -> HandlerResult {
    let creds = ctx.credentials;
    require(creds.owner && creds.place, E_OWNER_PLACE)?;
    ctx.task(Task::Restart).await
}

async fn quit(ctx: Context) -> HandlerResult {
    let creds = ctx.credentials;
    require(creds.owner && creds.place, E_OWNER_PLACE)?;
    ctx.task(Task::Quit {
        by: ctx.nick.clone(),
    })
    .await
}

async fn processes(ctx: Context) -> HandlerResult {
    require(ctx.credentials.user, E_ADMIN)?;
    let reply_to = reply_to(&ctx)?;
    ctx.task(Task::Processes { reply_to }).await
}

async fn pids(ctx: Context) -> HandlerResult {
    require(ctx.credentials.owner && ctx.private, E_OWNER_PRIVATE)?;
    let reply_to = reply_to(&ctx)?;
    ctx.task(Task::Pids { reply_to }).await
}

async fn nick(ctx: Context) -> HandlerResult {
    let creds = ctx.credentials;
    require(creds.owner && creds.place, E_OWNER_PLACE)?;
    if !valid_nick(&ctx.arg) {
        return Err(HandlerError::user("Not a valid nickname"));
    }
    ctx.send(&["NICK", &ctx.arg]).await
}

async fn join(ctx: Context) -> HandlerResult {
    require(ctx.credentials.admin(), E_ADMIN_PLACE)?;
    let channel = ctx.arg.as_str();
    if !valid_channel(channel) {
        return Err(HandlerError::user("Not a valid channel name"));
    }

    ctx.options()
        .update("channels", |current| {
            let mut channels = string_list(current);
            if !channels.iter().any(|c| c == channel) {
                channels.push(channel.to_string());
            }
            json!(channels)
        })
        .await?;
    ctx.send(&["JOIN", channel]).await?;
    ctx.reply(&format!("Joined {channel}")).await
}

async fn part(ctx: Context) -> HandlerResult {
    require(ctx.credentials.admin(), E_ADMIN_PLACE)?;
    let channel = ctx.arg.as_str();
    if !valid_channel(channel) {
        return Err(HandlerError::user("Not a valid channel name"));
    }

    ctx.options()
        .update("channels", |current| {
            let mut channels = string_list(current);
            channels.retain(|c| c != channel);
            json!(channels)
        })
        .await?;
    ctx.send(&["PART", channel]).await?;
    ctx.reply(&format!("Parted {channel}")).await
}

async fn visit(ctx: Context) -> HandlerResult {
    require(ctx.credentials.admin(), E_ADMIN_PLACE)?;
    if !valid_channel(&ctx.arg) {
        return Err(HandlerError::user("Not a valid channel name"));
    }
    ctx.send(&["JOIN", &ctx.arg]).await
}

async fn prefix(ctx: Context) -> HandlerResult {
    require(ctx.credentials.user, E_ADMIN)?;
    if ctx.arg.is_empty() {
        return Err(HandlerError::user("Usage: prefix <prefix>"));
    }

    let arg = ctx.arg.as_str();
    ctx.options()
        .update("prefix", |current| match current {
            Some(Value::Object(mut map)) => {
                map.insert(String::new(), json!(arg));
                Value::Object(map)
            }
            _ => json!(arg),
        })
        .await?;
    ctx.reply(&format!("Set prefix for all channels to {:?}", ctx.arg))
        .await
}

async fn channel_prefix(ctx: Context) -> HandlerResult {
    require(ctx.credentials.user, E_ADMIN)?;
    let (channel, prefix) = split_arg(&ctx.arg, "channel-prefix #channel <prefix>")?;

    ctx.options()
        .update("prefix", |current| {
            let mut map = match current {
                Some(Value::Object(map)) => map,
                Some(Value::String(fallback)) => {
                    Map::from_iter([(String::new(), json!(fallback))])
                }
                _ => Map::new(),
            };
            map.insert(channel.to_string(), json!(prefix));
            Value::Object(map)
        })
        .await?;
    ctx.reply(&format!("Set prefix for {channel} to {prefix:?}"))
        .await
}

async fn prefixes(ctx: Context) -> HandlerResult {
    require(ctx.credentials.admin(), E_ADMIN_PLACE)?;
    let mut prefixes: Vec<_> = ctx.options().prefixes().into_iter().collect();
    prefixes.sort();
    let described: Vec<String> = prefixes
        .into_iter()
        .map(|(channel, prefix)| {
            if channel.is_empty() {
                format!("{prefix:?} by default")
            } else {
                format!("{prefix:?} on {channel}")
            }
        })
        .collect();
    ctx.reply(&described.join(", ")).await
}

async fn msg(ctx: Context) -> HandlerResult {
    require(ctx.credentials.user && ctx.private, E_ADMIN_PRIVATE)?;
    let (recipient, text) = split_arg(&ctx.arg, "msg <recipient> <text>")?;
    ctx.send(&["PRIVMSG", recipient, text]).await
}

async fn me(ctx: Context) -> HandlerResult {
    require(ctx.credentials.user && ctx.private, E_ADMIN_PRIVATE)?;
    let (recipient, text) = split_arg(&ctx.arg, "me <recipient> <text>")?;
    ctx.send(&["PRIVMSG", recipient, &format!("\x01ACTION {text}\x01")])
        .await
}

async fn commands(ctx: Context) -> HandlerResult {
    let bindings = ctx.services().registry.current();
    let names: Vec<&str> = bindings.commands().into_iter().map(|(n, _)| n).collect();
    ctx.reply(&format!("Commands: {}", names.join(", "))).await
}

/// Someone tried to move us onto a nick that is taken.
async fn nick_refused(ctx: Context) -> HandlerResult {
    if ctx.data().address().is_none() {
        return Ok(());
    }
    let Some(owner) = ctx.options().string("admin-owner") else {
        return Ok(());
    };
    let wanted = ctx.message.param(1).unwrap_or("?");
    let text = format!(
        "Somebody tried to change my nick to {wanted}, but that nick is already in use"
    );
    ctx.msg(&owner, &text).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::Services;
    use crate::config::Config;
    use slirc_proto::Message;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn services(dir: &TempDir) -> Services {
        let mut config = Config::default();
        config.identity.nick = "bot".to_string();
        config.admin.owner = Some("boss".to_string());
        config.admin.users = vec!["helper".to_string()];
        config.admin.channels = vec!["#ops".to_string()];
        config.database.path = dir.path().join("a.db").display().to_string();
        Services::new(&config).unwrap()
    }

    fn context(services: &Services, line: &str) -> Context {
        let message: Message = line.parse().unwrap();
        let mut ctx = Context::new(Arc::new(message), services.clone());
        credentials(&mut ctx);
        ctx
    }

    #[tokio::test]
    async fn credentials_follow_options() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);

        let owner = context(&services, ":boss!u@h PRIVMSG #ops :.restart");
        assert!(owner.credentials.owner && owner.credentials.user);
        assert!(owner.credentials.channel && owner.credentials.place);

        let helper = context(&services, ":helper!u@h PRIVMSG #lobby :.reload");
        assert!(!helper.credentials.owner && helper.credentials.user);
        assert!(!helper.credentials.place);

        let private = context(&services, ":helper!u@h PRIVMSG bot :.reload");
        assert!(private.credentials.admin());

        let stranger = context(&services, ":nobody!u@h PRIVMSG bot :.reload");
        assert!(!stranger.credentials.user);
    }

    #[tokio::test]
    async fn gated_commands_refuse_strangers() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        let ctx = context(&services, ":nobody!u@h PRIVMSG #ops :.quit");
        match quit(ctx).await {
            Err(HandlerError::User(text)) => assert_eq!(text, E_OWNER_PLACE),
            other => panic!("expected a user error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn quit_by_owner_queues_task() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        quit(context(&services, ":boss!u@h PRIVMSG bot :.quit"))
            .await
            .unwrap();

        let mut tasks = services.queues.tasks.consumer().await;
        assert_eq!(
            tasks.next().await,
            Some(Task::Quit {
                by: Some("boss".to_string())
            })
        );
    }

    #[tokio::test]
    async fn join_remembers_channel() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        join(context(&services, ":helper!u@h PRIVMSG #ops :.join #new"))
            .await
            .unwrap();
        assert_eq!(services.options.list("channels"), vec!["#new"]);

        part(context(&services, ":helper!u@h PRIVMSG #ops :.part #new"))
            .await
            .unwrap();
        assert!(services.options.list("channels").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_keep_every_channel() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let ctx = context(&services, &format!(":helper!u@h PRIVMSG #ops :.join #c{i}"));
                tokio::spawn(join(ctx))
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut channels = services.options.list("channels");
        channels.sort();
        let mut expected: Vec<String> = (0..32).map(|i| format!("#c{i}")).collect();
        expected.sort();
        assert_eq!(channels, expected);
    }

    #[tokio::test]
    async fn channel_prefix_keeps_fallback() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        channel_prefix(context(&services, ":helper!u@h PRIVMSG bot :.channel-prefix #dev !"))
            .await
            .unwrap();

        assert_eq!(services.options.prefix_for(Some("#dev")), "!");
        assert_eq!(services.options.prefix_for(Some("#other")), ".");

        prefix(context(&services, ":helper!u@h PRIVMSG bot :.prefix ?"))
            .await
            .unwrap();
        assert_eq!(services.options.prefix_for(Some("#other")), "?");
        assert_eq!(services.options.prefix_for(Some("#dev")), "!");
    }

    #[test]
    fn split_arg_requires_both_parts() {
        assert_eq!(split_arg("#c hi there", "u").unwrap(), ("#c", "hi there"));
        assert!(split_arg("#c", "u").is_err());
        assert!(split_arg("#c   ", "u").is_err());
    }
}
