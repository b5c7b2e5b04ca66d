//! Connection events: registration, own-address discovery, nick tracking,
//! and keepalive.

use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};

use super::core::{Bindings, Context, Module, Priority};
use crate::bot::{Services, Task};
use crate::error::{HandlerError, HandlerResult};
use crate::options::valid_channel;
use crate::scheduler::unix_now;
use crate::shared::{ADDRESS, PONGED};

pub struct ConnectionModule;

impl Module for ConnectionModule {
    fn name(&self) -> &'static str {
        "connection"
    }

    fn register(&self, bindings: &mut Bindings) {
        bindings.event("1st", Priority::High, true, introduce);
        bindings.event("352", Priority::High, false, who_reply);
        bindings.event("433", Priority::High, false, nick_in_use);
        bindings.event("NICK", Priority::High, false, nick_changed);
        bindings.event("PING", Priority::High, false, ping);
        bindings.event("PONG", Priority::High, false, pong);
        bindings.startup(rediscover_address);
    }
}

/// Register with the server, identify, and join the start channels.
async fn introduce(ctx: Context) -> HandlerResult {
    let options = ctx.options().clone();
    let identity = &ctx.services().config.identity;
    let nick = options.nick();
    let flood = options.flood();

    if let Some(password) = options.string("password") {
        ctx.send(&["PASS", &password]).await?;
    }
    ctx.send(&["NICK", &nick]).await?;
    ctx.send(&["USER", &identity.user, "8", "*", &identity.realname])
        .await?;

    if let Some(nickserv) = options.string("nickserv") {
        ctx.msg("NickServ", &format!("IDENTIFY {nickserv}")).await?;
        if !flood {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    for channel in options.list("channels") {
        if valid_channel(&channel) {
            ctx.send(&["JOIN", &channel]).await?;
        } else {
            warn!(channel = %channel, "Not a valid channel name");
        }
        if !flood {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
    if !flood {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    ctx.send(&["WHO", &nick]).await
}

/// `352 <me> <channel> <user> <host> <server> <nick> ...`: learn our own
/// `nick!user@host` from a `WHO` on ourselves.
async fn who_reply(ctx: Context) -> HandlerResult {
    let params = &ctx.message.params;
    let nick = ctx.options().nick();
    if params.len() >= 4 && params[0] == nick {
        let address = format!("{}!{}@{}", params[0], params[2], params[3]);
        info!(address = %address, "Learned own address");
        ctx.data().set(ADDRESS, json!(address));
    }
    Ok(())
}

/// Nick taken before registration finished: give up.
async fn nick_in_use(ctx: Context) -> HandlerResult {
    if ctx.data().address().is_none() {
        warn!(nick = %ctx.options().nick(), "Nickname in use during registration, quitting");
        ctx.send(&["QUIT", "Quit"]).await?;
        ctx.task(Task::Quit { by: None }).await?;
    }
    Ok(())
}

/// Follow our own nick changes, including ones forced by the server.
async fn nick_changed(ctx: Context) -> HandlerResult {
    let own = ctx.options().nick();
    if ctx.nick.as_deref() == Some(own.as_str())
        && let Some(new) = ctx.message.param(0)
    {
        ctx.options().put_quiet("nick", json!(new))?;
    }
    Ok(())
}

async fn ping(ctx: Context) -> HandlerResult {
    let nick = ctx.options().nick();
    ctx.send(&["PONG", &nick]).await
}

async fn pong(ctx: Context) -> HandlerResult {
    ctx.data().set(PONGED, json!(unix_now()));
    Ok(())
}

/// On a reload, ask for our address again if it is not known. The first
/// load happens before connecting and records `modules` only afterwards.
fn rediscover_address(services: &Services) -> Result<(), HandlerError> {
    if services.data.address().is_none() && services.data.get("modules").is_some() {
        let nick = services.options.nick();
        services.queues.send.try_put(format!("WHO {nick}"))?;
    }
    Ok(())
}
