//! Per-invocation handler context.
//!
//! A [`Context`] is built fresh for every dispatch from the message and the
//! services handle, then augmented by each enabled module's builders. It is
//! moved into the handler and never shared between invocations.

use std::sync::Arc;

use slirc_proto::Message;

use crate::bot::{ReplyTo, Services, Task};
use crate::db::Database;
use crate::error::{HandlerError, HandlerResult};
use crate::options::Options;
use crate::scheduler::ScheduleRequest;
use crate::shared::SharedData;

/// Fixed overhead of a relayed `PRIVMSG` line, leaving room for
/// `:address PRIVMSG target :` and CRLF within 512 bytes.
const LINE_BUDGET: usize = 498;

/// What the caller is allowed to do, filled in by the admin builder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Caller is the configured owner.
    pub owner: bool,
    /// Caller is the owner or a listed admin user.
    pub user: bool,
    /// Message arrived in an admin channel.
    pub channel: bool,
    /// Message arrived in private or in an admin channel.
    pub place: bool,
}

impl Credentials {
    /// Admin user speaking from an admin place.
    pub fn admin(&self) -> bool {
        self.user && self.place
    }
}

#[derive(Clone)]
pub struct Context {
    pub message: Arc<Message>,
    /// The message's command verb, e.g. `PRIVMSG` or `352`.
    pub event: String,
    pub nick: Option<String>,
    /// Where replies go: the channel, or the caller's nick in private.
    pub sender: Option<String>,
    pub text: Option<String>,
    /// Resolved command name, without the prefix.
    pub command: Option<String>,
    /// Everything after the command name, trimmed.
    pub arg: String,
    /// Command prefix in effect for this sender.
    pub prefix: String,
    pub private: bool,
    /// Bytes available for a reply, once the bot's own address is known.
    pub limit: Option<usize>,
    pub credentials: Credentials,
    services: Services,
}

impl Context {
    pub fn new(message: Arc<Message>, services: Services) -> Self {
        let event = message.command.to_ascii_uppercase();
        let nick = message.nick().map(str::to_string);
        let mut ctx = Context {
            event,
            nick,
            sender: None,
            text: None,
            command: None,
            arg: String::new(),
            prefix: String::new(),
            private: false,
            limit: None,
            credentials: Credentials::default(),
            message,
            services,
        };
        if matches!(ctx.event.as_str(), "PRIVMSG" | "NOTICE") {
            ctx.parse_text();
        }
        ctx
    }

    fn parse_text(&mut self) {
        let (Some(target), Some(text)) = (self.message.param(0), self.message.param(1)) else {
            return;
        };
        let options = &self.services.options;
        let own = options.nick();

        self.private = target.eq_ignore_ascii_case(&own);
        self.prefix = options.prefix_for(Some(target));
        self.sender = if self.private {
            self.nick.clone()
        } else {
            Some(target.to_string())
        };
        self.text = Some(text.to_string());

        if let (Some(sender), Some(address)) = (&self.sender, self.services.data.address()) {
            self.limit = Some(LINE_BUDGET.saturating_sub(sender.len() + address.len()));
        }

        if self.event == "PRIVMSG"
            && !self.prefix.is_empty()
            && let Some(rest) = text.strip_prefix(self.prefix.as_str())
        {
            let (command, arg) = rest.split_once(' ').unwrap_or((rest, ""));
            if !command.is_empty() {
                self.command = Some(command.to_lowercase());
                self.arg = arg.trim().to_string();
            }
        }
    }

    /// Queue one protocol line built from `args`. The last argument is sent
    /// as trailing text when there is more than one.
    pub async fn send(&self, args: &[&str]) -> HandlerResult {
        let line = format_line(args);
        self.services.queues.send.put(line).await?;
        Ok(())
    }

    /// `PRIVMSG` each line of `text` to `recipient`.
    pub async fn msg(&self, recipient: &str, text: &str) -> HandlerResult {
        for line in text.lines() {
            self.send(&["PRIVMSG", recipient, line]).await?;
        }
        Ok(())
    }

    pub async fn notice(&self, recipient: &str, text: &str) -> HandlerResult {
        self.send(&["NOTICE", recipient, text]).await
    }

    /// Message the sender.
    pub async fn say(&self, text: &str) -> HandlerResult {
        let sender = self.sender.as_deref().ok_or(HandlerError::NoReplyTarget)?;
        self.msg(sender, text).await
    }

    /// Message the sender, addressed to the caller outside private.
    pub async fn reply(&self, text: &str) -> HandlerResult {
        match (&self.nick, self.private) {
            (Some(nick), false) => self.say(&format!("{nick}: {text}")).await,
            _ => self.say(text).await,
        }
    }

    /// CTCP `ACTION` to the sender.
    pub async fn action(&self, text: &str) -> HandlerResult {
        self.say(&format!("\x01ACTION {text}\x01")).await
    }

    /// Hand `task` to the scheduler, due at unix time `due`.
    pub async fn schedule(&self, due: f64, task: Task) -> HandlerResult {
        self.services
            .queues
            .schedule
            .put(ScheduleRequest { due, task })
            .await?;
        Ok(())
    }

    /// Hand `task` straight to the main task loop.
    pub async fn task(&self, task: Task) -> HandlerResult {
        self.services.queues.tasks.put(task).await?;
        Ok(())
    }

    /// Where a control task should report back to.
    pub fn reply_to(&self) -> Option<ReplyTo> {
        Some(ReplyTo {
            sender: self.sender.clone()?,
            nick: self.nick.clone()?,
        })
    }

    pub fn options(&self) -> &Options {
        &self.services.options
    }

    pub fn database(&self) -> &Database {
        &self.services.db
    }

    pub fn data(&self) -> &SharedData {
        &self.services.data
    }

    pub fn services(&self) -> &Services {
        &self.services
    }
}

/// Join `args` into a line, marking the last as trailing when there are
/// several.
pub fn format_line(args: &[&str]) -> String {
    match args {
        [] => String::new(),
        [only] => (*only).to_string(),
        [head @ .., last] => format!("{} :{}", head.join(" "), last),
    }
}
