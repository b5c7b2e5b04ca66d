//! General purpose commands, plus the channel observer behind `seen`,
//! `link`, and deferred `tell`/`ask`/`to` messages.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Value, json};

use super::core::{Bindings, Context, Module, Priority};
use crate::bot::Task;
use crate::dispatch::messages::USAGE_KEY;
use crate::error::{HandlerError, HandlerResult};
use crate::scheduler::unix_now;

/// Database key of last-seen records, keyed by lowercased nick.
pub const SEEN_KEY: &str = "seen";

/// Database key of undelivered messages, lists keyed by lowercased
/// recipient.
pub const MESSAGES_KEY: &str = "messages";

/// Database key of the last link noted per channel.
pub const LINKS_KEY: &str = "links";

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(https?://[^<> "\x01]+?)[,.]?(?:[<> "\x01]|$)"#)
        .expect("link pattern is valid")
});

static PERIOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([0-9]+(?:\.[0-9]+)?) *([a-z]+)").expect("period pattern is valid")
});

pub struct GeneralModule;

impl Module for GeneralModule {
    fn name(&self) -> &'static str {
        "general"
    }

    fn register(&self, bindings: &mut Bindings) {
        bindings.command("echo", "Say the argument back", echo);
        bindings.command("schedule", "Schedule a message at a unix time", schedule);
        bindings.command("in", "Schedule a reminder after a time period", remind);
        bindings.command("stats", "Show the most used commands", stats);
        bindings.command("seen", "Find out when somebody last spoke", seen);
        bindings.command("parsed", "Show how a raw line parses", parsed);
        bindings.command("to", "Send a message to another user", to);
        bindings.command("tell", "Tell another user a message", tell);
        bindings.command("ask", "Ask another user an enquiry", ask);
        bindings.command("link", "Show the last link noted here", link);

        bindings.event("PRIVMSG", Priority::Low, false, observe);
    }
}

async fn echo(ctx: Context) -> HandlerResult {
    ctx.reply(&ctx.arg).await
}

/// `schedule <unixtime> <text>`
async fn schedule(ctx: Context) -> HandlerResult {
    let usage = || HandlerError::user("Usage: schedule <unixtime> <text>");
    let (when, text) = ctx.arg.split_once(' ').ok_or_else(usage)?;
    let due: f64 = when.parse().map_err(|_| usage())?;
    let recipient = ctx.sender.clone().ok_or(HandlerError::NoReplyTarget)?;

    ctx.schedule(
        due,
        Task::Msg {
            recipient,
            text: text.trim().to_string(),
        },
    )
    .await?;
    ctx.reply("Scheduled").await
}

/// `in <periods> [text]`, e.g. `in 1h 30m tea`.
async fn remind(ctx: Context) -> HandlerResult {
    if ctx.arg.is_empty() {
        return Err(HandlerError::user("Usage: in <period> [text]"));
    }
    let (seconds, remainder) = parse_periods(&ctx.arg);
    if seconds <= 0.0 {
        return Err(HandlerError::user(
            "Couldn't understand your duration. Use units?",
        ));
    }

    let nick = ctx.nick.clone().unwrap_or_default();
    let text = if remainder.is_empty() {
        format!("{nick}!")
    } else {
        format!("{nick}: {remainder}")
    };
    let recipient = ctx.sender.clone().ok_or(HandlerError::NoReplyTarget)?;
    let due = unix_now() + seconds;

    ctx.schedule(due, Task::Msg { recipient, text }).await?;
    ctx.reply(&format!(
        "Will remind at {} (in {})",
        format_time(due),
        format_duration(seconds)
    ))
    .await
}

async fn stats(ctx: Context) -> HandlerResult {
    let usage = ctx.database().cached(USAGE_KEY).unwrap_or(Value::Null);
    let top = top_commands(&usage, 10);
    if top.is_empty() {
        return ctx.reply("No commands used yet").await;
    }
    let described: Vec<String> = top
        .iter()
        .map(|(name, count)| format!("{name} ({count})"))
        .collect();
    ctx.reply(&format!("Top used commands: {}", described.join(", ")))
        .await
}

async fn seen(ctx: Context) -> HandlerResult {
    let Some(who) = ctx.arg.split_whitespace().next() else {
        return ctx.say("Find out whether somebody has been around recently").await;
    };
    if who.eq_ignore_ascii_case(&ctx.options().nick()) {
        return ctx.reply("I'm right here").await;
    }

    let record = ctx
        .database()
        .cached(SEEN_KEY)
        .and_then(|seen| seen.get(who.to_lowercase()).cloned());
    let place_and_time = record.as_ref().and_then(|r| {
        let time = r.get("time")?.as_f64()?;
        let place = r.get("place")?.as_str()?;
        Some((place.to_string(), time))
    });

    match place_and_time {
        Some((place, time)) => ctx.say(&format!("On {place} at {}", format_time(time))).await,
        None => ctx.say(&format!("Haven't seen {who}")).await,
    }
}

/// `parsed <raw line>`
async fn parsed(ctx: Context) -> HandlerResult {
    if ctx.arg.is_empty() {
        return Err(HandlerError::user("Usage: parsed <raw line>"));
    }
    match ctx.arg.parse::<slirc_proto::Message>() {
        Ok(message) => {
            let origin = message
                .origin
                .as_ref()
                .map(|o| format!("{o:?}"))
                .unwrap_or_else(|| "None".to_string());
            ctx.reply(&format!(
                "origin={origin} command={:?} params={:?}",
                message.command, message.params
            ))
            .await
        }
        Err(e) => Err(HandlerError::user(format!("Could not parse: {e}"))),
    }
}

async fn to(ctx: Context) -> HandlerResult {
    leave_message(ctx, None, "Usage: to <nick> <message>").await
}

async fn tell(ctx: Context) -> HandlerResult {
    leave_message(ctx, Some("tell"), "Usage: tell <nick> <message>").await
}

async fn ask(ctx: Context) -> HandlerResult {
    leave_message(ctx, Some("ask"), "Usage: ask <nick> <enquiry>").await
}

/// Store a message for `recipient`, delivered when they next speak.
async fn leave_message(ctx: Context, verb: Option<&str>, usage: &str) -> HandlerResult {
    let (recipient, message) = match ctx.arg.split_once(' ') {
        Some((recipient, message)) if !message.trim().is_empty() => (recipient, message.trim()),
        _ => return Err(HandlerError::user(usage)),
    };
    let from = ctx.nick.clone().unwrap_or_default();

    if recipient.eq_ignore_ascii_case(&from) {
        return ctx.reply("You can tell yourself that").await;
    }
    if recipient.eq_ignore_ascii_case(&ctx.options().nick()) {
        return ctx.reply("Understood").await;
    }

    let item = json!({
        "time": unix_now(),
        "from": from,
        "verb": verb,
        "recipient": recipient,
        "message": message,
    });
    let key = recipient.to_lowercase();
    ctx.database().with_collection(MESSAGES_KEY, |messages| {
        if let Some(map) = messages.as_object_mut() {
            match map.get_mut(&key) {
                Some(Value::Array(items)) => items.push(item),
                _ => {
                    map.insert(key, json!([item]));
                }
            }
        }
    })?;
    ctx.reply(&format!("Will pass your message to {recipient}"))
        .await
}

async fn link(ctx: Context) -> HandlerResult {
    let sender = ctx.sender.clone().ok_or(HandlerError::NoReplyTarget)?;
    let noted = ctx
        .database()
        .cached(LINKS_KEY)
        .and_then(|links| links.get(&sender)?.as_str().map(str::to_string));
    match noted {
        Some(url) => ctx.reply(&url).await,
        None => ctx.reply("No link found for here").await,
    }
}

/// Deliver waiting messages, answer interjections and prefix enquiries,
/// and note links and who spoke where.
async fn observe(ctx: Context) -> HandlerResult {
    let (Some(nick), Some(sender), Some(text)) = (&ctx.nick, &ctx.sender, &ctx.text) else {
        return Ok(());
    };

    deliver_messages(&ctx, nick).await?;

    let own = ctx.options().nick();
    if text == &format!("{own}!") {
        ctx.say(&format!("{nick}!")).await?;
    }
    if text == &format!("{own}: prefix") || text == &format!("{own}: prefix?") {
        ctx.reply(&format!("Current prefix for here is {:?}", ctx.prefix))
            .await?;
    }

    if let Some(url) = last_link(text) {
        ctx.database().with_collection(LINKS_KEY, |links| {
            if let Some(map) = links.as_object_mut() {
                map.insert(sender.clone(), json!(url));
            }
        })?;
    }

    if ctx.private || ctx.options().list("private").iter().any(|c| c == sender) {
        return Ok(());
    }
    let key = nick.to_lowercase();
    let record = json!({ "time": unix_now(), "place": sender });
    ctx.database().with_collection(SEEN_KEY, |seen| {
        if let Some(map) = seen.as_object_mut() {
            map.insert(key, record);
        }
    })?;
    Ok(())
}

/// Say every message left for `nick`, oldest first, and forget them.
async fn deliver_messages(ctx: &Context, nick: &str) -> HandlerResult {
    let key = nick.to_lowercase();
    let waiting = ctx
        .database()
        .cached(MESSAGES_KEY)
        .is_some_and(|messages| messages.get(&key).is_some());
    if !waiting {
        return Ok(());
    }

    let taken = ctx.database().with_collection(MESSAGES_KEY, |messages| {
        messages.as_object_mut().and_then(|map| map.remove(&key))
    })?;
    let Some(Value::Array(items)) = taken else {
        return Ok(());
    };

    let now = unix_now();
    for item in &items {
        if let Some(line) = format_delivery(item, now) {
            ctx.say(&line).await?;
        }
    }
    Ok(())
}

/// `recipient: time <from> verb recipient message`, or
/// `recipient: time <from> recipient: message` without a verb.
fn format_delivery(item: &Value, now: f64) -> Option<String> {
    let time = item.get("time")?.as_f64()?;
    let from = item.get("from")?.as_str()?;
    let recipient = item.get("recipient")?.as_str()?;
    let message = item.get("message")?.as_str()?;
    let when = format_sent(time, now);

    Some(match item.get("verb").and_then(Value::as_str) {
        Some(verb) => format!("{recipient}: {when} <{from}> {verb} {recipient} {message}"),
        None => format!("{recipient}: {when} <{from}> {recipient}: {message}"),
    })
}

/// `YYYY-MM-DD HH:MMZ`, without the date when it is `now`'s.
fn format_sent(unix: f64, now: f64) -> String {
    let Some(sent) = DateTime::<Utc>::from_timestamp(unix as i64, 0) else {
        return format!("{unix:.0}");
    };
    let today = DateTime::<Utc>::from_timestamp(now as i64, 0).map(|dt| dt.date_naive());
    if today == Some(sent.date_naive()) {
        sent.format("%H:%MZ").to_string()
    } else {
        sent.format("%Y-%m-%d %H:%MZ").to_string()
    }
}

/// The last link in `text`, without trailing punctuation.
fn last_link(text: &str) -> Option<&str> {
    LINK_RE
        .captures_iter(text)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Sum leading `<number><unit>` periods of `text`, returning the seconds
/// and whatever follows them.
fn parse_periods(text: &str) -> (f64, &str) {
    let mut seconds = 0.0;
    let mut rest = text.trim_start();
    while let Some(caps) = PERIOD_RE.captures(rest) {
        let Some(scale) = unit_seconds(&caps[2].to_lowercase()) else {
            break;
        };
        let Ok(number) = caps[1].parse::<f64>() else {
            break;
        };
        seconds += number * scale;
        rest = rest[caps[0].len()..].trim_start();
    }
    (seconds, rest)
}

fn unit_seconds(unit: &str) -> Option<f64> {
    const DAY: f64 = 24.0 * 3600.0;
    let scale = match unit {
        "years" | "year" | "yrs" | "y" => 365.25 * DAY,
        "months" | "month" | "mo" => 29.53059 * DAY,
        "weeks" | "week" | "wks" | "wk" | "w" => 7.0 * DAY,
        "days" | "day" | "d" => DAY,
        "hours" | "hour" | "hrs" | "hr" | "h" => 3600.0,
        "minutes" | "minute" | "mins" | "min" | "m" => 60.0,
        "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
        _ => return None,
    };
    Some(scale)
}

/// Highest counts first, ties by name.
fn top_commands(usage: &Value, limit: usize) -> Vec<(String, u64)> {
    let Some(map) = usage.as_object() else {
        return Vec::new();
    };
    let mut counts: Vec<(String, u64)> = map
        .iter()
        .filter_map(|(name, count)| Some((name.clone(), count.as_u64()?)))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts.truncate(limit);
    counts
}

fn format_time(unix: f64) -> String {
    DateTime::<Utc>::from_timestamp(unix as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("{unix:.0}"))
}

fn format_duration(seconds: f64) -> String {
    let total = seconds.round() as u64;
    let (days, rest) = (total / 86_400, total % 86_400);
    let (hours, rest) = (rest / 3600, rest % 3600);
    let (minutes, secs) = (rest / 60, rest % 60);

    let mut parts = Vec::new();
    for (value, unit) in [(days, "d"), (hours, "h"), (minutes, "m"), (secs, "s")] {
        if value > 0 {
            parts.push(format!("{value}{unit}"));
        }
    }
    if parts.is_empty() {
        "0s".to_string()
    } else {
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::Services;
    use crate::config::Config;
    use crate::scheduler::ScheduleRequest;
    use slirc_proto::Message;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn services(dir: &TempDir) -> Services {
        let mut config = Config::default();
        config.identity.nick = "bot".to_string();
        config.database.path = dir.path().join("g.db").display().to_string();
        Services::new(&config).unwrap()
    }

    fn context(services: &Services, line: &str) -> Context {
        let message: Message = line.parse().unwrap();
        Context::new(Arc::new(message), services.clone())
    }

    async fn sent(services: &Services) -> Vec<String> {
        let mut lines = Vec::new();
        let mut consumer = services.queues.send.consumer().await;
        services.queues.send.stop().await.unwrap();
        while let Some(line) = consumer.next().await {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn periods_accumulate() {
        assert_eq!(parse_periods("10m"), (600.0, ""));
        assert_eq!(parse_periods("1h 30m tea time"), (5400.0, "tea time"));
        assert_eq!(parse_periods("1.5 hours"), (5400.0, ""));
        assert_eq!(parse_periods("soon please"), (0.0, "soon please"));
        assert_eq!(parse_periods("5 apples"), (0.0, "5 apples"));
    }

    #[test]
    fn durations_are_compact() {
        assert_eq!(format_duration(5400.0), "1h 30m");
        assert_eq!(format_duration(90061.0), "1d 1h 1m 1s");
        assert_eq!(format_duration(0.2), "0s");
    }

    #[test]
    fn top_commands_sorts_by_count() {
        let usage = json!({ "echo": 3, "seen": 7, "in": 3, "bogus": "x" });
        assert_eq!(
            top_commands(&usage, 2),
            vec![("seen".to_string(), 7), ("echo".to_string(), 3)]
        );
        assert!(top_commands(&Value::Null, 10).is_empty());
    }

    #[tokio::test]
    async fn echo_replies_in_channel() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        echo(context(&services, ":nick!u@h PRIVMSG #chan :.echo hi"))
            .await
            .unwrap();
        assert_eq!(sent(&services).await, vec!["PRIVMSG #chan :nick: hi"]);
    }

    #[tokio::test]
    async fn reminder_is_scheduled_for_sender() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        let before = unix_now();
        remind(context(&services, ":nick!u@h PRIVMSG #chan :.in 2m tea"))
            .await
            .unwrap();

        let mut schedule = services.queues.schedule.consumer().await;
        let ScheduleRequest { due, task } = schedule.next().await.unwrap();
        assert!(due >= before + 120.0 && due < before + 130.0);
        assert_eq!(
            task,
            Task::Msg {
                recipient: "#chan".to_string(),
                text: "nick: tea".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn reminder_without_units_is_refused() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        let result = remind(context(&services, ":nick!u@h PRIVMSG #chan :.in later")).await;
        assert!(matches!(result, Err(HandlerError::User(_))));
    }

    #[tokio::test]
    async fn schedule_requires_a_number() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        let result = schedule(context(&services, ":nick!u@h PRIVMSG #chan :.schedule soon hi")).await;
        assert!(matches!(result, Err(HandlerError::User(_))));

        schedule(context(&services, ":nick!u@h PRIVMSG #chan :.schedule 5 hi"))
            .await
            .unwrap();
        let mut queue = services.queues.schedule.consumer().await;
        assert_eq!(queue.next().await.map(|r| r.due), Some(5.0));
    }

    #[tokio::test]
    async fn channel_messages_are_seen() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        observe(context(&services, ":Alice!u@h PRIVMSG #chan :hello"))
            .await
            .unwrap();
        observe(context(&services, ":Carol!u@h PRIVMSG bot :psst"))
            .await
            .unwrap();

        let seen_map = services.db.cached(SEEN_KEY).unwrap();
        assert_eq!(seen_map["alice"]["place"], "#chan");
        assert!(seen_map.get("carol").is_none());

        seen(context(&services, ":bob!u@h PRIVMSG #chan :.seen alice"))
            .await
            .unwrap();
        seen(context(&services, ":bob!u@h PRIVMSG #chan :.seen carol"))
            .await
            .unwrap();
        let lines = sent(&services).await;
        assert!(lines[0].starts_with("PRIVMSG #chan :On #chan at "));
        assert_eq!(lines[1], "PRIVMSG #chan :Haven't seen carol");
    }

    #[tokio::test]
    async fn prefix_enquiry_is_answered() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        observe(context(&services, ":nick!u@h PRIVMSG #chan :bot: prefix?"))
            .await
            .unwrap();
        assert_eq!(
            sent(&services).await,
            vec!["PRIVMSG #chan :nick: Current prefix for here is \".\""]
        );
    }

    #[test]
    fn links_drop_trailing_punctuation() {
        assert_eq!(
            last_link("see http://a.example/x, then https://b.example/y."),
            Some("https://b.example/y")
        );
        assert_eq!(last_link("<https://c.example>"), Some("https://c.example"));
        assert_eq!(last_link("no links here"), None);
    }

    #[test]
    fn deliveries_are_formatted_by_verb() {
        let now = 1_700_000_000.0;
        let told = json!({
            "time": now - 60.0, "from": "alice", "verb": "tell",
            "recipient": "bob", "message": "the build is green",
        });
        assert_eq!(
            format_delivery(&told, now).unwrap(),
            "bob: 22:12Z <alice> tell bob the build is green"
        );

        let plain = json!({
            "time": now - 3.0 * 86_400.0, "from": "alice", "verb": null,
            "recipient": "bob", "message": "hi",
        });
        assert_eq!(
            format_delivery(&plain, now).unwrap(),
            "bob: 2023-11-11 22:13Z <alice> bob: hi"
        );
        assert!(format_delivery(&json!({}), now).is_none());
    }

    #[tokio::test]
    async fn told_messages_wait_for_recipient() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        tell(context(&services, ":alice!u@h PRIVMSG #chan :.tell Bob check the logs"))
            .await
            .unwrap();
        ask(context(&services, ":carol!u@h PRIVMSG #chan :.ask bob lunch?"))
            .await
            .unwrap();

        observe(context(&services, ":dave!u@h PRIVMSG #chan :hello"))
            .await
            .unwrap();
        observe(context(&services, ":bob!u@h PRIVMSG #chan :morning"))
            .await
            .unwrap();
        observe(context(&services, ":bob!u@h PRIVMSG #chan :again"))
            .await
            .unwrap();

        let lines = sent(&services).await;
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "PRIVMSG #chan :alice: Will pass your message to Bob");
        assert_eq!(lines[1], "PRIVMSG #chan :carol: Will pass your message to bob");
        assert!(lines[2].starts_with("PRIVMSG #chan :Bob: "));
        assert!(lines[2].ends_with("<alice> tell Bob check the logs"));
        assert!(lines[3].ends_with("<carol> ask bob lunch?"));
        assert!(services.db.cached(MESSAGES_KEY).unwrap().get("bob").is_none());
    }

    #[tokio::test]
    async fn messages_to_self_or_bot_are_not_stored() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        to(context(&services, ":alice!u@h PRIVMSG #chan :.to alice note"))
            .await
            .unwrap();
        to(context(&services, ":alice!u@h PRIVMSG #chan :.to bot note"))
            .await
            .unwrap();
        let missing = to(context(&services, ":alice!u@h PRIVMSG #chan :.to bob")).await;
        assert!(matches!(missing, Err(HandlerError::User(_))));

        assert_eq!(
            sent(&services).await,
            vec![
                "PRIVMSG #chan :alice: You can tell yourself that",
                "PRIVMSG #chan :alice: Understood",
            ]
        );
        assert!(services.db.cached(MESSAGES_KEY).is_none());
    }

    #[tokio::test]
    async fn interjection_is_returned() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        observe(context(&services, ":nick!u@h PRIVMSG #chan :bot!"))
            .await
            .unwrap();
        assert_eq!(sent(&services).await, vec!["PRIVMSG #chan :nick!"]);
    }

    #[tokio::test]
    async fn links_are_noted_per_channel() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        link(context(&services, ":nick!u@h PRIVMSG #chan :.link"))
            .await
            .unwrap();
        observe(context(&services, ":nick!u@h PRIVMSG #chan :read https://example.org/post."))
            .await
            .unwrap();
        link(context(&services, ":other!u@h PRIVMSG #chan :.link"))
            .await
            .unwrap();

        assert_eq!(
            sent(&services).await,
            vec![
                "PRIVMSG #chan :nick: No link found for here",
                "PRIVMSG #chan :other: https://example.org/post",
            ]
        );
    }
}
