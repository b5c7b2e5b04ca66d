//! Mock IRC server.
//!
//! Accepts one connection at a time from the bot under test. Tests play
//! the server side by hand: write raw lines and assert on what comes back.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::time::timeout;

/// How long to wait for the bot before failing a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// A listening mock server.
pub struct MockServer {
    listener: TcpListener,
}

impl MockServer {
    /// Bind to a free port on localhost.
    pub async fn bind() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(Self { listener })
    }

    /// `host:port` for the bot's `connection.address`.
    pub fn address(&self) -> String {
        match self.listener.local_addr() {
            Ok(addr) => addr.to_string(),
            Err(_) => "127.0.0.1:0".to_string(),
        }
    }

    /// Wait for the bot to connect.
    pub async fn accept(&self) -> anyhow::Result<MockConnection> {
        let (stream, _) = timeout(WAIT, self.listener.accept()).await??;
        let (read_half, writer) = stream.into_split();
        Ok(MockConnection {
            reader: BufReader::new(read_half),
            writer,
        })
    }
}

/// The server side of one bot connection.
pub struct MockConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl MockConnection {
    /// Send a raw line to the bot.
    pub async fn send_raw(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        if !line.ends_with("\r\n") {
            self.writer.write_all(b"\r\n").await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Receive one line from the bot, without the line ending.
    pub async fn recv_line(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();
        let read = timeout(WAIT, self.reader.read_line(&mut line)).await??;
        if read == 0 {
            anyhow::bail!("bot closed the connection");
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Receive lines until one satisfies `predicate`, returning all of them.
    pub async fn recv_until<F>(&mut self, mut predicate: F) -> anyhow::Result<Vec<String>>
    where
        F: FnMut(&str) -> bool,
    {
        let mut lines = Vec::new();
        loop {
            let line = self.recv_line().await?;
            let done = predicate(&line);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    /// Receive lines until one starts with `prefix`, returning that line.
    pub async fn expect_prefix(&mut self, prefix: &str) -> anyhow::Result<String> {
        let lines = self.recv_until(|l| l.starts_with(prefix)).await?;
        lines
            .last()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no line starting with {prefix}"))
    }

    /// Read until the bot closes the connection, returning what it sent
    /// first.
    pub async fn expect_closed(&mut self) -> anyhow::Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let read = timeout(WAIT, self.reader.read_line(&mut line)).await??;
            if read == 0 {
                return Ok(lines);
            }
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
    }

    /// Play the server side of registration: greet, then read up to the
    /// bot's `WHO` on itself and answer it.
    pub async fn register(&mut self, nick: &str) -> anyhow::Result<Vec<String>> {
        self.send_raw(":mock.server NOTICE * :*** Looking up your hostname")
            .await?;
        let lines = self.recv_until(|l| l.starts_with("WHO ")).await?;
        self.send_raw(&format!(
            ":mock.server 352 {nick} * ~bot 127.0.0.1 mock.server {nick} H :0 test"
        ))
        .await?;
        Ok(lines)
    }
}
