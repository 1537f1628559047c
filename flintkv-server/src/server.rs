//! TCP server: line-oriented command protocol in front of the gateway.
//!
//! The framing here is a stand-in for whatever transport fronts the core in
//! a real deployment; the gateway's command → (reply | error) contract is
//! the actual interface. One line in, one (possibly multi-line) reply out.

use anyhow::Result;
use flintkv_core::{CommandGateway, Reply, StoreError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

pub struct Server {
    gateway: Arc<CommandGateway>,
}

impl Server {
    pub fn new(gateway: Arc<CommandGateway>) -> Self {
        Self { gateway }
    }

    pub async fn listen(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", addr);

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    info!("client connected from {}", peer);
                    let gateway = Arc::clone(&self.gateway);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(gateway, stream).await {
                            warn!("client {} error: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                }
            }
        }
    }
}

async fn handle_client(gateway: Arc<CommandGateway>, stream: TcpStream) -> Result<()> {
    let mut session = gateway.open_session();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let tokens = match tokenize(line) {
            Ok(tokens) => tokens,
            Err(e) => {
                write_half
                    .write_all(format!("-REJECTED {}\n", e).as_bytes())
                    .await?;
                continue;
            }
        };

        if tokens.first().map(String::as_str) == Some("QUIT") {
            session.close();
            write_half.write_all(b"+OK\n").await?;
            break;
        }

        let response = match gateway.dispatch(&mut session, &tokens).await {
            Ok(reply) => format_reply(&reply),
            Err(e) => format_error(&e),
        };
        write_half.write_all(response.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
    }

    info!("session {} closed", session.id());
    Ok(())
}

/// Split a command line into tokens, honoring double quotes and backslash
/// escapes inside quoted tokens.
pub fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    let mut in_token = false;

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' if in_token => {
                tokens.push(std::mem::take(&mut current));
                in_token = false;
            }
            ' ' | '\t' => {}
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => current.push('\n'),
                            Some('t') => current.push('\t'),
                            Some(other) => current.push(other),
                            None => return Err("unterminated escape".into()),
                        },
                        Some(other) => current.push(other),
                        None => return Err("unterminated quote".into()),
                    }
                }
            }
            other => {
                in_token = true;
                current.push(other);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

fn format_error(e: &StoreError) -> String {
    format!("-{} {}", e.code(), e)
}

fn format_reply(reply: &Reply) -> String {
    match reply {
        Reply::Ok => "+OK".into(),
        Reply::Pong => "+PONG".into(),
        Reply::Nil => "(nil)".into(),
        Reply::Str(s) => s.clone(),
        Reply::Int(i) => format!("(integer) {}", i),
        Reply::Array(items) => format_lines(items.iter()),
        Reply::Pairs(pairs) => {
            format_lines(pairs.iter().flat_map(|(k, v)| [k, v]))
        }
        Reply::Scan { cursor, keys } => {
            let mut out = format!("(cursor) {}", cursor);
            for key in keys {
                out.push('\n');
                out.push_str(key);
            }
            out
        }
        Reply::SlowLogEntries(entries) => {
            if entries.is_empty() {
                return "(empty)".into();
            }
            entries
                .iter()
                .map(|e| {
                    format!(
                        "{} {} {} {}us",
                        e.id,
                        e.at.to_rfc3339(),
                        e.command,
                        e.duration.as_micros()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
        Reply::LatencyReport(stats) => {
            if stats.is_empty() {
                return "(empty)".into();
            }
            stats
                .iter()
                .map(|s| format!("{} events={} max={}us", s.command, s.events, s.max_us))
                .collect::<Vec<_>>()
                .join("\n")
        }
        Reply::Info(pairs) => pairs
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn format_lines<'a>(items: impl Iterator<Item = &'a String>) -> String {
    let lines: Vec<String> = items
        .enumerate()
        .map(|(i, item)| format!("{}) {}", i + 1, item))
        .collect();
    if lines.is_empty() {
        "(empty)".into()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_plain() {
        assert_eq!(tokenize("SET key value").unwrap(), vec!["SET", "key", "value"]);
        assert_eq!(tokenize("  PING  ").unwrap(), vec!["PING"]);
        assert!(tokenize("").unwrap().is_empty());
    }

    #[test]
    fn test_tokenize_quoted() {
        assert_eq!(
            tokenize(r#"SET greeting "hello world""#).unwrap(),
            vec!["SET", "greeting", "hello world"]
        );
        assert_eq!(
            tokenize(r#"SET k "line\nbreak""#).unwrap(),
            vec!["SET", "k", "line\nbreak"]
        );
        assert_eq!(
            tokenize(r#"SET k "quote\" inside""#).unwrap(),
            vec!["SET", "k", "quote\" inside"]
        );
    }

    #[test]
    fn test_tokenize_unterminated_quote() {
        assert!(tokenize(r#"SET k "oops"#).is_err());
    }

    #[test]
    fn test_format_replies() {
        assert_eq!(format_reply(&Reply::Ok), "+OK");
        assert_eq!(format_reply(&Reply::Nil), "(nil)");
        assert_eq!(format_reply(&Reply::Int(3)), "(integer) 3");
        assert_eq!(
            format_reply(&Reply::Array(vec!["a".into(), "b".into()])),
            "1) a\n2) b"
        );
        assert_eq!(format_reply(&Reply::Array(vec![])), "(empty)");
        assert_eq!(
            format_reply(&Reply::Scan { cursor: 10, keys: vec!["k".into()] }),
            "(cursor) 10\nk"
        );
    }

    #[test]
    fn test_format_error_carries_code() {
        let e = StoreError::AuthRequired;
        assert_eq!(format_error(&e), "-NOAUTH authentication required");
    }
}
