// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2025 Parley Contributors

//! Interactive chat session over the server's WebSocket endpoint.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use parley_core::{ChatMessage, Handshake, Notice, ServerFrame};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// A parsed line of user input.
#[derive(Debug, PartialEq, Eq)]
pub enum InputLine {
    /// `@recipient text`
    Send { to: String, content: String },
    Quit,
    Empty,
    Invalid(&'static str),
}

/// Parse one line typed at the prompt.
pub fn parse_line(line: &str) -> InputLine {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return InputLine::Empty;
    }
    if line.trim() == "/quit" {
        return InputLine::Quit;
    }

    let Some(rest) = line.strip_prefix('@') else {
        return InputLine::Invalid("Messages look like: @recipient your message");
    };
    let (to, content) = match rest.split_once(' ') {
        Some((to, content)) => (to, content),
        None => (rest, ""),
    };
    if to.is_empty() {
        return InputLine::Invalid("Missing recipient after '@'");
    }

    InputLine::Send {
        to: to.to_string(),
        content: content.to_string(),
    }
}

fn render_notice(notice: &Notice) -> String {
    match notice {
        Notice::Error(msg) => format!("! {}", msg),
        Notice::Status(msg) => format!("* {}", msg),
        Notice::Success(msg) => format!("+ {}", msg),
    }
}

/// Open a session and relay between stdin and the server until either side quits.
pub async fn run_chat<R>(ws_url: &str, handshake: Handshake, lines: &mut Lines<R>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let (socket, _) = connect_async(ws_url)
        .await
        .with_context(|| format!("Failed to connect to {}", ws_url))?;
    let (mut sink, mut stream) = socket.split();

    let hello = serde_json::to_string(&handshake)?;
    sink.send(Message::text(hello)).await?;

    println!("Connected as {}. Type '@user message' to send, '/quit' to exit.", handshake.username);

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match ServerFrame::parse(text.as_str()) {
                        Ok(ServerFrame::Chat(msg)) => {
                            println!("{}: {}", msg.sender_username, msg.content);
                        }
                        Ok(ServerFrame::Notice(notice)) => println!("{}", render_notice(&notice)),
                        Err(e) => warn!(error = %e, "Unrecognized frame from server"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        println!("Connection closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        eprintln!("Connection error: {}", e);
                        break;
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_line(&line) {
                    InputLine::Send { to, content } => {
                        let frame = ChatMessage::new(&handshake.username, &to, &content).to_frame()?;
                        sink.send(Message::text(frame)).await?;
                    }
                    InputLine::Quit => break,
                    InputLine::Empty => {}
                    InputLine::Invalid(hint) => eprintln!("{}", hint),
                }
            }
        }
    }

    if let Err(e) = sink.close().await {
        debug!(error = %e, "Failed to close connection cleanly");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        assert_eq!(
            parse_line("@bob hello there\n"),
            InputLine::Send {
                to: "bob".to_string(),
                content: "hello there".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_recipient_only_sends_empty_content() {
        assert_eq!(
            parse_line("@bob"),
            InputLine::Send {
                to: "bob".to_string(),
                content: String::new(),
            }
        );
    }

    #[test]
    fn test_parse_quit_and_empty() {
        assert_eq!(parse_line("/quit"), InputLine::Quit);
        assert_eq!(parse_line("  /quit "), InputLine::Quit);
        assert_eq!(parse_line("   "), InputLine::Empty);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(parse_line("hello"), InputLine::Invalid(_)));
        assert!(matches!(parse_line("@ hi"), InputLine::Invalid(_)));
    }

    #[test]
    fn test_render_notice() {
        assert_eq!(render_notice(&Notice::message_sent()), "* Message sent!");
        assert_eq!(render_notice(&Notice::error("User not found")), "! User not found");
    }
}
