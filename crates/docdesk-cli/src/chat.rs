//! Interactive `docdesk chat` loop.

use anyhow::Result;
use docdesk_core::models::{MessageRole, Rating};
use docdesk_core::reply::ReplyGenerator;
use docdesk_core::widget::{ChatWidget, RenderedMessage};
use tokio::io::{AsyncBufReadExt, BufReader};

/// A line typed into the chat prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum ChatInput {
    Say(String),
    New,
    Product(String),
    Feedback {
        rating: Rating,
        comment: Option<String>,
    },
    Help,
    Quit,
    Empty,
}

pub fn parse_input(line: &str) -> std::result::Result<ChatInput, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ChatInput::Empty);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(ChatInput::Say(line.to_string()));
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, rest)| (name, rest.trim()));
    match name {
        "quit" | "exit" => Ok(ChatInput::Quit),
        "new" => Ok(ChatInput::New),
        "help" => Ok(ChatInput::Help),
        "product" if !rest.is_empty() => Ok(ChatInput::Product(rest.to_string())),
        "product" => Err("usage: /product <id>".to_string()),
        "feedback" => {
            let (rating, comment) = rest
                .split_once(char::is_whitespace)
                .map_or((rest, ""), |(rating, comment)| (rating, comment.trim()));
            let rating = rating
                .parse::<Rating>()
                .map_err(|_| "usage: /feedback good|bad [comment]".to_string())?;
            Ok(ChatInput::Feedback {
                rating,
                comment: (!comment.is_empty()).then(|| comment.to_string()),
            })
        }
        other => Err(format!("unknown command /{other}, try /help")),
    }
}

fn print_rendered(msg: &RenderedMessage) {
    let who = match msg.role {
        MessageRole::User => "you",
        MessageRole::Assistant => "bot",
        MessageRole::Agent => "agent",
        MessageRole::System => "--",
    };
    println!("[{who}] {}", msg.text);
    for link in &msg.links {
        println!("      -> {} {}", link.display_text, link.target());
    }
}

/// Print everything from `shown` onward and return the new high-water mark.
fn print_new<R: ReplyGenerator>(widget: &ChatWidget<R>, shown: usize) -> usize {
    let transcript = widget.transcript();
    for msg in transcript.iter().skip(shown) {
        print_rendered(msg);
    }
    if widget.feedback_prompt_visible() {
        println!("(rate this chat with /feedback good|bad [comment])");
    }
    transcript.len()
}

fn print_help() {
    println!("Commands:");
    println!("  /new                        start a new conversation");
    println!("  /product <id>               switch product context");
    println!("  /feedback good|bad [text]   rate this conversation");
    println!("  /quit                       leave the chat");
}

pub async fn run<R: ReplyGenerator>(mut widget: ChatWidget<R>) -> Result<()> {
    if widget.is_degraded() {
        println!("(offline: showing cached history, messages may not be saved)");
    }
    let mut shown = print_new(&widget, 0);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_input(&line) {
                    Ok(ChatInput::Empty) => {}
                    Ok(ChatInput::Quit) => break,
                    Ok(ChatInput::Help) => print_help(),
                    Ok(ChatInput::Say(text)) => {
                        let before = widget.messages().len();
                        match widget.send(&text).await {
                            Ok(_) => {
                                // A finished session restarts the log with a new welcome.
                                if widget.messages().len() < before + 2 {
                                    shown = 0;
                                }
                                shown = print_new(&widget, shown);
                            }
                            Err(err) => eprintln!("error: {err}"),
                        }
                    }
                    Ok(ChatInput::New) => {
                        widget.new_conversation().await;
                        println!("(started a new conversation)");
                        shown = print_new(&widget, 0);
                    }
                    Ok(ChatInput::Product(product)) => {
                        widget.set_product(&product).await;
                        println!("(product context: {product})");
                    }
                    Ok(ChatInput::Feedback { rating, comment }) => {
                        match widget.submit_feedback(rating, comment.as_deref()).await {
                            Ok(_) => println!("(thanks for the feedback)"),
                            Err(err) => eprintln!("error: {err}"),
                        }
                    }
                    Err(usage) => eprintln!("{usage}"),
                }
            }
            event = widget.next_event() => {
                let Some(event) = event else {
                    break;
                };
                widget.handle_event(event).await;
                shown = print_new(&widget, shown);
            }
        }
    }

    widget.flush().await;
    widget.teardown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_said() {
        assert_eq!(
            parse_input("  how do I export?  "),
            Ok(ChatInput::Say("how do I export?".to_string()))
        );
        assert_eq!(parse_input(""), Ok(ChatInput::Empty));
    }

    #[test]
    fn slash_commands_parse() {
        assert_eq!(parse_input("/quit"), Ok(ChatInput::Quit));
        assert_eq!(parse_input("/new"), Ok(ChatInput::New));
        assert_eq!(
            parse_input("/product prod-9"),
            Ok(ChatInput::Product("prod-9".to_string()))
        );
        assert_eq!(
            parse_input("/feedback bad the link was wrong"),
            Ok(ChatInput::Feedback {
                rating: Rating::Negative,
                comment: Some("the link was wrong".to_string()),
            })
        );
        assert_eq!(
            parse_input("/feedback good"),
            Ok(ChatInput::Feedback {
                rating: Rating::Positive,
                comment: None,
            })
        );
    }

    #[test]
    fn bad_commands_report_usage() {
        assert!(parse_input("/product").is_err());
        assert!(parse_input("/feedback meh").is_err());
        assert!(parse_input("/dance").is_err());
    }
}
