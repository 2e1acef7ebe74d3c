use anyhow::{Context, Result};
use exam_chat::{config, ChatConfig, ChatController, ConversationSnapshot, HttpTransport, Sender};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

const QUIT_COMMAND: &str = "/quit";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    let chat_config = match std::env::args().nth(1) {
        Some(path) => ChatConfig::load(&path)?,
        None => ChatConfig::from_env().context("No config file given and environment is incomplete")?,
    };
    let api_key = config::get_api_key(&chat_config)?;
    let transport = HttpTransport::new(&chat_config, api_key).context("Failed to build HTTP client")?;
    log::info!("Chatting via {}", transport.endpoint());

    let controller = ChatController::new(&chat_config, Arc::new(transport));
    let mut updates = controller.subscribe();
    for message in &updates.borrow_and_update().messages {
        println!("[{}] {}: {}", message.display_time(), label(message.sender), message.text);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;
    while let Some(line) = lines.next_line().await.context("Failed to read from stdin")? {
        let line = line.trim_end();
        if line == QUIT_COMMAND {
            break;
        }
        if line.trim().is_empty() {
            prompt()?;
            continue;
        }

        match controller.send_message(line).await {
            Ok(_) => render_reply(&mut updates).await?,
            Err(e) => eprintln!("{}", e),
        }
        prompt()?;
    }

    Ok(())
}

fn label(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "you",
        Sender::Assistant => "assistant",
    }
}

fn prompt() -> Result<()> {
    print!("> ");
    std::io::stdout().flush().context("Failed to flush stdout")
}

// Prints the in-flight reply as it grows, until it is terminal
async fn render_reply(updates: &mut watch::Receiver<ConversationSnapshot>) -> Result<()> {
    let mut shown = String::new();
    print!("assistant: ");
    loop {
        let snapshot = updates.borrow_and_update().clone();
        if let Some(reply) = snapshot.last().filter(|m| m.sender == Sender::Assistant) {
            match reply.text.strip_prefix(shown.as_str()) {
                Some(suffix) => print!("{}", suffix),
                // Text was replaced, e.g. by the failure message
                None => print!("\nassistant: {}", reply.text),
            }
            std::io::stdout().flush().context("Failed to flush stdout")?;
            shown = reply.text.clone();
        }
        if !snapshot.busy {
            println!();
            return Ok(());
        }
        updates.changed().await.context("Chat controller went away")?;
    }
}
