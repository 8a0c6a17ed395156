use cobalt_stomp::{Frame, Headers, ReliableConnection, Transmit};
use std::io::{self, Write};
use std::sync::Arc;

/// A line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Empty,
    Send { destination: &'a str, body: &'a str },
    Subscribe(&'a str),
    Unsubscribe(&'a str),
    Beat,
    Help,
    Quit,
}

/// Result of executing a command
pub enum CommandResult {
    /// Command executed successfully
    Ok,
    /// Command requests exit
    Quit,
    /// Error executing command
    Error(String),
}

pub fn parse(line: &str) -> Result<Input<'_>, String> {
    let parts: Vec<&str> = line.trim().splitn(3, ' ').collect();
    match parts.as_slice() {
        [""] | [] => Ok(Input::Empty),
        ["quit" | "exit" | "q", ..] => Ok(Input::Quit),
        ["help" | "?", ..] => Ok(Input::Help),
        ["beat", ..] => Ok(Input::Beat),
        ["send", destination, body] => Ok(Input::Send {
            destination: *destination,
            body: *body,
        }),
        ["send", ..] => Err("Usage: send <destination> <message>".to_string()),
        ["sub" | "subscribe", destination, ..] => Ok(Input::Subscribe(*destination)),
        ["sub" | "subscribe"] => Err("Usage: sub <destination>".to_string()),
        ["unsub" | "unsubscribe", key, ..] => Ok(Input::Unsubscribe(*key)),
        ["unsub" | "unsubscribe"] => Err("Usage: unsub <destination-or-id>".to_string()),
        [other, ..] => Err(format!("Unknown command: {}. Type 'help' for commands.", other)),
    }
}

/// Parse and execute a command
pub async fn execute_command(line: &str, conn: &ReliableConnection) -> CommandResult {
    let input = match parse(line) {
        Ok(input) => input,
        Err(message) => return CommandResult::Error(message),
    };
    match input {
        Input::Empty => CommandResult::Ok,
        Input::Quit => CommandResult::Quit,
        Input::Help => {
            print_help();
            CommandResult::Ok
        }
        Input::Beat => match conn.connection().beat().await {
            Ok(()) => CommandResult::Ok,
            Err(e) => CommandResult::Error(format!("Heartbeat error: {}", e)),
        },
        Input::Send { destination, body } => {
            match conn.send(destination, body.into(), Headers::new()).await {
                Ok(()) => CommandResult::Ok,
                Err(e) => CommandResult::Error(format!("Send error: {}", e)),
            }
        }
        Input::Subscribe(destination) => match subscribe(conn, destination).await {
            Ok(()) => CommandResult::Ok,
            Err(message) => CommandResult::Error(message),
        },
        Input::Unsubscribe(key) => match conn.unsubscribe(key.into(), Headers::new()).await {
            Ok(()) => {
                println!("Unsubscribed from: {}", key);
                CommandResult::Ok
            }
            Err(e) => CommandResult::Error(format!("Unsubscribe error: {}", e)),
        },
    }
}

/// Subscribe to a destination and print everything it delivers.
pub async fn subscribe(conn: &ReliableConnection, destination: &str) -> Result<(), String> {
    let label = destination.to_string();
    conn.subscribe(
        destination,
        Headers::new(),
        Arc::new(move |frame: &Frame| print_message(&label, frame)),
    )
    .await
    .map_err(|e| format!("Failed to subscribe to '{}': {}", destination, e))?;
    println!("Subscribed to: {}", destination);
    Ok(())
}

fn print_message(destination: &str, frame: &Frame) {
    println!("\n[{}] MESSAGE received:", destination);
    for (k, v) in frame.headers.iter() {
        println!("  {}: {}", k, v);
    }
    if let Some(body) = &frame.body {
        match body.as_str() {
            Some(text) => println!("  Body: {}", text),
            None => println!("  Body: ({} bytes, binary)", body.len()),
        }
    }
    print!("> ");
    let _ = io::stdout().flush();
}

/// Print help text
pub fn print_help() {
    println!("Commands:");
    println!("  send <destination> <message>  - Send a message");
    println!("  sub <destination>             - Subscribe to a destination");
    println!("  unsub <destination-or-id>     - Remove a subscription");
    println!("  beat                          - Send a heartbeat");
    println!("  help                          - Show this help");
    println!("  quit                          - Exit");
}
