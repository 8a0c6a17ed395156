use cobalt_stomp::{
    Connection, HeartbeatPump, Receiver, ReliableConnection, StompError, Transmit,
};
use std::io::{self, BufRead, Write};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::args::Cli;
use super::commands::{CommandResult, execute_command, print_help, subscribe};
use super::exit_codes;

/// Run the interactive prompt until `quit` or end of input.
pub async fn run(cli: &Cli) -> Result<(), (String, u8)> {
    let options = cli
        .connect_options()
        .map_err(|e| (format!("Invalid arguments: {}", e), exit_codes::USAGE_ERROR))?;
    let address = format!("{}:{}", options.host, options.port);
    println!("Connecting to {}...", address);

    let conn = Connection::new(options);
    conn.on_error(|frame| {
        let message = frame.get_header("message").unwrap_or("(no message)");
        eprintln!("\n[BROKER ERROR] {}", message);
        if let Some(body) = frame.body_text() {
            eprintln!("  {}", body);
        }
    });
    conn.on_terminated(|_| warn!("connection lost"));
    conn.on_established(|_| info!("session established"));

    let reliable = ReliableConnection::new(conn, cli.reconnect_policy());
    reliable
        .connect()
        .await
        .map_err(|e| format_connection_error(&e, &address))?;
    println!("Connected (STOMP {}).", reliable.connection().version());

    let pump = HeartbeatPump::spawn(reliable.connection().clone());
    let receiver = Receiver::new(reliable.clone());
    receiver.start();

    for destination in &cli.subscribe {
        subscribe(&reliable, destination)
            .await
            .map_err(|message| (message, exit_codes::PROTOCOL_ERROR))?;
    }

    // Channel to receive user commands from stdin reader
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(16);

    // Spawn blocking stdin reader
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if cmd_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!();
    print_help();
    println!();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let Some(line) = cmd_rx.recv().await else {
            break;
        };

        match execute_command(&line, &reliable).await {
            CommandResult::Ok => {}
            CommandResult::Quit => break,
            CommandResult::Error(msg) => eprintln!("{}", msg),
        }
    }

    println!("Disconnecting...");
    if let Err(e) = reliable.disconnect(Default::default()).await {
        warn!(error = %e, "disconnect failed");
    }
    pump.stop().await;
    receiver
        .stop()
        .await
        .map_err(|e| format_connection_error(&e, &address))?;
    Ok(())
}

/// Map a connection error to a message and exit code.
pub fn format_connection_error(err: &StompError, address: &str) -> (String, u8) {
    match err {
        StompError::Io(io_err) => {
            let message = match io_err.kind() {
                io::ErrorKind::ConnectionRefused => format!("Connection refused: {}", address),
                io::ErrorKind::TimedOut => format!("Connection timed out: {}", address),
                _ => format!("Connection failed: {}", io_err),
            };
            (message, exit_codes::NETWORK_ERROR)
        }
        StompError::RetriesExceeded(_) => (
            format!("Could not reach {}: {}", address, err),
            exit_codes::NETWORK_ERROR,
        ),
        StompError::ServerRejected { message, body } => {
            let mut text = format!("Authentication failed: {}", message);
            if let Some(body) = body {
                text.push_str(&format!(" ({})", body.trim()));
            }
            (text, exit_codes::AUTH_ERROR)
        }
        other => (
            format!("Protocol error: {}", other),
            exit_codes::PROTOCOL_ERROR,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_maps_to_auth_exit_code() {
        let err = StompError::ServerRejected {
            message: "bad credentials".into(),
            body: Some("denied\n".into()),
        };
        let (message, code) = format_connection_error(&err, "mq:61613");
        assert_eq!(code, exit_codes::AUTH_ERROR);
        assert_eq!(message, "Authentication failed: bad credentials (denied)");
    }

    #[test]
    fn refused_maps_to_network_exit_code() {
        let err: StompError = io::Error::new(io::ErrorKind::ConnectionRefused, "nope").into();
        let (message, code) = format_connection_error(&err, "mq:61613");
        assert_eq!(code, exit_codes::NETWORK_ERROR);
        assert!(message.contains("mq:61613"));
    }
}
