#![forbid(unsafe_code)]

//! `agent-intercom-ctl` — local CLI companion for the AFK bridge daemon.
//!
//! Connects to the Control Plane socket and sends a single JSON command,
//! printing the response. `subscribe` instead streams broadcast events
//! until interrupted.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericFilePath, Stream, ToFsName};

#[derive(Debug, Parser)]
#[command(
    name = "agent-intercom-ctl",
    about = "Local CLI for the agent-intercom AFK bridge daemon",
    version,
    long_about = None
)]
struct Cli {
    /// Control-plane socket path.
    #[arg(long, default_value = ".agent-intercom/control.sock")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report the current mode and queue size.
    Status,
    /// Switch between `afk` and `notify` mode.
    SetMode {
        /// Target mode: `afk` or `notify`.
        mode: String,
    },
    /// Re-read and re-validate the config file on disk.
    ReloadConfig,
    /// List the current request queue.
    Queue,
    /// Shut the daemon down.
    Stop,
    /// Stream control-plane events until interrupted.
    Subscribe,
}

fn main() {
    let args = Cli::parse();

    let request = match &args.command {
        Command::Status => serde_json::json!({ "cmd": "status" }),
        Command::SetMode { mode } => serde_json::json!({ "cmd": "set_mode", "mode": mode }),
        Command::ReloadConfig => serde_json::json!({ "cmd": "reload_config" }),
        Command::Queue => serde_json::json!({ "cmd": "queue" }),
        Command::Stop => serde_json::json!({ "cmd": "stop" }),
        Command::Subscribe => serde_json::json!({ "cmd": "subscribe" }),
    };

    let streaming = matches!(args.command, Command::Subscribe);

    match send_command(&args.socket, &request, streaming) {
        Ok(()) => {}
        Err(err) => {
            eprintln!("Failed to reach agent-intercom at {}: {err}", args.socket.display());
            std::process::exit(1);
        }
    }
}

fn send_command(
    socket_path: &std::path::Path,
    request: &serde_json::Value,
    streaming: bool,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let name = socket_path.to_path_buf().to_fs_name::<GenericFilePath>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    print_response(&line)?;

    if streaming {
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            print_response(&line)?;
        }
    }

    Ok(())
}

fn print_response(line: &str) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let value: serde_json::Value = serde_json::from_str(line.trim())?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
