//! Command-line REPL
//!
//! Reads lines on a dedicated OS thread (rustyline blocks) and forwards
//! parsed [`Command`]s to the application loop.

use anyhow::{bail, Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::str::FromStr;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const HELP: &str = "\
Commands:
  status                    Connection, hotplug and button summary
  ports                     List MIDI ports
  connect [IN [OUT]]        Connect (optionally to explicit ports, quote names with spaces)
  disconnect                Close all ports and stop hotplug detection
  hotplug on|off            Start or stop hotplug detection
  send <control> <value>    Drive a control by name, e.g. `send track1.slider 64`
  reset                     Turn every button off
  help                      Show this help
  quit                      Exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Ports,
    Connect {
        input: Option<String>,
        output: Option<String>,
    },
    Disconnect,
    Hotplug(bool),
    Send { control: String, value: u8 },
    Reset,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let args = split_args(line)?;
        let Some((name, rest)) = args.split_first() else {
            bail!("Empty command");
        };

        let command = match (name.to_lowercase().as_str(), rest) {
            ("status", []) => Command::Status,
            ("ports", []) => Command::Ports,
            ("connect", []) => Command::Connect {
                input: None,
                output: None,
            },
            ("connect", [input]) => Command::Connect {
                input: Some(input.clone()),
                output: None,
            },
            ("connect", [input, output]) => Command::Connect {
                input: Some(input.clone()),
                output: Some(output.clone()),
            },
            ("disconnect", []) => Command::Disconnect,
            ("hotplug", [state]) => match state.to_lowercase().as_str() {
                "on" => Command::Hotplug(true),
                "off" => Command::Hotplug(false),
                other => bail!("Expected 'on' or 'off', got '{}'", other),
            },
            ("send", [control, value]) => {
                let value: u8 = value
                    .parse()
                    .with_context(|| format!("Invalid value '{}'", value))?;
                if value > 127 {
                    bail!("Value {} is out of range (must be 0-127)", value);
                }
                Command::Send {
                    control: control.clone(),
                    value,
                }
            }
            ("reset", []) => Command::Reset,
            ("help" | "?", []) => Command::Help,
            ("quit" | "exit", []) => Command::Quit,
            (other, _) => bail!("Unknown or malformed command '{}' (try 'help')", other),
        };
        Ok(command)
    }
}

/// Split on whitespace, keeping double-quoted sections together
fn split_args(line: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }

    if in_quotes {
        bail!("Unterminated quote");
    }
    if has_token {
        args.push(current);
    }
    Ok(args)
}

/// Run the REPL on its own thread; a [`Command::Quit`] is sent on EOF or
/// Ctrl+C
pub fn spawn_repl(tx: mpsc::UnboundedSender<Command>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        if let Err(e) = run_repl(&tx) {
            warn!("REPL stopped: {:#}", e);
        }
        let _ = tx.send(Command::Quit);
    })
}

fn run_repl(tx: &mpsc::UnboundedSender<Command>) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    loop {
        match rl.readline("remap> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line.as_str());

                match line.parse::<Command>() {
                    Ok(command) => {
                        let quit = command == Command::Quit;
                        if tx.send(command).is_err() || quit {
                            return Ok(());
                        }
                    }
                    Err(e) => println!("{}", e),
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                debug!("REPL input closed");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!("status".parse::<Command>().unwrap(), Command::Status);
        assert_eq!("  PORTS ".parse::<Command>().unwrap(), Command::Ports);
        assert_eq!("exit".parse::<Command>().unwrap(), Command::Quit);
        assert_eq!("hotplug off".parse::<Command>().unwrap(), Command::Hotplug(false));
        assert_eq!("reset".parse::<Command>().unwrap(), Command::Reset);
    }

    #[test]
    fn test_parse_connect_with_quoted_ports() {
        let cmd: Command = r#"connect "nanoKONTROL2 MIDI 1" "nanoKONTROL2 MIDI 1""#.parse().unwrap();
        assert_eq!(
            cmd,
            Command::Connect {
                input: Some("nanoKONTROL2 MIDI 1".to_string()),
                output: Some("nanoKONTROL2 MIDI 1".to_string()),
            }
        );

        assert_eq!(
            "connect".parse::<Command>().unwrap(),
            Command::Connect {
                input: None,
                output: None
            }
        );
    }

    #[test]
    fn test_parse_send() {
        assert_eq!(
            "send track1.slider 64".parse::<Command>().unwrap(),
            Command::Send {
                control: "track1.slider".to_string(),
                value: 64,
            }
        );
        assert!("send track1.slider 128".parse::<Command>().is_err());
        assert!("send track1.slider loud".parse::<Command>().is_err());
        assert!("send track1.slider".parse::<Command>().is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
        assert!("hotplug maybe".parse::<Command>().is_err());
        assert!(r#"connect "unterminated"#.parse::<Command>().is_err());
    }

    #[test]
    fn test_split_args_keeps_empty_quotes() {
        assert_eq!(split_args(r#"a "" b"#).unwrap(), vec!["a", "", "b"]);
    }
}
