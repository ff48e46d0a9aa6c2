//! MIDI diagnostics: port listing and a live input monitor

use anyhow::{anyhow, Result};
use colored::*;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

use crate::device::{find_device_name_match, HardwareInput, MidiBackend, MidirBackend, PortDiscovery};
use crate::mapping::MappingConfig;
use crate::midi::{format_hex, MidiMessage};

const PORT_COLUMN: usize = 20;

/// List all ports, marking the target device and our own virtual port
pub fn list_ports_formatted(device_name: &str, virtual_port_name: &str) {
    let mut backend = MidirBackend::new("nanokontrol-remap-list");
    let mut discovery = PortDiscovery::new();
    let ports = discovery.list_ports(&mut backend);

    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());

    if let Some(e) = discovery.last_error() {
        println!("\n{} {}", "MIDI subsystem unavailable:".bold().red(), e);
    }

    let device = find_device_name_match(&ports.inputs, device_name);
    let device_out = find_device_name_match(&ports.outputs, device_name);

    for (title, names, matched) in [
        ("Input Ports:", &ports.inputs, device),
        ("Output Ports:", &ports.outputs, device_out),
    ] {
        println!("\n{}", title.bold());
        if names.is_empty() {
            println!("  {}", "No ports found".dimmed());
        }
        for name in names {
            let marker = if Some(name.as_str()) == matched {
                "[DEVICE] ".green()
            } else if name.to_lowercase().contains(&virtual_port_name.to_lowercase()) {
                "[REMAP]  ".yellow()
            } else {
                "         ".normal()
            };
            println!("  {} {}", marker, name);
        }
    }

    match (device, device_out) {
        (Some(input), Some(output)) => {
            println!("\n{}", format!("Auto-detected {}:", device_name).bold().bright_green());
            println!("  Input:  {}", input.bright_white());
            println!("  Output: {}", output.bright_white());
        }
        _ => println!("\n{}", format!("{} not detected", device_name).dimmed()),
    }

    println!();
}

/// Print every message the device sends, annotated with the mapped control
/// name, until Ctrl+C
pub async fn run_monitor(device_name: &str, mapping: &MappingConfig) -> Result<()> {
    println!("{}", "=== MIDI Monitor ===".bold().cyan());
    println!("Press Ctrl+C to exit\n");

    let mut backend = MidirBackend::new("nanokontrol-remap-monitor");
    let mut discovery = PortDiscovery::new();
    let ports = discovery.list_ports(&mut backend);
    if let Some(e) = discovery.last_error() {
        return Err(anyhow!("MIDI subsystem unavailable: {}", e));
    }

    let port = find_device_name_match(&ports.inputs, device_name)
        .ok_or_else(|| anyhow!("{} not found", device_name))?
        .to_string();

    let (tx, mut rx) = mpsc::channel::<HardwareInput>(1000);
    let input = backend.open_input(&port, tx)?;
    info!("Monitoring {}", port);

    let names = control_names(mapping);
    let start = Instant::now();

    println!("{}", "Format: [timestamp] PORT | HEX => PARSED (control)".dimmed());
    println!("{}\n", "─".repeat(80).dimmed());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                let elapsed = event.received_at.saturating_duration_since(start);
                print_event(elapsed.as_millis() as u64, &port, &event.data, &names);
            }
            _ = &mut ctrl_c => break,
        }
    }

    input.close();
    println!("\n{}", "Monitor stopped".yellow());
    Ok(())
}

/// inputCC -> qualified control name
fn control_names(mapping: &MappingConfig) -> HashMap<u8, String> {
    mapping
        .controls()
        .into_iter()
        .map(|(id, entry)| (entry.input_cc, id.qualified_name()))
        .collect()
}

/// Control annotation for a raw message, CCs only
fn describe_control(message: Option<&MidiMessage>, names: &HashMap<u8, String>) -> Option<String> {
    match message? {
        MidiMessage::ControlChange { cc, .. } => Some(
            names
                .get(cc)
                .cloned()
                .unwrap_or_else(|| "unmapped".to_string()),
        ),
        _ => None,
    }
}

fn truncate_port(port: &str) -> String {
    if port.chars().count() > PORT_COLUMN {
        let head: String = port.chars().take(PORT_COLUMN - 3).collect();
        format!("{}...", head)
    } else {
        port.to_string()
    }
}

fn print_event(timestamp_ms: u64, port: &str, data: &[u8], names: &HashMap<u8, String>) {
    let message = MidiMessage::parse(data);
    let hex = format_hex(data);

    let parsed = message
        .as_ref()
        .map(|m| format!(" => {}", m.to_string().bright_blue()))
        .unwrap_or_default();

    let control = describe_control(message.as_ref(), names)
        .map(|name| format!(" ({})", name.bright_white()))
        .unwrap_or_default();

    let hex_colored = match message {
        Some(MidiMessage::ControlChange { .. }) => hex.bright_yellow(),
        Some(MidiMessage::SysEx { .. }) => hex.bright_magenta(),
        Some(_) => hex.normal(),
        None => hex.bright_black(),
    };

    println!(
        "[{}ms] {:width$} | {}{}{}",
        format!("{:08}", timestamp_ms).dimmed(),
        truncate_port(port),
        hex_colored,
        parsed,
        control,
        width = PORT_COLUMN
    );
}
