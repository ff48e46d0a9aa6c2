//! Application orchestration
//!
//! One task owns the engine, the connection manager and the LED controller
//! and drives them from a single `select!` loop: hardware input, hotplug
//! timers, core events, mapping reloads and REPL commands.

use anyhow::{Context, Result};
use std::ops::ControlFlow;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::cli::{Command, HELP};
use crate::config::AppConfig;
use crate::device::{ConnectionManager, HardwareInput, MidiBackend, MidirBackend};
use crate::engine::RemapEngine;
use crate::events::{ButtonStateChanged, ConnectionEvent, Emitter, ErrorLevel, ProcessedMessage};
use crate::led::LedController;
use crate::mapping::{MappingConfig, MappingWatcher};
use crate::midi::MidiMessage;

/// Capacity of the hardware input queue
const INPUT_QUEUE: usize = 1000;

pub struct App<B: MidiBackend = MidirBackend> {
    engine: RemapEngine,
    connection: ConnectionManager<B>,
    leds: LedController,
    poll_interval: Duration,
    hotplug_enabled: bool,
    input_rx: mpsc::Receiver<HardwareInput>,
    connection_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    cc_rx: mpsc::UnboundedReceiver<ProcessedMessage>,
    button_rx: mpsc::UnboundedReceiver<ButtonStateChanged>,
    /// Last reported error, to avoid repeating identical messages
    last_error: Option<String>,
}

impl<B: MidiBackend> App<B> {
    pub fn new(backend: B, config: &AppConfig, mapping: MappingConfig) -> Result<Self> {
        let (cc_events, cc_rx) = Emitter::channel();
        let (button_events, button_rx) = Emitter::channel();
        let mut engine = RemapEngine::new(cc_events, button_events);
        engine.load(mapping).context("Invalid mapping")?;

        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
        let (connection_events, connection_rx) = Emitter::channel();
        let connection = ConnectionManager::new(backend, config.connection_settings(), input_tx, connection_events);

        Ok(Self {
            engine,
            connection,
            leds: LedController::new(config.leds.enabled),
            poll_interval: config.poll_interval(),
            hotplug_enabled: config.hotplug.enabled,
            input_rx,
            connection_rx,
            cc_rx,
            button_rx,
            last_error: None,
        })
    }

    /// Initial connect and hotplug start; a missing device is not an error
    pub fn start(&mut self) {
        if !self.connection.connect_configured() {
            info!("Waiting for {}...", self.connection.settings().device_name);
        }
        if self.hotplug_enabled {
            self.connection.start_hotplug();
        }
    }

    /// Run until Ctrl+C or a quit command
    pub async fn run(
        mut self,
        mut commands: Option<mpsc::UnboundedReceiver<Command>>,
        mut mapping_watcher: Option<MappingWatcher>,
    ) -> Result<()> {
        self.start();

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; start() just did that work
        poll.tick().await;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        info!("Ready");

        loop {
            let debounce = self.connection.debounce_deadline();

            tokio::select! {
                Some(input) = self.input_rx.recv() => {
                    self.handle_input(&input);
                }

                _ = poll.tick() => {
                    self.connection.on_poll_tick(Instant::now());
                }

                _ = sleep_until(debounce) => {
                    self.connection.on_debounce_elapsed(Instant::now());
                }

                Some(event) = self.connection_rx.recv() => {
                    self.handle_connection_event(event);
                }

                Some(event) = self.button_rx.recv() => {
                    self.handle_button_event(&event);
                }

                Some(message) = self.cc_rx.recv() => {
                    trace!("ccProcessed {} -> {}", message.control, message.value);
                }

                Some(mapping) = next_mapping(&mut mapping_watcher) => {
                    info!("Mapping file changed, reloading...");
                    self.reload_mapping(mapping);
                }

                Some(command) = next_command(&mut commands) => {
                    if self.handle_command(command).is_break() {
                        break;
                    }
                }

                _ = &mut ctrl_c => {
                    info!("Shutdown signal received, stopping event loop");
                    break;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Hardware bytes -> engine -> virtual output
    fn handle_input(&mut self, input: &HardwareInput) {
        let Some(MidiMessage::ControlChange { channel, cc, value }) = MidiMessage::parse(&input.data) else {
            trace!("Ignoring non-CC input");
            return;
        };

        if let Some(message) = self.engine.process_input(channel, cc, value) {
            self.connection
                .send_virtual(message.channel.saturating_sub(1), message.output_cc, message.value);
        }
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { input_port, output_port } => {
                info!("✅ Connected (in: {}, out: {})", input_port, output_port);
                self.last_error = None;

                // Known baseline: every LED off, every button off
                let ccs = self.engine.led_ccs();
                self.leds.all_off(&mut self.connection, &ccs);
                self.engine.reset_all_button_states();
            }
            ConnectionEvent::Disconnected { reason } => {
                warn!("Disconnected ({})", reason);
            }
            ConnectionEvent::PortsChanged { inputs, outputs } => {
                debug!("Ports changed: {:?} / {:?}", inputs, outputs);
            }
            ConnectionEvent::Error { message, level } => {
                if self.last_error.as_deref() == Some(message.as_str()) {
                    debug!("{}", message);
                    return;
                }
                match level {
                    ErrorLevel::Warning => warn!("{}", message),
                    ErrorLevel::Error => error!("{}", message),
                }
                self.last_error = Some(message);
            }
        }
    }

    fn handle_button_event(&mut self, event: &ButtonStateChanged) {
        self.leds.on_button_state(&mut self.connection, event);
    }

    /// Swap in a new mapping; LEDs follow the preserved button states
    fn reload_mapping(&mut self, mapping: MappingConfig) {
        match self.engine.load(mapping) {
            Ok(()) => {
                let led_ccs = self.engine.led_ccs();
                let states: Vec<(u8, bool)> = self
                    .engine
                    .button_states()
                    .into_iter()
                    .filter(|(cc, _)| led_ccs.contains(cc))
                    .collect();
                self.leds.sync(&mut self.connection, &states);
                info!("✅ Mapping reloaded ({} controls)", self.engine.mapping_count());
            }
            Err(e) => warn!("⚠️  Rejected mapping (keeping current one): {}", e),
        }
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Status => self.print_status(),
            Command::Ports => {
                let ports = self.connection.list_ports();
                println!("Inputs:");
                for name in &ports.inputs {
                    println!("  {}", name);
                }
                println!("Outputs:");
                for name in &ports.outputs {
                    println!("  {}", name);
                }
            }
            Command::Connect { input, output } => {
                if self.connection.connect(input.as_deref(), output.as_deref()) {
                    println!("Connected");
                } else {
                    println!("Connect failed");
                }
                if self.hotplug_enabled {
                    self.connection.start_hotplug();
                }
            }
            Command::Disconnect => {
                self.connection.disconnect();
                println!("Disconnected, hotplug detection stopped");
            }
            Command::Hotplug(enabled) => {
                self.hotplug_enabled = enabled;
                if enabled {
                    self.connection.start_hotplug();
                } else {
                    self.connection.stop_hotplug();
                }
                println!("Hotplug detection {}", if enabled { "on" } else { "off" });
            }
            Command::Send { control, value } => match self.engine.process_manual(&control, value) {
                Some(message) => {
                    let sent = self.connection.send_virtual(
                        message.channel.saturating_sub(1),
                        message.output_cc,
                        message.value,
                    );
                    println!(
                        "{} -> ch:{} cc:{} v:{}{}",
                        message.control,
                        message.channel,
                        message.output_cc,
                        message.value,
                        if sent { "" } else { " (virtual output unavailable)" }
                    );
                }
                None => println!("Unknown control '{}'", control),
            },
            Command::Reset => {
                self.engine.reset_all_button_states();
                println!("All buttons off");
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn print_status(&self) {
        match self.connection.current_ports() {
            Some((input, output)) => println!("Device:      connected (in: {}, out: {})", input, output),
            None => println!("Device:      disconnected"),
        }
        println!(
            "Subsystem:   {}",
            if self.connection.is_subsystem_available() { "available" } else { "unavailable" }
        );
        println!(
            "Virtual out: {} ({})",
            self.connection.settings().virtual_port_name,
            if self.connection.has_virtual_port() { "open" } else { "closed" }
        );
        println!(
            "Hotplug:     {}",
            if self.connection.is_polling() { "polling" } else { "stopped" }
        );
        println!("LEDs:        {}", if self.leds.is_enabled() { "enabled" } else { "disabled" });
        println!("Mapping:     {} controls", self.engine.mapping_count());

        let lit: Vec<&str> = self
            .engine
            .button_states()
            .into_iter()
            .filter(|(_, on)| *on)
            .filter_map(|(cc, _)| self.engine.control_name(cc))
            .collect();
        println!("Buttons on:  {}", if lit.is_empty() { "none".to_string() } else { lit.join(", ") });
    }

    /// LEDs off, stop hotplug detection, close every port
    pub fn shutdown(&mut self) {
        info!("Shutting down...");
        let ccs = self.engine.led_ccs();
        self.leds.all_off(&mut self.connection, &ccs);
        self.connection.stop_hotplug();
        self.connection.shutdown();
        info!("All ports closed");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

async fn next_mapping(watcher: &mut Option<MappingWatcher>) -> Option<MappingConfig> {
    match watcher {
        Some(watcher) => watcher.next_mapping().await,
        None => std::future::pending().await,
    }
}

async fn next_command(commands: &mut Option<mpsc::UnboundedReceiver<Command>>) -> Option<Command> {
    match commands {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockBackend;

    const VIRTUAL: &str = "nanoKONTROL2 Remap";

    fn app() -> (App<MockBackend>, MockBackend) {
        let backend = MockBackend::with_device("nanoKONTROL2");
        let app = App::new(backend.clone(), &AppConfig::default(), MappingConfig::factory_default()).unwrap();
        (app, backend)
    }

    /// Process queued input and events until everything is quiet
    fn pump(app: &mut App<MockBackend>) {
        loop {
            let mut progressed = false;
            while let Ok(input) = app.input_rx.try_recv() {
                app.handle_input(&input);
                progressed = true;
            }
            while let Ok(event) = app.connection_rx.try_recv() {
                app.handle_connection_event(event);
                progressed = true;
            }
            while let Ok(event) = app.button_rx.try_recv() {
                app.handle_button_event(&event);
                progressed = true;
            }
            while app.cc_rx.try_recv().is_ok() {
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    fn hardware_sends(backend: &MockBackend) -> Vec<Vec<u8>> {
        backend.sent_to(backend.device_output())
    }

    #[test]
    fn test_start_connects_and_clears_leds() {
        let (mut app, backend) = app();
        app.start();
        pump(&mut app);

        assert!(app.connection.is_connected());
        assert!(app.connection.is_polling());

        let sends = hardware_sends(&backend);
        assert_eq!(sends.len(), app.engine.led_ccs().len());
        assert!(sends.iter().all(|bytes| bytes[2] == 0));
    }

    #[test]
    fn test_input_is_remapped_to_virtual_output() {
        let (mut app, backend) = app();
        let mut mapping = MappingConfig::factory_default();
        mapping.tracks[0].slider.output_cc = 7;
        mapping.tracks[0].slider.channel = 3;
        app.reload_mapping(mapping);
        app.start();
        pump(&mut app);

        assert!(backend.inject(&[0xB0, 0, 100]));
        pump(&mut app);

        assert_eq!(backend.sent_to(VIRTUAL), vec![vec![0xB2, 7, 100]]);
    }

    #[test]
    fn test_button_press_lights_led() {
        let (mut app, backend) = app();
        app.start();
        pump(&mut app);
        backend.state().sent.clear();

        backend.inject(&[0xB0, 32, 127]);
        pump(&mut app);

        assert_eq!(backend.sent_to(VIRTUAL), vec![vec![0xB0, 32, 127]]);
        assert_eq!(hardware_sends(&backend), vec![vec![0xB0, 32, 127]]);
        assert!(app.engine.button_state(32));
    }

    #[test]
    fn test_unmapped_input_is_dropped() {
        let (mut app, backend) = app();
        app.start();
        pump(&mut app);

        backend.inject(&[0xB0, 100, 100]);
        backend.inject(&[0x90, 60, 100]);
        pump(&mut app);

        assert!(backend.sent_to(VIRTUAL).is_empty());
    }

    #[test]
    fn test_reconnect_resets_button_state() {
        let (mut app, backend) = app();
        backend.unplug();
        app.start();
        pump(&mut app);

        let _ = app.handle_command(Command::Send {
            control: "track1.solo".into(),
            value: 127,
        });
        pump(&mut app);
        assert!(app.engine.button_state(32));

        backend.plug_in();
        let _ = app.handle_command(Command::Connect {
            input: None,
            output: None,
        });
        pump(&mut app);

        assert!(app.connection.is_connected());
        assert!(!app.engine.button_state(32));
        assert!(hardware_sends(&backend).contains(&vec![0xB0, 32, 0]));
    }

    #[test]
    fn test_manual_send_scales_to_range() {
        let (mut app, backend) = app();
        let mut mapping = MappingConfig::factory_default();
        mapping.tracks[1].knob = mapping.tracks[1].knob.clone().with_range(10, 20);
        app.reload_mapping(mapping);
        app.start();
        pump(&mut app);

        let _ = app.handle_command(Command::Send {
            control: "track2.knob".into(),
            value: 127,
        });
        assert_eq!(backend.sent_to(VIRTUAL), vec![vec![0xB0, 17, 20]]);
    }

    #[test]
    fn test_invalid_reload_keeps_mapping() {
        let (mut app, _backend) = app();
        let mut broken = MappingConfig::factory_default();
        broken.transport.play.input_cc = 0;

        app.reload_mapping(broken);
        assert_eq!(app.engine.config(), Some(&MappingConfig::factory_default()));
    }

    #[test]
    fn test_commands() {
        let (mut app, _backend) = app();
        app.start();
        pump(&mut app);

        assert!(app.handle_command(Command::Status).is_continue());
        assert!(app.handle_command(Command::Hotplug(false)).is_continue());
        assert!(!app.connection.is_polling());

        assert!(app.handle_command(Command::Disconnect).is_continue());
        assert!(!app.connection.is_connected());
        assert!(app.handle_command(Command::Quit).is_break());
    }

    #[test]
    fn test_repeated_error_is_remembered() {
        let (mut app, backend) = app();
        backend.unplug();
        app.start();
        app.connection.connect(None, None);
        pump(&mut app);

        assert_eq!(app.last_error.as_deref(), Some("nanoKONTROL2 not found"));
    }

    #[test]
    fn test_shutdown_turns_leds_off_and_closes_ports() {
        let (mut app, backend) = app();
        app.start();
        pump(&mut app);
        backend.inject(&[0xB0, 32, 127]);
        pump(&mut app);
        backend.state().sent.clear();

        app.shutdown();

        let sends = hardware_sends(&backend);
        assert_eq!(sends.len(), app.engine.led_ccs().len());
        assert!(sends.contains(&vec![0xB0, 32, 0]));
        let state = backend.state();
        assert!(state.open_inputs.is_empty());
        assert!(state.open_outputs.is_empty());
    }
}
