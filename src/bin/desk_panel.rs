use std::io::{self, stdin, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use desk_link::{
    Command, DeskLink, Error, LinkEvent, Panel, PanelConfig, Preset, TransportEvent,
    DEFAULT_BAUD_RATE,
};
use embedded_io_async::ErrorKind;
use log::{error, info, warn};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

const USAGE: &str = "usage: desk_panel <port> [--baud <rate>] [--min <mm>] [--max <mm>]";

fn error_kind(e: &io::Error) -> ErrorKind {
    match e.kind() {
        io::ErrorKind::BrokenPipe => ErrorKind::BrokenPipe,
        io::ErrorKind::NotConnected => ErrorKind::NotConnected,
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
        _ => ErrorKind::Other,
    }
}

/// Reads telemetry until the port closes or fails, printing the panel on
/// every visible change.
fn run_reader(mut port: Box<dyn SerialPort>, config: PanelConfig, connected: &AtomicBool) {
    let mut link = DeskLink::new();
    let mut panel = Panel::new(config);
    let mut notify = |event: LinkEvent| {
        match event {
            LinkEvent::Connected => connected.store(true, Ordering::Release),
            LinkEvent::Disconnected | LinkEvent::Fault(_) => {
                connected.store(false, Ordering::Release)
            }
            LinkEvent::Telemetry(_) => {}
        }
        if panel.observe(event) {
            println!("{panel}");
        }
    };

    link.handle(TransportEvent::Opened, &mut notify);

    let mut buf = [0u8; 64];
    loop {
        match port.read(&mut buf) {
            Ok(0) => {
                link.handle(TransportEvent::Closed, &mut notify);
                return;
            }
            Ok(len) => link.handle(TransportEvent::Received(&buf[..len]), &mut notify),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) => {
                error!("read from desk failed: {e}");
                link.handle(TransportEvent::Error(error_kind(&e)), &mut notify);
                return;
            }
        }
    }
}

/// `<mm>`, `1`..`3` for a preset, `s`, or `q` to quit (`None`).
fn parse_intent(input: &str, config: &PanelConfig) -> Result<Option<Command>, Error> {
    match input {
        "q" => Ok(None),
        "s" => Ok(Some(Command::Stop)),
        "1" | "2" | "3" => {
            let id = input.parse::<u8>().map_err(|_| Error::ParseError)?;
            Ok(Some(Command::Preset(Preset::try_from(id)?)))
        }
        height => {
            let position = height.parse::<f64>().map_err(|_| Error::ParseError)?;
            config.slider_command(position).map(Some)
        }
    }
}

fn main() {
    env_logger::init();
    let mut pargs = pico_args::Arguments::from_env();

    let baud_rate: u32 = pargs
        .opt_value_from_str("--baud")
        .unwrap()
        .unwrap_or(DEFAULT_BAUD_RATE);
    let defaults = PanelConfig::default();
    let config = PanelConfig {
        height_min: pargs
            .opt_value_from_str("--min")
            .unwrap()
            .unwrap_or(defaults.height_min),
        height_max: pargs
            .opt_value_from_str("--max")
            .unwrap()
            .unwrap_or(defaults.height_max),
    };
    let port_name: String = pargs.free_from_str().expect(USAGE);

    let port = serialport::new(&port_name, baud_rate)
        .timeout(Duration::from_millis(100))
        .flow_control(FlowControl::None)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .data_bits(DataBits::Eight)
        .open();
    let port = match port {
        Ok(port) => port,
        Err(e) => {
            error!("failed to open {port_name}: {e}");
            std::process::exit(1);
        }
    };
    info!("opened {port_name} at {baud_rate} baud");

    let mut writer = port.try_clone().expect("failed to clone serial port");
    let connected = Arc::new(AtomicBool::new(false));
    {
        let connected = Arc::clone(&connected);
        thread::spawn(move || run_reader(port, config, &connected));
    }

    println!("<mm> height, 1/2/3 preset, s stop, q quit");
    for line in stdin().lines() {
        let line = line.unwrap();
        let command = match parse_intent(line.trim(), &config) {
            Ok(Some(command)) => command,
            Ok(None) => break,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        if !connected.load(Ordering::Acquire) {
            warn!("desk not connected, dropping {command:?}");
            continue;
        }
        if let Err(e) = writer.write_all(&command.encode()) {
            error!("write to desk failed: {e}");
        }
    }
}
