//! Simulated desk motor controller.
//!
//! Speaks the controller side of the protocol over a pair of pipes: command
//! lines come in, state and height telemetry go out once per tick. Needs an
//! `embassy-time` driver (the `std` feature provides one on the host).

use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::raw::NoopRawMutex, pipe};
use embassy_time::{Duration, Instant, Timer};
use fixed::types::U16F16;
use log::{error, info};

use crate::{
    serial::{Framing, LineReader},
    Command, DeskState, Error, Result, TelemetryEvent, MAX_COMMAND_LENGTH,
};

const TICK_PERIOD: Duration = Duration::from_millis(250);

/// Lowest and highest positions the frame can reach, in millimeters.
pub const MIN_HEIGHT: u16 = 620;
pub const MAX_HEIGHT: u16 = 1270;

/// Stored heights recalled by the three preset buttons.
pub const PRESETS: [u16; 3] = [720, 1050, 1180];

/// Where the frame happens to be at power up.
const POWER_UP_HEIGHT: u16 = 900;

/// 9.5 mm per tick.
const SPEED: U16F16 = U16F16::from_bits((9 << 16) | 0x8000);

pub struct FakeDesk<'rx, 'tx> {
    rx_pipe: pipe::Reader<'rx, NoopRawMutex, 256>,
    tx_pipe: pipe::Writer<'tx, NoopRawMutex, 256>,
    line_reader: LineReader<MAX_COMMAND_LENGTH>,
    position: U16F16,
    target: Option<u16>,
    state: DeskState,
    homed: bool,
}

impl<'rx, 'tx> FakeDesk<'rx, 'tx> {
    pub fn new(
        rx_pipe: pipe::Reader<'rx, NoopRawMutex, 256>,
        tx_pipe: pipe::Writer<'tx, NoopRawMutex, 256>,
    ) -> Self {
        Self {
            rx_pipe,
            tx_pipe,
            line_reader: LineReader::new(Framing::Lf),
            position: U16F16::from_num(POWER_UP_HEIGHT),
            target: None,
            state: DeskState::Unhomed,
            homed: false,
        }
    }

    pub fn state(&self) -> DeskState {
        self.state
    }

    /// Height as the controller reports it, once homed.
    pub fn height(&self) -> Option<u32> {
        self.homed.then(|| self.position.to_num::<u32>())
    }

    pub async fn run(&mut self) -> ! {
        let mut last_tick = Instant::now();
        let mut buf = [0u8; 64];
        loop {
            let tick_target = last_tick + TICK_PERIOD;

            let either = select(self.rx_pipe.read(&mut buf), Timer::at(tick_target)).await;

            match either {
                Either::First(read_len) => self.handle_read(&buf[..read_len]),
                Either::Second(_) => {
                    last_tick = tick_target;
                    if let Err(e) = self.handle_tick().await {
                        error!("FAKE: error sending telemetry: {e:?}");
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        info!("FAKE: command {command:?}");
        match command {
            Command::SetHeight(target) => {
                let target = target.clamp(u32::from(MIN_HEIGHT), u32::from(MAX_HEIGHT));
                // The clamp keeps the target inside u16.
                self.start_motion(target as u16);
            }
            Command::Preset(preset) => {
                self.start_motion(PRESETS[usize::from(preset.id() - 1)]);
            }
            Command::Stop => {
                self.target = None;
                self.state = if self.homed {
                    DeskState::Idle
                } else {
                    DeskState::Unhomed
                };
            }
        }
    }

    fn start_motion(&mut self, target: u16) {
        self.target = Some(target);
        if !self.homed {
            self.state = DeskState::Home;
        }
    }

    fn handle_line(&mut self, data: &[u8]) -> Result<()> {
        let line = core::str::from_utf8(data).map_err(|_| Error::ParseError)?;
        let command = line.parse::<Command>()?;
        self.handle_command(command);
        Ok(())
    }

    pub fn handle_read(&mut self, data: &[u8]) {
        for &byte in data {
            let Some(line) = self.line_reader.handle_byte(byte) else {
                continue;
            };
            if line.truncated {
                error!("FAKE: command line too long");
                continue;
            }
            if let Err(e) = self.handle_line(&line.data) {
                error!("FAKE: error handling line {:?}: {e:?}", &line.data[..]);
            }
        }
    }

    /// Moves the frame one tick. Homing runs to the bottom stop before any
    /// pending target is served.
    fn step(&mut self) {
        let Some(target) = self.target else {
            return;
        };

        if !self.homed {
            let bottom = U16F16::from_num(MIN_HEIGHT);
            self.state = DeskState::Home;
            self.position = self.position.saturating_sub(SPEED).max(bottom);
            if self.position == bottom {
                info!("FAKE: homed");
                self.homed = true;
            }
            return;
        }

        let target = U16F16::from_num(target);
        if self.position < target {
            self.state = DeskState::MovingUp;
            self.position = self.position.saturating_add(SPEED).min(target);
        } else if self.position > target {
            self.state = DeskState::MovingDown;
            self.position = self.position.saturating_sub(SPEED).max(target);
        }

        if self.position == target {
            self.target = None;
            self.state = DeskState::Idle;
        }
    }

    pub async fn handle_tick(&mut self) -> Result<()> {
        self.step();

        TelemetryEvent::State(self.state)
            .write(&mut self.tx_pipe)
            .await?;

        if let Some(height) = self.height() {
            TelemetryEvent::Height(height)
                .write(&mut self.tx_pipe)
                .await?;
        }

        Ok(())
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::{serial::TelemetryDecoder, Preset};
    use embassy_sync::pipe::Pipe;

    fn drain(
        rx: &pipe::Reader<'_, NoopRawMutex, 256>,
        decoder: &mut TelemetryDecoder,
    ) -> std::vec::Vec<TelemetryEvent> {
        let mut events = std::vec::Vec::new();
        let mut buf = [0u8; 64];
        while let Ok(len) = rx.try_read(&mut buf) {
            events.extend(decoder.feed(&buf[..len]));
        }
        events
    }

    #[futures_test::test]
    async fn reports_unhomed_until_commanded() {
        let mut to_desk = Pipe::<NoopRawMutex, 256>::new();
        let mut from_desk = Pipe::<NoopRawMutex, 256>::new();
        let (desk_rx, _host_tx) = to_desk.split();
        let (host_rx, desk_tx) = from_desk.split();
        let mut desk = FakeDesk::new(desk_rx, desk_tx);
        let mut decoder = TelemetryDecoder::new();

        desk.handle_tick().await.unwrap();
        assert_eq!(
            drain(&host_rx, &mut decoder),
            [TelemetryEvent::State(DeskState::Unhomed)]
        );
    }

    #[futures_test::test]
    async fn preset_homes_then_drives_to_stored_height() {
        let mut to_desk = Pipe::<NoopRawMutex, 256>::new();
        let mut from_desk = Pipe::<NoopRawMutex, 256>::new();
        let (desk_rx, _host_tx) = to_desk.split();
        let (host_rx, desk_tx) = from_desk.split();
        let mut desk = FakeDesk::new(desk_rx, desk_tx);
        let mut decoder = TelemetryDecoder::new();

        desk.handle_read(&Command::Preset(Preset::Two).encode());
        assert_eq!(desk.state(), DeskState::Home);

        let mut seen = std::vec::Vec::new();
        for _ in 0..200 {
            desk.handle_tick().await.unwrap();
            seen.extend(drain(&host_rx, &mut decoder));
            if desk.state() == DeskState::Idle {
                break;
            }
        }

        assert_eq!(desk.height(), Some(1050));
        assert!(seen.contains(&TelemetryEvent::State(DeskState::Home)));
        assert!(seen.contains(&TelemetryEvent::State(DeskState::MovingUp)));
        assert!(seen.contains(&TelemetryEvent::Height(u32::from(MIN_HEIGHT))));
        assert_eq!(
            &seen[seen.len() - 2..],
            [
                TelemetryEvent::State(DeskState::Idle),
                TelemetryEvent::Height(1050)
            ]
        );
    }

    #[futures_test::test]
    async fn stop_halts_motion() {
        let mut to_desk = Pipe::<NoopRawMutex, 256>::new();
        let mut from_desk = Pipe::<NoopRawMutex, 256>::new();
        let (desk_rx, _host_tx) = to_desk.split();
        let (_host_rx, desk_tx) = from_desk.split();
        let mut desk = FakeDesk::new(desk_rx, desk_tx);

        desk.handle_read(b"1200\n");
        desk.handle_tick().await.unwrap();
        desk.handle_read(b"s\n");
        assert_eq!(desk.state(), DeskState::Unhomed);
        assert_eq!(desk.height(), None);
    }

    #[test]
    fn bad_command_lines_are_skipped() {
        let mut to_desk = Pipe::<NoopRawMutex, 256>::new();
        let mut from_desk = Pipe::<NoopRawMutex, 256>::new();
        let (desk_rx, _host_tx) = to_desk.split();
        let (_host_rx, desk_tx) = from_desk.split();
        let mut desk = FakeDesk::new(desk_rx, desk_tx);

        desk.handle_read(b"x\n12345678901234567\n");
        assert_eq!(desk.state(), DeskState::Unhomed);
        desk.handle_read(b"c\r\n");
        assert_eq!(desk.state(), DeskState::Home);
    }
}
