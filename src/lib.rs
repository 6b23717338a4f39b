#![cfg_attr(not(test), no_std)]

use core::fmt::{self, Display, Write as _};
use core::str::FromStr;

use embedded_io_async::{ErrorKind, Write};
use heapless::{String, Vec};

#[cfg(feature = "fake")]
pub mod fake;
pub mod link;
pub mod panel;
pub mod serial;

pub use link::{DeskLink, LinkEvent, TransportEvent};
pub use panel::{Panel, PanelConfig};
pub use serial::{Feed, TelemetryDecoder};

/// Longest inbound record the decoder keeps, terminator excluded.
pub const MAX_LINE_LENGTH: usize = 64;

/// Inbound record plus its `\r\n` terminator.
pub const MAX_RECORD_LENGTH: usize = MAX_LINE_LENGTH + 2;

/// Ten digits for `u32::MAX` plus the `\n` terminator.
pub const MAX_COMMAND_LENGTH: usize = 11;

/// Line rate the desk controller firmware is built for.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    ParseError,
    HeightOutOfRange,
    UnknownPreset(u8),
    Io(ErrorKind),
}

impl Error {
    pub(crate) fn io<E: embedded_io_async::Error>(e: E) -> Self {
        Self::Io(e.kind())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ParseError => f.write_str("malformed line"),
            Error::HeightOutOfRange => f.write_str("height out of range"),
            Error::UnknownPreset(id) => write!(f, "unknown preset {id}"),
            Error::Io(kind) => write!(f, "i/o error: {kind:?}"),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DeskState {
    Idle,
    MovingUp,
    MovingDown,
    Manual,
    Home,
    Unhomed,
    Unknown,
}

impl DeskState {
    pub const ALL: [DeskState; 7] = [
        DeskState::Idle,
        DeskState::MovingUp,
        DeskState::MovingDown,
        DeskState::Manual,
        DeskState::Home,
        DeskState::Unhomed,
        DeskState::Unknown,
    ];

    /// Wire name of the state.
    pub const fn name(&self) -> &'static str {
        match self {
            DeskState::Idle => "idle",
            DeskState::MovingUp => "movingUp",
            DeskState::MovingDown => "movingDown",
            DeskState::Manual => "manual",
            DeskState::Home => "home",
            DeskState::Unhomed => "unhomed",
            DeskState::Unknown => "unknown",
        }
    }

    /// Exact, case-sensitive lookup. Anything else is not a state.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.name() == name)
    }
}

impl Display for DeskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeskState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or(Error::ParseError)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Preset {
    One,
    Two,
    Three,
}

impl Preset {
    pub const fn id(&self) -> u8 {
        match self {
            Preset::One => 1,
            Preset::Two => 2,
            Preset::Three => 3,
        }
    }

    pub const fn serial_command(&self) -> char {
        match self {
            Preset::One => 'a',
            Preset::Two => 'b',
            Preset::Three => 'c',
        }
    }

    pub const fn from_serial_command(c: char) -> Option<Self> {
        match c {
            'a' => Some(Preset::One),
            'b' => Some(Preset::Two),
            'c' => Some(Preset::Three),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Preset {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        match id {
            1 => Ok(Preset::One),
            2 => Ok(Preset::Two),
            3 => Ok(Preset::Three),
            _ => Err(Error::UnknownPreset(id)),
        }
    }
}

/// Encoded outbound line, terminator included.
pub type CommandLine = Vec<u8, MAX_COMMAND_LENGTH>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    /// Drive to an absolute height in millimeters.
    SetHeight(u32),
    Preset(Preset),
    Stop,
}

impl Command {
    pub const STOP: char = 's';

    /// Builds a `SetHeight` from a signed value, rejecting anything that does
    /// not fit the wire format instead of sending garbage.
    pub fn set_height(target: i64) -> Result<Self> {
        u32::try_from(target)
            .map(Self::SetHeight)
            .map_err(|_| Error::HeightOutOfRange)
    }

    pub fn encode(&self) -> CommandLine {
        let mut line = String::<MAX_COMMAND_LENGTH>::new();
        // Ignore errors as the longest command, u32::MAX plus the
        // terminator, fits MAX_COMMAND_LENGTH.
        let _ = writeln!(line, "{self}");
        line.into_bytes()
    }

    pub async fn write<W: Write>(&self, tx: &mut W) -> Result<()> {
        tx.write_all(&self.encode()).await.map_err(Error::io)
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetHeight(target) => write!(f, "{target}"),
            Command::Preset(preset) => f.write_char(preset.serial_command()),
            Command::Stop => f.write_char(Self::STOP),
        }
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        serial::parse_command(s)
    }
}

/// Inbound record text with surrounding whitespace removed.
pub type RawLine = String<MAX_LINE_LENGTH>;

/// Encoded inbound line, terminator included.
pub type RecordLine = Vec<u8, MAX_RECORD_LENGTH>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEvent {
    /// Desk height in millimeters.
    Height(u32),
    State(DeskState),
    /// A complete record that is neither a height nor a state.
    Ignored(RawLine),
}

impl TelemetryEvent {
    /// Wraps `text` as an ignored record, cut at the last character that
    /// fits the record buffer.
    pub fn ignored(text: &str) -> Self {
        let mut line = RawLine::new();
        for c in text.chars() {
            if line.push(c).is_err() {
                break;
            }
        }
        Self::Ignored(line)
    }

    pub fn encode(&self) -> RecordLine {
        let mut line = String::<MAX_RECORD_LENGTH>::new();
        // Ignore errors as a u32, the longest state name and any RawLine all
        // fit alongside the terminator.
        let _ = write!(line, "{self}\r\n");
        line.into_bytes()
    }

    pub async fn write<W: Write>(&self, tx: &mut W) -> Result<()> {
        tx.write_all(&self.encode()).await.map_err(Error::io)
    }
}

impl Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEvent::Height(mm) => write!(f, "{mm}"),
            TelemetryEvent::State(state) => f.write_str(state.name()),
            TelemetryEvent::Ignored(line) => f.write_str(line),
        }
    }
}
