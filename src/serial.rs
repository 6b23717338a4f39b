use core::str::FromStr;

use heapless::Vec;
use log::{debug, warn};
use nom::{
    branch::alt,
    character::complete::{alpha1, anychar, char, digit1},
    combinator::{all_consuming, map, map_opt, map_res, value},
    IResult,
};

use crate::{
    Command, DeskState, Error, Preset, RawLine, Result, TelemetryEvent, MAX_LINE_LENGTH,
};

/// Which terminator closes a line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Framing {
    /// Commands towards the desk end in `\n`.
    Lf,
    /// Telemetry from the desk ends in `\r\n`. A segment closed by a bare
    /// `\n` is not a record and is dropped.
    Crlf,
}

#[derive(Debug, Eq, PartialEq)]
pub struct Line<const N: usize> {
    pub data: Vec<u8, N>,
    /// The line overflowed the reader and `data` holds only its head.
    pub truncated: bool,
}

/// Assembles lines one byte at a time.
pub struct LineReader<const N: usize> {
    framing: Framing,
    buf: Vec<u8, N>,
    carriage_return: bool,
    truncated: bool,
}

impl<const N: usize> LineReader<N> {
    pub const fn new(framing: Framing) -> Self {
        Self {
            framing,
            buf: Vec::new(),
            carriage_return: false,
            truncated: false,
        }
    }

    pub fn handle_byte(&mut self, byte: u8) -> Option<Line<N>> {
        if byte != b'\n' {
            self.carriage_return = byte == b'\r';
            if self.buf.push(byte).is_err() {
                self.truncated = true;
            }
            return None;
        }

        let mut data = core::mem::take(&mut self.buf);
        let truncated = core::mem::replace(&mut self.truncated, false);
        let carriage_return = core::mem::replace(&mut self.carriage_return, false);

        if self.framing == Framing::Crlf {
            if !carriage_return {
                debug!("dropping {} byte segment without \\r\\n", data.len());
                return None;
            }
            // An overflowed line never stored its '\r'.
            if data.last() == Some(&b'\r') {
                data.pop();
            }
        }

        Some(Line { data, truncated })
    }

    /// Bytes held for a line that has not been terminated yet.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.carriage_return = false;
        self.truncated = false;
    }
}

fn height(i: &str) -> IResult<&str, u32> {
    map_res(digit1, u32::from_str)(i)
}

fn state(i: &str) -> IResult<&str, DeskState> {
    map_opt(alpha1, DeskState::from_name)(i)
}

fn record(i: &str) -> IResult<&str, TelemetryEvent> {
    alt((
        map(height, TelemetryEvent::Height),
        map(state, TelemetryEvent::State),
    ))(i)
}

fn preset(i: &str) -> IResult<&str, Preset> {
    map_opt(anychar, Preset::from_serial_command)(i)
}

fn command(i: &str) -> IResult<&str, Command> {
    alt((
        map(height, Command::SetHeight),
        value(Command::Stop, char(Command::STOP)),
        map(preset, Command::Preset),
    ))(i)
}

/// Classifies one record. Unparsed input at the end of the record makes it
/// an ignored line rather than a height or state.
pub fn classify(record_text: &str) -> TelemetryEvent {
    let record_text = record_text.trim();
    match all_consuming(record)(record_text) {
        Ok((_, event)) => event,
        Err(_) => TelemetryEvent::ignored(record_text),
    }
}

pub(crate) fn parse_command(s: &str) -> Result<Command> {
    let (_, command) = all_consuming(command)(s.trim()).map_err(|_| Error::ParseError)?;
    Ok(command)
}

/// Turns the byte stream of one desk connection into telemetry events.
///
/// Create one per connection and drop it with the connection; partial
/// records never carry over to the next link.
pub struct TelemetryDecoder {
    reader: LineReader<MAX_LINE_LENGTH>,
}

impl TelemetryDecoder {
    pub const fn new() -> Self {
        Self {
            reader: LineReader::new(Framing::Crlf),
        }
    }

    /// Buffers `chunk` and lazily yields one event per record it completes.
    ///
    /// Dropping the returned [`Feed`] early still consumes the rest of the
    /// chunk so the buffer stays in step with the stream; only the unread
    /// events are lost.
    pub fn feed<'a>(&'a mut self, chunk: &'a [u8]) -> Feed<'a> {
        Feed {
            decoder: self,
            chunk: chunk.iter(),
        }
    }

    /// Bytes of an unterminated record waiting for the next chunk.
    pub fn buffered(&self) -> usize {
        self.reader.pending()
    }

    pub fn reset(&mut self) {
        self.reader.reset();
    }

    fn decode_line(line: Line<MAX_LINE_LENGTH>) -> TelemetryEvent {
        let mut text = RawLine::new();
        let mut malformed = false;
        for chunk in line.data.utf8_chunks() {
            // Ignore errors as the valid parts never exceed the line buffer
            // they were taken from.
            let _ = text.push_str(chunk.valid());
            malformed |= !chunk.invalid().is_empty();
        }

        if line.truncated {
            warn!("record longer than {MAX_LINE_LENGTH} bytes ignored");
            return TelemetryEvent::ignored(text.trim());
        }

        // The valid pieces of a damaged record can spell a plausible height.
        if malformed {
            debug!("record with invalid utf-8 ignored");
            return TelemetryEvent::ignored(text.trim());
        }

        classify(&text)
    }
}

impl Default for TelemetryDecoder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Feed<'a> {
    decoder: &'a mut TelemetryDecoder,
    chunk: core::slice::Iter<'a, u8>,
}

impl Iterator for Feed<'_> {
    type Item = TelemetryEvent;

    fn next(&mut self) -> Option<TelemetryEvent> {
        for &byte in self.chunk.by_ref() {
            if let Some(line) = self.decoder.reader.handle_byte(byte) {
                return Some(TelemetryDecoder::decode_line(line));
            }
        }
        None
    }
}

impl Drop for Feed<'_> {
    fn drop(&mut self) {
        for &byte in self.chunk.by_ref() {
            let _ = self.decoder.reader.handle_byte(byte);
        }
    }
}
