use embedded_io_async::{Error as _, ErrorKind, Read, Write};
use log::{debug, info, warn};

use crate::{serial::TelemetryDecoder, Command, CommandLine, Error, Result, TelemetryEvent};

/// Notifications from the byte transport, in the order they happen.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportEvent<'a> {
    Opened,
    Received(&'a [u8]),
    Closed,
    Error(ErrorKind),
}

/// Notifications for the presentation layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    /// The transport failed; the link is down and is not reopened.
    Fault(ErrorKind),
    Telemetry(TelemetryEvent),
}

/// Desk-side end of a serial connection.
///
/// A decoder exists only while the transport is open, so nothing buffered
/// on one connection leaks into the next.
#[derive(Default)]
pub struct DeskLink {
    decoder: Option<TelemetryDecoder>,
}

impl DeskLink {
    pub const fn new() -> Self {
        Self { decoder: None }
    }

    pub fn is_connected(&self) -> bool {
        self.decoder.is_some()
    }

    pub fn handle<F: FnMut(LinkEvent)>(&mut self, event: TransportEvent<'_>, notify: &mut F) {
        match event {
            TransportEvent::Opened => {
                info!("desk link opened");
                self.decoder = Some(TelemetryDecoder::new());
                notify(LinkEvent::Connected);
            }
            TransportEvent::Received(data) => {
                let Some(decoder) = self.decoder.as_mut() else {
                    warn!("dropping {} bytes received while closed", data.len());
                    return;
                };
                for event in decoder.feed(data) {
                    if let TelemetryEvent::Ignored(line) = &event {
                        debug!("ignored line {:?}", line.as_str());
                    }
                    notify(LinkEvent::Telemetry(event));
                }
            }
            TransportEvent::Closed => {
                info!("desk link closed");
                self.decoder = None;
                notify(LinkEvent::Disconnected);
            }
            TransportEvent::Error(kind) => {
                warn!("desk link error: {kind:?}");
                self.decoder = None;
                notify(LinkEvent::Fault(kind));
            }
        }
    }

    /// Encoded line for `command`, or `None` when there is no open link to
    /// send it on.
    pub fn outbound(&self, command: Command) -> Option<CommandLine> {
        if !self.is_connected() {
            debug!("link closed, not sending {command:?}");
            return None;
        }
        Some(command.encode())
    }

    /// Writes `command` if the link is open. Returns whether it was sent.
    pub async fn send<W: Write>(&self, tx: &mut W, command: Command) -> Result<bool> {
        let Some(line) = self.outbound(command) else {
            return Ok(false);
        };
        tx.write_all(&line).await.map_err(Error::io)?;
        Ok(true)
    }

    /// Drives the link from `rx` until it reaches end of stream or fails.
    pub async fn pump<R: Read, F: FnMut(LinkEvent)>(&mut self, rx: &mut R, notify: &mut F) {
        self.handle(TransportEvent::Opened, notify);

        let mut buf = [0u8; 64];
        loop {
            match rx.read(&mut buf).await {
                Ok(0) => {
                    self.handle(TransportEvent::Closed, notify);
                    return;
                }
                Ok(read_len) => self.handle(TransportEvent::Received(&buf[..read_len]), notify),
                Err(e) => {
                    self.handle(TransportEvent::Error(e.kind()), notify);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeskState, Preset};
    use embassy_sync::{blocking_mutex::raw::NoopRawMutex, pipe::Pipe};

    fn collect(link: &mut DeskLink, events: &[TransportEvent<'_>]) -> std::vec::Vec<LinkEvent> {
        let mut seen = std::vec::Vec::new();
        for event in events {
            link.handle(*event, &mut |e| seen.push(e));
        }
        seen
    }

    #[test]
    fn open_data_close_in_order() {
        let mut link = DeskLink::new();
        let seen = collect(
            &mut link,
            &[
                TransportEvent::Opened,
                TransportEvent::Received(b"unhomed\r\n3"),
                TransportEvent::Received(b"00\r\n"),
                TransportEvent::Closed,
            ],
        );
        assert_eq!(
            seen,
            [
                LinkEvent::Connected,
                LinkEvent::Telemetry(TelemetryEvent::State(DeskState::Unhomed)),
                LinkEvent::Telemetry(TelemetryEvent::Height(300)),
                LinkEvent::Disconnected,
            ]
        );
        assert!(!link.is_connected());
    }

    #[test]
    fn data_while_closed_is_dropped() {
        let mut link = DeskLink::new();
        let seen = collect(&mut link, &[TransportEvent::Received(b"700\r\n")]);
        assert!(seen.is_empty());
    }

    #[test]
    fn reopened_link_starts_with_empty_buffer() {
        let mut link = DeskLink::new();
        let seen = collect(
            &mut link,
            &[
                TransportEvent::Opened,
                TransportEvent::Received(b"12"),
                TransportEvent::Closed,
                TransportEvent::Opened,
                TransportEvent::Received(b"3\r\n"),
            ],
        );
        assert_eq!(
            seen.last(),
            Some(&LinkEvent::Telemetry(TelemetryEvent::Height(3)))
        );
    }

    #[test]
    fn transport_error_takes_link_down() {
        let mut link = DeskLink::new();
        let seen = collect(
            &mut link,
            &[
                TransportEvent::Opened,
                TransportEvent::Error(ErrorKind::BrokenPipe),
            ],
        );
        assert_eq!(seen[1], LinkEvent::Fault(ErrorKind::BrokenPipe));
        assert!(!link.is_connected());
        assert_eq!(link.outbound(Command::Stop), None);
    }

    #[futures_test::test]
    async fn send_writes_only_when_connected() {
        let mut pipe = Pipe::<NoopRawMutex, 16>::new();
        let (reader, mut writer) = pipe.split();
        let mut link = DeskLink::new();

        assert_eq!(
            link.send(&mut writer, Command::Preset(Preset::Two)).await,
            Ok(false)
        );
        assert!(reader.try_read(&mut [0u8; 16]).is_err());

        link.handle(TransportEvent::Opened, &mut |_| {});
        assert_eq!(
            link.send(&mut writer, Command::Preset(Preset::Two)).await,
            Ok(true)
        );
        let mut buf = [0u8; 16];
        let len = reader.try_read(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"b\n");
    }

    #[futures_test::test]
    async fn pump_runs_until_end_of_stream() {
        let mut link = DeskLink::new();
        let mut rx: &[u8] = b"idle\r\n715\r\nbanana\r\n";
        let mut seen = std::vec::Vec::new();

        link.pump(&mut rx, &mut |e| seen.push(e)).await;

        assert_eq!(
            seen,
            [
                LinkEvent::Connected,
                LinkEvent::Telemetry(TelemetryEvent::State(DeskState::Idle)),
                LinkEvent::Telemetry(TelemetryEvent::Height(715)),
                LinkEvent::Telemetry(TelemetryEvent::ignored("banana")),
                LinkEvent::Disconnected,
            ]
        );
        assert!(!link.is_connected());
    }
}
