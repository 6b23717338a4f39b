//! Presentation state for a desk control panel.
//!
//! The panel holds what a GUI shows (height label, state label, progress
//! bar, link indicator) and is updated only through [`Panel::apply`] and
//! [`Panel::observe`], so any toolkit can render it without knowing the
//! wire protocol.

use core::fmt::{self, Display, Write as _};

use heapless::String;

use crate::{Command, DeskState, Error, LinkEvent, Result, TelemetryEvent};

/// Height label shown while the desk has no valid position.
pub const HEIGHT_SENTINEL: &str = "- mm";

const LABEL_LENGTH: usize = 16;
const BAR_WIDTH: u32 = 20;

type Label = String<LABEL_LENGTH>;

/// Slider and progress bar bounds, in millimeters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PanelConfig {
    pub height_min: u32,
    pub height_max: u32,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            height_min: 0,
            height_max: 1200,
        }
    }
}

impl PanelConfig {
    /// Converts a slider position into a height command. The position is
    /// truncated to whole millimeters; positions outside the slider range
    /// or not finite are rejected.
    pub fn slider_command(&self, position: f64) -> Result<Command> {
        if !position.is_finite()
            || position < f64::from(self.height_min)
            || position > f64::from(self.height_max)
        {
            return Err(Error::HeightOutOfRange);
        }
        Ok(Command::SetHeight(position as u32))
    }

    fn clamp(&self, mm: u32) -> u32 {
        mm.max(self.height_min).min(self.height_max)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Panel {
    config: PanelConfig,
    connected: bool,
    state: Option<DeskState>,
    state_text: Label,
    height_text: Label,
    progress: u32,
}

impl Panel {
    pub fn new(config: PanelConfig) -> Self {
        Self {
            config,
            connected: false,
            state: None,
            state_text: label("-"),
            height_text: label(HEIGHT_SENTINEL),
            progress: 0,
        }
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Last state reported by the desk, if any.
    pub fn state(&self) -> Option<DeskState> {
        self.state
    }

    pub fn state_text(&self) -> &str {
        &self.state_text
    }

    pub fn height_text(&self) -> &str {
        &self.height_text
    }

    pub fn progress(&self) -> u32 {
        self.progress
    }

    /// Renders one telemetry event. Returns whether anything visible changed.
    ///
    /// Heights are not shown while the desk reports `unhomed`; the sentinel
    /// stays until another state arrives.
    pub fn apply(&mut self, event: &TelemetryEvent) -> bool {
        let before = self.clone();
        match event {
            TelemetryEvent::Height(mm) => {
                if self.state != Some(DeskState::Unhomed) {
                    self.height_text.clear();
                    // Ignore errors as a u32 and the unit fit the label.
                    let _ = write!(self.height_text, "{mm} mm");
                    self.progress = self.config.clamp(*mm);
                }
            }
            TelemetryEvent::State(state) => {
                self.state = Some(*state);
                self.state_text = label(state.name());
                if *state == DeskState::Unhomed {
                    self.height_text = label(HEIGHT_SENTINEL);
                    self.progress = 0;
                }
            }
            TelemetryEvent::Ignored(_) => {}
        }
        before != *self
    }

    /// Applies a link notification. Returns whether anything visible changed.
    pub fn observe(&mut self, event: LinkEvent) -> bool {
        match event {
            LinkEvent::Connected => self.set_connected(true),
            LinkEvent::Disconnected | LinkEvent::Fault(_) => self.set_connected(false),
            LinkEvent::Telemetry(event) => self.apply(&event),
        }
    }

    fn set_connected(&mut self, connected: bool) -> bool {
        let changed = self.connected != connected;
        self.connected = connected;
        changed
    }
}

impl Default for Panel {
    fn default() -> Self {
        Self::new(PanelConfig::default())
    }
}

fn label(text: &str) -> Label {
    let mut label = Label::new();
    // Every fixed label and state name is shorter than LABEL_LENGTH.
    let _ = label.push_str(text);
    label
}

/// One-line text rendering, e.g. `[online] idle | 720 mm |#######-----|`.
impl Display for Panel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let link = if self.connected { "online" } else { "offline" };
        write!(
            f,
            "[{link}] {} | {} |",
            self.state_text, self.height_text
        )?;

        let span = u64::from(self.config.height_max.saturating_sub(self.config.height_min));
        let offset = u64::from(self.progress.saturating_sub(self.config.height_min));
        let filled = match span {
            0 => 0,
            span => offset * u64::from(BAR_WIDTH) / span,
        };
        for cell in 0..BAR_WIDTH {
            f.write_char(if u64::from(cell) < filled { '#' } else { '-' })?;
        }
        f.write_char('|')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io_async::ErrorKind;

    fn state(state: DeskState) -> TelemetryEvent {
        TelemetryEvent::State(state)
    }

    #[test]
    fn height_shows_millimeters_and_progress() {
        let mut panel = Panel::default();
        assert!(panel.apply(&TelemetryEvent::Height(733)));
        assert_eq!(panel.height_text(), "733 mm");
        assert_eq!(panel.progress(), 733);
    }

    #[test]
    fn progress_is_clamped_to_bounds() {
        let mut panel = Panel::new(PanelConfig {
            height_min: 600,
            height_max: 1200,
        });
        panel.apply(&TelemetryEvent::Height(1500));
        assert_eq!(panel.height_text(), "1500 mm");
        assert_eq!(panel.progress(), 1200);
        panel.apply(&TelemetryEvent::Height(10));
        assert_eq!(panel.progress(), 600);
    }

    #[test]
    fn state_does_not_touch_height() {
        let mut panel = Panel::default();
        panel.apply(&TelemetryEvent::Height(700));
        panel.apply(&state(DeskState::MovingUp));
        assert_eq!(panel.state_text(), "movingUp");
        assert_eq!(panel.height_text(), "700 mm");
        assert_eq!(panel.progress(), 700);
    }

    #[test]
    fn unhomed_forces_sentinel_after_height() {
        let mut panel = Panel::default();
        panel.apply(&TelemetryEvent::Height(300));
        panel.apply(&state(DeskState::Unhomed));
        assert_eq!(panel.height_text(), HEIGHT_SENTINEL);
        assert_eq!(panel.progress(), 0);
    }

    #[test]
    fn unhomed_keeps_sentinel_for_later_heights() {
        let mut panel = Panel::default();
        panel.apply(&state(DeskState::Unhomed));
        assert!(!panel.apply(&TelemetryEvent::Height(300)));
        assert_eq!(panel.height_text(), HEIGHT_SENTINEL);
        assert_eq!(panel.progress(), 0);

        panel.apply(&state(DeskState::Home));
        panel.apply(&TelemetryEvent::Height(620));
        assert_eq!(panel.height_text(), "620 mm");
    }

    #[test]
    fn ignored_lines_change_nothing() {
        let mut panel = Panel::default();
        panel.apply(&TelemetryEvent::Height(700));
        let before = panel.clone();
        assert!(!panel.apply(&TelemetryEvent::ignored("banana")));
        assert_eq!(panel, before);
    }

    #[test]
    fn link_events_toggle_connectivity_only() {
        let mut panel = Panel::default();
        assert!(panel.observe(LinkEvent::Connected));
        panel.observe(LinkEvent::Telemetry(TelemetryEvent::Height(700)));
        assert!(panel.observe(LinkEvent::Fault(ErrorKind::BrokenPipe)));
        assert!(!panel.is_connected());
        assert_eq!(panel.height_text(), "700 mm");
        assert!(!panel.observe(LinkEvent::Disconnected));
    }

    #[test]
    fn slider_truncates_and_rejects_out_of_range() {
        let config = PanelConfig::default();
        assert_eq!(config.slider_command(733.9), Ok(Command::SetHeight(733)));
        assert_eq!(config.slider_command(-1.0), Err(Error::HeightOutOfRange));
        assert_eq!(config.slider_command(1200.5), Err(Error::HeightOutOfRange));
        assert_eq!(config.slider_command(f64::NAN), Err(Error::HeightOutOfRange));
    }

    #[test]
    fn renders_one_line() {
        let mut panel = Panel::default();
        panel.observe(LinkEvent::Connected);
        panel.apply(&state(DeskState::Idle));
        panel.apply(&TelemetryEvent::Height(600));
        assert_eq!(
            std::format!("{panel}"),
            "[online] idle | 600 mm |##########----------|"
        );
    }
}
