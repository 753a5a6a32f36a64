use owo_colors::{OwoColorize, Style as OwoStyle};

use crate::state::ConnectionState;

/// Applies colour and style to terminal text.
#[derive(Debug)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn heading<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().cyan())
    }

    pub(crate) fn success<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().green())
    }

    pub(crate) fn warning<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().yellow())
    }

    pub(crate) fn muted<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().dimmed())
    }

    pub(crate) fn value<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold())
    }

    /// Colours a connection state by how healthy the link is.
    pub(crate) fn state(&self, state: ConnectionState) -> String {
        let label = state.to_string();
        match state {
            ConnectionState::Streaming => self.success(label),
            ConnectionState::Disconnected => self.warning(label),
            ConnectionState::Scanning
            | ConnectionState::Connecting
            | ConnectionState::ServiceDiscovery
            | ConnectionState::Disconnecting => self.muted(label),
        }
    }

    fn paint(&self, text: &str, style: OwoStyle) -> String {
        if self.use_colour {
            format!("{}", text.style(style))
        } else {
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn plain_painter_renders_state_names() {
        let painter = Painter::new(false);
        let rendered: Vec<String> = ConnectionState::iter()
            .map(|state| painter.state(state))
            .collect();
        assert_eq!(
            vec![
                "disconnected",
                "scanning",
                "connecting",
                "service_discovery",
                "streaming",
                "disconnecting",
            ],
            rendered
        );
    }

    #[test]
    fn coloured_painter_wraps_text_in_escapes() {
        let painter = Painter::new(true);
        let styled = painter.heading("Discovered");
        assert_ne!("Discovered", styled);
        assert!(styled.contains("Discovered"));
    }
}
