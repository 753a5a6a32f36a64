use std::fmt::{self, Display, Formatter};

use crate::model::Advertisement;
use crate::utils::{format_optional, format_rssi};

use super::painter::Painter;
use super::table::Table;

/// Renders the peripherals found by one scan window.
pub(crate) struct DiscoveredView<'a> {
    advertisements: &'a [Advertisement],
    painter: &'a Painter,
}

impl<'a> DiscoveredView<'a> {
    pub(crate) fn new(advertisements: &'a [Advertisement], painter: &'a Painter) -> Self {
        Self {
            advertisements,
            painter,
        }
    }
}

impl Display for DiscoveredView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.advertisements.is_empty() {
            return write!(f, "{}", self.painter.warning("No sensors found."));
        }

        let mut table = Table::new(["#", "address", "name", "rssi"]);
        for (index, advertisement) in self.advertisements.iter().enumerate() {
            let identity = advertisement.identity();
            table.push_row([
                self.painter.muted((index + 1).to_string()),
                self.painter.value(identity.address()),
                format_optional(identity.display_name()),
                format_rssi(advertisement.rssi()),
            ]);
        }

        write!(
            f,
            "{} {}",
            self.painter.heading("Discovered sensors:"),
            self.painter.muted(format!("({})", self.advertisements.len()))
        )?;
        write!(f, "\n{table}")
    }
}
