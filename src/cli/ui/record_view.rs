use std::fmt::{self, Display, Formatter};

use crate::record::SessionRecord;
use crate::utils::format_optional;

use super::painter::Painter;
use super::table::Table;

/// Renders the persisted session record.
pub(crate) struct SessionRecordView<'a> {
    record: &'a SessionRecord,
    painter: &'a Painter,
}

impl<'a> SessionRecordView<'a> {
    pub(crate) fn new(record: &'a SessionRecord, painter: &'a Painter) -> Self {
        Self { record, painter }
    }

    fn yes_no(&self, flag: bool, highlight: bool) -> String {
        let label = if flag { "yes" } else { "no" };
        if flag && highlight {
            self.painter.warning(label)
        } else {
            self.painter.value(label)
        }
    }
}

impl Display for SessionRecordView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            vec![
                (
                    "last_address",
                    self.painter
                        .value(format_optional(self.record.last_address())),
                ),
                (
                    "last_name",
                    self.painter.value(format_optional(self.record.last_name())),
                ),
                (
                    "last_sample",
                    self.painter
                        .value(self.record.last_known_sample().to_string()),
                ),
                ("stopped", self.yes_no(self.record.is_stopped(), true)),
                (
                    "launched_before",
                    self.yes_no(self.record.has_launched_before(), false),
                ),
            ],
        );

        write!(f, "{}", self.painter.heading("Session record:"))?;
        write!(f, "\n{table}")
    }
}
