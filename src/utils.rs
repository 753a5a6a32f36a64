/// Formats an optional RSSI for terminal output.
pub(crate) fn format_rssi(rssi: Option<i16>) -> String {
    match rssi {
        Some(value) => format!("{value} dBm"),
        None => "-".to_string(),
    }
}

/// Formats an optional text field, using `-` when absent.
pub(crate) fn format_optional(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

/// Formats sample values separated by spaces.
pub(crate) fn format_values(values: &[u16]) -> String {
    values
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(None, "-")]
    #[case(Some(-43), "-43 dBm")]
    fn format_rssi_renders_units(#[case] rssi: Option<i16>, #[case] expected: &str) {
        assert_eq!(expected, format_rssi(rssi));
    }

    #[test]
    fn format_values_joins_with_spaces() {
        assert_eq!("72 74 73", format_values(&[72, 74, 73]));
        assert_eq!("", format_values(&[]));
    }
}
