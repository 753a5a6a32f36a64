use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tracing::{info, instrument};

use crate::error::{ExportError, SensorLinkError};
use crate::link::SensorLinkHandle;
use crate::model::RecordedSample;

const DATA_TYPE: &str = "samples";
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const DAY_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year][month][day]");
const TIME_OF_DAY_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[hour][minute][second]");

/// Writes samples as delimited text behind a metadata header.
///
/// # Errors
///
/// Returns an error when there is nothing to export, a timestamp cannot be
/// formatted, or the writer fails.
pub fn write_delimited<W: Write>(
    out: &mut W,
    samples: &[RecordedSample],
    exported_at: OffsetDateTime,
) -> Result<(), ExportError> {
    let (first, last) = date_range(samples)?;

    writeln!(out, "Export Date,{}", exported_at.format(TIMESTAMP_FORMAT)?)?;
    writeln!(out, "Data Type,{DATA_TYPE}")?;
    writeln!(
        out,
        "Date Range,{} to {}",
        first.format(DAY_FORMAT)?,
        last.format(DAY_FORMAT)?
    )?;
    writeln!(out, "Number of Records,{}", samples.len())?;
    writeln!(out)?;
    writeln!(out, "Timestamp,Value")?;
    for sample in samples {
        writeln!(
            out,
            "{},{}",
            sample.received_at().format(TIMESTAMP_FORMAT)?,
            sample.value()
        )?;
    }
    Ok(())
}

/// Builds a file name encoding the sample date range and the export time.
///
/// # Errors
///
/// Returns an error when there is nothing to export or a timestamp cannot be formatted.
pub fn export_file_name(
    samples: &[RecordedSample],
    exported_at: OffsetDateTime,
) -> Result<String, ExportError> {
    let (first, last) = date_range(samples)?;
    Ok(format!(
        "{DATA_TYPE}_{}_to_{}_{}.csv",
        first.format(DAY_FORMAT)?,
        last.format(DAY_FORMAT)?,
        exported_at.format(TIME_OF_DAY_FORMAT)?
    ))
}

/// Exports samples to `target`, or to a generated file name inside it when it is a directory.
///
/// # Errors
///
/// Returns an error when there is nothing to export or the file cannot be written.
#[instrument(skip(samples), level = "debug", fields(count = samples.len()))]
pub fn export_to_path(
    target: &Path,
    samples: &[RecordedSample],
    exported_at: OffsetDateTime,
) -> Result<PathBuf, ExportError> {
    let path = if target.is_dir() {
        target.join(export_file_name(samples, exported_at)?)
    } else {
        target.to_path_buf()
    };

    let mut writer = BufWriter::new(File::create(&path)?);
    write_delimited(&mut writer, samples, exported_at)?;
    writer.flush()?;
    info!(path = %path.display(), "exported session samples");
    Ok(path)
}

/// Exports every accepted sample of the link's current or last session.
///
/// # Errors
///
/// Returns an error when the link has stopped, there is nothing to export, or
/// the file cannot be written.
pub async fn export_session(
    link: &SensorLinkHandle,
    target: &Path,
) -> Result<PathBuf, SensorLinkError> {
    let samples = link.session_samples().await?;
    Ok(export_to_path(target, &samples, OffsetDateTime::now_utc())?)
}

fn date_range(
    samples: &[RecordedSample],
) -> Result<(OffsetDateTime, OffsetDateTime), ExportError> {
    let first = samples
        .iter()
        .map(RecordedSample::received_at)
        .min()
        .ok_or(ExportError::NoSamples)?;
    let last = samples
        .iter()
        .map(RecordedSample::received_at)
        .max()
        .ok_or(ExportError::NoSamples)?;
    Ok((first, last))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;
    use time::macros::datetime;

    use super::*;

    fn samples() -> Vec<RecordedSample> {
        vec![
            RecordedSample::new(datetime!(2026-03-01 23:59:58 UTC), 71),
            RecordedSample::new(datetime!(2026-03-02 00:00:01 UTC), 74),
        ]
    }

    #[test]
    fn delimited_output_has_header_then_rows() {
        let mut out = Vec::new();
        write_delimited(&mut out, &samples(), datetime!(2026-03-02 08:15:00 UTC))
            .expect("export should succeed");

        let rendered = String::from_utf8(out).expect("export is utf-8");
        insta::assert_snapshot!(rendered.trim_end(), @r"
        Export Date,2026-03-02 08:15:00
        Data Type,samples
        Date Range,20260301 to 20260302
        Number of Records,2

        Timestamp,Value
        2026-03-01 23:59:58,71
        2026-03-02 00:00:01,74
        ");
    }

    #[test]
    fn file_name_encodes_range_and_export_time() {
        let name = export_file_name(&samples(), datetime!(2026-03-02 08:15:00 UTC))
            .expect("name should format");
        assert_eq!("samples_20260301_to_20260302_081500.csv", name);
    }

    #[test]
    fn empty_sample_set_is_rejected() {
        let mut out = Vec::new();
        assert_matches!(
            write_delimited(&mut out, &[], OffsetDateTime::UNIX_EPOCH),
            Err(ExportError::NoSamples)
        );
        assert!(out.is_empty());
    }

    #[test]
    fn directory_target_gets_generated_name() {
        let dir = tempdir().expect("temp dir should be created");
        let path = export_to_path(dir.path(), &samples(), datetime!(2026-03-02 08:15:00 UTC))
            .expect("export should succeed");

        assert_eq!(
            dir.path().join("samples_20260301_to_20260302_081500.csv"),
            path
        );
        let contents = std::fs::read_to_string(path).expect("export should be readable");
        assert!(contents.ends_with("2026-03-02 00:00:01,74\n"));
    }
}
