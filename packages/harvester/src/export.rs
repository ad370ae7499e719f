//! Export of the result table, the failure report and the run summary.
//!
//! Every file is written to a hidden temp file in the target directory,
//! synced, and renamed into place.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::harvester::CrawlReport;
use crate::ledger::WardSummary;
use crate::types::PollingUnitResult;

/// Result table file name inside the output directory.
pub const RESULTS_FILE: &str = "results.csv";

/// Failure report file name inside the output directory.
pub const FAILURE_REPORT_FILE: &str = "failures.txt";

/// Run summary file name inside the output directory.
pub const SUMMARY_FILE: &str = "summary.json";

/// Column order of the result table.
pub const RESULT_COLUMNS: [&str; 12] = [
    "State",
    "LGA",
    "Ward",
    "PollingUnit",
    "FilePath",
    "NumberOfVoters",
    "AccreditedVoters",
    "SpoiledBallots",
    "RejectedBallots",
    "ValidVotes",
    "PartyResults",
    "PresidingOfficer",
];

/// Paths of the files written by [`export_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub results: PathBuf,
    pub failures: PathBuf,
    pub summary: PathBuf,
}

/// Write all three exports into `output_dir`.
pub fn export_all(report: &CrawlReport, output_dir: &Path) -> Result<ExportPaths> {
    let paths = ExportPaths {
        results: output_dir.join(RESULTS_FILE),
        failures: output_dir.join(FAILURE_REPORT_FILE),
        summary: output_dir.join(SUMMARY_FILE),
    };
    write_results_csv(&report.rows, &paths.results)?;
    write_failure_report(&report.ledger, &paths.failures)?;
    write_summary_json(report, &paths.summary)?;
    Ok(paths)
}

/// Write the result table as CSV.
///
/// Absent numbers are empty cells. Party results are `CODE:votes` pairs
/// joined by `;`, in code order.
pub fn write_results_csv(rows: &[PollingUnitResult], path: &Path) -> Result<()> {
    write_atomic(path, |w| {
        let header: Vec<String> = RESULT_COLUMNS.iter().map(|c| (*c).to_string()).collect();
        write_row(&mut *w, &header)?;
        for row in rows {
            write_row(&mut *w, &result_cells(row))?;
        }
        Ok(())
    })
}

/// Write one human-readable line per ward.
pub fn write_failure_report(ledger: &[WardSummary], path: &Path) -> Result<()> {
    write_atomic(path, |w| {
        for entry in ledger {
            writeln!(w, "{}", failure_line(entry))?;
        }
        Ok(())
    })
}

/// Write the run summary (totals, ledger, timestamps) as pretty JSON.
pub fn write_summary_json(report: &CrawlReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    write_atomic(path, |w| writeln!(w, "{json}"))
}

/// `State -> LGA -> Ward: N non-document files, M unreadable documents, K failed downloads`
#[must_use]
pub fn failure_line(entry: &WardSummary) -> String {
    format!(
        "{}: {} non-document files, {} unreadable documents, {} failed downloads",
        entry.ward,
        entry.counts.non_document,
        entry.counts.unreadable,
        entry.counts.download_failures
    )
}

/// `APC:120;LP:98`
#[must_use]
pub fn format_party_results(row: &PollingUnitResult) -> String {
    row.fields
        .party_results
        .iter()
        .map(|(code, votes)| format!("{code}:{votes}"))
        .collect::<Vec<_>>()
        .join(";")
}

fn result_cells(row: &PollingUnitResult) -> Vec<String> {
    let number = |value: Option<u64>| value.map(|v| v.to_string()).unwrap_or_default();
    let fields = &row.fields;
    vec![
        row.state.clone(),
        row.lga.clone(),
        row.ward.clone(),
        row.polling_unit.clone(),
        row.file_path.display().to_string(),
        number(fields.number_of_voters),
        number(fields.accredited_voters),
        number(fields.spoiled_ballots),
        number(fields.rejected_ballots),
        number(fields.valid_votes),
        format_party_results(row),
        fields.presiding_officer.clone().unwrap_or_default(),
    ]
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn write_row<W: Write>(mut w: W, row: &[String]) -> io::Result<()> {
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            write!(w, ",")?;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{cell}")?;
        }
    }
    writeln!(w)
}

fn write_atomic(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>,
) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_file = dir.join(format!(".{file_name}.tmp"));

    {
        let mut writer = BufWriter::new(File::create(&temp_file)?);
        write(&mut writer)?;
        let file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
        file.sync_all()?;
    }

    #[cfg(target_os = "windows")]
    if path.exists() {
        fs::remove_file(path)?;
    }

    fs::rename(&temp_file, path)?;
    tracing::debug!(path = %path.display(), "wrote export");
    Ok(())
}
