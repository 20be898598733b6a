//! 📊 summary.rs: "So... how did it go?" (every operator, after every ctrl-c)
//!
//! Workers each keep a tally of the jobs they ran. At shutdown the tallies get merged,
//! the dispatcher adds how many files it handed out, and the whole thing is printed
//! in a table so comfy it has lumbar support.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};

use crate::jobs::JobReport;

/// 🔢 Thousands separators for the tally column. A folder that ate 1,204,331 records
/// deserves to have that number read at a glance.
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let lead = digits.len() % 3;
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.chars().enumerate() {
        if i != 0 && (i + 3 - lead) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}

/// ⏱️ Worker busy time as `MM:SS`, growing an hours column once the pool has been
/// chewing on files for an hour or more.
fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, secs / 60 % 60, secs % 60);
    match hours {
        0 => format!("{minutes:02}:{seconds:02}"),
        _ => format!("{hours:02}:{minutes:02}:{seconds:02}"),
    }
}

/// 📦 Totals for one run of the pipeline (or one worker's share of it).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestionSummary {
    /// 📬 files that passed the filter and were queued for a worker
    pub files_dispatched: u64,
    /// ✅ jobs that read their document to the end
    pub files_processed: u64,
    /// 💀 jobs that could not (unreadable, malformed, truncated, or panicked)
    pub files_failed: u64,
    pub records_stored: u64,
    pub records_failed: u64,
    pub products_skipped: u64,
    /// ⏱️ sum of per-job wall time. bigger than the real elapsed time when workers overlap.
    pub busy_time: Duration,
}

impl IngestionSummary {
    /// 📝 Folds one finished job into the tally.
    pub fn record(&mut self, report: &JobReport) {
        if report.is_failed() {
            self.files_failed += 1;
        } else {
            self.files_processed += 1;
        }
        self.records_stored += report.records_stored as u64;
        self.records_failed += report.records_failed as u64;
        self.products_skipped += report.products_skipped as u64;
        self.busy_time += report.elapsed;
    }

    /// 🔗 Adds another tally into this one.
    pub fn merge(&mut self, other: &IngestionSummary) {
        self.files_dispatched += other.files_dispatched;
        self.files_processed += other.files_processed;
        self.files_failed += other.files_failed;
        self.records_stored += other.records_stored;
        self.records_failed += other.records_failed;
        self.products_skipped += other.products_skipped;
        self.busy_time += other.busy_time;
    }

    /// 🍽️ Renders the tally as a two-column table.
    pub fn render_table(&self) -> String {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);

        let rows = [
            ("files dispatched", format_number(self.files_dispatched)),
            ("files processed", format_number(self.files_processed)),
            ("files failed", format_number(self.files_failed)),
            ("records stored", format_number(self.records_stored)),
            ("records failed", format_number(self.records_failed)),
            ("products skipped", format_number(self.products_skipped)),
            ("busy time", format_duration(self.busy_time)),
        ];
        for (label, value) in rows {
            table.add_row(vec![
                Cell::new(label),
                Cell::new(value).set_alignment(CellAlignment::Right),
            ]);
        }
        table.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobOutcome;
    use std::path::PathBuf;

    fn report(outcome: JobOutcome, stored: usize, failed: usize, skipped: usize) -> JobReport {
        JobReport {
            path: PathBuf::from("x.xml"),
            outcome,
            records_stored: stored,
            records_failed: failed,
            products_skipped: skipped,
            elapsed: Duration::from_secs(2),
        }
    }

    #[test]
    fn the_one_where_commas_show_up_where_they_belong() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1,000");
        assert_eq!(format_number(123_456), "123,456");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn the_one_where_durations_grow_an_hours_column_only_when_needed() {
        assert_eq!(format_duration(Duration::from_secs(65)), "01:05");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "01:02:05");
    }

    #[test]
    fn the_one_where_reports_and_tallies_add_up() {
        let mut worker_a = IngestionSummary::default();
        worker_a.record(&report(JobOutcome::Completed, 3, 1, 2));
        let mut worker_b = IngestionSummary::default();
        worker_b.record(&report(
            JobOutcome::Failed {
                cause: "broken".into(),
            },
            1,
            0,
            0,
        ));

        let mut total = IngestionSummary {
            files_dispatched: 2,
            ..Default::default()
        };
        total.merge(&worker_a);
        total.merge(&worker_b);

        assert_eq!(total.files_dispatched, 2);
        assert_eq!(total.files_processed, 1);
        assert_eq!(total.files_failed, 1);
        assert_eq!(total.records_stored, 4);
        assert_eq!(total.records_failed, 1);
        assert_eq!(total.products_skipped, 2);
        assert_eq!(total.busy_time, Duration::from_secs(4));
    }

    #[test]
    fn the_one_where_the_table_mentions_every_row() {
        let rendered = IngestionSummary {
            records_stored: 12_345,
            ..Default::default()
        }
        .render_table();
        assert!(rendered.contains("records stored"));
        assert!(rendered.contains("12,345"));
        assert!(rendered.contains("products skipped"));
    }
}
