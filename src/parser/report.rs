//! Analyzer report parser.
//!
//! The analyzer prints a sectioned plain-text report on stdout. This module
//! is a single-pass, section-dispatched scanner: a header line selects the
//! active section handler and every following line is fed to it until the
//! next header. Unknown sections are skipped, never fatal, and no values are
//! synthesized for sections the analyzer did not emit.
//!
//! Fidelity rule: numbers are carried through exactly as printed. Tolerant
//! parsing means NaN, infinities and unparsable cells collapse to zero
//! defaults instead of aborting the parse; it never means recomputing a
//! value the analyzer already printed.

use once_cell::sync::Lazy;
use regex::Regex;

use super::report_models::*;

static GROUP_BY_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Group By ([A-Za-z0-9_-]+):$").unwrap());

/// The active section while scanning.
#[derive(Debug, Clone, PartialEq)]
enum Section {
    None,
    General,
    TopN(usize),
    TimeSeries,
    GroupBy(String),
    Gaps,
    ThreadStats,
    ApiErrors,
    ApiExceptions,
    SqlExceptions,
    LongestFilters,
    MostExecutedFilters,
    FiltersPerTransaction,
    TopFiltersPerTransaction,
    FilterLevelDepth,
    Abbreviations,
    FileMetadata,
    LoggingActivity,
    QueuedCalls,
    Unknown,
}

pub struct ReportParser;

impl ReportParser {
    /// Parse the full stdout of one analyzer run. Parsing the same report
    /// twice yields equal results.
    pub fn parse(stdout: &str) -> ParseResult {
        let mut result = ParseResult::default();
        let mut section = Section::None;

        for line in stdout.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || is_separator(trimmed) {
                continue;
            }

            if let Some(next) = match_header(trimmed) {
                if next == Section::Unknown {
                    tracing::debug!(header = trimmed, "skipping unknown report section");
                }
                section = next;
                continue;
            }

            match &section {
                Section::None | Section::Unknown => {}
                Section::General => general_line(&mut result.general, trimmed),
                Section::TopN(idx) => {
                    if let Some(entry) = top_n_row(trimmed) {
                        match idx {
                            0 => result.top_api.push(entry),
                            1 => result.top_sql.push(entry),
                            2 => result.top_fltr.push(entry),
                            _ => result.top_escl.push(entry),
                        }
                    }
                }
                Section::TimeSeries => {
                    if let Some(point) = time_series_row(trimmed) {
                        result.time_series.push(point);
                    }
                }
                Section::GroupBy(dimension) => {
                    group_by_row(&mut result.group_by, dimension, trimmed)
                }
                Section::Gaps => gap_row(&mut result.gaps, trimmed),
                Section::ThreadStats => {
                    if let Some(stat) = thread_row(trimmed) {
                        result.thread_stats.push(stat);
                    }
                }
                Section::ApiErrors => {
                    if let Some(err) = api_error_row(trimmed) {
                        result.exceptions.api_errors.push(err);
                    }
                }
                Section::ApiExceptions => {
                    if let Some(exc) = exception_row(trimmed, false) {
                        result.exceptions.api_exceptions.push(exc);
                    }
                }
                Section::SqlExceptions => {
                    if let Some(exc) = exception_row(trimmed, true) {
                        result.exceptions.sql_exceptions.push(exc);
                    }
                }
                Section::LongestFilters => {
                    if let Some(t) = filter_timing_row(trimmed) {
                        result.filter_complexity.longest_running.push(t);
                    }
                }
                Section::MostExecutedFilters => {
                    if let Some(e) = filter_execution_row(trimmed) {
                        result.filter_complexity.most_executed.push(e);
                    }
                }
                Section::FiltersPerTransaction => {
                    if let Some(c) = transaction_count_row(trimmed) {
                        result.filter_complexity.per_transaction_counts.push(c);
                    }
                }
                Section::TopFiltersPerTransaction => {
                    if let Some(t) = transaction_top_row(trimmed) {
                        result.filter_complexity.per_transaction_top.push(t);
                    }
                }
                Section::FilterLevelDepth => {
                    if let Some(row) = level_depth_row(trimmed) {
                        result.filter_complexity.level_depth.push(row);
                    }
                }
                Section::Abbreviations => {
                    if let Some(entry) = abbreviation_row(trimmed) {
                        result.api_legend.push(entry);
                    }
                }
                Section::FileMetadata => {
                    if let Some(meta) = file_metadata_row(trimmed) {
                        result.file_metadata.push(meta);
                    }
                }
                Section::LoggingActivity => {
                    if let Some(activity) = logging_activity_row(trimmed) {
                        result.logging_activity.push(activity);
                    }
                }
                Section::QueuedCalls => {
                    if let Some(entry) = top_n_row(trimmed) {
                        result.queued_calls.push(entry);
                    }
                }
            }
        }

        result
    }
}

fn is_separator(line: &str) -> bool {
    line.chars().all(|c| c == '=' || c == '-' || c == '*')
}

fn match_header(line: &str) -> Option<Section> {
    if let Some(cap) = GROUP_BY_HEADER.captures(line) {
        return Some(Section::GroupBy(cap[1].to_string()));
    }
    let section = match line {
        "General Statistics:" => Section::General,
        "Top API Calls:" => Section::TopN(0),
        "Top SQL Statements:" => Section::TopN(1),
        "Top Filters:" => Section::TopN(2),
        "Top Escalations:" => Section::TopN(3),
        "Time Series:" => Section::TimeSeries,
        "Gap Analysis:" => Section::Gaps,
        "Thread Statistics:" => Section::ThreadStats,
        "API Errors:" => Section::ApiErrors,
        "API Exceptions:" => Section::ApiExceptions,
        "SQL Exceptions:" => Section::SqlExceptions,
        "Longest Running Filters:" => Section::LongestFilters,
        "Most Executed Filters:" => Section::MostExecutedFilters,
        "Filters Per Transaction:" => Section::FiltersPerTransaction,
        "Top Filters Per Transaction:" => Section::TopFiltersPerTransaction,
        "Filter Level Depth:" => Section::FilterLevelDepth,
        "API Abbreviations:" => Section::Abbreviations,
        "File Metadata:" => Section::FileMetadata,
        "Logging Activity:" => Section::LoggingActivity,
        "Queued API Calls:" => Section::QueuedCalls,
        other => {
            // A bare `Word Word:` line opens a section we do not know.
            if other.ends_with(':') && !other.contains('|') {
                Section::Unknown
            } else {
                return None;
            }
        }
    };
    Some(section)
}

// ── Tolerant cell parsing ──

fn num_i64(cell: &str) -> i64 {
    let cleaned = cell.trim().replace(',', "");
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => v as i64,
        _ => 0,
    }
}

fn num_f64(cell: &str) -> f64 {
    match cell.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

fn num_u64(cell: &str) -> u64 {
    num_i64(cell).max(0) as u64
}

fn num_u32(cell: &str) -> u32 {
    num_i64(cell).clamp(0, u32::MAX as i64) as u32
}

fn cell_bool(cell: &str) -> bool {
    matches!(cell.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "ok" | "y" | "1")
}

fn cells(line: &str) -> Option<Vec<&str>> {
    if !line.contains('|') {
        return None;
    }
    Some(line.split('|').map(str::trim).collect())
}

/// Table rows start with a numeric cell; the column-caption row does not.
fn is_data_row(first_cell: &str) -> bool {
    first_cell.chars().next().is_some_and(|c| c.is_ascii_digit())
}

// ── Section handlers ──

fn general_line(general: &mut GeneralStatistics, line: &str) {
    let Some((key, value)) = line.split_once(':') else { return };
    let value = value.trim();
    match key.trim() {
        "Total lines" => general.total_lines = num_i64(value),
        "API calls" => general.api_count = num_i64(value),
        "SQL statements" => general.sql_count = num_i64(value),
        "Filter operations" => general.fltr_count = num_i64(value),
        "Escalations" => general.escl_count = num_i64(value),
        "Unique users" => general.unique_users = num_i64(value),
        "Unique forms" => general.unique_forms = num_i64(value),
        "Unique tables" => general.unique_tables = num_i64(value),
        "Log start" => general.log_start = value.to_string(),
        "Log end" => general.log_end = value.to_string(),
        "Duration" => general.duration = value.to_string(),
        "Health score" => general.health_score = Some(num_f64(value)),
        _ => {}
    }
}

fn top_n_row(line: &str) -> Option<TopNEntry> {
    let cells = cells(line)?;
    if cells.len() < 14 || !is_data_row(cells[0]) {
        return None;
    }
    Some(TopNEntry {
        rank: num_u32(cells[0]),
        line_number: num_u64(cells[1]),
        file_number: num_u32(cells[2]),
        timestamp: cells[3].to_string(),
        trace_id: cells[4].to_string(),
        rpc_id: cells[5].to_string(),
        queue: cells[6].to_string(),
        identifier: cells[7].to_string(),
        form: cells[8].to_string(),
        user: cells[9].to_string(),
        duration_ms: num_i64(cells[10]),
        queue_time_ms: num_i64(cells[11]),
        success: cell_bool(cells[12]),
        details: cells[13..].join(" | "),
    })
}

fn time_series_row(line: &str) -> Option<TimeSeriesPoint> {
    let cells = cells(line)?;
    if cells.len() < 7 || cells[0].eq_ignore_ascii_case("bucket") {
        return None;
    }
    Some(TimeSeriesPoint {
        bucket: cells[0].to_string(),
        api_count: num_i64(cells[1]),
        sql_count: num_i64(cells[2]),
        fltr_count: num_i64(cells[3]),
        escl_count: num_i64(cells[4]),
        avg_duration_ms: num_f64(cells[5]),
        error_count: num_i64(cells[6]),
    })
}

fn aggregate_row(cells: &[&str]) -> AggregateRow {
    AggregateRow {
        group_value: cells[0].to_string(),
        ok: num_i64(cells[1]),
        fail: num_i64(cells[2]),
        total: num_i64(cells[3]),
        min_ms: num_i64(cells[4]),
        max_ms: num_i64(cells[5]),
        avg_ms: num_f64(cells[6]),
        sum_ms: num_i64(cells[7]),
    }
}

fn group_by_row(tables: &mut Vec<GroupByTable>, dimension: &str, line: &str) {
    let Some(cells) = cells(line) else { return };
    if cells.len() < 8 || cells[0].eq_ignore_ascii_case("value") {
        return;
    }

    if tables.last().map(|t| t.dimension.as_str()) != Some(dimension) {
        tables.push(GroupByTable { dimension: dimension.to_string(), ..Default::default() });
    }
    let table = tables.last_mut().expect("just pushed");

    let row = aggregate_row(&cells);
    match cells[0] {
        "Subtotal" => table.subtotal = Some(row),
        "Total" => table.grand_total = Some(row),
        _ => table.rows.push(row),
    }
}

fn gap_row(gaps: &mut GapAnalysis, line: &str) {
    let Some(cells) = cells(line) else { return };
    if cells.len() < 6 {
        return;
    }
    let entry = GapEntry {
        gap_ms: num_i64(cells[1]),
        line_number: num_u64(cells[2]),
        trace_id: cells[3].to_string(),
        timestamp: cells[4].to_string(),
        details: cells[5..].join(" | "),
    };
    match cells[0].to_ascii_lowercase().as_str() {
        "line" => gaps.line_gaps.push(entry),
        "thread" => gaps.thread_gaps.push(entry),
        _ => {}
    }
}

fn thread_row(line: &str) -> Option<ThreadStat> {
    let cells = cells(line)?;
    if cells.len() < 9 || cells[0].eq_ignore_ascii_case("queue") {
        return None;
    }
    Some(ThreadStat {
        queue: cells[0].to_string(),
        thread_id: cells[1].to_string(),
        first_time: cells[2].to_string(),
        last_time: cells[3].to_string(),
        count: num_i64(cells[4]),
        queue_count: num_i64(cells[5]),
        queue_time_ms: num_i64(cells[6]),
        total_time_ms: num_i64(cells[7]),
        busy_pct: num_f64(cells[8]).clamp(0.0, 100.0),
    })
}

fn api_error_row(line: &str) -> Option<ApiErrorEntry> {
    let cells = cells(line)?;
    if cells.len() < 8 || !is_data_row(cells[0]) {
        return None;
    }
    Some(ApiErrorEntry {
        end_line: num_u64(cells[0]),
        trace_id: cells[1].to_string(),
        queue: cells[2].to_string(),
        api_code: cells[3].to_string(),
        form: cells[4].to_string(),
        user: cells[5].to_string(),
        start_time: cells[6].to_string(),
        error_text: cells[7..].join(" | "),
    })
}

fn exception_row(line: &str, with_statement: bool) -> Option<ExceptionEntry> {
    let cells = cells(line)?;
    let min = if with_statement { 5 } else { 4 };
    if cells.len() < min || !is_data_row(cells[0]) {
        return None;
    }
    Some(ExceptionEntry {
        line_number: num_u64(cells[0]),
        trace_id: cells[1].to_string(),
        exception_type: cells[2].to_string(),
        message: cells[3].to_string(),
        statement: if with_statement { cells[4..].join(" | ") } else { String::new() },
    })
}

fn filter_timing_row(line: &str) -> Option<FilterTiming> {
    let cells = cells(line)?;
    if cells.len() < 4 || cells[0].eq_ignore_ascii_case("filter") {
        return None;
    }
    Some(FilterTiming {
        filter_name: cells[0].to_string(),
        form: cells[1].to_string(),
        duration_ms: num_i64(cells[2]),
        line_number: num_u64(cells[3]),
    })
}

fn filter_execution_row(line: &str) -> Option<FilterExecution> {
    let cells = cells(line)?;
    if cells.len() < 3 || cells[0].eq_ignore_ascii_case("filter") {
        return None;
    }
    Some(FilterExecution {
        filter_name: cells[0].to_string(),
        executions: num_i64(cells[1]),
        total_time_ms: num_i64(cells[2]),
    })
}

fn transaction_count_row(line: &str) -> Option<TransactionFilterCount> {
    let cells = cells(line)?;
    if cells.len() < 4 || cells[0].eq_ignore_ascii_case("transaction") {
        return None;
    }
    Some(TransactionFilterCount {
        trace_id: cells[0].to_string(),
        filter_count: num_i64(cells[1]),
        duration_ms: num_i64(cells[2]),
        // Known analyzer quirk: NaN for zero-duration transactions.
        filters_per_sec: num_f64(cells[3]),
    })
}

fn transaction_top_row(line: &str) -> Option<TransactionTopFilter> {
    let cells = cells(line)?;
    if cells.len() < 3 || cells[0].eq_ignore_ascii_case("transaction") {
        return None;
    }
    Some(TransactionTopFilter {
        trace_id: cells[0].to_string(),
        filter_name: cells[1].to_string(),
        executions: num_i64(cells[2]),
    })
}

fn level_depth_row(line: &str) -> Option<FilterLevelRow> {
    let cells = cells(line)?;
    if cells.len() < 2 || !is_data_row(cells[0]) {
        return None;
    }
    Some(FilterLevelRow { level: num_u32(cells[0]), count: num_i64(cells[1]) })
}

fn abbreviation_row(line: &str) -> Option<AbbreviationEntry> {
    let (abbrev, full) = line.split_once('=')?;
    let abbrev = abbrev.trim();
    let full = full.trim();
    if abbrev.is_empty() || full.is_empty() {
        return None;
    }
    Some(AbbreviationEntry { abbrev: abbrev.to_string(), full_name: full.to_string() })
}

fn file_metadata_row(line: &str) -> Option<FileMetadataEntry> {
    let cells = cells(line)?;
    if cells.len() < 6 || !is_data_row(cells[0]) {
        return None;
    }
    Some(FileMetadataEntry {
        file_number: num_u32(cells[0]),
        name: cells[1].to_string(),
        start: cells[2].to_string(),
        end: cells[3].to_string(),
        duration: cells[4].to_string(),
        entry_count: num_i64(cells[5]),
    })
}

fn logging_activity_row(line: &str) -> Option<LoggingActivityEntry> {
    let cells = cells(line)?;
    if cells.len() < 5 || cells[0].eq_ignore_ascii_case("type") {
        return None;
    }
    Some(LoggingActivityEntry {
        log_type: cells[0].to_string(),
        first: cells[1].to_string(),
        last: cells[2].to_string(),
        duration: cells[3].to_string(),
        entry_count: num_i64(cells[4]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
===========================================================
ARLogAnalyzer Report
===========================================================

General Statistics:
  Total lines: 1234
  API calls: 800
  SQL statements: 300
  Filter operations: 100
  Escalations: 34
  Unique users: 12
  Unique forms: 9
  Unique tables: 17
  Log start: Mon Nov 24 2025 14:00:00.0000
  Log end: Mon Nov 24 2025 15:00:00.0000
  Duration: 01:00:00
  Health score: 87.5

Top API Calls:
  Rank | Line | File | Timestamp | TrID | RPC | Queue | Identifier | Form | User | Duration | QueueTime | Success | Details
  1 | 120 | 1 | Mon Nov 24 2025 14:46:58.5050 | tr-1 | 15447 | Fast | GE | HPD:Help Desk | Demo | 1532 | 12 | true | slowest call
  2 | 240 | 1 | Mon Nov 24 2025 14:47:01.0000 | tr-2 | 15448 | Fast | SE | HPD:Help Desk | Demo | 841 | 3 | false | ARERR 302

Time Series:
  Bucket | API | SQL | FLTR | ESCL | AvgDuration | Errors
  2025-11-24 14:46 | 10 | 4 | 2 | 0 | 55.25 | 1
  2025-11-24 14:47 | 9 | 5 | 1 | 1 | NaN | 0

Group By form:
  Value | OK | Fail | Total | Min | Max | Avg | Sum
  HPD:Help Desk | 40 | 2 | 42 | 1 | 1532 | 120.5 | 5061
  Subtotal | 40 | 2 | 42 | 1 | 1532 | 120.5 | 5061
  Total | 40 | 2 | 42 | 1 | 1532 | 120.5 | 5061

Gap Analysis:
  Kind | GapMs | Line | TrID | Timestamp | Details
  line | 5400 | 98 | tr-7 | Mon Nov 24 2025 14:49:00.0000 | no activity
  thread | 2100 | 99 | tr-8 | Mon Nov 24 2025 14:49:30.0000 | thread 532 idle

Thread Statistics:
  Queue | Thread | First | Last | Count | QueueCount | QueueTime | TotalTime | Busy%
  Fast | 0000000532 | 14:00:01 | 14:59:58 | 812 | 14 | 220 | 95012 | 44.1

Filters Per Transaction:
  Transaction | Filters | Duration | FiltersPerSec
  tr-1 | 42 | 0 | NaN
  tr-2 | 10 | 1000 | 10.0

API Abbreviations:
  GE = Get Entry
  SE = Set Entry

Mystery Section:
  whatever | 1 | 2

Queued API Calls:
  Rank | Line | File | Timestamp | TrID | RPC | Queue | Identifier | Form | User | Duration | QueueTime | Success | Details
  1 | 301 | 1 | Mon Nov 24 2025 14:50:00.0000 | tr-9 | 15500 | List | GLEWF | HPD:Help Desk | Demo | 93 | 1204 | true | queued
"#;

    #[test]
    fn parses_sections_independently() {
        let result = ReportParser::parse(SAMPLE);

        assert_eq!(result.general.total_lines, 1234);
        assert_eq!(result.general.api_count, 800);
        assert_eq!(result.general.health_score, Some(87.5));
        assert_eq!(result.general.duration, "01:00:00");

        assert_eq!(result.top_api.len(), 2);
        assert_eq!(result.top_api[0].rank, 1);
        assert_eq!(result.top_api[0].duration_ms, 1532);
        assert_eq!(result.top_api[0].identifier, "GE");
        assert!(!result.top_api[1].success);

        assert_eq!(result.time_series.len(), 2);
        // NaN normalizes to zero, never aborts the row.
        assert_eq!(result.time_series[1].avg_duration_ms, 0.0);

        let forms = &result.group_by[0];
        assert_eq!(forms.dimension, "form");
        assert_eq!(forms.rows.len(), 1);
        assert_eq!(forms.subtotal.as_ref().unwrap().total, 42);
        assert_eq!(forms.grand_total.as_ref().unwrap().sum_ms, 5061);

        assert_eq!(result.gaps.line_gaps.len(), 1);
        assert_eq!(result.gaps.thread_gaps.len(), 1);
        assert_eq!(result.gaps.line_gaps[0].gap_ms, 5400);

        assert_eq!(result.thread_stats[0].busy_pct, 44.1);

        assert_eq!(result.filter_complexity.per_transaction_counts[0].filters_per_sec, 0.0);
        assert_eq!(result.filter_complexity.per_transaction_counts[1].filters_per_sec, 10.0);

        assert_eq!(result.api_legend.len(), 2);
        assert_eq!(result.api_legend[0].abbrev, "GE");

        assert_eq!(result.queued_calls.len(), 1);
        assert_eq!(result.queued_calls[0].queue_time_ms, 1204);
    }

    #[test]
    fn parse_is_idempotent() {
        let a = ReportParser::parse(SAMPLE);
        let b = ReportParser::parse(SAMPLE);
        assert_eq!(a, b);
    }

    #[test]
    fn missing_sections_stay_default() {
        let result = ReportParser::parse("General Statistics:\n  Total lines: 5\n");
        assert_eq!(result.general.total_lines, 5);
        assert!(result.top_api.is_empty());
        assert!(result.general.health_score.is_none());
        assert!(result.file_metadata.is_empty());
    }

    #[test]
    fn unknown_sections_are_ignored() {
        let result = ReportParser::parse("Mystery Block:\n  1 | 2 | 3\nGeneral Statistics:\n  API calls: 7\n");
        assert_eq!(result.general.api_count, 7);
        assert!(result.top_api.is_empty());
    }

    #[test]
    fn empty_report_parses_to_default() {
        assert_eq!(ReportParser::parse(""), ParseResult::default());
    }
}
