//! Native AR Server log line parser.
//!
//! Reconstructs one angle-bracket-delimited record into a typed [`LogEntry`].
//! The prefix is positional: a type token, six labeled brackets, a bracketed
//! UTC timestamp comment, then a type-specific payload:
//!
//! ```text
//! <TYPE> <TrID: ..> <TID: ..> <RPC ID: ..> <Queue: ..> <Client-RPC: ..>
//!        <USER: ..> <Overlay-Group: ..> /* Mon Nov 24 2025 14:46:58.5050 */ PAYLOAD
//! ```
//!
//! Lines missing the timestamp comment or any required bracket are rejected
//! as `malformed_line`; a leading bracket that is not one of the four record
//! types is `unknown_type`. A rejected line is never silently coerced.

use chrono::{DateTime, TimeZone, Utc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{LogEntry, LogType};
use crate::utils::{normalize_user, ApiError};

/// Labels of the six brackets following the type token, in order.
const PREFIX_LABELS: [&str; 6] = ["TrID", "TID", "RPC ID", "Queue", "Client-RPC", "USER"];

/// Parse one raw line into a typed entry.
///
/// `tenant_id`, `job_id`, `line_number`, `timestamp` and `log_type` are always
/// populated on success; `entry_id` is left empty for the OLAP insert to fill.
pub fn parse_line(
    tenant_id: Uuid,
    job_id: Uuid,
    line_number: u64,
    raw: &str,
) -> Result<LogEntry, ApiError> {
    let malformed = || ApiError::MalformedLine { line_number };

    let mut cursor = Cursor::new(raw);
    let type_token = cursor.next_bracket().ok_or_else(malformed)?;
    let log_type = LogType::parse(type_token)
        .ok_or_else(|| ApiError::UnknownType { token: type_token.trim().to_string() })?;

    let mut values = [""; 6];
    for (i, label) in PREFIX_LABELS.iter().enumerate() {
        let content = cursor.next_bracket().ok_or_else(malformed)?;
        values[i] = labeled_value(content, label).ok_or_else(malformed)?;
    }
    // Overlay-Group closes the prefix; its value is not retained.
    let overlay = cursor.next_bracket().ok_or_else(malformed)?;
    labeled_value(overlay, "Overlay-Group").ok_or_else(malformed)?;

    let (timestamp_text, payload) = cursor.timestamp_comment().ok_or_else(malformed)?;
    let timestamp = parse_timestamp(timestamp_text).ok_or_else(malformed)?;

    let mut entry = LogEntry::blank(tenant_id, job_id, line_number, timestamp, log_type);
    entry.trace_id = values[0].trim().to_string();
    entry.thread_id = values[1].trim().to_string();
    entry.rpc_id = values[2].trim().to_string();
    entry.queue = values[3].trim().to_string();
    entry.user = normalize_user(values[5]);
    entry.raw_text = raw.to_string();

    let payload = payload.trim();
    match log_type {
        LogType::Api => extract_api(&mut entry, payload),
        LogType::Sql => extract_sql(&mut entry, payload),
        LogType::Fltr => extract_fltr(&mut entry, payload),
        LogType::Escl => extract_escl(&mut entry, payload),
    }

    Ok(entry)
}

fn extract_api(entry: &mut LogEntry, payload: &str) {
    match payload.split_once(char::is_whitespace) {
        Some((code, rest)) => {
            entry.api_code = code.to_string();
            entry.form = rest.trim().to_string();
        }
        None => entry.api_code = payload.to_string(),
    }
}

fn extract_sql(entry: &mut LogEntry, payload: &str) {
    entry.sql_statement = payload.to_string();
    entry.sql_table = extract_sql_table(payload);
}

/// Table-name heuristic: only applied when the first keyword is one of
/// SELECT / UPDATE / INSERT / DELETE; takes the first identifier after FROM,
/// INTO or UPDATE. `OK`, `COMMIT TRANSACTION` and `BEGIN TRANSACTION`
/// payloads never match the leading keyword, so they yield an empty table.
pub fn extract_sql_table(statement: &str) -> String {
    let mut tokens = statement.split_whitespace();
    let Some(first) = tokens.next() else { return String::new() };
    let leading = first.to_ascii_uppercase();
    if !matches!(leading.as_str(), "SELECT" | "UPDATE" | "INSERT" | "DELETE") {
        return String::new();
    }

    if leading == "UPDATE" {
        return tokens.next().map(clean_identifier).unwrap_or_default();
    }

    let mut tokens = statement.split_whitespace();
    while let Some(token) = tokens.next() {
        let upper = token.to_ascii_uppercase();
        if upper == "FROM" || upper == "INTO" {
            return tokens.next().map(clean_identifier).unwrap_or_default();
        }
    }
    String::new()
}

fn clean_identifier(token: &str) -> String {
    token
        .trim_matches(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$'))
        .to_string()
}

fn extract_fltr(entry: &mut LogEntry, payload: &str) {
    // Filter name appears quoted ahead of the operation marker when present.
    if let Some(name) = quoted_segment(payload) {
        entry.filter_name = name;
    }

    let Some(op_start) = payload.find("Operation - ") else { return };
    let after_op = &payload[op_start + "Operation - ".len()..];
    match after_op.find(" on ") {
        Some(on_pos) => {
            entry.operation = after_op[..on_pos].trim().to_string();
            let after_on = &after_op[on_pos + " on ".len()..];
            if let Some(dash) = after_on.rfind(" - ") {
                entry.form = after_on[..dash].trim().to_string();
                entry.request_id = after_on[dash + 3..]
                    .split_whitespace()
                    .next_back()
                    .unwrap_or("")
                    .to_string();
            } else {
                entry.form = after_on.trim().to_string();
            }
        }
        None => entry.operation = after_op.trim().to_string(),
    }
}

fn extract_escl(entry: &mut LogEntry, payload: &str) {
    // The line parser only guarantees the escalation name; pool, schedule and
    // delay are filled in from the analyzer's aggregation.
    let end = payload
        .find(|c| c == '(' || c == '=')
        .unwrap_or(payload.len());
    entry.esc_name = payload[..end].trim().to_string();
}

fn quoted_segment(text: &str) -> Option<String> {
    for quote in ['\'', '"'] {
        if let Some(start) = text.find(quote) {
            if let Some(len) = text[start + 1..].find(quote) {
                return Some(text[start + 1..start + 1 + len].to_string());
            }
        }
    }
    None
}

fn labeled_value<'a>(content: &'a str, label: &str) -> Option<&'a str> {
    let rest = content.strip_prefix(label)?;
    rest.strip_prefix(':')
}

/// `<MonShort> <dd> <yyyy> <HH>:<mm>:<ss>.<frac>` with the day-of-week token
/// ignored. Always interpreted as UTC regardless of the source locale; the
/// fraction (1-4 digits) is a decimal fraction of a second stored at
/// millisecond precision.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let mut tokens = text.split_whitespace();
    let _weekday = tokens.next()?;
    let month = month_number(tokens.next()?)?;
    let day: u32 = tokens.next()?.parse().ok()?;
    let year: i32 = tokens.next()?.parse().ok()?;
    let clock = tokens.next()?;
    if tokens.next().is_some() {
        return None;
    }

    let (hms, frac) = clock.split_once('.').unwrap_or((clock, ""));
    let mut hms_parts = hms.split(':');
    let hour: u32 = hms_parts.next()?.parse().ok()?;
    let minute: u32 = hms_parts.next()?.parse().ok()?;
    let second: u32 = hms_parts.next()?.parse().ok()?;
    if hms_parts.next().is_some() {
        return None;
    }

    let millis = if frac.is_empty() {
        0i64
    } else {
        if frac.len() > 4 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let value: i64 = frac.parse().ok()?;
        // .5 -> 500ms, .5050 -> 505ms
        value * 1000 / 10i64.pow(frac.len() as u32)
    };

    let base = Utc
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()?;
    Some(base + chrono::Duration::milliseconds(millis))
}

fn month_number(token: &str) -> Option<u32> {
    let n = match token {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return None,
    };
    Some(n)
}

/// Scans bracketed groups and the timestamp comment left to right.
struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(raw: &'a str) -> Self {
        Self { rest: raw }
    }

    fn next_bracket(&mut self) -> Option<&'a str> {
        let open = self.rest.find('<')?;
        // Only whitespace may precede the next bracket inside the prefix.
        if !self.rest[..open].trim().is_empty() {
            return None;
        }
        let close = self.rest[open..].find('>')? + open;
        let content = &self.rest[open + 1..close];
        self.rest = &self.rest[close + 1..];
        Some(content)
    }

    /// Consume `/* ... */`, returning the comment body and the payload after.
    fn timestamp_comment(&mut self) -> Option<(&'a str, &'a str)> {
        let open = self.rest.find("/*")?;
        if !self.rest[..open].trim().is_empty() {
            return None;
        }
        let close = self.rest[open..].find("*/")? + open;
        let body = self.rest[open + 2..close].trim();
        Some((body, &self.rest[close + 2..]))
    }
}

/// Result of a completed streaming parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    /// Entries delivered to the sink in fully accepted batches.
    pub accepted: u64,
    /// Empty, malformed and unknown-type lines skipped.
    pub skipped: u64,
}

/// A streaming parse that stopped early. `accepted` counts only entries from
/// batches the sink fully consumed before the abort.
#[derive(Debug)]
pub struct StreamAborted {
    pub accepted: u64,
    pub error: ApiError,
}

/// Drive the line parser over an open byte stream, delivering contiguous
/// batches of accepted entries to `sink`.
///
/// Empty lines and per-line parse failures are skipped and counted, never
/// surfaced. The cancellation token is checked between lines and between
/// batches. Sink errors abort immediately.
pub async fn parse_stream<R, F, Fut>(
    reader: R,
    tenant_id: Uuid,
    job_id: Uuid,
    batch_size: usize,
    cancel: &CancellationToken,
    mut sink: F,
) -> Result<StreamSummary, StreamAborted>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(Vec<LogEntry>) -> Fut,
    Fut: std::future::Future<Output = Result<(), ApiError>>,
{
    let mut lines: Lines<R> = reader.lines();
    let mut batch: Vec<LogEntry> = Vec::with_capacity(batch_size);
    let mut accepted: u64 = 0;
    let mut skipped: u64 = 0;
    let mut line_number: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(StreamAborted { accepted, error: ApiError::Cancelled });
        }

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                return Err(StreamAborted {
                    accepted,
                    error: ApiError::internal(format!("read failed: {}", err)),
                });
            }
        };
        line_number += 1;

        if line.trim().is_empty() {
            skipped += 1;
            continue;
        }

        match parse_line(tenant_id, job_id, line_number, &line) {
            Ok(entry) => batch.push(entry),
            Err(err) => {
                tracing::debug!(line_number, error = %err, "skipping unparseable line");
                skipped += 1;
                continue;
            }
        }

        if batch.len() == batch_size {
            if cancel.is_cancelled() {
                return Err(StreamAborted { accepted, error: ApiError::Cancelled });
            }
            let delivered = batch.len() as u64;
            if let Err(error) = sink(std::mem::replace(
                &mut batch,
                Vec::with_capacity(batch_size),
            ))
            .await
            {
                return Err(StreamAborted { accepted, error });
            }
            accepted += delivered;
        }
    }

    if !batch.is_empty() {
        if cancel.is_cancelled() {
            return Err(StreamAborted { accepted, error: ApiError::Cancelled });
        }
        let delivered = batch.len() as u64;
        if let Err(error) = sink(std::mem::take(&mut batch)).await {
            return Err(StreamAborted { accepted, error });
        }
        accepted += delivered;
    }

    Ok(StreamSummary { accepted, skipped })
}

/// Convenience wrapper for file-backed sources.
pub async fn parse_file<F, Fut>(
    file: tokio::fs::File,
    tenant_id: Uuid,
    job_id: Uuid,
    batch_size: usize,
    cancel: &CancellationToken,
    sink: F,
) -> Result<StreamSummary, StreamAborted>
where
    F: FnMut(Vec<LogEntry>) -> Fut,
    Fut: std::future::Future<Output = Result<(), ApiError>>,
{
    parse_stream(BufReader::new(file), tenant_id, job_id, batch_size, cancel, sink).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    const ESCL_LINE: &str = "<ESCL> <TrID: oKNmA5MvSwOxCzBulz9-zQ:0002868> <TID: 0000000532> <RPC ID: 0000015447> <Queue: Escalation> <Client-RPC: 390603   > <USER: AR_ESCALATOR (Pool 3)                        > <Overlay-Group: 1         > /* Mon Nov 24 2025 14:46:58.5050 */               Survey Submitter (536870919) = rjarba";

    fn ids() -> (Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn parses_escl_line() {
        let (tenant, job) = ids();
        let entry = parse_line(tenant, job, 1, ESCL_LINE).unwrap();

        assert_eq!(entry.log_type, LogType::Escl);
        assert_eq!(entry.trace_id, "oKNmA5MvSwOxCzBulz9-zQ:0002868");
        assert_eq!(entry.thread_id, "0000000532");
        assert_eq!(entry.rpc_id, "0000015447");
        assert_eq!(entry.queue, "Escalation");
        assert_eq!(entry.user, "AR_ESCALATOR");
        assert_eq!(entry.esc_name, "Survey Submitter");
        assert_eq!(entry.line_number, 1);

        let ts = entry.timestamp;
        assert_eq!(ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true), "2025-11-24T14:46:58.505Z");
        assert_eq!(ts.nanosecond(), 505_000_000);
    }

    #[test]
    fn parsing_is_deterministic() {
        let (tenant, job) = ids();
        let a = parse_line(tenant, job, 7, ESCL_LINE).unwrap();
        let b = parse_line(tenant, job, 7, ESCL_LINE).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parses_api_payload() {
        let (tenant, job) = ids();
        let line = "<API > <TrID: t1> <TID: 1> <RPC ID: 2> <Queue: Fast> <Client-RPC: 390620> <USER: Demo    > <Overlay-Group: 1> /* Tue Jan 06 2026 03:10:00.0001 */ +GE       ARGetEntry -- schema HPD:Help Desk";
        let entry = parse_line(tenant, job, 1, line).unwrap();
        assert_eq!(entry.log_type, LogType::Api);
        assert_eq!(entry.api_code, "+GE");
        assert_eq!(entry.form, "ARGetEntry -- schema HPD:Help Desk");
        assert_eq!(entry.user, "Demo");
    }

    #[test]
    fn sql_table_extraction() {
        assert_eq!(
            extract_sql_table("SELECT T4381.C1 FROM T4381 WHERE (T4381.C1 = N'000000000003816')"),
            "T4381"
        );
        assert_eq!(extract_sql_table("UPDATE arschema SET nextId = 5"), "arschema");
        assert_eq!(extract_sql_table("INSERT INTO T100 (C1) VALUES (1)"), "T100");
        assert_eq!(extract_sql_table("DELETE FROM T2 WHERE C1 = 1"), "T2");
        assert_eq!(extract_sql_table("OK"), "");
        assert_eq!(extract_sql_table("COMMIT TRANSACTION"), "");
        assert_eq!(extract_sql_table("BEGIN TRANSACTION"), "");
    }

    #[test]
    fn sql_payload_kept_verbatim() {
        let (tenant, job) = ids();
        let line = "<SQL > <TrID: t1> <TID: 1> <RPC ID: 2> <Queue: Fast> <Client-RPC: 1> <USER: Demo> <Overlay-Group: 0> /* Mon Nov 24 2025 14:46:58.5050 */ OK";
        let entry = parse_line(tenant, job, 1, line).unwrap();
        assert_eq!(entry.sql_statement, "OK");
        assert_eq!(entry.sql_table, "");
    }

    #[test]
    fn fltr_operation_extraction() {
        let (tenant, job) = ids();
        let line = "<FLTR> <TrID: t1> <TID: 1> <RPC ID: 2> <Queue: Fast> <Client-RPC: 1> <USER: Demo> <Overlay-Group: 0> /* Mon Nov 24 2025 14:46:58.0100 */ 'HPD:INC:Assignee-Set' Operation - SET on HPD:Help Desk - 000000000000101";
        let entry = parse_line(tenant, job, 1, line).unwrap();
        assert_eq!(entry.filter_name, "HPD:INC:Assignee-Set");
        assert_eq!(entry.operation, "SET");
        assert_eq!(entry.form, "HPD:Help Desk");
        assert_eq!(entry.request_id, "000000000000101");
    }

    #[test]
    fn rejects_unknown_type() {
        let (tenant, job) = ids();
        let line = "<WTF > <TrID: t> <TID: 1> <RPC ID: 2> <Queue: q> <Client-RPC: 1> <USER: u> <Overlay-Group: 0> /* Mon Nov 24 2025 14:46:58.5050 */ x";
        let err = parse_line(tenant, job, 3, line).unwrap_err();
        assert!(matches!(err, ApiError::UnknownType { .. }));
    }

    #[test]
    fn rejects_missing_timestamp() {
        let (tenant, job) = ids();
        let line = "<API > <TrID: t> <TID: 1> <RPC ID: 2> <Queue: q> <Client-RPC: 1> <USER: u> <Overlay-Group: 0> GLE";
        let err = parse_line(tenant, job, 9, line).unwrap_err();
        assert!(matches!(err, ApiError::MalformedLine { line_number: 9 }));
    }

    #[tokio::test]
    async fn stream_batches_and_counts() {
        let (tenant, job) = ids();
        let good = "<API > <TrID: t> <TID: 1> <RPC ID: 2> <Queue: q> <Client-RPC: 1> <USER: u> <Overlay-Group: 0> /* Mon Nov 24 2025 14:46:58.5050 */ GLE x";
        let mut input = String::new();
        for i in 0..9 {
            if i == 2 || i == 5 {
                input.push_str("garbage line\n");
            } else {
                input.push_str(good);
                input.push('\n');
            }
        }

        let cancel = CancellationToken::new();
        let sizes = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sizes_in = sizes.clone();
        let summary = parse_stream(
            input.as_bytes(),
            tenant,
            job,
            3,
            &cancel,
            move |batch| {
                let sizes = sizes_in.clone();
                async move {
                    sizes.lock().unwrap().push(batch.len());
                    Ok(())
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(summary.accepted, 7);
        assert_eq!(summary.skipped, 2);
        assert_eq!(*sizes.lock().unwrap(), vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn empty_stream_never_invokes_sink() {
        let (tenant, job) = ids();
        let cancel = CancellationToken::new();
        let summary = parse_stream(&b""[..], tenant, job, 10, &cancel, |_batch| async {
            panic!("sink must not run for an empty file");
        })
        .await
        .unwrap();
        assert_eq!(summary.accepted, 0);
    }

    #[tokio::test]
    async fn cancellation_reports_delivered_count() {
        let (tenant, job) = ids();
        let good = "<API > <TrID: t> <TID: 1> <RPC ID: 2> <Queue: q> <Client-RPC: 1> <USER: u> <Overlay-Group: 0> /* Mon Nov 24 2025 14:46:58.5050 */ GLE x\n";
        let input = good.repeat(6);
        let cancel = CancellationToken::new();
        let cancel_in = cancel.clone();

        let aborted = parse_stream(input.as_bytes(), tenant, job, 2, &cancel, move |_batch| {
            let cancel = cancel_in.clone();
            async move {
                // Cancel after the first delivered batch.
                cancel.cancel();
                Ok(())
            }
        })
        .await
        .unwrap_err();

        assert_eq!(aborted.accepted, 2);
        assert!(matches!(aborted.error, ApiError::Cancelled));
    }
}
