//! Log parsing: the native line parser and the analyzer report parser.

pub mod line;
pub mod report;
pub mod report_models;

pub use line::{parse_file, parse_line, parse_stream, StreamAborted, StreamSummary};
pub use report::ReportParser;
pub use report_models::ParseResult;
