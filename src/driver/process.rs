//! Subprocess construction and progress-line parsing for the Download
//! Driver. The actual `Command` is built behind a trait so tests can
//! substitute a stub script instead of a real downloader tool.

use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;

/// Builds the `tokio::process::Command` used to invoke the downloader tool.
/// The default implementation just runs `program` with `args`; tests inject
/// a builder that points at a stub script.
pub trait CommandBuilder: Send + Sync {
    fn build(&self, program: &str, args: &[String]) -> Command;
}

#[derive(Default)]
pub struct TokioCommandBuilder;

impl CommandBuilder for TokioCommandBuilder {
    fn build(&self, program: &str, args: &[String]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
        cmd
    }
}

/// One parsed line of downloader-tool output: either a structured progress
/// update or a free-text log line.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    Progress(ProgressUpdate),
    Log(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressUpdate {
    #[serde(default)]
    pub downloaded_bytes: Option<u64>,
    #[serde(default)]
    pub total_bytes: Option<u64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub eta: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Parses a single line of subprocess output. A line is treated as progress
/// only if it parses as a JSON object containing at least one of the
/// recognized numeric/status fields; anything else — including malformed
/// JSON, which is never treated as a fatal parse error — is a log line.
pub fn parse_output_line(line: &str) -> OutputLine {
    let trimmed = line.trim();
    if trimmed.starts_with('{') {
        if let Ok(update) = serde_json::from_str::<ProgressUpdate>(trimmed) {
            if update.downloaded_bytes.is_some() || update.total_bytes.is_some() || update.speed.is_some() || update.eta.is_some() || update.status.is_some() {
                return OutputLine::Progress(update);
            }
        }
    }
    OutputLine::Log(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_progress_json_object() {
        let line = r#"{"downloaded_bytes": 1024, "total_bytes": 4096, "speed": 512.0, "eta": 6}"#;
        match parse_output_line(line) {
            OutputLine::Progress(p) => {
                assert_eq!(p.downloaded_bytes, Some(1024));
                assert_eq!(p.eta, Some(6));
            }
            OutputLine::Log(_) => panic!("expected progress"),
        }
    }

    #[test]
    fn non_json_lines_are_logs() {
        assert_eq!(parse_output_line("[download] Destination: file.mp4"), OutputLine::Log("[download] Destination: file.mp4".to_string()));
    }

    #[test]
    fn malformed_json_falls_back_to_a_log_line_without_erroring() {
        assert_eq!(parse_output_line("{not valid json"), OutputLine::Log("{not valid json".to_string()));
    }

    #[test]
    fn json_object_with_no_recognized_fields_is_a_log_line() {
        assert_eq!(parse_output_line(r#"{"unrelated": true}"#), OutputLine::Log(r#"{"unrelated": true}"#.to_string()));
    }
}
