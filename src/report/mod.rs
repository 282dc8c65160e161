//! Console rendering of a finished run
//!
//! One section per operation, one line per strategy with its elapsed time,
//! the answer it gave and its slowdown against the fastest strategy for that
//! operation. Sizes follow as a flat label listing.

use crate::models::{Operation, Outcome, RunReport};
use crate::util::{format_bytes, format_elapsed, relative_slowdown};
use std::io::{self, Write};

/// Width of the strategy name column
const NAME_WIDTH: usize = 20;

fn section_header(title: &str) -> String {
    format!("=========={}==========", title)
}

/// Write the human-readable report to `out`
pub fn write_report<W: Write>(out: &mut W, report: &RunReport) -> io::Result<()> {
    writeln!(
        out,
        "{} tokens, probe \"{}\", k = {}, started {}",
        report.corpus_tokens,
        report.probe_token,
        report.top_k,
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    )?;

    for operation in Operation::ALL {
        // Sizes get their own listing below.
        if operation == Operation::ReportSize {
            continue;
        }

        writeln!(out, "{}", section_header(operation.title()))?;
        let fastest = report.fastest(operation).map(|m| m.elapsed);

        for measurement in report.for_operation(operation) {
            let name = format!("{}:", measurement.strategy);
            match &measurement.outcome {
                Outcome::Completed { answer } => {
                    let slowdown = fastest
                        .map(|f| relative_slowdown(measurement.elapsed, f))
                        .unwrap_or(1.0);
                    let answer = answer.to_string();
                    if answer.is_empty() {
                        writeln!(
                            out,
                            "{:<width$}\t{:>10}\tx{:.2}",
                            name,
                            format_elapsed(measurement.elapsed),
                            slowdown,
                            width = NAME_WIDTH
                        )?;
                    } else {
                        writeln!(
                            out,
                            "{:<width$}\t{:>10}\tx{:.2}\t{}",
                            name,
                            format_elapsed(measurement.elapsed),
                            slowdown,
                            answer,
                            width = NAME_WIDTH
                        )?;
                    }
                }
                Outcome::Failed { kind, message } => {
                    writeln!(
                        out,
                        "{:<width$}\t{:>10}\tFAILED ({}): {}",
                        name,
                        format_elapsed(measurement.elapsed),
                        kind,
                        message,
                        width = NAME_WIDTH
                    )?;
                }
                Outcome::Skipped { reason } => {
                    writeln!(
                        out,
                        "{:<width$}\t{:>10}\tskipped: {}",
                        name,
                        "-",
                        reason,
                        width = NAME_WIDTH
                    )?;
                }
            }
        }
    }

    writeln!(out, "{}", section_header("Sizes"))?;
    for (label, bytes) in report.sizes.iter() {
        writeln!(out, "{}: \t\t{} ({})", label, bytes, format_bytes(bytes))?;
    }

    let size_failures: Vec<&str> = report
        .for_operation(Operation::ReportSize)
        .filter(|m| !m.outcome.is_completed())
        .map(|m| m.strategy.as_str())
        .collect();
    if !size_failures.is_empty() {
        writeln!(out, "no sizes from: {}", size_failures.join(", "))?;
    }

    Ok(())
}

/// Print the report to stdout
pub fn print_report(report: &RunReport) -> io::Result<()> {
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    write_report(&mut lock, report)?;
    lock.flush()
}

/// Print the report as pretty JSON to stdout
pub fn print_json(report: &RunReport) -> io::Result<()> {
    let json = report
        .to_json()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Answer, Measurement};
    use std::time::Duration;

    fn render(report: &RunReport) -> String {
        let mut buf = Vec::new();
        write_report(&mut buf, report).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn report() -> RunReport {
        let mut report = RunReport::new(5, "the", 1);
        report.strategies = vec!["exact unindexed".into(), "sketch".into()];
        report.measurements = vec![
            Measurement::completed(
                "exact unindexed",
                Operation::Initialize,
                Duration::from_millis(40),
                Answer::Unit,
            ),
            Measurement::failed(
                "sketch",
                Operation::Initialize,
                Duration::from_millis(5),
                "backend_rejected",
                "Backend rejected request: ERR item exists",
            ),
            Measurement::completed(
                "exact unindexed",
                Operation::ItemCount,
                Duration::from_millis(4),
                Answer::Count(3),
            ),
            Measurement::skipped("sketch", Operation::ItemCount, "retired after Init failed"),
            Measurement::completed(
                "exact unindexed",
                Operation::TopK,
                Duration::from_millis(2),
                Answer::Tokens(vec!["the".into()]),
            ),
            Measurement::completed(
                "exact unindexed",
                Operation::ReportSize,
                Duration::from_millis(1),
                Answer::Unit,
            ),
        ];
        report.sizes.record("exact_unindexed.table", 8192);
        report
    }

    #[test]
    fn test_sections_in_run_order() {
        let text = render(&report());
        let init = text.find("==========Init==========").unwrap();
        let count = text.find("==========Item Count==========").unwrap();
        let top = text.find("==========Top K==========").unwrap();
        let sizes = text.find("==========Sizes==========").unwrap();
        assert!(init < count && count < top && top < sizes);
        assert!(!text.contains("==========Size Report=========="));
    }

    #[test]
    fn test_lines_carry_answers_and_failures() {
        let text = render(&report());
        assert!(text.contains("x1.00\t3"));
        assert!(text.contains("x1.00\t[the]"));
        assert!(text.contains("FAILED (backend_rejected)"));
        assert!(text.contains("skipped: retired after Init failed"));
        assert!(text.contains("exact_unindexed.table: \t\t8192 ("));
        assert!(!text.contains("no sizes from"));
    }
}
