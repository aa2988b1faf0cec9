//! JUnit XML report generation.
//!
//! Writes one `<testcase>` per device so CI dashboards can show the device
//! matrix next to other test results:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites tests="2" failures="1" errors="0" skipped="0" time="312.000">
//!   <testsuite name="labrun" tests="2" failures="1" errors="0" skipped="0" time="312.000" timestamp="...">
//!     <testcase classname="Pixel2" name="Pixel2-28-en-portrait" time="0.000"/>
//!     <testcase classname="Nexus5" name="Nexus5-23-de-landscape" time="0.000">
//!       <failure message="failure(Crashed)" type="failure"/>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```
//!
//! `failure` maps to `<failure>`, `inconclusive` and unknown outcomes to
//! `<error>`, `skipped` to `<skipped/>`.

use std::path::PathBuf;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};

use super::{Reporter, RunReport};
use crate::status::{DeviceResult, OutcomeSummary};

const SUITE_NAME: &str = "labrun";

/// Reporter that writes a JUnit XML file when the run completes.
///
/// Parent directories are created if missing; the file is overwritten.
pub struct JUnitReporter {
    output_path: PathBuf,
}

impl JUnitReporter {
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }

    /// Generate JUnit XML content from a report.
    pub fn generate_xml(&self, report: &RunReport) -> anyhow::Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let tests = report.rows.len().to_string();
        let failures = count(report, |s| matches!(s, OutcomeSummary::Failure)).to_string();
        let errors = count(report, |s| {
            matches!(s, OutcomeSummary::Inconclusive | OutcomeSummary::Unknown(_))
        })
        .to_string();
        let skipped = count(report, |s| matches!(s, OutcomeSummary::Skipped)).to_string();
        let time = format!("{:.3}", report.duration.as_secs_f64());
        let timestamp = report.finished_at.format("%Y-%m-%dT%H:%M:%S").to_string();

        let mut testsuites = BytesStart::new("testsuites");
        testsuites.push_attribute(("tests", tests.as_str()));
        testsuites.push_attribute(("failures", failures.as_str()));
        testsuites.push_attribute(("errors", errors.as_str()));
        testsuites.push_attribute(("skipped", skipped.as_str()));
        testsuites.push_attribute(("time", time.as_str()));
        writer.write_event(Event::Start(testsuites))?;

        let mut testsuite = BytesStart::new("testsuite");
        testsuite.push_attribute(("name", SUITE_NAME));
        testsuite.push_attribute(("tests", tests.as_str()));
        testsuite.push_attribute(("failures", failures.as_str()));
        testsuite.push_attribute(("errors", errors.as_str()));
        testsuite.push_attribute(("skipped", skipped.as_str()));
        testsuite.push_attribute(("time", time.as_str()));
        testsuite.push_attribute(("timestamp", timestamp.as_str()));
        if let Some(id) = &report.matrix_id {
            testsuite.push_attribute(("id", id.as_str()));
        }
        writer.write_event(Event::Start(testsuite))?;

        for row in &report.rows {
            write_testcase(&mut writer, row)?;
        }

        writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
        writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

        Ok(String::from_utf8(writer.into_inner())?)
    }
}

fn count(report: &RunReport, pred: impl Fn(&OutcomeSummary) -> bool) -> usize {
    report.rows.iter().filter(|r| pred(&r.summary)).count()
}

fn write_testcase<W: std::io::Write>(writer: &mut Writer<W>, row: &DeviceResult) -> anyhow::Result<()> {
    let name = format!("{}-{}-{}-{}", row.model, row.version, row.locale, row.orientation);

    let mut testcase = BytesStart::new("testcase");
    testcase.push_attribute(("classname", row.model.as_str()));
    testcase.push_attribute(("name", name.as_str()));
    testcase.push_attribute(("time", "0.000"));

    let child = match &row.summary {
        OutcomeSummary::Success => None,
        OutcomeSummary::Failure => Some("failure"),
        OutcomeSummary::Skipped => Some("skipped"),
        OutcomeSummary::Inconclusive | OutcomeSummary::Unknown(_) => Some("error"),
    };

    let Some(child) = child else {
        writer.write_event(Event::Empty(testcase))?;
        return Ok(());
    };

    writer.write_event(Event::Start(testcase))?;

    let mut element = BytesStart::new(child);
    if child != "skipped" {
        let outcome = row.outcome_text();
        element.push_attribute(("message", outcome.as_str()));
        element.push_attribute(("type", row.summary.as_str()));
    }
    writer.write_event(Event::Empty(element))?;

    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

impl Reporter for JUnitReporter {
    fn on_run_complete(&self, report: &RunReport) {
        let xml = match self.generate_xml(report) {
            Ok(xml) => xml,
            Err(e) => {
                tracing::error!("Failed to generate JUnit XML: {}", e);
                return;
            }
        };

        if let Some(parent) = self.output_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            tracing::error!("Failed to create output directory: {}", e);
            return;
        }

        if let Err(e) = std::fs::write(&self.output_path, xml) {
            tracing::error!("Failed to write JUnit XML: {}", e);
        } else {
            tracing::info!("JUnit XML written to: {}", self.output_path.display());
        }
    }
}
