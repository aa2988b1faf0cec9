//! The aligned result table.
//!
//! ```text
//! Model    API Level   Locale   Orientation   Outcome
//! Pixel2   28          en       portrait      success
//! Nexus5   23          de       landscape     failure(Crashed)
//! ```
//!
//! Columns are left aligned and separated by at least three spaces. Widths
//! are measured without ANSI colour codes, so coloured outcomes line up.

use console::{Alignment, Style, measure_text_width, pad_str};

use crate::status::{DeviceResult, OutcomeSummary};

const HEADER: [&str; 5] = ["Model", "API Level", "Locale", "Orientation", "Outcome"];
const PADDING: usize = 3;

/// Renders the result table, one line per device in the given order.
///
/// With `colored`, the outcome column is green for success, red for
/// failure, yellow for inconclusive and blue for skipped.
pub fn render(rows: &[DeviceResult], colored: bool) -> String {
    let mut lines: Vec<[String; 5]> = Vec::with_capacity(rows.len() + 1);
    lines.push(HEADER.map(str::to_string));
    for row in rows {
        lines.push([
            row.model.clone(),
            row.version.clone(),
            row.locale.clone(),
            row.orientation.clone(),
            outcome_cell(row, colored),
        ]);
    }

    let mut widths = [0usize; 5];
    for line in &lines {
        for (width, cell) in widths.iter_mut().zip(line) {
            *width = (*width).max(measure_text_width(cell));
        }
    }

    let mut out = String::new();
    for line in &lines {
        let mut text = String::new();
        for (cell, width) in line.iter().zip(widths) {
            text.push_str(&pad_str(cell, width + PADDING, Alignment::Left, None));
        }
        out.push_str(text.trim_end());
        out.push('\n');
    }
    out
}

fn outcome_cell(row: &DeviceResult, colored: bool) -> String {
    let text = row.outcome_text();
    if !colored {
        return text;
    }

    let style = match row.summary {
        OutcomeSummary::Success => Style::new().green(),
        OutcomeSummary::Failure => Style::new().red(),
        OutcomeSummary::Inconclusive => Style::new().yellow(),
        OutcomeSummary::Skipped => Style::new().blue(),
        OutcomeSummary::Unknown(_) => Style::new(),
    };
    style.force_styling(true).apply_to(text).to_string()
}
