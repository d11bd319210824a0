// Two-column page layout detection.
//
// Scanned reports sometimes print two result panels side by side. OCR then
// emits each physical line as "left row      right row", which would splice
// unrelated tests into one candidate row. When a single wide gutter runs
// down most of the page and both sides of it read as result rows (a test
// name followed by a number), the text is reordered to read the left panel
// first, then the right.
//
// An ordinary aligned table ("Hemoglobin    13.2    g/dL") is left alone:
// its rows have several wide gaps, or the text after the gap is a value or
// a unit column.

use crate::units::is_known_unit;

/// Minimum width of a whitespace run to count as a gutter (characters).
const MIN_GUTTER_WIDTH: usize = 6;

/// Share of non-blank lines that must cross the gutter.
const GUTTER_LINE_SHARE: f64 = 0.50;

/// Share of gutter lines that must read as a result row on both sides.
const LABEL_START_SHARE: f64 = 0.80;

/// Minimum number of non-blank lines needed to attempt detection.
const MIN_LINES_FOR_DETECTION: usize = 4;

/// A wide whitespace run inside a line, as char offsets `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Gap {
    start: usize,
    end: usize,
}

impl Gap {
    fn covers(&self, column: usize) -> bool {
        self.start <= column && column < self.end
    }
}

/// Reorder a two-panel layout left panel first. Returns `text` unchanged
/// when no such layout is found.
pub fn reorder_columns(text: &str) -> String {
    let lines: Vec<Vec<char>> = text.lines().map(|l| l.chars().collect()).collect();
    let content_lines = lines.iter().filter(|l| l.iter().any(|c| !c.is_whitespace())).count();
    if content_lines < MIN_LINES_FOR_DETECTION {
        return text.to_string();
    }

    match find_gutter_column(&lines, content_lines) {
        Some(column) => {
            tracing::debug!(column, "Two-column layout detected, reordering");
            split_panels(&lines, column)
        }
        None => text.to_string(),
    }
}

/// Wide gaps with text on both sides.
fn inner_gaps(line: &[char]) -> Vec<Gap> {
    let mut gaps = Vec::new();
    let mut i = 0;
    while i < line.len() {
        if line[i] != ' ' {
            i += 1;
            continue;
        }
        let start = i;
        while i < line.len() && line[i] == ' ' {
            i += 1;
        }
        let has_left = line[..start].iter().any(|c| !c.is_whitespace());
        if i - start >= MIN_GUTTER_WIDTH && has_left && i < line.len() {
            gaps.push(Gap { start, end: i });
        }
    }
    gaps
}

/// Find a column crossed by a lone wide gap on enough lines, where the
/// text on each side of the gap reads like a result row.
fn find_gutter_column(lines: &[Vec<char>], content_lines: usize) -> Option<usize> {
    // Only lines with exactly one wide gap can belong to a two-panel page.
    let single_gaps: Vec<(usize, Gap)> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| match inner_gaps(line).as_slice() {
            [gap] => Some((i, *gap)),
            _ => None,
        })
        .collect();

    let mut best: Option<(usize, usize)> = None;
    for &(_, candidate) in &single_gaps {
        let column = (candidate.start + candidate.end) / 2;
        let crossing = single_gaps.iter().filter(|(_, g)| g.covers(column)).count();
        if best.map_or(true, |(_, count)| crossing > count) {
            best = Some((column, crossing));
        }
    }

    let (column, crossing) = best?;
    if (crossing as f64) < content_lines as f64 * GUTTER_LINE_SHARE {
        return None;
    }

    let label_starts = single_gaps
        .iter()
        .filter(|(_, g)| g.covers(column))
        .filter(|(i, g)| reads_as_row(&lines[*i][..g.start]) && reads_as_row(&lines[*i][g.end..]))
        .count();
    if (label_starts as f64) < crossing as f64 * LABEL_START_SHARE {
        return None;
    }

    Some(column)
}

/// A test name followed by a number: the first word starts with a letter
/// and is not a unit, and a later word starts with a digit.
fn reads_as_row(segment: &[char]) -> bool {
    let text: String = segment.iter().collect();
    let mut words = text.split_whitespace();
    let Some(first) = words.next() else {
        return false;
    };
    if !first.starts_with(char::is_alphabetic) || is_known_unit(first) {
        return false;
    }
    words.any(|word| word.starts_with(|c: char| c.is_ascii_digit()))
}

fn split_panels(lines: &[Vec<char>], column: usize) -> String {
    let mut left: Vec<String> = Vec::new();
    let mut right: Vec<String> = Vec::new();

    for line in lines {
        let cut = column.min(line.len());
        let left_part: String = line[..cut].iter().collect();
        let right_part: String = line[cut..].iter().collect();

        let left_part = left_part.trim_end();
        let right_part = right_part.trim();
        if !left_part.trim().is_empty() {
            left.push(left_part.trim_start().to_string());
        }
        if !right_part.is_empty() {
            right.push(right_part.to_string());
        }
    }

    left.extend(right);
    left.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_by_side_panels_reordered() {
        let text = "Hemoglobin 13.2 g/dL        Glucose 95 mg/dL\n\
                    WBC 7.8 x10^3/uL            Creatinine 0.9 mg/dL\n\
                    Platelets 250 x10^3/uL      Sodium 140 mmol/L\n\
                    RBC 4.8 x10^6/uL            Potassium 4.2 mmol/L";

        let result = reorder_columns(text);
        let lines: Vec<&str> = result.lines().collect();
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], "Hemoglobin 13.2 g/dL");
        assert_eq!(lines[3], "RBC 4.8 x10^6/uL");
        assert_eq!(lines[4], "Glucose 95 mg/dL");
        assert_eq!(lines[7], "Potassium 4.2 mmol/L");
    }

    #[test]
    fn aligned_table_left_alone() {
        let text = "Hemoglobin        13.2      g/dL       12.0-16.0\n\
                    WBC               7.8       x10^3/uL   4.0-11.0\n\
                    Platelets         250       x10^3/uL   150-450\n\
                    Glucose           95        mg/dL      70-100";
        assert_eq!(reorder_columns(text), text);
    }

    #[test]
    fn name_value_table_left_alone() {
        let text = "Hemoglobin          13.2\n\
                    WBC                 7.8\n\
                    Platelets           250\n\
                    Glucose             95";
        assert_eq!(reorder_columns(text), text);
    }

    #[test]
    fn unit_column_after_gap_left_alone() {
        let text = "Glucose 5.2          mmol/L\n\
                    Sodium 140           mmol/L\n\
                    Creatinine 80        umol/L\n\
                    Hemoglobin 13.2      g/dL\n\
                    Urea 5.0             mmol/L";
        assert_eq!(reorder_columns(text), text);
    }

    #[test]
    fn right_side_without_value_is_not_a_panel() {
        let text = "Hemoglobin 13.2       Method photometry\n\
                    WBC 7.8               Method impedance\n\
                    Platelets 250         Method impedance\n\
                    Glucose 95            Method hexokinase";
        assert_eq!(reorder_columns(text), text);
    }

    #[test]
    fn reads_as_row_needs_name_then_number() {
        let chars = |s: &str| s.chars().collect::<Vec<char>>();
        assert!(reads_as_row(&chars("Glucose 95 mg/dL")));
        assert!(!reads_as_row(&chars("mmol/L")));
        assert!(!reads_as_row(&chars("g/dL 13.2")));
        assert!(!reads_as_row(&chars("Method hexokinase")));
        assert!(!reads_as_row(&chars("13.2 g/dL")));
        assert!(!reads_as_row(&chars("   ")));
    }

    #[test]
    fn short_text_unchanged() {
        let text = "Hemoglobin 13.2        Glucose 95\nWBC 7.8";
        assert_eq!(reorder_columns(text), text);
    }

    #[test]
    fn prose_unchanged() {
        let text = "The patient was seen today.\n\
                    No significant findings.\n\
                    Follow up in three months.\n\
                    Results reviewed with the patient.";
        assert_eq!(reorder_columns(text), text);
    }

    #[test]
    fn inner_gaps_ignores_edges() {
        let line: Vec<char> = "      A      B      ".chars().collect();
        let gaps = inner_gaps(&line);
        assert_eq!(gaps, vec![Gap { start: 7, end: 13 }]);
    }
}
