use serde::{Deserialize, Serialize};

/// One OCR-produced line of text with a stable sequence position.
///
/// Fields are private so a line cannot change after ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLine {
    index: u32,
    text: String,
}

impl RawLine {
    pub fn new(index: u32, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number each line of `text` from zero, blank lines included.
    pub fn sequence(text: &str) -> Vec<RawLine> {
        text.lines()
            .enumerate()
            .map(|(i, line)| RawLine::new(i as u32, line))
            .collect()
    }

    /// Build lines from already-split OCR output.
    pub fn from_strs<S: AsRef<str>>(lines: &[S]) -> Vec<RawLine> {
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| RawLine::new(i as u32, line.as_ref()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_every_line() {
        let lines = RawLine::sequence("Hemoglobin\n\n13.2 g/dL");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].index(), 0);
        assert_eq!(lines[1].text(), "");
        assert_eq!(lines[2].index(), 2);
    }

    #[test]
    fn from_strs_keeps_order() {
        let lines = RawLine::from_strs(&["Glucose", "210", "mg/dL"]);
        let texts: Vec<&str> = lines.iter().map(|l| l.text()).collect();
        assert_eq!(texts, vec!["Glucose", "210", "mg/dL"]);
        assert_eq!(lines[2].index(), 2);
    }
}
