//! Row reconstruction across fragmented OCR lines.
//!
//! A single pass over the token stream drives one candidate row at a time
//! through an explicit state machine:
//!
//! ```text
//! Empty ──label──▶ LabelPending ──numeric──▶ ValuePending ──unit/range──▶ Complete
//!                        │                        │                          │
//!                   lookahead/EOS               label/EOS            label/numeric/EOS
//!                        ▼                        ▼                          ▼
//!                    Discarded                Finalized                  Finalized
//! ```
//!
//! Rows get incremental ids from a per-document counter so finalized and
//! discarded rows can be audited after the pass. A label always opens a new
//! row. A bare number seen with no open row is held as an orphan value that
//! the next row opened within the lookahead window may adopt.

use std::collections::BTreeSet;

use crate::models::{DiscardReason, DiscardedRow, TokenKind};

use super::normalize::{is_power_prefix, Token};

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    Empty,
    LabelPending,
    ValuePending,
    Complete,
    Finalized,
    Discarded,
}

/// A row that reached `Finalized`, ready for the value resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructedRow {
    pub row_id: u32,
    /// Label fragments, case preserved, in reading order.
    pub label: Vec<String>,
    pub value: f64,
    pub unit: Vec<String>,
    pub range: Vec<String>,
    /// Contributing line indices, never shared with another row.
    pub lines: BTreeSet<u32>,
}

impl ReconstructedRow {
    pub fn label_text(&self) -> String {
        self.label.join(" ")
    }

    /// Unit fragments joined as written ("x10^3" + "/uL" → "x10^3/uL").
    pub fn unit_text(&self) -> Option<String> {
        (!self.unit.is_empty()).then(|| self.unit.concat())
    }

    pub fn range_text(&self) -> Option<String> {
        (!self.range.is_empty()).then(|| self.range.concat())
    }
}

/// Output of one reconstruction pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconstruction {
    pub rows: Vec<ReconstructedRow>,
    pub discarded: Vec<DiscardedRow>,
    /// Tokens that played no part in any row (noise, stray units, expired orphans).
    pub ignored_tokens: usize,
}

#[derive(Debug, Clone)]
struct Orphan {
    value: f64,
    line: u32,
    ordinal: usize,
}

#[derive(Debug)]
struct CandidateRow {
    id: u32,
    state: RowState,
    label: Vec<String>,
    value: Option<f64>,
    unit: Vec<String>,
    range: Vec<String>,
    lines: BTreeSet<u32>,
    /// Ordinal of the line the row opened on.
    opened_at: usize,
    /// Ordinal of the line the last label fragment came from.
    label_line: usize,
    /// Ordinal of the last line that contributed any token.
    last_line: usize,
    orphan: Option<Orphan>,
}

impl CandidateRow {
    fn new(id: u32, ordinal: usize) -> Self {
        Self {
            id,
            state: RowState::Empty,
            label: Vec::new(),
            value: None,
            unit: Vec::new(),
            range: Vec::new(),
            lines: BTreeSet::new(),
            opened_at: ordinal,
            label_line: ordinal,
            last_line: ordinal,
            orphan: None,
        }
    }

    fn has_detail(&self) -> bool {
        !self.unit.is_empty() || !self.range.is_empty()
    }

    /// A range left open at a line end ("12.0-") continues on a later line.
    fn awaits_range_end(&self) -> bool {
        self.range.last().is_some_and(|r| r.ends_with('-'))
    }

    /// Whether a unit or range fragment on a later line still belongs to
    /// this finished row: only an unfinished power-of-ten unit ("x10^3"
    /// awaiting "/uL") or an open range ("12.0-") is continued.
    fn accepts_continuation(&self, kind: TokenKind) -> bool {
        match kind {
            TokenKind::UnitFragment => match self.unit.last() {
                None => true,
                Some(unit) => is_power_prefix(unit),
            },
            _ => self.range.is_empty() || self.awaits_range_end(),
        }
    }

    fn set_value(&mut self, value: f64, line: u32) {
        self.value = Some(value);
        self.lines.insert(line);
        self.state = if self.has_detail() {
            RowState::Complete
        } else {
            RowState::ValuePending
        };
    }

    /// Take the held orphan as this row's value. Returns false when there
    /// is none.
    fn adopt_orphan(&mut self) -> bool {
        match self.orphan.take() {
            Some(orphan) => {
                tracing::debug!(row = self.id, line = orphan.line, "Row adopted orphan value");
                self.set_value(orphan.value, orphan.line);
                true
            }
            None => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// LineReconstructor
// ═══════════════════════════════════════════════════════════

pub struct LineReconstructor {
    lookahead_lines: usize,
    next_row_id: u32,
    /// Position of the current line among all lines pushed so far.
    ordinal: usize,
    current: Option<CandidateRow>,
    orphan: Option<Orphan>,
    claimed: BTreeSet<u32>,
    output: Reconstruction,
}

impl LineReconstructor {
    pub fn new(lookahead_lines: usize) -> Self {
        Self {
            lookahead_lines: lookahead_lines.max(1),
            next_row_id: 0,
            ordinal: 0,
            current: None,
            orphan: None,
            claimed: BTreeSet::new(),
            output: Reconstruction::default(),
        }
    }

    /// Feed the tokens of the next line. Lines must arrive in sequence order;
    /// blank lines count toward the lookahead window and may be passed with
    /// no tokens.
    pub fn push_line(&mut self, tokens: &[Token]) {
        self.expire_stale();

        let mut first_label = true;
        for token in tokens {
            match token.kind {
                TokenKind::LabelFragment => {
                    self.on_label(token, first_label);
                    first_label = false;
                }
                TokenKind::Numeric => self.on_numeric(token),
                TokenKind::UnitFragment | TokenKind::RangeFragment => self.on_detail(token),
                TokenKind::Noise => self.output.ignored_tokens += 1,
            }
        }

        self.ordinal += 1;
    }

    /// Close the pass: rows holding a value are finalized, label-only rows
    /// are discarded.
    pub fn finish(mut self) -> Reconstruction {
        if let Some(row) = self.current.take() {
            match row.state {
                RowState::ValuePending | RowState::Complete => self.finalize(row),
                _ => self.abandon(row, DiscardReason::EndOfStream),
            }
        }
        if self.orphan.take().is_some() {
            self.output.ignored_tokens += 1;
        }
        self.output
    }

    /// Apply the lookahead bound before a new line is read.
    fn expire_stale(&mut self) {
        let ordinal = self.ordinal;
        let window = self.lookahead_lines;

        if self
            .orphan
            .as_ref()
            .is_some_and(|o| ordinal - o.ordinal > window)
        {
            tracing::debug!("Orphan value expired");
            self.orphan = None;
            self.output.ignored_tokens += 1;
        }

        let Some(state) = self.current.as_ref().map(|row| row.state) else {
            return;
        };
        let idle = self.current.as_ref().map_or(0, |row| match state {
            RowState::LabelPending => ordinal - row.opened_at,
            _ => ordinal - row.last_line,
        });
        if idle <= window {
            return;
        }
        if let Some(row) = self.current.take() {
            match state {
                RowState::LabelPending => self.abandon(row, DiscardReason::LookaheadExceeded),
                RowState::ValuePending | RowState::Complete => self.finalize(row),
                _ => self.current = Some(row),
            }
        }
    }

    fn on_label(&mut self, token: &Token, first_on_line: bool) {
        let ordinal = self.ordinal;
        if let Some(row) = self.current.as_mut() {
            let continues = match row.state {
                RowState::Empty => true,
                RowState::LabelPending => !first_on_line || row.label_line == ordinal,
                _ => false,
            };
            if continues {
                row.label.push(token.text().to_string());
                row.lines.insert(token.line);
                row.label_line = ordinal;
                row.last_line = ordinal;
                row.state = RowState::LabelPending;
                return;
            }
        }

        // A label always opens a new row; close whatever was in progress.
        if let Some(row) = self.current.take() {
            match row.state {
                RowState::ValuePending | RowState::Complete => self.finalize(row),
                _ => self.abandon(row, DiscardReason::SupersededByLabel),
            }
        }

        let mut row = CandidateRow::new(self.next_row_id, ordinal);
        self.next_row_id += 1;
        row.label.push(token.text().to_string());
        row.lines.insert(token.line);
        row.state = RowState::LabelPending;
        row.orphan = self.orphan.take();
        tracing::trace!(row = row.id, label = token.text(), "Opened candidate row");
        self.current = Some(row);
    }

    fn on_numeric(&mut self, token: &Token) {
        let Ok(value) = token.normalized.parse::<f64>() else {
            self.output.ignored_tokens += 1;
            return;
        };

        let state = self.current.as_ref().map(|row| row.state);
        match state {
            Some(RowState::LabelPending) => {
                if let Some(row) = self.current.as_mut() {
                    if row.orphan.take().is_some() {
                        self.output.ignored_tokens += 1;
                    }
                    row.set_value(value, token.line);
                    row.last_line = self.ordinal;
                }
            }
            Some(RowState::Complete)
                if self.current.as_ref().is_some_and(CandidateRow::awaits_range_end) =>
            {
                if let Some(row) = self.current.as_mut() {
                    if let Some(open) = row.range.last_mut() {
                        open.push_str(&token.normalized);
                    }
                    row.lines.insert(token.line);
                    row.last_line = self.ordinal;
                }
            }
            Some(RowState::ValuePending | RowState::Complete) => {
                // A second number closes the row; it may lead the next one.
                if let Some(row) = self.current.take() {
                    self.finalize(row);
                }
                self.hold_orphan(value, token);
            }
            _ => self.hold_orphan(value, token),
        }
    }

    fn on_detail(&mut self, token: &Token) {
        let ordinal = self.ordinal;
        let Some(row) = self
            .current
            .as_mut()
            .filter(|row| row.accepts_continuation(token.kind))
        else {
            self.output.ignored_tokens += 1;
            return;
        };

        let target = match token.kind {
            TokenKind::UnitFragment => &mut row.unit,
            _ => &mut row.range,
        };
        target.push(token.normalized.clone());
        row.lines.insert(token.line);
        row.last_line = ordinal;

        match row.state {
            RowState::ValuePending => row.state = RowState::Complete,
            RowState::LabelPending => {
                // Unit before any value: the orphan, if one is held, is it.
                row.adopt_orphan();
            }
            _ => {}
        }
    }

    fn hold_orphan(&mut self, value: f64, token: &Token) {
        if self.orphan.is_some() {
            self.output.ignored_tokens += 1;
        }
        self.orphan = Some(Orphan {
            value,
            line: token.line,
            ordinal: self.ordinal,
        });
    }

    /// Discard a row that never received a value, unless an orphan can stand in.
    fn abandon(&mut self, mut row: CandidateRow, reason: DiscardReason) {
        if row.adopt_orphan() {
            self.finalize(row);
            return;
        }
        row.state = RowState::Discarded;
        tracing::debug!(row = row.id, ?reason, label = %row.label.join(" "), "Discarded candidate row");
        self.output.discarded.push(DiscardedRow {
            row_id: row.id,
            label: row.label.join(" "),
            lines: row.lines,
            reason,
        });
    }

    /// Convert a row to output, keeping only lines no earlier row claimed.
    fn finalize(&mut self, mut row: CandidateRow) {
        if row.orphan.take().is_some() {
            self.output.ignored_tokens += 1;
        }
        let Some(value) = row.value.take() else {
            self.abandon(row, DiscardReason::EndOfStream);
            return;
        };

        let lines: BTreeSet<u32> = row.lines.difference(&self.claimed).copied().collect();
        if lines.is_empty() {
            row.state = RowState::Discarded;
            tracing::debug!(row = row.id, "Row lines already claimed, discarding");
            self.output.discarded.push(DiscardedRow {
                row_id: row.id,
                label: row.label.join(" "),
                lines: row.lines,
                reason: DiscardReason::SharedLine,
            });
            return;
        }

        row.state = RowState::Finalized;
        self.claimed.extend(lines.iter().copied());
        tracing::trace!(row = row.id, value, lines = ?lines, "Finalized row");
        self.output.rows.push(ReconstructedRow {
            row_id: row.id,
            label: row.label,
            value,
            unit: row.unit,
            range: row.range,
            lines,
        });
    }
}

/// Run a full pass over already normalized lines.
pub fn reconstruct_rows<'a>(
    lines: impl IntoIterator<Item = &'a [Token]>,
    lookahead_lines: usize,
) -> Reconstruction {
    let mut reconstructor = LineReconstructor::new(lookahead_lines);
    for tokens in lines {
        reconstructor.push_line(tokens);
    }
    reconstructor.finish()
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
