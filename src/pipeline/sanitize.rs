use std::sync::LazyLock;

use regex::Regex;

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").unwrap());

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S+@\S+\.\S+").unwrap());

/// Strip characters that never carry lab data, keeping column alignment.
///
/// Removes URLs and e-mail addresses, replaces control characters and
/// stray symbols with a space (so column positions survive), expands tabs,
/// and keeps the punctuation lab tables rely on: decimal marks, range
/// dashes, comparison signs, unit slashes, carets and micro signs.
pub fn strip_noise(raw: &str) -> String {
    let without_urls = URL_PATTERN.replace_all(raw, " ");
    let without_contacts = EMAIL_PATTERN.replace_all(&without_urls, " ");

    without_contacts
        .lines()
        .map(|line| {
            line.chars()
                .flat_map(|c| {
                    let keep = c.is_alphanumeric()
                        || matches!(
                            c,
                            ' ' | '.'
                                | ','
                                | ';'
                                | ':'
                                | '-'
                                | '/'
                                | '('
                                | ')'
                                | '['
                                | ']'
                                | '+'
                                | '='
                                | '%'
                                | '#'
                                | '<'
                                | '>'
                                | '*'
                                | '_'
                                | '^'
                                | '|'
                                | '\''
                                | '°'
                                | '²'
                                | '³'
                                | 'µ'
                                | 'μ'
                                | '×'
                                | '≤'
                                | '≥'
                                | '\u{2013}' // En-dash –
                                | '\u{2014}' // Em-dash —
                        );
                    match c {
                        '\t' => vec![' '; 4],
                        _ if keep => vec![c],
                        _ => vec![' '],
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse horizontal whitespace, trim lines and drop blank lines.
pub fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
