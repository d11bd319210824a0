//! Unit spelling canonicalization.
//!
//! OCR and lab software write the same unit many ways (`µL`, `uL`, `mcL`,
//! `cumm`, `mm3`; `x10^3`, `10*3`, `thou`). Comparisons go through
//! [`unit_key`] so that catalog lookups and token classification agree.

/// Units recognized on sight by the token normalizer, as canonical keys.
const KNOWN_UNIT_KEYS: &[&str] = &[
    "%",
    "/hpf",
    "/ul",
    "fl",
    "g/dl",
    "g/l",
    "iu/l",
    "iu/ml",
    "kg",
    "l/l",
    "lakh/ul",
    "meq/l",
    "mg/dl",
    "mg/l",
    "miu/l",
    "miu/ml",
    "mm/h",
    "mm/hr",
    "mmhg",
    "mmol/l",
    "mmol/mol",
    "ng/dl",
    "ng/ml",
    "nmol/l",
    "pg",
    "pg/ml",
    "pmol/l",
    "sec",
    "u/l",
    "ug/dl",
    "ug/l",
    "uiu/ml",
    "umol/l",
    "x10^12/l",
    "x10^3/ul",
    "x10^6/ul",
    "x10^9/l",
];

/// Fold a unit spelling into its comparison key.
pub fn unit_key(raw: &str) -> String {
    let mut key: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            'µ' | 'μ' => 'u',
            '×' => 'x',
            '³' => '3',
            _ => c,
        })
        .collect::<String>()
        .to_lowercase();

    for (from, to) in [
        ("cu.mm", "ul"),
        ("cumm", "ul"),
        ("mm^3", "ul"),
        ("mm3", "ul"),
        ("cmm", "ul"),
        ("mcl", "ul"),
        ("mcg", "ug"),
        ("10*", "10^"),
        ("10e", "10^"),
        ("cells/", "/"),
    ] {
        key = key.replace(from, to);
    }

    if let Some(rest) = key.strip_prefix("gm/") {
        key = format!("g/{rest}");
    }

    // "10^3/ul" and "103/ul" (caret lost) both mean x10^3.
    if key.starts_with("10^") {
        key.insert(0, 'x');
    } else if let Some(rest) = key.strip_prefix("x10") {
        if !rest.starts_with('^') {
            if let Some(exp) = rest.chars().next().filter(|c| c.is_ascii_digit()) {
                key = format!("x10^{exp}{}", &rest[1..]);
            }
        }
    }

    match key.as_str() {
        "thou/ul" | "k/ul" | "10^3/ul" => "x10^3/ul".into(),
        "mill/ul" | "million/ul" | "m/ul" => "x10^6/ul".into(),
        "lakhs/ul" => "lakh/ul".into(),
        _ => key,
    }
}

/// Whether `fragment` spells a unit from the known closed set.
pub fn is_known_unit(fragment: &str) -> bool {
    let key = unit_key(fragment);
    !key.is_empty() && KNOWN_UNIT_KEYS.binary_search(&key.as_str()).is_ok()
}

/// Whether two spellings denote the same unit.
pub fn same_unit(a: &str, b: &str) -> bool {
    unit_key(a) == unit_key(b)
}
