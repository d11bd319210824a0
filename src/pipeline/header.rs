//! Patient header and vital sign extraction.
//!
//! Report headers carry the patient's age and sex, which select the
//! demographic reference range. Lines recognized here are not lab rows
//! and are withheld from row reconstruction.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::{PatientInfo, RawLine, Sex, VitalSigns};

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bpatient(?:'s)?\s*name\s*[:\-]?\s*([A-Za-z][A-Za-z.' ]*?)\s*(?:\b(?:age|sex|gender)\b|$)")
        .unwrap()
});

static AGE_SEX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bage\s*/\s*(?:sex|gender)\s*[:\-]?\s*(\d{1,3})\s*(?:y|yrs|years)?\s*/\s*(male|female|m|f)\b")
        .unwrap()
});

static AGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bage\s*[:\-]?\s*(\d{1,3})\b").unwrap());

static SEX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:sex|gender)\s*[:\-]?\s*(male|female|m|f)\b").unwrap()
});

static BLOOD_PRESSURE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:blood\s*pressure|bp)\s*[:\-]?\s*(\d{2,3})\s*/\s*(\d{2,3})").unwrap()
});

static HEART_RATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:heart\s*rate|pulse(?:\s*rate)?)\s*[:\-]?\s*(\d{2,3})\b").unwrap()
});

/// Oldest plausible patient age; larger captures are OCR misreads.
const MAX_AGE: u32 = 130;

/// What the header scan found, plus the lines it consumed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderScan {
    pub patient: PatientInfo,
    pub vital_signs: VitalSigns,
    pub consumed: BTreeSet<u32>,
}

/// Scan lines for patient details and vital signs. The first occurrence of
/// each field wins.
pub fn scan_header(lines: &[RawLine]) -> HeaderScan {
    let mut scan = HeaderScan::default();

    for line in lines {
        let text = line.text();
        let mut matched = false;

        if let Some(caps) = NAME_PATTERN.captures(text) {
            let name = caps[1].trim();
            if !name.is_empty() {
                scan.patient.name.get_or_insert_with(|| name.to_string());
                matched = true;
            }
        }

        if let Some(caps) = AGE_SEX_PATTERN.captures(text) {
            if let Some(age) = parse_age(&caps[1]) {
                scan.patient.age.get_or_insert(age);
            }
            if let Some(sex) = Sex::parse_loose(&caps[2]) {
                scan.patient.sex.get_or_insert(sex);
            }
            matched = true;
        } else {
            if let Some(age) = AGE_PATTERN.captures(text).and_then(|c| parse_age(&c[1])) {
                scan.patient.age.get_or_insert(age);
                matched = true;
            }
            if let Some(sex) = SEX_PATTERN.captures(text).and_then(|c| Sex::parse_loose(&c[1])) {
                scan.patient.sex.get_or_insert(sex);
                matched = true;
            }
        }

        if let Some(caps) = BLOOD_PRESSURE_PATTERN.captures(text) {
            let reading = format!("{}/{} mmHg", &caps[1], &caps[2]);
            scan.vital_signs.blood_pressure.get_or_insert(reading);
            matched = true;
        }

        if let Some(caps) = HEART_RATE_PATTERN.captures(text) {
            let reading = format!("{} bpm", &caps[1]);
            scan.vital_signs.heart_rate.get_or_insert(reading);
            matched = true;
        }

        if matched {
            scan.consumed.insert(line.index());
        }
    }

    scan
}

fn parse_age(raw: &str) -> Option<u32> {
    raw.parse::<u32>().ok().filter(|age| *age <= MAX_AGE)
}
