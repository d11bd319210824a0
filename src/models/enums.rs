use serde::{Deserialize, Serialize};

use super::ModelError;

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(ModelError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(LabFlag {
    Low => "low",
    High => "high",
    Normal => "normal",
    Unknown => "unknown",
});

str_enum!(MatchConfidence {
    High => "high",
    Fuzzy => "fuzzy",
    Unresolved => "unresolved",
});

str_enum!(TokenKind {
    LabelFragment => "label_fragment",
    Numeric => "numeric",
    UnitFragment => "unit_fragment",
    RangeFragment => "range_fragment",
    Noise => "noise",
});

str_enum!(Sex {
    Male => "male",
    Female => "female",
});

str_enum!(Highlight {
    Normal => "normal",
    Warning => "warning",
    Unknown => "unknown",
});

str_enum!(RangeSource {
    Extracted => "extracted",
    Catalog => "catalog",
    Unavailable => "unavailable",
});

impl LabFlag {
    /// Display label used in rendered lab lines ("Low", "Normal", ...).
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::High => "High",
            Self::Normal => "Normal",
            Self::Unknown => "Unknown",
        }
    }

    pub fn highlight(&self) -> Highlight {
        match self {
            Self::Normal => Highlight::Normal,
            Self::Low | Self::High => Highlight::Warning,
            Self::Unknown => Highlight::Unknown,
        }
    }
}

impl MatchConfidence {
    /// One step weaker: High becomes Fuzzy. Fuzzy and Unresolved are unchanged,
    /// since a matched test id is never demoted to Unresolved.
    pub fn downgraded(self) -> Self {
        match self {
            Self::High => Self::Fuzzy,
            other => other,
        }
    }
}

impl Sex {
    /// Parse the loose spellings found in report headers ("M", "Female", "f").
    pub fn parse_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "m" | "male" | "man" => Some(Self::Male),
            "f" | "female" | "woman" => Some(Self::Female),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn lab_flag_round_trip() {
        for (variant, s) in [
            (LabFlag::Low, "low"),
            (LabFlag::High, "high"),
            (LabFlag::Normal, "normal"),
            (LabFlag::Unknown, "unknown"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(LabFlag::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn token_kind_serializes_snake_case() {
        let json = serde_json::to_string(&TokenKind::RangeFragment).unwrap();
        assert_eq!(json, "\"range_fragment\"");
        assert_eq!(
            TokenKind::from_str("unit_fragment").unwrap(),
            TokenKind::UnitFragment
        );
    }

    #[test]
    fn invalid_enum_returns_error() {
        assert!(LabFlag::from_str("critical").is_err());
        assert!(MatchConfidence::from_str("").is_err());
        let err = Sex::from_str("x").unwrap_err();
        assert!(err.to_string().contains("Sex"));
    }

    #[test]
    fn highlight_follows_flag() {
        assert_eq!(LabFlag::Normal.highlight(), Highlight::Normal);
        assert_eq!(LabFlag::Low.highlight(), Highlight::Warning);
        assert_eq!(LabFlag::High.highlight(), Highlight::Warning);
        assert_eq!(LabFlag::Unknown.highlight(), Highlight::Unknown);
    }

    #[test]
    fn downgrade_never_reaches_unresolved() {
        assert_eq!(MatchConfidence::High.downgraded(), MatchConfidence::Fuzzy);
        assert_eq!(MatchConfidence::Fuzzy.downgraded(), MatchConfidence::Fuzzy);
        assert_eq!(
            MatchConfidence::Unresolved.downgraded(),
            MatchConfidence::Unresolved
        );
    }

    #[test]
    fn sex_parses_header_spellings() {
        assert_eq!(Sex::parse_loose("M"), Some(Sex::Male));
        assert_eq!(Sex::parse_loose(" Female "), Some(Sex::Female));
        assert_eq!(Sex::parse_loose("other"), None);
    }
}
