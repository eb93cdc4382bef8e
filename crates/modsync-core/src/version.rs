use std::cmp::Ordering;
use std::fmt;

/// One dot or dash separated piece of a version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionToken {
    Numeric(u64),
    Text(String),
}

impl VersionToken {
    fn parse(raw: &str) -> Self {
        match raw.parse::<u64>() {
            Ok(value) => Self::Numeric(value),
            Err(_) => Self::Text(raw.to_string()),
        }
    }

    /// `2rc1` becomes `2` then `rc1`, so the release number is compared
    /// before its suffix.
    fn split_segment(raw: &str) -> Vec<Self> {
        let digits = raw.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 || digits == raw.len() {
            return vec![Self::parse(raw)];
        }
        vec![Self::parse(&raw[..digits]), Self::parse(&raw[digits..])]
    }
}

impl Ord for VersionToken {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Numeric(left), Self::Numeric(right)) => left.cmp(right),
            (Self::Text(left), Self::Text(right)) => left.cmp(right),
            // pre-release style suffixes sort below any release segment
            (Self::Text(_), Self::Numeric(_)) => Ordering::Less,
            (Self::Numeric(_), Self::Text(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for VersionToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// Opaque version string split into comparable tokens.
///
/// Missing trailing tokens count as `0`, so `1.0` and `1.0.0` are equal and
/// `1.0.0-rc1` sorts below `1.0.0`. A text token against a numeric one
/// always sorts lower.
#[derive(Debug, Clone)]
pub struct VersionTokens {
    tokens: Vec<VersionToken>,
}

impl VersionTokens {
    pub fn parse(input: &str) -> Self {
        let tokens = input
            .trim()
            .trim_start_matches(['v', 'V'])
            .split(['.', '-'])
            .filter(|part| !part.is_empty())
            .flat_map(VersionToken::split_segment)
            .collect();
        Self { tokens }
    }

    pub fn tokens(&self) -> &[VersionToken] {
        &self.tokens
    }

    pub fn leading(&self) -> VersionToken {
        self.tokens
            .first()
            .cloned()
            .unwrap_or(VersionToken::Numeric(0))
    }
}

impl Ord for VersionTokens {
    fn cmp(&self, other: &Self) -> Ordering {
        let zero = VersionToken::Numeric(0);
        let len = self.tokens.len().max(other.tokens.len());
        for index in 0..len {
            let left = self.tokens.get(index).unwrap_or(&zero);
            let right = other.tokens.get(index).unwrap_or(&zero);
            match left.cmp(right) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for VersionTokens {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for VersionTokens {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionTokens {}

pub fn compare_versions(left: &str, right: &str) -> Ordering {
    VersionTokens::parse(left).cmp(&VersionTokens::parse(right))
}

/// True when the leading segment differs, e.g. `1.9.9` to `2.0`.
pub fn is_major_change(from: &str, to: &str) -> bool {
    VersionTokens::parse(from).leading() != VersionTokens::parse(to).leading()
}
