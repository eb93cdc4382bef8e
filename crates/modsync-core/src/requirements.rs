const SPECIFIER_CHARS: [char; 6] = ['<', '>', '=', '~', '[', ';'];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Requirement {
    pub name: String,
    pub version: Option<String>,
}

impl Requirement {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

/// Parses a requirements list. Comment and blank lines are ignored, names
/// are lower-cased and any version specifier is stripped; only an exact
/// `==` pin is kept as the version.
pub fn parse_requirements(content: &str) -> Vec<Requirement> {
    let mut requirements = Vec::new();
    for raw_line in content.lines() {
        let line = raw_line
            .split_once('#')
            .map_or(raw_line, |(before, _)| before)
            .trim();
        if line.is_empty() {
            continue;
        }

        let name = line
            .split(SPECIFIER_CHARS)
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }

        let version = line
            .split_once("==")
            .map(|(_, pin)| pin.split(';').next().unwrap_or_default().trim().to_string())
            .filter(|pin| !pin.is_empty());

        requirements.push(Requirement { name, version });
    }
    requirements
}

pub fn format_requirements(requirements: &[Requirement]) -> String {
    let mut output = String::new();
    for requirement in requirements {
        output.push_str(&requirement.name);
        if let Some(version) = &requirement.version {
            output.push_str("==");
            output.push_str(version);
        }
        output.push('\n');
    }
    output
}
