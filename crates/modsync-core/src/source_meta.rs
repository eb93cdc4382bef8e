/// Dunder metadata found in a source-form module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMeta {
    pub version: Option<String>,
    pub repo: Option<String>,
}

/// Static scan for `__version__ = "..."` and `__repo__ = "..."` at module
/// top level. The code is never evaluated; the first assignment of each
/// key wins.
pub fn scan_source(content: &str) -> SourceMeta {
    let mut meta = SourceMeta::default();

    for line in content.lines() {
        if line.starts_with(|ch: char| ch.is_whitespace()) {
            continue;
        }
        let Some((key, value)) = parse_dunder_assignment(line) else {
            continue;
        };
        match key {
            "__version__" if meta.version.is_none() => meta.version = Some(value.to_string()),
            "__repo__" if meta.repo.is_none() => meta.repo = Some(value.to_string()),
            _ => {}
        }
        if meta.version.is_some() && meta.repo.is_some() {
            break;
        }
    }

    meta
}

fn parse_dunder_assignment(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("__")?;
    let ident_len = rest
        .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .unwrap_or(rest.len());
    let key = &line[..ident_len + 2];
    if key.len() < 5 || !key.ends_with("__") {
        return None;
    }

    let mut rest = rest[ident_len..].trim_start();
    if let Some(annotated) = rest.strip_prefix(':') {
        let annotated = annotated.trim_start();
        let type_len = annotated
            .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
            .unwrap_or(annotated.len());
        if type_len == 0 {
            return None;
        }
        rest = annotated[type_len..].trim_start();
    }

    let rest = rest.strip_prefix('=')?.trim_start();
    let rest = match rest.strip_prefix('(') {
        Some(inner) => inner.trim_start(),
        None => rest,
    };

    let quote = rest.chars().next().filter(|ch| *ch == '"' || *ch == '\'')?;
    let body = &rest[1..];
    let end = body.find(quote)?;
    let value = &body[..end];
    if value.is_empty() {
        return None;
    }
    Some((key, value))
}
