//! Static import analysis. Source is tokenized just enough to drop
//! comments and string literals and to join continued lines; nothing is
//! evaluated.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportScan {
    /// Top-level module names in first-seen order, each once.
    pub modules: Vec<String>,
    /// Import statements that could not be understood.
    pub unresolved: Vec<String>,
}

impl ImportScan {
    fn add_module(&mut self, dotted: &str) {
        let top = dotted.split('.').next().unwrap_or(dotted).to_string();
        if !self.modules.contains(&top) {
            self.modules.push(top);
        }
    }
}

pub fn scan_imports(source: &str) -> ImportScan {
    let mut scan = ImportScan::default();
    for line in logical_lines(source) {
        for statement in line.split(';') {
            scan_statement(statement.trim(), &mut scan);
        }
    }
    scan
}

fn scan_statement(statement: &str, scan: &mut ImportScan) {
    if let Some(rest) = strip_keyword(statement, "import") {
        scan_import_list(statement, rest, scan);
    } else if let Some(rest) = strip_keyword(statement, "from") {
        scan_from_import(statement, rest, scan);
    }
}

fn strip_keyword<'a>(statement: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = statement.strip_prefix(keyword)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) || rest.starts_with('(') {
        Some(rest.trim())
    } else {
        None
    }
}

/// `import a, b.c as d`
fn scan_import_list(statement: &str, rest: &str, scan: &mut ImportScan) {
    let mut names = Vec::new();
    for item in rest.split(',') {
        let mut words = item.split_whitespace();
        let Some(dotted) = words.next().filter(|word| is_dotted_identifier(word)) else {
            scan.unresolved.push(statement.to_string());
            return;
        };
        let alias_ok = match (words.next(), words.next(), words.next()) {
            (None, _, _) => true,
            (Some("as"), Some(alias), None) => is_identifier(alias),
            _ => false,
        };
        if !alias_ok {
            scan.unresolved.push(statement.to_string());
            return;
        }
        names.push(dotted);
    }
    for dotted in names {
        scan.add_module(dotted);
    }
}

/// `from x.y import z`; relative forms are skipped.
fn scan_from_import(statement: &str, rest: &str, scan: &mut ImportScan) {
    let mut words = rest.splitn(2, char::is_whitespace);
    let module = words.next().unwrap_or_default();
    let imported = words.next().map(str::trim).unwrap_or_default();

    if module.starts_with('.') {
        return;
    }
    let names_ok = strip_keyword(imported, "import").is_some_and(|names| !names.is_empty());
    if !is_dotted_identifier(module) || !names_ok {
        scan.unresolved.push(statement.to_string());
        return;
    }
    scan.add_module(module);
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    chars
        .next()
        .is_some_and(|first| first.is_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_alphanumeric() || ch == '_')
}

fn is_dotted_identifier(word: &str) -> bool {
    !word.is_empty() && word.split('.').all(is_identifier)
}

/// Physical lines joined into logical lines: bracketed and backslash
/// continuations are merged, comments dropped, every string literal
/// replaced by `""`.
fn logical_lines(source: &str) -> Vec<String> {
    let chars = source.replace("\r\n", "\n").chars().collect::<Vec<_>>();
    let len = chars.len();
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut depth = 0_usize;
    let mut i = 0;

    while i < len {
        let ch = chars[i];
        match ch {
            '#' => {
                while i < len && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '\'' | '"' => {
                let triple = i + 2 < len && chars[i + 1] == ch && chars[i + 2] == ch;
                i += if triple { 3 } else { 1 };
                while i < len {
                    if chars[i] == '\\' {
                        i += 2;
                        continue;
                    }
                    if triple {
                        if chars[i] == ch && i + 2 < len && chars[i + 1] == ch && chars[i + 2] == ch
                        {
                            i += 3;
                            break;
                        }
                    } else if chars[i] == ch {
                        i += 1;
                        break;
                    } else if chars[i] == '\n' {
                        break;
                    }
                    i += 1;
                }
                current.push_str("\"\"");
                continue;
            }
            '\\' if i + 1 < len && chars[i + 1] == '\n' => {
                current.push(' ');
                i += 2;
                continue;
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            '\n' => {
                if depth > 0 {
                    current.push(' ');
                } else {
                    lines.push(std::mem::take(&mut current));
                }
                i += 1;
                continue;
            }
            _ => {}
        }
        current.push(ch);
        i += 1;
    }

    if !current.trim().is_empty() {
        lines.push(current);
    }
    lines
}
