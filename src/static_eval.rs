//! Static Expression Evaluator
//!
//! Evaluates the small literal expressions found as arguments of native load
//! helpers (`require('bindings')('addon')`, `binary.find(path.join(__dirname, './package.json'))`)
//! to the string they produce. Only literals are understood: quoted strings,
//! template literals, `+` concatenation, parentheses, numbers and lookups of
//! a fixed set of names. Anything else is unresolvable.

use std::collections::HashMap;

/// Names an expression may refer to, keyed by their dotted form
/// (`process.platform`, `path.sep`).
#[derive(Debug, Clone, Default)]
pub struct EvalScope {
    values: HashMap<String, String>,
}

impl EvalScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// The variables visible to load-helper arguments.
    pub fn for_target(platform: &str, arch: &str, node_version: Option<&str>) -> Self {
        let mut scope = Self::new();
        scope.insert("process.platform", platform);
        scope.insert("process.arch", arch);
        if let Some(version) = node_version {
            scope.insert("process.versions.node", version);
            scope.insert("process.version", &format!("v{}", version));
        }
        let sep = if platform == "win32" { "\\" } else { "/" };
        scope.insert("path.sep", sep);
        scope
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&String> {
        self.values.get(name)
    }
}

/// Try to evaluate an expression to a static string value.
/// Returns None if the expression cannot be statically resolved.
pub fn static_eval(expr: &str, scope: &EvalScope) -> Option<String> {
    let trimmed = expr.trim().trim_end_matches(';').trim();

    if trimmed.is_empty() {
        return None;
    }

    if let Some(literal) = try_parse_string_literal(trimmed) {
        return Some(literal);
    }

    if let Some(inner) = strip_enclosing_parens(trimmed) {
        return static_eval(inner, scope);
    }

    let parts = split_top_level_plus(trimmed);
    if parts.len() > 1 {
        let mut result = String::new();
        for part in parts {
            result.push_str(&static_eval(part, scope)?);
        }
        return Some(result);
    }

    if let Some(resolved) = try_resolve_template_literal(trimmed, scope) {
        return Some(resolved);
    }

    if trimmed.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return trimmed.parse::<f64>().ok().map(format_number);
    }

    if is_valid_path_expression(trimmed) {
        return scope.get(trimmed).cloned();
    }

    None
}

fn format_number(num: f64) -> String {
    if num.fract() == 0.0 && num.abs() < 1e15 {
        format!("{}", num as i64)
    } else {
        num.to_string()
    }
}

/// A string literal is a single quoted run with no unescaped closing quote
/// before the end.
fn try_parse_string_literal(s: &str) -> Option<String> {
    let quote = s.chars().next()?;
    if !matches!(quote, '"' | '\'' | '`') || s.len() < 2 || !s.ends_with(quote) {
        return None;
    }
    let inner = &s[1..s.len() - 1];
    if quote == '`' && inner.contains("${") {
        return None;
    }

    let mut escaped = false;
    for c in inner.chars() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            // 'a' + 'b' starts and ends with a quote too
            return None;
        }
    }

    Some(unescape_string(inner))
}

/// Unescape basic string escape sequences
fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('0') => result.push('\0'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('\'') => result.push('\''),
                Some('`') => result.push('`'),
                Some('/') => result.push('/'),
                Some(other) => result.push(other),
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// `( ... )` where the opening paren closes at the very end.
fn strip_enclosing_parens(s: &str) -> Option<&str> {
    if !s.starts_with('(') || !s.ends_with(')') {
        return None;
    }
    let bytes = s.as_bytes();
    let mut depth = 0i32;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => i = skip_quoted(bytes, i),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 && i != bytes.len() - 1 {
                    return None;
                }
            }
            _ => {}
        }
        i += 1;
    }
    Some(&s[1..s.len() - 1])
}

/// Index of the closing quote of the literal opening at `start`.
fn skip_quoted(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() && bytes[i] != quote {
        if bytes[i] == b'\\' {
            i += 1;
        }
        i += 1;
    }
    i
}

/// Split on `+` outside quotes, parens and template interpolations.
fn split_top_level_plus(expr: &str) -> Vec<&str> {
    let bytes = expr.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut last = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => i = skip_quoted(bytes, i),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'+' if depth == 0 => {
                parts.push(&expr[last..i]);
                last = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&expr[last..]);
    parts
}

/// Try to resolve a template literal with interpolations
fn try_resolve_template_literal(expr: &str, scope: &EvalScope) -> Option<String> {
    if expr.len() < 2 || !expr.starts_with('`') || !expr.ends_with('`') {
        return None;
    }

    let inner = &expr[1..expr.len() - 1];
    let mut result = String::new();
    let chars: Vec<char> = inner.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() {
            result.push_str(&unescape_string(&chars[i..i + 2].iter().collect::<String>()));
            i += 2;
        } else if i + 1 < chars.len() && chars[i] == '$' && chars[i + 1] == '{' {
            let start = i + 2;
            let mut depth = 1;
            let mut end = start;

            while end < chars.len() && depth > 0 {
                match chars[end] {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
                end += 1;
            }

            if depth != 0 {
                return None;
            }
            let interpolation: String = chars[start..end - 1].iter().collect();
            result.push_str(&static_eval(&interpolation, scope)?);
            i = end;
        } else if chars[i] == '`' {
            return None;
        } else {
            result.push(chars[i]);
            i += 1;
        }
    }

    Some(result)
}

/// `ident(.ident)*`
fn is_valid_path_expression(s: &str) -> bool {
    s.split('.').all(is_valid_identifier)
}

/// Check if a string is a valid JavaScript identifier
fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();

    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> EvalScope {
        EvalScope::for_target("linux", "x64", Some("20.11.0"))
    }

    #[test]
    fn test_string_literals() {
        let scope = EvalScope::new();
        assert_eq!(static_eval("\"addon\"", &scope), Some("addon".to_string()));
        assert_eq!(static_eval("'addon.node'", &scope), Some("addon.node".to_string()));
        assert_eq!(static_eval("`plain`", &scope), Some("plain".to_string()));
        assert_eq!(static_eval("'it\\'s'", &scope), Some("it's".to_string()));
    }

    #[test]
    fn test_concatenation() {
        assert_eq!(
            static_eval("'./' + 'package' + \".json\"", &scope()),
            Some("./package.json".to_string())
        );
        assert_eq!(
            static_eval("'a+b' + 'c'", &scope()),
            Some("a+bc".to_string())
        );
        assert_eq!(
            static_eval("('lib' + path.sep) + 'addon'", &scope()),
            Some("lib/addon".to_string())
        );
    }

    #[test]
    fn test_template_literal() {
        assert_eq!(
            static_eval("`addon-${process.platform}-${process.arch}.node`", &scope()),
            Some("addon-linux-x64.node".to_string())
        );
        assert_eq!(
            static_eval("`v${process.versions.node}`", &scope()),
            Some("v20.11.0".to_string())
        );
    }

    #[test]
    fn test_property_lookup() {
        assert_eq!(
            static_eval("process.platform", &scope()),
            Some("linux".to_string())
        );
        assert_eq!(static_eval("process.env.HOME", &scope()), None);
        assert_eq!(static_eval("someVariable", &scope()), None);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(static_eval("'v' + 3", &scope()), Some("v3".to_string()));
    }

    #[test]
    fn test_non_literals_are_unresolvable() {
        assert_eq!(static_eval("getName()", &scope()), None);
        assert_eq!(static_eval("'a' + name", &scope()), None);
        assert_eq!(static_eval("`${ unknown }`", &scope()), None);
        assert_eq!(static_eval("", &scope()), None);
        assert_eq!(static_eval("'unterminated", &scope()), None);
    }
}
