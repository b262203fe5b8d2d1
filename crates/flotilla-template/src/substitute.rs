//! The template scanner.
//!
//! Recognized syntax:
//!
//! - `$$`: a literal `$`
//! - `$NAME`, `${NAME}`: external lookup (host environment, usually)
//! - `${NAME:-default}`, `${NAME-default}`: default when empty-or-unset / unset
//! - `${NAME:?err}`, `${NAME?err}`: error when empty-or-unset / unset
//! - `${NAME:+alt}`, `${NAME+alt}`: alternative when set-and-nonempty / set
//! - `${name[key]}`: named-mapping lookup; further `[k]` or `.field`
//!   segments extend the key list, so `${services[db].user}` hands
//!   `("db", "user")` to the `services` mapping
//!
//! Templates nest to arbitrary depth inside bracket keys and default/alt
//! words. Bracket keys may contain dots (label keys do); once resolved, a
//! key must match `[A-Za-z0-9_.-]+`.

use crate::error::TemplateError;
use crate::mappings::NamedMappings;
use once_cell::sync::Lazy;
use regex::Regex;

static KEY_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap());

/// One substitution pass: an external lookup plus the effective named
/// mappings for the site being expanded.
pub struct Substitution<'a> {
    pub lookup: &'a dyn Fn(&str) -> Option<String>,
    pub mappings: &'a NamedMappings,
}

/// Cheap pre-check: can `substitute` change this string at all?
pub fn contains_template(value: &str) -> bool {
    value.contains('$')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    SoftDefault, // :-
    HardDefault, // -
    ErrEmpty,    // :?
    ErrUnset,    // ?
    SoftAlt,     // :+
    HardAlt,     // +
}

impl<'a> Substitution<'a> {
    /// Expand every variable reference in `template`.
    pub fn substitute(&self, template: &str) -> Result<String, TemplateError> {
        let bytes = template.as_bytes();
        let mut out = String::with_capacity(template.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != b'$' {
                // Copy the whole run up to the next '$'.
                let start = i;
                while i < bytes.len() && bytes[i] != b'$' {
                    i += 1;
                }
                out.push_str(&template[start..i]);
                continue;
            }
            match bytes.get(i + 1) {
                Some(b'$') => {
                    out.push('$');
                    i += 2;
                }
                Some(b'{') => {
                    let (inner, end) = read_braced(template, i + 2)?;
                    out.push_str(&self.eval_expression(inner, template)?);
                    i = end;
                }
                Some(&c) if is_name_start(c) => {
                    let start = i + 1;
                    let mut end = start;
                    while end < bytes.len() && is_name_char(bytes[end]) {
                        end += 1;
                    }
                    let name = &template[start..end];
                    out.push_str(&(self.lookup)(name).unwrap_or_default());
                    i = end;
                }
                _ => {
                    return Err(TemplateError::InvalidTemplate {
                        template: template.to_owned(),
                    })
                }
            }
        }
        Ok(out)
    }

    /// Evaluate the inside of one `${…}` group.
    fn eval_expression(&self, expr: &str, template: &str) -> Result<String, TemplateError> {
        let invalid = || TemplateError::InvalidTemplate {
            template: template.to_owned(),
        };

        let bytes = expr.as_bytes();
        let mut i = 0;
        while i < bytes.len() && is_name_char(bytes[i]) {
            i += 1;
        }
        if i == 0 || !is_name_start(bytes[0]) {
            return Err(invalid());
        }
        let name = &expr[..i];

        // Bracketed keys and dotted field continuations.
        let mut raw_keys: Vec<&str> = Vec::new();
        loop {
            match bytes.get(i) {
                Some(b'[') => {
                    let (key, end) = read_bracketed(expr, i + 1).ok_or_else(invalid)?;
                    raw_keys.push(key);
                    i = end;
                }
                Some(b'.') if !raw_keys.is_empty() => {
                    let start = i + 1;
                    let mut end = start;
                    while end < bytes.len() && !matches!(bytes[end], b'.' | b'[' | b':') {
                        end += 1;
                    }
                    if end == start {
                        return Err(invalid());
                    }
                    raw_keys.push(&expr[start..end]);
                    i = end;
                }
                _ => break,
            }
        }

        // Separator and word.
        let rest = &expr[i..];
        let (separator, word) = if rest.is_empty() {
            (None, "")
        } else if let Some(word) = rest.strip_prefix(":-") {
            (Some(Separator::SoftDefault), word)
        } else if let Some(word) = rest.strip_prefix(":?") {
            (Some(Separator::ErrEmpty), word)
        } else if let Some(word) = rest.strip_prefix(":+") {
            (Some(Separator::SoftAlt), word)
        } else if raw_keys.is_empty() {
            // Bare separators only apply to plain names; after a bracketed
            // form `-` would be ambiguous with key text.
            if let Some(word) = rest.strip_prefix('-') {
                (Some(Separator::HardDefault), word)
            } else if let Some(word) = rest.strip_prefix('?') {
                (Some(Separator::ErrUnset), word)
            } else if let Some(word) = rest.strip_prefix('+') {
                (Some(Separator::HardAlt), word)
            } else {
                return Err(invalid());
            }
        } else {
            return Err(invalid());
        };

        let value = self.resolve(name, &raw_keys)?;

        let display_name = if raw_keys.is_empty() {
            name.to_owned()
        } else {
            format!("{name}[{}]", raw_keys.join("]["))
        };

        match separator {
            None => Ok(value.unwrap_or_default()),
            Some(Separator::SoftDefault) => match value {
                Some(v) if !v.is_empty() => Ok(v),
                _ => self.substitute(word),
            },
            Some(Separator::HardDefault) => match value {
                Some(v) => Ok(v),
                None => self.substitute(word),
            },
            Some(Separator::ErrEmpty) => match value {
                Some(v) if !v.is_empty() => Ok(v),
                _ => Err(TemplateError::MissingRequired {
                    name: display_name,
                    message: word.to_owned(),
                }),
            },
            Some(Separator::ErrUnset) => match value {
                Some(v) => Ok(v),
                None => Err(TemplateError::MissingRequired {
                    name: display_name,
                    message: word.to_owned(),
                }),
            },
            Some(Separator::SoftAlt) => match value {
                Some(v) if !v.is_empty() => self.substitute(word),
                _ => Ok(String::new()),
            },
            Some(Separator::HardAlt) => match value {
                Some(_) => self.substitute(word),
                None => Ok(String::new()),
            },
        }
    }

    /// Resolve a plain name via the external lookup, or a bracketed form via
    /// the named mappings, interpolating and validating each key first.
    fn resolve(&self, name: &str, raw_keys: &[&str]) -> Result<Option<String>, TemplateError> {
        if raw_keys.is_empty() {
            return Ok((self.lookup)(name));
        }
        let mapping = self
            .mappings
            .get(name)
            .ok_or_else(|| TemplateError::UnknownMapping {
                name: name.to_owned(),
            })?;
        let mut keys = Vec::with_capacity(raw_keys.len());
        for raw in raw_keys {
            let resolved = if contains_template(raw) {
                self.substitute(raw)?
            } else {
                (*raw).to_owned()
            };
            if !KEY_PATTERN.is_match(&resolved) {
                return Err(TemplateError::InvalidKey {
                    key: (*raw).to_owned(),
                    resolved: (resolved != *raw).then_some(resolved),
                });
            }
            keys.push(resolved);
        }
        mapping.call(&keys)
    }
}

fn is_name_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Read up to the `}` matching the `${` that ends at `start`, skipping
/// nested `${…}` groups. Returns the inner text and the index after `}`.
fn read_braced(template: &str, start: usize) -> Result<(&str, usize), TemplateError> {
    let bytes = template.as_bytes();
    let mut depth = 1usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                depth += 1;
                i += 2;
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&template[start..i], i + 1));
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    Err(TemplateError::InvalidTemplate {
        template: template.to_owned(),
    })
}

/// Read up to the `]` closing the bracket opened just before `start`.
/// A `]` inside a nested `${…}` does not close the key.
fn read_bracketed(expr: &str, start: usize) -> Option<(&str, usize)> {
    let bytes = expr.as_bytes();
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                depth += 1;
                i += 2;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                i += 1;
            }
            b']' if depth == 0 => return Some((&expr[start..i], i + 1)),
            _ => i += 1,
        }
    }
    None
}
