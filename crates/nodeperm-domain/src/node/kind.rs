//! Node families and the key codec that recognises them.

use std::fmt;

const GROUP_MARKER: &str = "group.";
const PREFIX_MARKER: &str = "prefix.";
const SUFFIX_MARKER: &str = "suffix.";
const META_MARKER: &str = "meta.";
const WEIGHT_MARKER: &str = "weight.";
const DISPLAY_NAME_MARKER: &str = "displayname.";
const REGEX_MARKER: &str = "r=";

/// Chat meta families that carry a priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatMetaType {
    Prefix,
    Suffix,
}

impl fmt::Display for ChatMetaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatMetaType::Prefix => f.write_str("prefix"),
            ChatMetaType::Suffix => f.write_str("suffix"),
        }
    }
}

/// The family of a node, derived from its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A plain permission string, possibly a wildcard (`a.b.*`, `*`).
    Permission,
    /// `r=<pattern>`: a regular expression matched against checked keys.
    RegexPermission { pattern: String },
    /// `group.<name>`: membership of a group.
    Inheritance { group: String },
    /// `prefix.<priority>.<value>`
    Prefix { priority: i32, value: String },
    /// `suffix.<priority>.<value>`
    Suffix { priority: i32, value: String },
    /// `meta.<key>.<value>`
    Meta { key: String, value: String },
    /// `weight.<n>`
    Weight { weight: i32 },
    /// `displayname.<name>`
    DisplayName { name: String },
}

impl NodeKind {
    /// Parses a raw key into its canonical form and family.
    ///
    /// Keys that carry a family marker but do not parse fall back to a
    /// lowercased [`NodeKind::Permission`].
    pub fn parse(raw: &str) -> (String, NodeKind) {
        let raw = raw.trim();
        let lower = raw.to_lowercase();

        let kind = if let Some(rest) = strip_marker(raw, &lower, GROUP_MARKER) {
            Some(NodeKind::Inheritance {
                group: rest.to_lowercase(),
            })
        } else if let Some(rest) = strip_marker(raw, &lower, PREFIX_MARKER) {
            parse_chat_meta(rest).map(|(priority, value)| NodeKind::Prefix { priority, value })
        } else if let Some(rest) = strip_marker(raw, &lower, SUFFIX_MARKER) {
            parse_chat_meta(rest).map(|(priority, value)| NodeKind::Suffix { priority, value })
        } else if let Some(rest) = strip_marker(raw, &lower, META_MARKER) {
            split_escaped(rest).and_then(|(key, value)| {
                let key = unescape(key).to_lowercase();
                (!key.is_empty()).then(|| NodeKind::Meta {
                    key,
                    value: unescape(value),
                })
            })
        } else if let Some(rest) = strip_marker(raw, &lower, WEIGHT_MARKER) {
            rest.parse().ok().map(|weight| NodeKind::Weight { weight })
        } else if let Some(rest) = strip_marker(raw, &lower, DISPLAY_NAME_MARKER) {
            (!rest.is_empty()).then(|| NodeKind::DisplayName {
                name: rest.to_string(),
            })
        } else if let Some(rest) = strip_marker(raw, &lower, REGEX_MARKER) {
            (!rest.is_empty()).then(|| NodeKind::RegexPermission {
                pattern: rest.to_string(),
            })
        } else {
            None
        };

        match kind {
            Some(kind) => (kind.to_key(), kind),
            None => (lower, NodeKind::Permission),
        }
    }

    /// Encodes this family back into a key. Not meaningful for
    /// [`NodeKind::Permission`], whose key is the permission itself.
    pub(crate) fn to_key(&self) -> String {
        match self {
            NodeKind::Permission => String::new(),
            NodeKind::RegexPermission { pattern } => format!("{REGEX_MARKER}{pattern}"),
            NodeKind::Inheritance { group } => format!("{GROUP_MARKER}{group}"),
            NodeKind::Prefix { priority, value } => {
                format!("{PREFIX_MARKER}{priority}.{}", escape(value))
            }
            NodeKind::Suffix { priority, value } => {
                format!("{SUFFIX_MARKER}{priority}.{}", escape(value))
            }
            NodeKind::Meta { key, value } => {
                format!("{META_MARKER}{}.{}", escape(key), escape(value))
            }
            NodeKind::Weight { weight } => format!("{WEIGHT_MARKER}{weight}"),
            NodeKind::DisplayName { name } => format!("{DISPLAY_NAME_MARKER}{name}"),
        }
    }

    /// Returns the chat meta family, priority and value of prefix/suffix nodes.
    pub fn chat_meta(&self) -> Option<(ChatMetaType, i32, &str)> {
        match self {
            NodeKind::Prefix { priority, value } => Some((ChatMetaType::Prefix, *priority, value)),
            NodeKind::Suffix { priority, value } => Some((ChatMetaType::Suffix, *priority, value)),
            _ => None,
        }
    }
}

/// Strips a case-insensitive marker, returning the remainder of the original key.
fn strip_marker<'a>(raw: &'a str, lower: &str, marker: &str) -> Option<&'a str> {
    // Lowercasing can change byte lengths outside ASCII; markers are ASCII.
    if lower.starts_with(marker) && raw.is_char_boundary(marker.len()) {
        let head = &raw[..marker.len()];
        head.eq_ignore_ascii_case(marker).then(|| &raw[marker.len()..])
    } else {
        None
    }
}

fn parse_chat_meta(rest: &str) -> Option<(i32, String)> {
    let (priority, value) = split_escaped(rest)?;
    let priority = priority.parse().ok()?;
    Some((priority, unescape(value)))
}

/// Splits at the first `.` that is not escaped with `\`.
fn split_escaped(s: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '.' if !escaped => return Some((&s[..i], &s[i + 1..])),
            _ => escaped = false,
        }
    }
    None
}

/// Escapes `\` and `.` so the value survives key encoding.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || c == '.' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Reverses [`escape`]. A trailing lone `\` is kept.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}
