//! Identifier generation and resolution
//!
//! Device, SIM and session IDs use the format `{kind}-{12-hex}[-{slug}]`,
//! for example `dev-3f9a01c2b7e4-pixel-7` or `sim-a81c0d44e2f0`.
//! Commands use a plain sequence number instead (see [`CommandId`]).

use std::collections::HashMap;

/// Sequence number of a queued command; ascending order is queue order
pub type CommandId = u64;

/// Opaque SIM identifier
pub type SimId = String;

/// Opaque device identifier
pub type DeviceId = String;

/// Opaque session identifier
pub type SessionId = String;

/// Generate an ID of the given kind, optionally suffixed with a slug of `label`
pub fn generate_id(kind: &str, label: Option<&str>) -> String {
    let uuid = uuid::Uuid::now_v7().simple().to_string();
    // Tail of a v7 UUID is random; the head is a timestamp shared by IDs minted together
    let tail = &uuid[uuid.len() - 12..];
    match label.map(slugify).filter(|s| !s.is_empty()) {
        Some(slug) => format!("{}-{}-{}", kind, tail, slug),
        None => format!("{}-{}", kind, tail),
    }
}

/// Slugify a label for use in IDs
fn slugify(label: &str) -> String {
    label
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Resolves a partial reference (prefix or slug fragment) to a full ID
pub struct IdResolver<'a> {
    ids: &'a HashMap<String, String>, // id -> display name
}

impl<'a> IdResolver<'a> {
    pub fn new(ids: &'a HashMap<String, String>) -> Self {
        Self { ids }
    }

    /// Resolve a reference to a full ID
    ///
    /// Returns `Ok(Some(id))` for exactly one match, `Ok(None)` for none,
    /// and `Err(candidates)` when the reference is ambiguous.
    pub fn resolve(&self, reference: &str) -> Result<Option<String>, Vec<String>> {
        if self.ids.contains_key(reference) {
            return Ok(Some(reference.to_string()));
        }

        let mut matches: Vec<String> = self
            .ids
            .iter()
            .filter(|(id, name)| id.starts_with(reference) || id.contains(reference) || name.as_str() == reference)
            .map(|(id, _)| id.clone())
            .collect();
        matches.sort();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            _ => Err(matches),
        }
    }
}
