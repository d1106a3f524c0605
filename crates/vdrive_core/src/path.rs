//! Drive-rooted path rules.
//!
//! Stored paths look like `C:\GAMES\SAVE.DAT`: an ASCII drive letter, a colon,
//! then backslash-separated components. Forward slashes are accepted on input
//! and rewritten, repeated separators collapse, and the drive letter is
//! uppercased. Component case is preserved.
//!
//! `C:` and `C:\` name the drive itself. They are placeholders that clients
//! keep in their trees but the store never persists.

use crate::error::PathError;

/// Hierarchy separator.
pub const SEPARATOR: char = '\\';

/// Normalize a client-supplied path into its stored form.
///
/// Drive roots normalize to `X:\`; use [`normalize_entry_path`] when the
/// result must name a storable entry.
pub fn normalize(raw: &str) -> Result<String, PathError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }

    let unified: String = trimmed
        .chars()
        .map(|c| if c == '/' { SEPARATOR } else { c })
        .collect();

    let mut chars = unified.chars();
    let drive = match (chars.next(), chars.next()) {
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic() => letter.to_ascii_uppercase(),
        _ => return Err(PathError::NotDriveRooted(raw.to_string())),
    };

    // Both the letter and the colon are ASCII, so byte offset 2 is a boundary.
    let rest = &unified[2..];
    if !rest.is_empty() && !rest.starts_with(SEPARATOR) {
        return Err(PathError::NotDriveRooted(raw.to_string()));
    }

    let mut components = Vec::new();
    for component in rest.split(SEPARATOR).filter(|c| !c.is_empty()) {
        if component == "." || component == ".." || component.chars().any(char::is_control) {
            return Err(PathError::InvalidComponent {
                path: raw.to_string(),
                component: component.to_string(),
            });
        }
        components.push(component);
    }

    let mut normalized = format!("{}:{}", drive, SEPARATOR);
    normalized.push_str(&components.join("\\"));
    Ok(normalized)
}

/// Normalize a path that must name a storable entry (not a drive root).
pub fn normalize_entry_path(raw: &str) -> Result<String, PathError> {
    let normalized = normalize(raw)?;
    if is_drive_root(&normalized) {
        return Err(PathError::DriveRoot(raw.trim().to_string()));
    }
    Ok(normalized)
}

/// Whether a normalized path is a drive root (`X:\`).
pub fn is_drive_root(normalized: &str) -> bool {
    normalized.len() == 3 && normalized.ends_with(":\\")
}

/// Whether a raw client path is a placeholder for a drive root.
///
/// Invalid paths are not placeholders; they fail normalization on their own.
pub fn is_placeholder(raw: &str) -> bool {
    normalize(raw).is_ok_and(|p| is_drive_root(&p))
}

/// Prefix shared by every strict descendant of `dir`.
pub fn child_prefix(dir: &str) -> String {
    if dir.ends_with(SEPARATOR) {
        dir.to_string()
    } else {
        format!("{}{}", dir, SEPARATOR)
    }
}
