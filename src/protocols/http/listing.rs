//! Directory enumeration for index pages.

use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::Path;

/// One entry of a directory listing.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Local>>,
}

/// List `dir` non-recursively: directories first, then files, each group
/// sorted by name.
///
/// Entries whose names are not valid UTF-8 or whose metadata cannot be read
/// are skipped.
pub fn read_entries(dir: &Path) -> io::Result<Vec<DirEntry>> {
    let mut entries = Vec::new();

    for item in fs::read_dir(dir)? {
        let item = item?;
        let Ok(name) = item.file_name().into_string() else {
            continue;
        };
        // Follows symlinks so a link to a directory lists as one
        let Ok(meta) = fs::metadata(item.path()) else {
            continue;
        };

        entries.push(DirEntry {
            name,
            is_dir: meta.is_dir(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            modified: meta.modified().ok().map(DateTime::<Local>::from),
        });
    }

    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    Ok(entries)
}
