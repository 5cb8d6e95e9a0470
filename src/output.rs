use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::directory::{AttributeValue, DirectoryEntry};
use crate::error::{Error, Result};
use crate::lookup::LookupResult;
use crate::schema::render_schema;


#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct EntryRecord {
    pub dn: String,
    pub attributes: BTreeMap<String, Vec<AttributeValue>>,
}
impl From<&DirectoryEntry> for EntryRecord {
    fn from(entry: &DirectoryEntry) -> Self {
        let attributes = entry.attributes.iter()
            .map(|(name, values)| (name.to_string(), values.clone()))
            .collect();
        Self {
            dn: entry.dn.clone(),
            attributes,
        }
    }
}


/// Entries that fail to serialize are logged and left out.
pub fn render_result(result: &LookupResult) -> String {
    let mut records = Vec::with_capacity(result.entries.len());
    for entry in &result.entries {
        match serde_json::to_value(EntryRecord::from(entry)) {
            Ok(value) => records.push(value),
            Err(e) => warn!(dn = %entry.dn, "leaving entry out of output: {}", e),
        }
    }
    let mut rendered = serde_json::to_string_pretty(&records)
        .unwrap_or_else(|e| {
            warn!("failed to render search result: {}", e);
            String::from("[]")
        });
    rendered.push('\n');
    rendered
}

pub fn write_result(path: &Path, result: &LookupResult) -> Result<()> {
    atomic_write(path, render_result(result).as_bytes())?;
    info!(path = %path.display(), entries = result.entries.len(), "wrote search result");
    Ok(())
}

pub fn write_schema(path: &Path, entries: &[DirectoryEntry]) -> Result<()> {
    atomic_write(path, render_schema(entries).as_bytes())?;
    info!(path = %path.display(), "wrote schema dump");
    Ok(())
}


fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let write = || -> io::Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    };
    write().map_err(|source| Error::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    })
}
