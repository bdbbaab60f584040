//! The command-CRC artifact cache.
//!
//! Every build artifact is keyed by the CRC-32 of the exact command line that
//! produced it. On each build the current CRCs are computed and any artifact
//! whose CRC differs from the cached value (or has none) is rebuilt, so
//! changing a compiler flag is enough to force a rebuild. The table persists
//! between runs as a magic/version-guarded JSON file; anything unreadable or
//! mismatched is discarded rather than treated as an error.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, TranspileError};

/// Artifact name to CRC-32 of the command that produced it.
pub type ArtifactCrcTable = HashMap<String, u32>;

const CACHE_MAGIC: &str = "cedilla-command-cache";
const CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    magic: String,
    version: u32,
    crcs: ArtifactCrcTable,
}

/// CRC-32 of a resolved command line.
pub fn command_crc(command_line: &str) -> u32 {
    crc32fast::hash(command_line.as_bytes())
}

/// Whether `artifact` must be rebuilt given the cached table and this run's
/// command CRC.
pub fn artifact_needs_rebuild(cached: &ArtifactCrcTable, artifact: &str, current_crc: u32) -> bool {
    cached.get(artifact) != Some(&current_crc)
}

/// Load the persisted table. A missing, corrupt, or version-mismatched file
/// yields an empty table: the worst case is a full rebuild.
pub fn load_command_crcs(path: &Path) -> ArtifactCrcTable {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return ArtifactCrcTable::new();
    };
    let Ok(file) = serde_json::from_str::<CacheFile>(&contents) else {
        return ArtifactCrcTable::new();
    };
    if file.magic != CACHE_MAGIC || file.version != CACHE_VERSION {
        return ArtifactCrcTable::new();
    }
    file.crcs
}

/// Persist the table for the next run.
pub fn store_command_crcs(path: &Path, crcs: &ArtifactCrcTable) -> Result<(), TranspileError> {
    let file = CacheFile {
        magic: CACHE_MAGIC.to_string(),
        version: CACHE_VERSION,
        crcs: crcs.clone(),
    };
    let contents = serde_json::to_string_pretty(&file).map_err(|error| {
        TranspileError::at_file(
            ErrorKind::Write {
                message: format!("could not serialize command cache: {error}"),
            },
            &path.display().to_string(),
        )
    })?;
    std::fs::write(path, contents).map_err(|error| {
        TranspileError::at_file(
            ErrorKind::Write {
                message: format!("could not write command cache: {error}"),
            },
            &path.display().to_string(),
        )
    })
}
