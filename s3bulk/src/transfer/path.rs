//! Mapping object keys onto local paths.

use std::path::{Path, PathBuf};

use crate::error::{TransferError, TransferResult};
use crate::key::ObjectKey;

/// Local file a download of `key` lands in.
///
/// With `keep_structure` every key segment becomes a directory level under
/// `base`; without it only the file name is kept, so keys sharing a name
/// collide and the last writer wins. Keys that would climb out of `base`
/// (a `..` segment) are rejected.
pub fn destination_path(base: &Path, key: &ObjectKey, keep_structure: bool) -> TransferResult<PathBuf> {
    if key.segments().any(|segment| segment == "..") {
        return Err(TransferError::InvalidKey(format!(
            "{} escapes the destination directory",
            key
        )));
    }

    if !keep_structure {
        return Ok(base.join(key.file_name()));
    }

    let mut path = base.to_path_buf();
    for segment in key.segments().filter(|s| *s != ".") {
        path.push(segment);
    }
    if path == base {
        return Err(TransferError::InvalidKey(format!("{} names no file", key)));
    }
    Ok(path)
}
