//! Folder views over flat key listings.
//!
//! Object stores have no directories, only keys with `/` in them. These
//! helpers rebuild the implied hierarchy for display and for picking whole
//! folders to download.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::key::{ObjectKey, SEPARATOR};

/// Title line of a rendered tree.
pub const TREE_TITLE: &str = "S3 File Structure";

/// Nested name to children map built from keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderTree {
    children: BTreeMap<String, FolderTree>,
}

impl FolderTree {
    /// Build the hierarchy implied by `keys`. Empty segments are ignored.
    pub fn from_keys<'a, I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = &'a K>,
        K: AsRef<str> + ?Sized + 'a,
    {
        let mut root = FolderTree::default();
        for key in keys {
            let mut level = &mut root;
            for segment in key.as_ref().split(SEPARATOR).filter(|s| !s.is_empty()) {
                level = level.children.entry(segment.to_string()).or_default();
            }
        }
        root
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Direct children, sorted by name.
    pub fn children(&self) -> impl Iterator<Item = (&str, &FolderTree)> {
        self.children.iter().map(|(name, child)| (name.as_str(), child))
    }

    /// Number of leaves (entries with no children).
    pub fn leaf_count(&self) -> usize {
        self.children
            .values()
            .map(|child| if child.is_empty() { 1 } else { child.leaf_count() })
            .sum()
    }

    /// Render as indented tree text under [`TREE_TITLE`].
    pub fn render(&self) -> String {
        let mut out = String::from(TREE_TITLE);
        out.push('\n');
        self.render_into(&mut out, "");
        out
    }

    fn render_into(&self, out: &mut String, indent: &str) {
        let count = self.children.len();
        for (i, (name, child)) in self.children.iter().enumerate() {
            let last = i + 1 == count;
            out.push_str(indent);
            out.push_str(if last { "└── " } else { "├── " });
            out.push_str(name);
            out.push('\n');

            let next = format!("{}{}", indent, if last { "    " } else { "│   " });
            child.render_into(out, &next);
        }
    }
}

impl fmt::Display for FolderTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Every folder prefix implied by `keys`, sorted and deduplicated.
///
/// A last segment containing `.` names a file and is not a folder. Folders
/// are returned with a trailing `/` so they can be used as list prefixes.
pub fn extract_folders<'a>(keys: impl IntoIterator<Item = &'a ObjectKey>) -> Vec<String> {
    let mut folders = BTreeSet::new();
    for key in keys {
        let segments: Vec<&str> = key.segments().collect();
        let folder_depth = if key.looks_like_file() {
            segments.len() - 1
        } else {
            segments.len()
        };

        let mut prefix = String::new();
        for segment in &segments[..folder_depth] {
            prefix.push_str(segment);
            prefix.push(SEPARATOR);
            folders.insert(prefix.clone());
        }
    }
    folders.into_iter().collect()
}
