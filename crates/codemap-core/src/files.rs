//! Source-file discovery helpers shared by validators, loaders, and mappers.

use std::fs;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::ZipArchive;

/// Find a zip file under `root` (recursively) whose name contains `pattern`.
pub fn find_zip(root: &Path, pattern: &str) -> Option<PathBuf> {
    if !root.is_dir() {
        return None;
    }
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .find(|e| {
            let name = e.file_name().to_string_lossy();
            name.ends_with(".zip") && name.contains(pattern)
        })
        .map(|e| e.into_path())
}

/// Find a zip entry whose path contains all of the given keywords.
pub fn find_zip_entry<R: Read + Seek>(archive: &ZipArchive<R>, keywords: &[&str]) -> Option<String> {
    archive
        .file_names()
        .find(|name| keywords.iter().all(|kw| name.contains(kw)))
        .map(String::from)
}

/// List the regular files directly inside `dir`, sorted by name.
///
/// Sorting makes "first matching file wins" selection deterministic across
/// platforms.
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    files
}

/// File name (lossy) of a path, lowercased.
pub fn file_name_lower(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_find_zip_recurses() {
        let tmp = TempDir::new().unwrap();
        let sub = tmp.path().join("snomed");
        fs::create_dir_all(&sub).unwrap();
        fs::File::create(sub.join("SnomedCT_Release.zip")).unwrap();
        fs::File::create(sub.join("notes.txt")).unwrap();

        let found = find_zip(tmp.path(), "SnomedCT").unwrap();
        assert!(found.ends_with("SnomedCT_Release.zip"));
        assert!(find_zip(tmp.path(), "RxNorm").is_none());
    }

    #[test]
    fn test_find_zip_entry_matches_all_keywords() {
        let tmp = TempDir::new().unwrap();
        let zip_path = tmp.path().join("release.zip");
        let file = fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer
            .start_file("Snapshot/Terminology/sct2_Concept_Snapshot.txt", options)
            .unwrap();
        writer.write_all(b"id\n").unwrap();
        writer.finish().unwrap();

        let archive = ZipArchive::new(fs::File::open(&zip_path).unwrap()).unwrap();
        assert!(find_zip_entry(&archive, &["Snapshot", "Concept"]).is_some());
        assert!(find_zip_entry(&archive, &["Snapshot", "Description"]).is_none());
    }
}
