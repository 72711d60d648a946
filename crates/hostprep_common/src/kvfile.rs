//! KEY=VALUE files
//!
//! Shared by the configuration file and the execution-state file. Reading is
//! tolerant: only lines matching `^[A-Z0-9_]+=.*$` are interpreted, everything
//! else is dropped. Writing always goes through `atomic_write`.

use regex::Regex;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z0-9_]+)=(.*)$").expect("static regex"))
}

/// Whether a line is a well-formed `KEY=VALUE` entry
pub fn is_well_formed(line: &str) -> bool {
    line_re().is_match(line)
}

/// Whether a key is acceptable in a KEY=VALUE file
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Parse file content into a map. Later duplicates win.
pub fn parse(content: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(caps) = line_re().captures(line) {
            map.insert(caps[1].to_string(), unquote(&caps[2]));
        }
    }
    map
}

/// Strip one level of shell-style quoting
pub fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        let inner = &raw[1..raw.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => out.push(next),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => out.push('\\'),
                }
            } else {
                out.push(c);
            }
        }
        out
    } else if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        raw[1..raw.len() - 1].to_string()
    } else {
        raw.to_string()
    }
}

/// Double-quote a value so that `unquote` returns it unchanged
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        // Newlines would break the line-oriented format.
        if c == '\n' || c == '\r' {
            out.push(' ');
            continue;
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Render entries in the given order
pub fn render<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::new();
    for (key, value) in entries {
        out.push_str(key);
        out.push('=');
        out.push_str(&quote(value));
        out.push('\n');
    }
    out
}

/// Read and parse a file. `Ok(None)` when it does not exist.
pub fn read(path: &Path) -> io::Result<Option<BTreeMap<String, String>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(parse(&String::from_utf8_lossy(&bytes)))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Sibling temp path used by `atomic_write`
pub fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "kvfile".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

/// Write data to a file atomically using temp file + rename
///
/// The temp file lives in the same directory so the rename never crosses a
/// filesystem. A reader sees either the old or the new content, never a mix.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let temp = temp_path(path);
    {
        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }

    // Make the rename itself durable.
    if let Ok(dir) = File::open(&parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_filters_malformed_lines() {
        let content = "# comment\nGOOD=1\nlower=2\n  INDENTED=3\nBAD LINE\nALSO_GOOD=\"a b\"\n=x\n";
        let map = parse(content);
        assert_eq!(map.len(), 2);
        assert_eq!(map["GOOD"], "1");
        assert_eq!(map["ALSO_GOOD"], "a b");
    }

    #[test]
    fn test_unquote_variants() {
        assert_eq!(unquote("\"03_nic_ifupdown\""), "03_nic_ifupdown");
        assert_eq!(unquote("'single'"), "single");
        assert_eq!(unquote("bare"), "bare");
        assert_eq!(unquote("\"esc \\\"q\\\"\""), "esc \"q\"");
        assert_eq!(unquote("\""), "\"");
    }

    #[test]
    fn test_quote_survives_unquote() {
        for value in ["plain", "with space", "quote\"inside", "back\\slash", "$HOME", ""] {
            assert_eq!(unquote(&quote(value)), value);
        }
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(read(&dir.path().join("absent")).unwrap().is_none());
    }

    #[test]
    fn test_atomic_write_replaces_and_cleans_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.env");
        atomic_write(&path, b"A=\"1\"\n").unwrap();
        atomic_write(&path, b"A=\"2\"\n").unwrap();

        let map = read(&path).unwrap().unwrap();
        assert_eq!(map["A"], "2");
        assert!(!temp_path(&path).exists());
    }
}
