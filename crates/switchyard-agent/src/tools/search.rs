// ABOUTME: Search tools: grep_files (regex over file contents) and find_files (glob over names).
// ABOUTME: Both walk the tree on a blocking thread and cap their output.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use switchyard_core::{ParamSpec, ParamType, ToolSchema};
use walkdir::WalkDir;

use super::fs::MAX_READ_BYTES;
use super::{Tool, ToolContext, resolve_path, str_arg};

/// Matching lines reported before grep output is truncated.
pub const MAX_GREP_MATCHES: usize = 500;

/// Paths reported before find output is truncated.
pub const MAX_FIND_RESULTS: usize = 1000;

/// How deep find_files descends below its starting directory.
pub const FIND_MAX_DEPTH: usize = 5;

/// Bytes inspected when deciding whether a file is binary.
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

fn search_root(args: &Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<PathBuf> {
    let raw = str_arg(args, "path").unwrap_or(".");
    let root = resolve_path(raw, ctx);
    if !root.is_dir() {
        bail!("search path '{}' is not a directory", root.display());
    }
    Ok(root)
}

async fn run_blocking<T, F>(f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("search task failed")?
}

pub struct GrepFiles;

#[async_trait]
impl Tool for GrepFiles {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "grep_files",
            "Search file contents recursively with a regular expression. Binary files are skipped; \
             matches are reported as path:line:text.",
            vec![
                ParamSpec::required("pattern", ParamType::String, "Regular expression to search for."),
                ParamSpec::optional(
                    "path",
                    ParamType::Path,
                    "Directory to search. Defaults to the session working directory.",
                ),
            ],
        )
    }

    async fn execute(&self, args: Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let Some(pattern) = str_arg(&args, "pattern") else {
            bail!("pattern must be a string");
        };
        let regex = Regex::new(pattern).with_context(|| format!("invalid pattern '{}'", pattern))?;
        let root = search_root(&args, ctx)?;

        tracing::debug!(pattern, root = %root.display(), "grepping files");
        let (matches, truncated) = run_blocking(move || Ok(grep_tree(&root, &regex))).await?;

        if matches.is_empty() {
            return Ok("No lines matching the pattern were found.".to_string());
        }
        let mut out = format!("{} matching line(s):\n{}", matches.len(), matches.join("\n"));
        if truncated {
            out.push_str(&format!("\n... (output truncated at {} matches)", MAX_GREP_MATCHES));
        }
        Ok(out)
    }
}

/// Returns `path:line:text` entries in walk order and whether the cap was hit.
fn grep_tree(root: &Path, regex: &Regex) -> (Vec<String>, bool) {
    let mut matches = Vec::new();
    let files = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file());

    for entry in files {
        let Some(text) = read_text(entry.path()) else {
            continue;
        };
        for (index, line) in text.lines().enumerate() {
            if !regex.is_match(line) {
                continue;
            }
            if matches.len() >= MAX_GREP_MATCHES {
                return (matches, true);
            }
            matches.push(format!("{}:{}:{}", entry.path().display(), index + 1, line));
        }
    }
    (matches, false)
}

/// File contents as text, or `None` for unreadable, oversized, or binary files.
fn read_text(path: &Path) -> Option<String> {
    let meta = std::fs::metadata(path).ok()?;
    if meta.len() > MAX_READ_BYTES {
        return None;
    }
    let mut bytes = Vec::with_capacity(meta.len() as usize);
    std::fs::File::open(path).ok()?.read_to_end(&mut bytes).ok()?;
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
    if sniff.contains(&0) {
        return None;
    }
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

pub struct FindFiles;

#[async_trait]
impl Tool for FindFiles {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "find_files",
            "Find files and directories whose name matches a glob pattern, up to 5 levels deep.",
            vec![
                ParamSpec::optional(
                    "name_pattern",
                    ParamType::String,
                    "Glob for the file name, e.g. '*.rs'. Omit to list everything.",
                ),
                ParamSpec::optional(
                    "path",
                    ParamType::Path,
                    "Directory to start from. Defaults to the session working directory.",
                ),
            ],
        )
    }

    async fn execute(&self, args: Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let pattern = match str_arg(&args, "name_pattern") {
            Some(raw) => Some(
                glob::Pattern::new(raw).with_context(|| format!("invalid name pattern '{}'", raw))?,
            ),
            None => None,
        };
        let root = search_root(&args, ctx)?;
        let shown = pattern.as_ref().map(|p| p.as_str().to_string()).unwrap_or_else(|| "*".to_string());

        let (found, truncated) = run_blocking(move || Ok(find_tree(&root, pattern.as_ref()))).await?;

        if found.is_empty() {
            return Ok(format!("No files found matching '{}'.", shown));
        }
        let mut out = format!("{} path(s) matching '{}':\n{}", found.len(), shown, found.join("\n"));
        if truncated {
            out.push_str(&format!("\n... (output truncated at {} paths)", MAX_FIND_RESULTS));
        }
        Ok(out)
    }
}

fn find_tree(root: &Path, pattern: Option<&glob::Pattern>) -> (Vec<String>, bool) {
    let mut found = Vec::new();
    let entries = WalkDir::new(root)
        .min_depth(1)
        .max_depth(FIND_MAX_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok);

    for entry in entries {
        let name = entry.file_name().to_string_lossy();
        if pattern.is_some_and(|p| !p.matches(&name)) {
            continue;
        }
        if found.len() >= MAX_FIND_RESULTS {
            return (found, true);
        }
        found.push(entry.path().display().to_string());
    }
    (found, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/bin")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn answer() -> u32 {\n    42\n}\n").unwrap();
        std::fs::write(dir.path().join("src/bin/main.rs"), "fn main() {\n    answer();\n}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "call answer() for 42\n").unwrap();
        std::fs::write(dir.path().join("blob.bin"), b"answer\0\x01\x02").unwrap();
        dir
    }

    fn ctx(dir: &Path) -> ToolContext {
        ToolContext {
            working_dir: Some(dir.to_path_buf()),
            ..ToolContext::default()
        }
    }

    #[tokio::test]
    async fn grep_reports_path_line_and_text() {
        let dir = tree();
        let out = GrepFiles
            .execute(args(json!({"pattern": r"answer\(\)"})), &ctx(dir.path()))
            .await
            .unwrap();

        assert!(out.starts_with("3 matching line(s):"), "{}", out);
        assert!(out.contains("src/bin/main.rs:2:    answer();"));
        assert!(out.contains("src/lib.rs:1:pub fn answer() -> u32 {"));
        assert!(!out.contains("blob.bin"));
    }

    #[tokio::test]
    async fn grep_without_matches_says_so() {
        let dir = tree();
        let out = GrepFiles
            .execute(args(json!({"pattern": "nowhere_to_be_found"})), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(out, "No lines matching the pattern were found.");
    }

    #[tokio::test]
    async fn grep_rejects_bad_regex() {
        let dir = tree();
        let err = GrepFiles
            .execute(args(json!({"pattern": "(unclosed"})), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid pattern"));
    }

    #[tokio::test]
    async fn grep_scoped_to_subdirectory() {
        let dir = tree();
        let out = GrepFiles
            .execute(args(json!({"pattern": "42", "path": "src"})), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(out.starts_with("1 matching line(s):"), "{}", out);
        assert!(!out.contains("README.md"));
    }

    #[tokio::test]
    async fn find_matches_names_by_glob() {
        let dir = tree();
        let out = FindFiles
            .execute(args(json!({"name_pattern": "*.rs"})), &ctx(dir.path()))
            .await
            .unwrap();
        let paths: Vec<&str> = out.lines().skip(1).collect();
        assert_eq!(paths.len(), 2, "{}", out);
        assert!(paths[0].ends_with("src/bin/main.rs"));
        assert!(paths[1].ends_with("src/lib.rs"));
    }

    #[tokio::test]
    async fn find_without_pattern_lists_everything() {
        let dir = tree();
        let out = FindFiles.execute(Map::new(), &ctx(dir.path())).await.unwrap();
        assert!(out.starts_with("6 path(s) matching '*':"), "{}", out);
    }

    #[tokio::test]
    async fn find_respects_depth_limit() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("1/2/3/4/5/6")).unwrap();
        std::fs::write(dir.path().join("1/2/3/4/deep.txt"), "").unwrap();
        std::fs::write(dir.path().join("1/2/3/4/5/6/deeper.txt"), "").unwrap();

        let out = FindFiles
            .execute(args(json!({"name_pattern": "*.txt"})), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(out.contains("deep.txt"));
        assert!(!out.contains("deeper.txt"));
    }

    #[tokio::test]
    async fn missing_search_root_is_an_error() {
        let dir = tree();
        let err = FindFiles
            .execute(args(json!({"path": "nope"})), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
