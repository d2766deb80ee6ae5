// ABOUTME: Filesystem tools: list_files, read_file, create_directory, and the high-risk write_file/edit_file.
// ABOUTME: Relative paths resolve against the invoking session's working directory.

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde_json::{Map, Value};
use switchyard_core::{ParamSpec, ParamType, RiskLevel, ToolSchema};

use super::{Tool, ToolContext, resolve_path, str_arg};

/// Entries shown before a listing is truncated.
pub const MAX_LIST_ENTRIES: usize = 1000;

/// Files larger than this are refused by read_file.
pub const MAX_READ_BYTES: u64 = 1024 * 1024;

pub struct ListFiles;

#[async_trait]
impl Tool for ListFiles {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "list_files",
            "List files and directories at a path. Directories are marked [D], files [F].",
            vec![ParamSpec::optional(
                "directory_path",
                ParamType::Path,
                "Directory to list. Defaults to the session working directory.",
            )],
        )
    }

    async fn execute(&self, args: Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let raw = str_arg(&args, "directory_path").unwrap_or(".");
        let dir = resolve_path(raw, ctx);

        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("cannot list directory '{}'", dir.display()))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
        }
        entries.sort();

        if entries.is_empty() {
            return Ok(format!("Directory '{}' is empty.", dir.display()));
        }

        let total = entries.len();
        let mut lines: Vec<String> = entries
            .into_iter()
            .take(MAX_LIST_ENTRIES)
            .map(|(name, is_dir)| format!("[{}] {}", if is_dir { "D" } else { "F" }, name))
            .collect();
        if total > MAX_LIST_ENTRIES {
            lines.push(format!("... (listing truncated at {} items)", MAX_LIST_ENTRIES));
        }

        Ok(format!(
            "Contents of '{}' ({} items):\n{}",
            dir.display(),
            total,
            lines.join("\n")
        ))
    }
}

pub struct ReadFile;

#[async_trait]
impl Tool for ReadFile {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "read_file",
            "Read a text file.",
            vec![ParamSpec::required(
                "file_path",
                ParamType::Path,
                "Path of the file to read.",
            )],
        )
    }

    async fn execute(&self, args: Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let Some(raw) = str_arg(&args, "file_path") else {
            bail!("file_path must be a string");
        };
        let path = resolve_path(raw, ctx);

        let meta = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("file not found: '{}'", path.display()))?;
        if !meta.is_file() {
            bail!("'{}' is not a regular file", path.display());
        }
        if meta.len() > MAX_READ_BYTES {
            bail!(
                "'{}' is {} bytes, larger than the {} byte limit",
                path.display(),
                meta.len(),
                MAX_READ_BYTES
            );
        }

        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("cannot read '{}'", path.display()))?;
        let content = String::from_utf8_lossy(&bytes);
        Ok(format!(
            "Content of '{}' ({} bytes):\n```\n{}\n```",
            path.display(),
            bytes.len(),
            content
        ))
    }
}

/// Write `content` to the file named by `file_path`, creating parents.
async fn write_contents(args: &Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
    let (Some(raw), Some(content)) = (str_arg(args, "file_path"), str_arg(args, "content")) else {
        bail!("file_path and content must be strings");
    };
    let path = resolve_path(raw, ctx);

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("cannot create '{}'", parent.display()))?;
    }
    tokio::fs::write(&path, content.as_bytes())
        .await
        .with_context(|| format!("cannot write '{}'", path.display()))?;

    tracing::info!(path = %path.display(), bytes = content.len(), "wrote file");
    Ok(format!(
        "Wrote {} bytes to '{}'.",
        content.len(),
        path.display()
    ))
}

fn write_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::required("file_path", ParamType::Path, "Path of the file to write."),
        ParamSpec::required("content", ParamType::String, "Full text content."),
    ]
}

pub struct WriteFile;

#[async_trait]
impl Tool for WriteFile {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "write_file",
            "Write or overwrite a file with the given content. Creates parent directories.",
            write_params(),
        )
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::HighRisk
    }

    async fn execute(&self, args: Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        write_contents(&args, ctx).await
    }
}

/// Same operation as [`WriteFile`] under the name older rosters use.
pub struct EditFile;

#[async_trait]
impl Tool for EditFile {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "edit_file",
            "Replace the full contents of a file, creating it and its parent directories if needed.",
            write_params(),
        )
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::HighRisk
    }

    async fn execute(&self, args: Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        write_contents(&args, ctx).await
    }
}

pub struct CreateDirectory;

#[async_trait]
impl Tool for CreateDirectory {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "create_directory",
            "Create a directory and any missing parents. Succeeds if it already exists.",
            vec![ParamSpec::required(
                "directory_path",
                ParamType::Path,
                "Directory to create.",
            )],
        )
    }

    async fn execute(&self, args: Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let Some(raw) = str_arg(&args, "directory_path") else {
            bail!("directory_path must be a string");
        };
        let dir = resolve_path(raw, ctx);

        if let Ok(meta) = tokio::fs::metadata(&dir).await
            && !meta.is_dir()
        {
            bail!("'{}' exists and is not a directory", dir.display());
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("cannot create directory '{}'", dir.display()))?;

        tracing::info!(path = %dir.display(), "created directory");
        Ok(format!(
            "Created directory (or it already existed): '{}'.",
            dir.display()
        ))
    }
}
