//! File commands: `upload`, `ls`, `get`, `fetch`, `rm`.

use camino::{Utf8Path, Utf8PathBuf};
use lokr_core::error::{LokrError, LokrResult};
use lokr_core::types::FileId;
use lokr_core::utils::mime::sniff_mime;
use lokr_vault::{ResolveTarget, ResolvedFile, UploadRequest};
use std::io::Write;
use std::time::Duration;

use super::CommandContext;
use crate::output::format_bytes;

/// Content types guessed from the extension of signature-less files
const EXTENSION_TYPES: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("log", "text/plain"),
    ("md", "text/markdown"),
    ("csv", "text/csv"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("yaml", "application/yaml"),
    ("yml", "application/yaml"),
    ("svg", "image/svg+xml"),
];

/// Guess a content type: magic bytes first, then the extension, then text sniffing
pub fn guess_mime(path: &Utf8Path, content: &[u8]) -> String {
    if let Some(sniffed) = sniff_mime(content) {
        return sniffed.to_string();
    }
    let by_extension = path.extension().and_then(|ext| {
        let ext = ext.to_ascii_lowercase();
        EXTENSION_TYPES
            .iter()
            .find(|(known, _)| *known == ext)
            .map(|(_, mime)| *mime)
    });
    match by_extension {
        Some(mime) => mime.to_string(),
        None if std::str::from_utf8(content).is_ok() => "text/plain".to_string(),
        None => "application/octet-stream".to_string(),
    }
}

pub async fn upload(
    path: Utf8PathBuf,
    name: Option<String>,
    mime: Option<String>,
    timeout_ms: Option<u64>,
    ctx: &CommandContext,
) -> LokrResult<()> {
    let owner = ctx.requester()?.clone();
    let path = if path.is_absolute() { path } else { ctx.cwd.join(path) };
    let content = tokio::fs::read(&path)
        .await
        .map_err(|e| LokrError::io(format!("Failed to read {}", path), e))?;

    let name = match name {
        Some(name) => name,
        None => path
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| LokrError::validation("name", format!("cannot derive a name from {}", path)))?,
    };
    let mime = mime.unwrap_or_else(|| guess_mime(&path, &content));

    let mut request = UploadRequest::new(owner, name, mime, content);
    if let Some(ms) = timeout_ms {
        request = request.with_deadline(Duration::from_millis(ms));
    }

    let vault = ctx.open_vault().await?;
    let file = vault.upload_file(request).await?;
    ctx.output.success(&format!(
        "Uploaded {} ({}, {})",
        file.display_name,
        format_bytes(file.byte_size),
        file.mime_type
    ));
    ctx.output.line(&file.id.to_string());
    Ok(())
}

pub async fn list(json: bool, ctx: &CommandContext) -> LokrResult<()> {
    let owner = ctx.requester()?;
    let vault = ctx.open_vault().await?;
    let files = vault.list_files(owner).await?;

    if json {
        let rendered = serde_json::to_string_pretty(&files)
            .map_err(|e| LokrError::storage("Failed to render file list", e))?;
        ctx.output.line(&rendered);
        return Ok(());
    }

    if files.is_empty() {
        ctx.output.info("No files");
        return Ok(());
    }
    ctx.output.header(&format!(
        "{:<36}  {:>10}  {:<8}  {:>9}  NAME",
        "ID", "SIZE", "VISIBLE", "DOWNLOADS"
    ));
    for file in &files {
        ctx.output.line(&format!(
            "{:<36}  {:>10}  {:<8}  {:>9}  {}",
            file.id,
            format_bytes(file.byte_size),
            file.visibility.as_str(),
            file.download_count,
            file.display_name
        ));
    }
    Ok(())
}

pub async fn get(id: FileId, output: Option<Utf8PathBuf>, ctx: &CommandContext) -> LokrResult<()> {
    let requester = ctx.requester()?;
    let vault = ctx.open_vault().await?;
    let resolved = vault.resolve(ResolveTarget::File(id), Some(requester)).await?;
    write_resolved(resolved, output, ctx).await
}

/// Anonymous download through a public link
pub async fn fetch(token: String, output: Option<Utf8PathBuf>, ctx: &CommandContext) -> LokrResult<()> {
    // Accept a full share URL as well as the bare token
    let token = token.rsplit('/').next().unwrap_or_default().to_string();
    let vault = ctx.open_vault().await?;
    let resolved = vault.resolve(ResolveTarget::Token(token), None).await?;
    write_resolved(resolved, output, ctx).await
}

/// Write to `output`, stdout for `-`, or the file's name in the working directory
async fn write_resolved(resolved: ResolvedFile, output: Option<Utf8PathBuf>, ctx: &CommandContext) -> LokrResult<()> {
    let destination = match output {
        Some(path) if path.as_str() == "-" => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(&resolved.bytes)
                .and_then(|_| stdout.flush())
                .map_err(|e| LokrError::io("Failed to write to stdout".to_string(), e))?;
            return Ok(());
        }
        Some(path) if path.is_absolute() => path,
        Some(path) => ctx.cwd.join(path),
        None => ctx.cwd.join(&resolved.filename),
    };

    tokio::fs::write(&destination, &resolved.bytes)
        .await
        .map_err(|e| LokrError::io(format!("Failed to write {}", destination), e))?;
    ctx.output.success(&format!(
        "Saved {} ({}, {}) to {}",
        resolved.filename,
        format_bytes(resolved.bytes.len() as u64),
        resolved.mime_type,
        destination
    ));
    Ok(())
}

pub async fn remove(id: FileId, ctx: &CommandContext) -> LokrResult<()> {
    let requester = ctx.requester()?;
    let vault = ctx.open_vault().await?;
    vault.delete_file(id, requester).await?;
    ctx.output.success(&format!("Deleted {}", id));
    Ok(())
}
