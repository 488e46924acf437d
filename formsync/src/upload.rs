//! File attachments and the client-side checks that run before any upload.

use std::path::Path;

use bytes::Bytes;

use crate::errors::{Error, Result};

const MB: u64 = 1024 * 1024;

/// Size and type constraints for the file field of a file-bearing resource.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadPolicy {
    /// Form field holding the file; also the multipart part name
    pub field: &'static str,
    pub max_bytes: u64,
    /// Lowercase extensions without the dot
    pub extensions: &'static [&'static str],
    pub mime_types: &'static [&'static str],
    /// Whether creating the resource requires a file
    pub required: bool,
}

impl UploadPolicy {
    pub const fn new(field: &'static str, max_mb: u64) -> Self {
        Self {
            field,
            max_bytes: max_mb * MB,
            extensions: &["pdf", "jpg", "jpeg", "png"],
            mime_types: &["application/pdf", "image/jpeg", "image/png"],
            required: false,
        }
    }

    pub const fn types(mut self, extensions: &'static [&'static str], mime_types: &'static [&'static str]) -> Self {
        self.extensions = extensions;
        self.mime_types = mime_types;
        self
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn limit_label(&self) -> String {
        if self.max_bytes % MB == 0 {
            format!("{}MB", self.max_bytes / MB)
        } else {
            format!("{:.1}MB", self.max_bytes as f64 / MB as f64)
        }
    }

    fn allowed_label(&self) -> String {
        self.extensions.iter().map(|e| e.to_uppercase()).collect::<Vec<_>>().join(", ")
    }

    /// Check a selected file against the policy. Runs before any network I/O.
    pub fn validate(&self, file: &FileUpload) -> Result<()> {
        let size = file.len();
        if size > self.max_bytes {
            return Err(Error::validation(format!(
                "File size exceeds {} limit. Selected file is {:.2} MB",
                self.limit_label(),
                size as f64 / MB as f64
            )));
        }

        let extension_ok = file
            .extension()
            .is_some_and(|ext| self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext)));
        let mime_ok = self.mime_types.iter().any(|allowed| allowed.eq_ignore_ascii_case(file.mime_type()));

        if !extension_ok || !mime_ok {
            return Err(Error::validation(format!(
                "Invalid file type. Allowed types: {}",
                self.allowed_label()
            )));
        }

        Ok(())
    }
}

/// A file picked by the user, held in form state until the next save.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub file_name: String,
    pub content: Bytes,
    mime: Option<String>,
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
            mime: None,
        }
    }

    /// Use the MIME type the picker reported instead of guessing from the name
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub async fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow::anyhow!("{} is not a file path", path.display()))?;
        Ok(Self::new(file_name, content))
    }

    pub fn len(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
    }

    pub fn mime_type(&self) -> &str {
        match &self.mime {
            Some(mime) => mime,
            None => mime_guess::from_path(&self.file_name)
                .first_raw()
                .unwrap_or("application/octet-stream"),
        }
    }
}
