//! Documents: turning files into oracle input
//!
//! Text is sent inline under a `# <filename>` heading. PDFs are embedded
//! verbatim as base64 `data:` URLs for the provider to read. Anything else
//! that is not valid UTF-8 is rejected here, before a request is made.

use crate::oracle::InputPart;
use base64::Engine as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContent {
    Text(String),
    Pdf { data_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// File name (no directories); used as provenance and column label.
    pub name: String,
    pub content: DocumentContent,
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unsupported content type {mime} for {path}")]
    Unsupported { path: PathBuf, mime: String },
}

impl Document {
    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: DocumentContent::Text(text.into()),
        }
    }

    pub fn pdf(name: impl Into<String>, bytes: &[u8]) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self {
            name: name.into(),
            content: DocumentContent::Pdf {
                data_url: format!("data:application/pdf;base64,{encoded}"),
            },
        }
    }

    /// Read a file, deciding between PDF and text by its content type.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let bytes = std::fs::read(path).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if mime.essence_str() == "application/pdf" {
            return Ok(Self::pdf(name, &bytes));
        }

        let unsupported = || DocumentError::Unsupported {
            path: path.to_path_buf(),
            mime: mime.essence_str().to_string(),
        };
        let top = mime.type_();
        if top == mime_guess::mime::IMAGE
            || top == mime_guess::mime::AUDIO
            || top == mime_guess::mime::VIDEO
        {
            return Err(unsupported());
        }
        let text = String::from_utf8(bytes).map_err(|_| unsupported())?;
        Ok(Self::text(name, text))
    }

    pub fn is_pdf(&self) -> bool {
        matches!(self.content, DocumentContent::Pdf { .. })
    }

    pub fn input_parts(&self) -> Vec<InputPart> {
        match &self.content {
            DocumentContent::Text(text) => vec![InputPart::InputText {
                text: format!("# {}\n\n{}", self.name, text),
            }],
            DocumentContent::Pdf { data_url } => vec![InputPart::InputFile {
                filename: self.name.clone(),
                file_data: data_url.clone(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_text_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.md");
        std::fs::write(&path, "All data must be encrypted.").unwrap();

        let doc = Document::from_path(&path).unwrap();
        assert_eq!(doc.name, "policy.md");
        assert!(!doc.is_pdf());
        assert_eq!(
            doc.input_parts(),
            vec![InputPart::InputText {
                text: "# policy.md\n\nAll data must be encrypted.".into()
            }]
        );
    }

    #[test]
    fn test_pdf_becomes_data_url() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let doc = Document::from_path(&path).unwrap();
        assert!(doc.is_pdf());
        match &doc.input_parts()[0] {
            InputPart::InputFile {
                filename,
                file_data,
            } => {
                assert_eq!(filename, "policy.pdf");
                assert_eq!(file_data, "data:application/pdf;base64,JVBERi0xLjQ=");
            }
            other => panic!("expected file part, got {other:?}"),
        }
    }

    #[test]
    fn test_binary_and_images_rejected() {
        let dir = tempdir().unwrap();
        let png = dir.path().join("scan.png");
        std::fs::write(&png, b"\x89PNG").unwrap();
        assert!(matches!(
            Document::from_path(&png),
            Err(DocumentError::Unsupported { .. })
        ));

        let blob = dir.path().join("blob.bin");
        std::fs::write(&blob, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(
            Document::from_path(&blob),
            Err(DocumentError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Document::from_path("/definitely/not/here.txt"),
            Err(DocumentError::Io { .. })
        ));
    }
}
