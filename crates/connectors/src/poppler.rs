//! PDF text extraction and first-page rendering through the poppler-utils
//! command line tools.

use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use billflow_intake::{PdfError, PdfRenderer};
use tokio::process::Command;

const PDFTOTEXT: &str = "pdftotext";
const PDFTOPPM: &str = "pdftoppm";

/// Shells out to `pdftotext` and `pdftoppm`. The PDF is written to a scratch
/// directory that is removed when the call returns.
#[derive(Debug, Clone, Default)]
pub struct PopplerPdf {
    /// Render resolution in DPI; poppler's default when `None`.
    pub resolution: Option<u32>,
}

impl PopplerPdf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolution(mut self, dpi: u32) -> Self {
        self.resolution = Some(dpi);
        self
    }
}

fn tool_error(tool: &'static str, e: std::io::Error) -> PdfError {
    if e.kind() == ErrorKind::NotFound {
        PdfError::Tool { tool, message: "not installed (poppler-utils)".into() }
    } else {
        PdfError::Tool { tool, message: format!("failed to run: {e}") }
    }
}

async fn run(tool: &'static str, args: &[&str], dir: &Path) -> Result<Vec<u8>, PdfError> {
    let output = Command::new(tool)
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| tool_error(tool, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PdfError::Tool {
            tool,
            message: format!("exit {}: {}", output.status.code().unwrap_or(-1), stderr.trim()),
        });
    }
    Ok(output.stdout)
}

async fn write_scratch(pdf: &[u8]) -> Result<tempfile::TempDir, PdfError> {
    let dir = tempfile::tempdir()?;
    tokio::fs::write(dir.path().join("input.pdf"), pdf).await?;
    Ok(dir)
}

#[async_trait]
impl PdfRenderer for PopplerPdf {
    async fn extract_text(&self, pdf: &[u8]) -> Result<Option<String>, PdfError> {
        let dir = write_scratch(pdf).await?;
        let stdout = run(PDFTOTEXT, &["input.pdf", "-"], dir.path()).await?;
        let text = String::from_utf8_lossy(&stdout).into_owned();
        Ok(Some(text).filter(|t| !t.trim().is_empty()))
    }

    async fn render_first_page(&self, pdf: &[u8]) -> Result<Option<Vec<u8>>, PdfError> {
        let dir = write_scratch(pdf).await?;
        let resolution = self.resolution.map(|r| r.to_string());
        let mut args = vec!["-jpeg", "-f", "1", "-l", "1", "-singlefile"];
        if let Some(r) = &resolution {
            args.extend(["-r", r.as_str()]);
        }
        args.extend(["input.pdf", "page"]);
        run(PDFTOPPM, &args, dir.path()).await?;

        let page = dir.path().join("page.jpg");
        match tokio::fs::read(&page).await {
            Ok(bytes) if !bytes.is_empty() => Ok(Some(bytes)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
