use crate::error::{ErrorKind, Result};
use crate::pages::DocumentRenderer;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

/// Default bounded wait for one external tool invocation. A hung renderer
/// counts as a failure for that item; its scratch output is swept with the
/// rest of the job's temporaries.
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Raster resolution for rendered pages.
const RENDER_DPI: u32 = 150;

/// The poppler command-line utilities used for paginated documents.
///
/// `pdftoppm` renders pages to raster images; `pdfinfo` reports the page
/// count. Both are required: rendering without knowing the expected count
/// would make completeness checks meaningless.
pub struct Poppler {
    pdftoppm: PathBuf,
    pdfinfo: PathBuf,
    timeout: Duration,
}

impl Poppler {
    pub fn discover() -> Result<Self> {
        let pdftoppm = Self::find("pdftoppm")?;
        let pdfinfo = Self::find("pdfinfo")?;
        Ok(Self {
            pdftoppm,
            pdfinfo,
            timeout: DEFAULT_TOOL_TIMEOUT,
        })
    }

    fn find(name: &str) -> Result<PathBuf> {
        match which::which(name) {
            Ok(path) => Ok(path),
            Err(_) => {
                tracing::info!(tool = name, "executable not found in PATH");
                exn::bail!(ErrorKind::ToolNotFound);
            },
        }
    }

    async fn run(&self, program: &Path, args: &[&std::ffi::OsStr]) -> Result<Output> {
        let mut command = Command::new(program);
        // Dropping the future on timeout must also reap the child.
        command.args(args).kill_on_drop(true);
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(ErrorKind::from)?,
            Err(_elapsed) => {
                tracing::warn!(program = %program.display(), timeout = ?self.timeout, "render tool killed after bounded wait");
                exn::bail!(ErrorKind::ToolTimeout);
            },
        };
        if !output.status.success() {
            exn::bail!(ErrorKind::ToolFailed(output.status.code()));
        }
        Ok(output)
    }
}

#[async_trait]
impl DocumentRenderer for Poppler {
    async fn page_count(&self, document: &Path) -> Result<u32> {
        let output = self.run(&self.pdfinfo, &[document.as_os_str()]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_page_count(&stdout)
            .ok_or_else(|| exn::Exn::from(ErrorKind::Document("pdfinfo reported no page count".to_string())))
    }

    async fn render_all(&self, document: &Path, out_dir: &Path, out_stem: &str) -> Result<()> {
        let prefix = out_dir.join(out_stem);
        let dpi = RENDER_DPI.to_string();
        self.run(&self.pdftoppm, &[
            "-png".as_ref(),
            "-r".as_ref(),
            dpi.as_ref(),
            document.as_os_str(),
            prefix.as_os_str(),
        ])
        .await?;
        Ok(())
    }

    async fn render_page(&self, document: &Path, out_dir: &Path, out_stem: &str, page: u32) -> Result<()> {
        let prefix = out_dir.join(out_stem);
        let dpi = RENDER_DPI.to_string();
        let page = page.to_string();
        self.run(&self.pdftoppm, &[
            "-png".as_ref(),
            "-r".as_ref(),
            dpi.as_ref(),
            "-f".as_ref(),
            page.as_ref(),
            "-l".as_ref(),
            page.as_ref(),
            document.as_os_str(),
            prefix.as_os_str(),
        ])
        .await?;
        Ok(())
    }
}

fn parse_page_count(pdfinfo_stdout: &str) -> Option<u32> {
    pdfinfo_stdout
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|rest| rest.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_count() {
        let stdout = "Title:          Issue 42\nPages:          12\nEncrypted:      no\n";
        assert_eq!(parse_page_count(stdout), Some(12));
    }

    #[test]
    fn test_parse_page_count_missing() {
        assert_eq!(parse_page_count("Title: whatever\n"), None);
        assert_eq!(parse_page_count("Pages: twelve\n"), None);
        assert_eq!(parse_page_count(""), None);
    }
}
