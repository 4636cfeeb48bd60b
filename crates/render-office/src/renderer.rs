use crate::builder::DocumentBuilder;
use async_trait::async_trait;
use quire_render_core::{PageSetup, RenderError, RenderedPdf, Renderer, with_timeout};
use quire_types::{ProposalContent, RenderMethod, ResolvedOptions};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const SOURCE_STEM: &str = "document";

/// The office-suite adapter.
///
/// Each conversion runs in its own scratch directory with its own office
/// user profile, so concurrent conversions never share a lock file or an
/// output name.
#[derive(Debug, Clone)]
pub struct OfficeRenderer {
    builder: Arc<dyn DocumentBuilder>,
    soffice: PathBuf,
    timeout: Duration,
}

impl OfficeRenderer {
    pub fn new(builder: Arc<dyn DocumentBuilder>, soffice: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            builder,
            soffice: soffice.into(),
            timeout,
        }
    }

    pub fn soffice(&self) -> &Path {
        &self.soffice
    }

    fn spawn_error(&self, err: std::io::Error) -> RenderError {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                RenderError::unavailable(
                    RenderMethod::Office,
                    format!("cannot start {}: {}", self.soffice.display(), err),
                )
            }
            _ => RenderError::Io(err),
        }
    }

    fn convert_args(&self, setup: &PageSetup, workdir: &Path, source: &Path) -> Vec<OsString> {
        let mut profile = OsString::from("-env:UserInstallation=file://");
        profile.push(workdir.join("profile"));

        let filter = format!(
            "pdf:writer_pdf_Export:{{\"Quality\":{{\"type\":\"long\",\"value\":\"{}\"}}}}",
            setup.jpeg_quality()
        );

        vec![
            profile,
            "--headless".into(),
            "--norestore".into(),
            "--nolockcheck".into(),
            "--convert-to".into(),
            filter.into(),
            "--outdir".into(),
            workdir.as_os_str().to_owned(),
            source.as_os_str().to_owned(),
        ]
    }

    async fn convert(
        &self,
        content: &ProposalContent,
        setup: &PageSetup,
        output: &Path,
    ) -> Result<RenderedPdf, RenderError> {
        let workdir = tempfile::Builder::new().prefix("quire-office-").tempdir()?;
        let source = workdir
            .path()
            .join(format!("{}.{}", SOURCE_STEM, self.builder.extension()));
        let document = self.builder.build(content, setup)?;
        tokio::fs::write(&source, document).await?;

        let result = Command::new(&self.soffice)
            .args(self.convert_args(setup, workdir.path(), &source))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(RenderError::failed(
                RenderMethod::Office,
                format!("soffice exited with {}: {}", result.status, stderr.trim()),
            ));
        }

        let produced = workdir.path().join(format!("{}.pdf", SOURCE_STEM));
        RenderedPdf::from_output(RenderMethod::Office, &produced)?;
        tokio::fs::copy(&produced, output).await?;
        RenderedPdf::from_output(RenderMethod::Office, output)
    }
}

#[async_trait]
impl Renderer for OfficeRenderer {
    fn method(&self) -> RenderMethod {
        RenderMethod::Office
    }

    async fn render(
        &self,
        content: &ProposalContent,
        options: &ResolvedOptions,
        output: &Path,
    ) -> Result<RenderedPdf, RenderError> {
        let setup = PageSetup::from_options(options);
        with_timeout(
            RenderMethod::Office,
            self.timeout,
            self.convert(content, &setup, output),
        )
        .await
    }

    async fn probe(&self) -> Result<(), RenderError> {
        let status = Command::new(&self.soffice)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        match tokio::time::timeout(PROBE_TIMEOUT, status).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(RenderError::unavailable(
                RenderMethod::Office,
                format!("{} --version exited with {}", self.soffice.display(), status),
            )),
            Ok(Err(e)) => Err(self.spawn_error(e)),
            Err(_) => Err(RenderError::unavailable(
                RenderMethod::Office,
                format!("{} did not answer --version", self.soffice.display()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DocxBuilder;
    use quire_types::{ProposalId, Section};
    use tempfile::TempDir;

    fn content() -> ProposalContent {
        ProposalContent {
            proposal_id: ProposalId::new("P1"),
            title: "Plain".into(),
            sections: vec![Section {
                id: "s1".into(),
                title: "Only".into(),
                content: "<p>Text</p>".into(),
                order: 0,
            }],
            ..Default::default()
        }
    }

    fn renderer(soffice: impl Into<PathBuf>, timeout: Duration) -> OfficeRenderer {
        OfficeRenderer::new(Arc::new(DocxBuilder::new()), soffice, timeout)
    }

    #[tokio::test]
    async fn missing_converter_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let r = renderer("/nonexistent/quire-test/soffice", Duration::from_secs(5));

        assert!(matches!(
            r.probe().await,
            Err(RenderError::Unavailable { method: RenderMethod::Office, .. })
        ));
        let err = r
            .render(&content(), &ResolvedOptions::default(), &dir.path().join("o.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Unavailable { .. }));
        assert!(!err.is_retryable());
    }

    /// Stand-in converters: shell scripts that behave like `soffice` in one
    /// specific way.
    #[cfg(unix)]
    mod scripted {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        const CONVERTS: &str = r#"#!/bin/sh
outdir=""
while [ $# -gt 1 ]; do
  if [ "$1" = "--outdir" ]; then outdir="$2"; shift; fi
  shift
done
base=$(basename "$1")
cp "$1" "$outdir/${base%.*}.pdf"
"#;
        const SILENT: &str = "#!/bin/sh\nexit 0\n";
        const CRASHES: &str = "#!/bin/sh\necho 'conversion error' >&2\nexit 3\n";
        const HANGS: &str = "#!/bin/sh\nsleep 30\n";

        fn script(dir: &TempDir, body: &str) -> PathBuf {
            let path = dir.path().join("soffice");
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn successful_conversion_lands_at_output() {
            let dir = TempDir::new().unwrap();
            let r = renderer(script(&dir, CONVERTS), Duration::from_secs(10));
            let out = dir.path().join("final.pdf");

            let pdf = r
                .render(&content(), &ResolvedOptions::default(), &out)
                .await
                .unwrap();
            assert_eq!(pdf.path, out);
            assert!(pdf.size > 0);
        }

        #[tokio::test]
        async fn silent_converter_is_no_output() {
            let dir = TempDir::new().unwrap();
            let r = renderer(script(&dir, SILENT), Duration::from_secs(10));
            let err = r
                .render(&content(), &ResolvedOptions::default(), &dir.path().join("o.pdf"))
                .await
                .unwrap_err();
            assert!(matches!(err, RenderError::NoOutput { .. }), "{err}");
            assert!(err.is_retryable());
        }

        #[tokio::test]
        async fn crashing_converter_is_a_failure() {
            let dir = TempDir::new().unwrap();
            let r = renderer(script(&dir, CRASHES), Duration::from_secs(10));
            let err = r
                .render(&content(), &ResolvedOptions::default(), &dir.path().join("o.pdf"))
                .await
                .unwrap_err();
            assert!(matches!(err, RenderError::Failed { .. }));
            assert!(err.to_string().contains("conversion error"));
        }

        #[tokio::test]
        async fn hanging_converter_times_out() {
            let dir = TempDir::new().unwrap();
            let r = renderer(script(&dir, HANGS), Duration::from_millis(300));
            let err = r
                .render(&content(), &ResolvedOptions::default(), &dir.path().join("o.pdf"))
                .await
                .unwrap_err();
            assert!(err.is_timeout());
        }
    }
}
