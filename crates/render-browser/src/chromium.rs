use crate::cdp::{self, CdpConnection};
use crate::engine::BrowserEngine;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use quire_render_core::{PageSetup, RenderError};
use quire_types::RenderMethod;
use serde_json::{Value, json};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);
const STDERR_TAIL: usize = 400;
const DEVTOOLS_BANNER: &str = "DevTools listening on ";
const MM_PER_INCH: f32 = 25.4;
const CSS_PX_PER_MM: f32 = 96.0 / MM_PER_INCH;

/// One running headless Chromium and its DevTools connection.
#[derive(Debug)]
struct Browser {
    connection: CdpConnection,
    // Killed on drop.
    _process: Child,
    _profile: TempDir,
}

impl Browser {
    fn is_alive(&self) -> bool {
        !self.connection.is_closed()
    }
}

/// Headless Chromium driven over the DevTools protocol.
///
/// The browser process is started on first use and shared by every page;
/// a page is a tab in it. If the process dies the next page opened
/// relaunches it, and pages of the dead browser are retired.
#[derive(Debug)]
pub struct ChromiumEngine {
    binary: PathBuf,
    extra_args: Vec<String>,
    max_uses_per_page: u32,
    browser: Mutex<Option<Arc<Browser>>>,
    launches: AtomicUsize,
}

/// A browser tab attached in flat session mode.
#[derive(Debug)]
pub struct ChromiumPage {
    browser: Arc<Browser>,
    target_id: String,
    session_id: String,
    staging: TempDir,
    uses: u32,
}

impl ChromiumPage {
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn uses(&self) -> u32 {
        self.uses
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        self.browser.connection.notify(
            None,
            "Target.closeTarget",
            json!({ "targetId": self.target_id }),
        );
    }
}

impl ChromiumEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
            max_uses_per_page: 50,
            browser: Mutex::new(None),
            launches: AtomicUsize::new(0),
        }
    }

    /// Extra flags, e.g. `--no-sandbox` inside containers.
    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.extra_args.extend(args);
        self
    }

    pub fn with_max_uses_per_page(mut self, uses: u32) -> Self {
        self.max_uses_per_page = uses.max(1);
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Browser processes started over the engine's lifetime.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    fn launch_args(&self, profile: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "--headless=new",
            "--disable-gpu",
            "--no-first-run",
            "--no-default-browser-check",
            "--hide-scrollbars",
            "--allow-file-access-from-files",
            "--remote-debugging-port=0",
        ]
        .iter()
        .map(OsString::from)
        .collect();

        let mut profile_arg = OsString::from("--user-data-dir=");
        profile_arg.push(profile);
        args.push(profile_arg);
        args.extend(self.extra_args.iter().map(OsString::from));
        args.push(OsString::from("about:blank"));
        args
    }

    fn spawn_error(&self, err: std::io::Error) -> RenderError {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                RenderError::unavailable(
                    RenderMethod::Browser,
                    format!("cannot start {}: {}", self.binary.display(), err),
                )
            }
            _ => RenderError::Io(err),
        }
    }

    /// The running browser, launching one if there is none or the last one
    /// went away.
    async fn browser(&self) -> Result<Arc<Browser>, RenderError> {
        let mut slot = self.browser.lock().await;
        if let Some(browser) = slot.as_ref() {
            if browser.is_alive() {
                return Ok(browser.clone());
            }
            log::warn!("[RENDER] Lost connection to chromium, relaunching");
        }
        let browser = Arc::new(self.launch().await?);
        *slot = Some(browser.clone());
        Ok(browser)
    }

    async fn launch(&self) -> Result<Browser, RenderError> {
        let profile = tempfile::Builder::new()
            .prefix("quire-chromium-")
            .tempdir()?;
        let mut process = Command::new(&self.binary)
            .args(self.launch_args(profile.path()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stderr = process
            .stderr
            .take()
            .ok_or_else(|| RenderError::failed(RenderMethod::Browser, "chromium stderr not captured"))?;
        let url = match tokio::time::timeout(LAUNCH_TIMEOUT, devtools_url(stderr)).await {
            Ok(Ok(url)) => url,
            Ok(Err(tail)) => {
                return Err(RenderError::failed(
                    RenderMethod::Browser,
                    format!("chromium exited before DevTools was ready: {}", tail),
                ));
            }
            Err(_) => {
                return Err(RenderError::failed(
                    RenderMethod::Browser,
                    format!("chromium did not open DevTools within {:?}", LAUNCH_TIMEOUT),
                ));
            }
        };
        let connection = CdpConnection::connect(&url).await?;

        let launches = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!(
            "[RENDER] Launched chromium pid {:?} (launch #{})",
            process.id(),
            launches
        );
        Ok(Browser {
            connection,
            _process: process,
            _profile: profile,
        })
    }
}

/// Reads stderr up to the DevTools banner, then keeps draining it so the
/// browser never blocks on a full pipe. `Err` carries the output tail if
/// the process exits first.
async fn devtools_url(stderr: ChildStderr) -> Result<String, String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut seen = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(url) = line.trim().strip_prefix(DEVTOOLS_BANNER) {
            let url = url.trim().to_string();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    log::trace!("[RENDER] chromium: {}", line);
                }
            });
            return Ok(url);
        }
        seen.push_str(&line);
        seen.push('\n');
    }
    Err(stderr_tail(seen.as_bytes()))
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}

fn inches(mm: f32) -> f32 {
    mm / MM_PER_INCH
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

fn string_field(value: &Value, field: &str) -> Result<String, RenderError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RenderError::failed(RenderMethod::Browser, format!("DevTools reply lacks '{}'", field)))
}

fn viewport_params(setup: &PageSetup) -> Value {
    json!({
        "width": (setup.width_mm * CSS_PX_PER_MM).round() as u32,
        "height": (setup.height_mm * CSS_PX_PER_MM).round() as u32,
        "deviceScaleFactor": setup.device_scale_factor(),
        "mobile": false,
    })
}

/// Paper size is already oriented, and the document's `@page` rule wins
/// where it is set.
fn print_params(setup: &PageSetup) -> Value {
    json!({
        "printBackground": true,
        "preferCSSPageSize": true,
        "displayHeaderFooter": false,
        "paperWidth": inches(setup.width_mm),
        "paperHeight": inches(setup.height_mm),
        "marginTop": inches(setup.margins.top),
        "marginRight": inches(setup.margins.right),
        "marginBottom": inches(setup.margins.bottom),
        "marginLeft": inches(setup.margins.left),
    })
}

#[async_trait]
impl BrowserEngine for ChromiumEngine {
    type Page = ChromiumPage;

    async fn open_page(&self) -> Result<Self::Page, RenderError> {
        let browser = self.browser().await?;
        let cdp = &browser.connection;

        let created = cdp
            .call(None, "Target.createTarget", json!({ "url": "about:blank" }))
            .await?;
        let target_id = string_field(&created, "targetId")?;
        let attached = cdp
            .call(
                None,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = string_field(&attached, "sessionId")?;
        cdp.call(Some(session_id.as_str()), "Page.enable", json!({})).await?;

        let staging = tempfile::Builder::new().prefix("quire-page-").tempdir()?;
        Ok(ChromiumPage {
            browser,
            target_id,
            session_id,
            staging,
            uses: 0,
        })
    }

    async fn print_pdf(
        &self,
        page: &mut Self::Page,
        html: &str,
        setup: &PageSetup,
        output: &Path,
    ) -> Result<(), RenderError> {
        let document = page.staging.path().join("document.html");
        tokio::fs::write(&document, html).await?;
        page.uses += 1;

        let cdp = &page.browser.connection;
        let session = Some(page.session_id.as_str());
        cdp.call(session, "Emulation.setDeviceMetricsOverride", viewport_params(setup))
            .await?;

        let mut events = cdp.subscribe()?;
        let navigated = cdp
            .call(session, "Page.navigate", json!({ "url": file_url(&document) }))
            .await?;
        if let Some(error) = navigated.get("errorText").and_then(Value::as_str) {
            return Err(RenderError::failed(
                RenderMethod::Browser,
                format!("navigation failed: {}", error),
            ));
        }
        cdp::next_event(&mut events, &page.session_id, "Page.loadEventFired").await?;

        let printed = cdp.call(session, "Page.printToPDF", print_params(setup)).await?;
        let pdf = STANDARD
            .decode(string_field(&printed, "data")?)
            .map_err(|e| RenderError::failed(RenderMethod::Browser, format!("undecodable PDF data: {}", e)))?;
        tokio::fs::write(output, pdf).await?;
        Ok(())
    }

    fn is_reusable(&self, page: &Self::Page) -> bool {
        page.uses < self.max_uses_per_page && page.browser.is_alive()
    }

    async fn probe(&self) -> Result<(), RenderError> {
        let status = Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        match tokio::time::timeout(PROBE_TIMEOUT, status).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(RenderError::unavailable(
                RenderMethod::Browser,
                format!("{} --version exited with {}", self.binary.display(), status),
            )),
            Ok(Err(e)) => Err(self.spawn_error(e)),
            Err(_) => Err(RenderError::unavailable(
                RenderMethod::Browser,
                format!("{} did not answer --version", self.binary.display()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::BrowserRenderer;
    use base64::Engine as _;
    use futures_util::{SinkExt, StreamExt};
    use quire_render_core::Renderer;
    use quire_types::{
        GenerationOptions, Orientation, ProposalContent, ProposalId, Quality, ResolvedOptions, Section,
    };
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    const MISSING: &str = "/nonexistent/quire-test/chromium";

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let engine = ChromiumEngine::new(MISSING);
        assert!(matches!(
            engine.probe().await,
            Err(RenderError::Unavailable { method: RenderMethod::Browser, .. })
        ));

        let err = engine.open_page().await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(engine.launches(), 0);
    }

    #[test]
    fn launch_args_open_devtools_on_a_private_profile() {
        let engine = ChromiumEngine::new("chromium").with_args(["--no-sandbox".to_string()]);
        let args: Vec<String> = engine
            .launch_args(Path::new("/tmp/profile"))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(args.contains(&"--remote-debugging-port=0".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));
    }

    #[test]
    fn print_params_follow_page_setup() {
        let setup = PageSetup::from_options(
            &GenerationOptions::new()
                .with_quality(Quality::High)
                .with_orientation(Orientation::Landscape)
                .resolve(),
        );
        let params = print_params(&setup);
        let width = params["paperWidth"].as_f64().unwrap();
        let height = params["paperHeight"].as_f64().unwrap();
        assert!(width > height, "landscape A4 is wider than tall");
        assert!((width - 297.0 / 25.4).abs() < 0.01);
        assert_eq!(params["printBackground"], true);

        let viewport = viewport_params(&setup);
        assert_eq!(viewport["deviceScaleFactor"], 2.0);
    }

    /// A DevTools endpoint that answers just enough of the protocol to
    /// open tabs and print them.
    #[derive(Debug, Default)]
    struct FakeDevTools {
        created: AtomicUsize,
        closed: AtomicUsize,
        printed: AtomicUsize,
    }

    const FAKE_PDF: &[u8] = b"%PDF-1.7\n% fake\n%%EOF\n";

    impl FakeDevTools {
        fn answer(&self, command: &Value) -> Vec<Value> {
            let id = command["id"].clone();
            let result = match command["method"].as_str().unwrap_or_default() {
                "Target.createTarget" => {
                    let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
                    json!({ "targetId": format!("T{}", n) })
                }
                "Target.attachToTarget" => {
                    json!({ "sessionId": format!("S-{}", command["params"]["targetId"].as_str().unwrap_or_default()) })
                }
                "Target.closeTarget" => {
                    self.closed.fetch_add(1, Ordering::SeqCst);
                    json!({ "success": true })
                }
                "Page.navigate" => {
                    return vec![
                        json!({ "id": id, "result": { "frameId": "F1" } }),
                        json!({
                            "method": "Page.loadEventFired",
                            "sessionId": command["sessionId"].clone(),
                            "params": { "timestamp": 1.0 },
                        }),
                    ];
                }
                "Page.printToPDF" => {
                    self.printed.fetch_add(1, Ordering::SeqCst);
                    json!({ "data": STANDARD.encode(FAKE_PDF) })
                }
                _ => json!({}),
            };
            vec![json!({ "id": id, "result": result })]
        }

        async fn serve(self: Arc<Self>, listener: TcpListener) {
            while let Ok((stream, _)) = listener.accept().await {
                let devtools = self.clone();
                tokio::spawn(async move {
                    let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(message)) = socket.next().await {
                        let Message::Text(text) = message else { continue };
                        let Ok(command) = serde_json::from_str::<Value>(&text) else { continue };
                        for reply in devtools.answer(&command) {
                            if socket.send(Message::Text(reply.to_string())).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        }
    }

    /// A stand-in `chromium` that logs each start, announces the fake
    /// DevTools endpoint and then idles like a browser would.
    fn fake_chromium(dir: &Path, port: u16) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("chromium");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\n\
                 if [ \"$1\" = \"--version\" ]; then echo 'Chromium 120'; exit 0; fi\n\
                 echo started >> '{}'\n\
                 echo 'DevTools listening on ws://127.0.0.1:{}/devtools/browser/fake' >&2\n\
                 exec sleep 300\n",
                dir.join("starts.log").display(),
                port
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    fn processes_started(dir: &Path) -> usize {
        std::fs::read_to_string(dir.join("starts.log"))
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }

    async fn fake_browser(dir: &Path) -> (Arc<FakeDevTools>, PathBuf) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let devtools = Arc::new(FakeDevTools::default());
        tokio::spawn(devtools.clone().serve(listener));
        (devtools, fake_chromium(dir, port))
    }

    fn content() -> ProposalContent {
        ProposalContent {
            proposal_id: ProposalId::new("P7"),
            title: "Fleet".into(),
            sections: vec![Section {
                id: "s1".into(),
                title: "One".into(),
                content: "<p>x</p>".into(),
                order: 0,
            }],
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn renders_share_one_browser_process() {
        let dir = TempDir::new().unwrap();
        let (devtools, binary) = fake_browser(dir.path()).await;
        let renderer = BrowserRenderer::new(ChromiumEngine::new(binary), 2, Duration::from_secs(10));
        assert!(renderer.probe().await.is_ok());

        let concurrent = (0..3).map(|i| {
            let out = dir.path().join(format!("{}.pdf", i));
            let renderer = &renderer;
            async move { renderer.render(&content(), &ResolvedOptions::default(), &out).await }
        });
        for result in futures_util::future::join_all(concurrent).await {
            assert!(result.unwrap().size > 0);
        }
        let last = renderer
            .render(&content(), &ResolvedOptions::default(), &dir.path().join("3.pdf"))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&last.path).unwrap(), FAKE_PDF);

        assert_eq!(processes_started(dir.path()), 1);
        assert_eq!(renderer.pool().engine().launches(), 1);
        assert!(renderer.pool().opened_count() <= 2);
        assert_eq!(devtools.created.load(Ordering::SeqCst), renderer.pool().opened_count());
        assert_eq!(devtools.printed.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn retired_tabs_are_closed_in_the_same_browser() {
        let dir = TempDir::new().unwrap();
        let (devtools, binary) = fake_browser(dir.path()).await;
        let engine = ChromiumEngine::new(binary).with_max_uses_per_page(1);
        let renderer = BrowserRenderer::new(engine, 1, Duration::from_secs(10));

        for i in 0..3 {
            let out = dir.path().join(format!("{}.pdf", i));
            renderer.render(&content(), &ResolvedOptions::default(), &out).await.unwrap();
        }

        assert_eq!(renderer.pool().opened_count(), 3);
        assert_eq!(renderer.pool().engine().launches(), 1);
        assert_eq!(processes_started(dir.path()), 1);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while devtools.closed.load(Ordering::SeqCst) < 3 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(devtools.closed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = "x".repeat(1000) + "fatal";
        let tail = stderr_tail(long.as_bytes());
        assert!(tail.ends_with("fatal"));
        assert!(tail.len() <= STDERR_TAIL + 1);
    }
}
