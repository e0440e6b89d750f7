//! テスト用の疑似ブラウザ

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::browser::{release_session, LaunchOptions, Locator};
use crate::config::{CredentialPair, Credentials, HistorySelectors, ScraperConfig};
use crate::diagnostics::Diagnostics;
use crate::error::ScraperError;
use crate::traits::{BrowserSession, PageDriver, SessionLauncher};

pub fn test_config() -> ScraperConfig {
    ScraperConfig::new(Credentials::new(
        CredentialPair::new("shop", "shop-pass"),
        CredentialPair::new("member", "member-pass"),
    ))
    .with_login_url("https://login.test/")
    .with_console_base_url("https://console.test/")
}

pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// 履歴テーブルの1行
#[derive(Debug, Clone)]
pub struct FakeRow {
    status: String,
    cell: String,
    action: bool,
}

impl FakeRow {
    pub fn new(status: &str, cell: &str) -> Self {
        Self {
            status: status.into(),
            cell: cell.into(),
            action: false,
        }
    }

    pub fn with_action(mut self) -> Self {
        self.action = true;
        self
    }
}

#[derive(Default)]
struct HistoryState {
    status_css: String,
    cell_css: String,
    action: String,
    rows: VecDeque<FakeRow>,
    current: Option<FakeRow>,
}

#[derive(Default)]
struct PageState {
    calls: Vec<String>,
    visible: HashSet<String>,
    values: HashMap<String, String>,
    rendered: HashMap<String, String>,
    failing_goto: HashSet<String>,
    failing_clicks: HashSet<String>,
    fail_screenshots: bool,
    history: Option<HistoryState>,
    download: Option<(String, Vec<u8>)>,
    url: Option<String>,
}

/// 表示状態を手で設定する `PageDriver`
///
/// 待機は即座に結果を返し、入力やクリックは表示状態にかかわらず成功する。
#[derive(Default)]
pub struct FakePage {
    state: Mutex<PageState>,
}

impl FakePage {
    pub const SCREENSHOT_BYTES: &'static [u8] = b"\x89PNG fake";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&self, locator: &Locator) {
        self.state().visible.insert(locator.to_string());
    }

    pub fn hide(&self, locator: &Locator) {
        self.state().visible.remove(&locator.to_string());
    }

    /// 入力値にかかわらず読み戻し値を固定する
    pub fn render_value(&self, locator: &Locator, value: &str) {
        self.state()
            .rendered
            .insert(locator.to_string(), value.to_string());
    }

    pub fn fail_goto(&self, url: &str) {
        self.state().failing_goto.insert(url.to_string());
    }

    pub fn fail_click(&self, locator: &Locator) {
        self.state().failing_clicks.insert(locator.to_string());
    }

    pub fn fail_screenshots(&self) {
        self.state().fail_screenshots = true;
    }

    /// ステータス列を読むたびに次の行へ進む。最後の行は繰り返す
    pub fn with_history(self, selectors: &HistorySelectors, rows: Vec<FakeRow>) -> Self {
        let cell = &selectors.action_cell;
        let action = Locator::text(format!("{} a, {} button", cell, cell), &selectors.action_text);
        self.state().history = Some(HistoryState {
            status_css: selectors.status_cell.clone(),
            cell_css: selectors.action_cell.clone(),
            action: action.to_string(),
            rows: rows.into(),
            current: None,
        });
        self
    }

    pub fn serve_download(&self, name: &str, bytes: Vec<u8>) {
        self.state().download = Some((name.to_string(), bytes));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.state().calls.iter().any(|c| c.starts_with(prefix))
    }

    /// `fill` で入力された値
    pub fn value(&self, locator: &Locator) -> Option<String> {
        self.state().values.get(&locator.to_string()).cloned()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, PageState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }

    fn is_visible(&self, locator: &Locator) -> bool {
        let key = locator.to_string();
        let state = self.state();
        if state.visible.contains(&key) {
            return true;
        }
        match &state.history {
            Some(history) if history.action == key => {
                history.current.as_ref().map(|row| row.action).unwrap_or(false)
            }
            _ => false,
        }
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str) -> Result<(), ScraperError> {
        self.record(format!("goto {}", url));
        let mut state = self.state();
        if state.failing_goto.contains(url) {
            return Err(ScraperError::Navigation(format!("{}: net::ERR_CONNECTION_REFUSED", url)));
        }
        state.url = Some(url.to_string());
        Ok(())
    }

    async fn wait_network_idle(&self, _timeout: Duration) -> Result<(), ScraperError> {
        Ok(())
    }

    async fn wait_visible(
        &self,
        locator: &Locator,
        _timeout: Duration,
    ) -> Result<bool, ScraperError> {
        Ok(self.is_visible(locator))
    }

    async fn click(&self, locator: &Locator) -> Result<(), ScraperError> {
        self.record(format!("click {}", locator));
        if self.state().failing_clicks.contains(&locator.to_string()) {
            return Err(ScraperError::ElementNotFound(locator.to_string()));
        }
        Ok(())
    }

    async fn fill(&self, locator: &Locator, text: &str) -> Result<(), ScraperError> {
        self.record(format!("fill {}", locator));
        self.state()
            .values
            .insert(locator.to_string(), text.to_string());
        Ok(())
    }

    async fn press_enter(&self, locator: &Locator) -> Result<(), ScraperError> {
        self.record(format!("press_enter {}", locator));
        Ok(())
    }

    async fn check(&self, locator: &Locator) -> Result<(), ScraperError> {
        self.record(format!("check {}", locator));
        Ok(())
    }

    async fn activate(&self, locator: &Locator) -> Result<bool, ScraperError> {
        self.record(format!("activate {}", locator));
        Ok(self.is_visible(locator))
    }

    async fn text_content(&self, locator: &Locator) -> Result<Option<String>, ScraperError> {
        let key = locator.to_string();
        let mut state = self.state();
        let Some(history) = state.history.as_mut() else {
            return Ok(None);
        };
        if key == history.status_css {
            if let Some(next) = history.rows.pop_front() {
                history.current = Some(next);
            }
            return Ok(history.current.as_ref().map(|row| row.status.clone()));
        }
        if key == history.cell_css {
            return Ok(history.current.as_ref().map(|row| row.cell.clone()));
        }
        Ok(None)
    }

    async fn input_value(&self, locator: &Locator) -> Result<Option<String>, ScraperError> {
        let key = locator.to_string();
        let state = self.state();
        Ok(state
            .rendered
            .get(&key)
            .or_else(|| state.values.get(&key))
            .cloned())
    }

    async fn download(
        &self,
        locator: &Locator,
        dir: &Path,
        _timeout: Duration,
    ) -> Result<PathBuf, ScraperError> {
        self.record(format!("download {}", locator));
        let served = self.state().download.clone();
        let (name, bytes) =
            served.ok_or_else(|| ScraperError::Download("ダウンロードが開始されませんでした".into()))?;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(name);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, ScraperError> {
        if self.state().fail_screenshots {
            return Err(ScraperError::BrowserInit("target closed".into()));
        }
        Ok(Self::SCREENSHOT_BYTES.to_vec())
    }

    async fn current_url(&self) -> Option<String> {
        self.state().url.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStep {
    Page,
    Context,
    Browser,
    Driver,
}

pub struct FakeSession {
    page: Arc<FakePage>,
    log: Arc<Mutex<Vec<ReleaseStep>>>,
    failing: Option<ReleaseStep>,
}

impl FakeSession {
    fn release(&self, step: ReleaseStep) -> Result<(), ScraperError> {
        self.log.lock().unwrap().push(step);
        if self.failing == Some(step) {
            return Err(ScraperError::BrowserInit(format!("{:?} already closed", step)));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    fn page(&self) -> Result<Arc<dyn PageDriver>, ScraperError> {
        Ok(self.page.clone())
    }

    async fn close_page(&mut self) -> Result<(), ScraperError> {
        self.release(ReleaseStep::Page)
    }

    async fn close_context(&mut self) -> Result<(), ScraperError> {
        self.release(ReleaseStep::Context)
    }

    async fn close_browser(&mut self) -> Result<(), ScraperError> {
        self.release(ReleaseStep::Browser)
    }

    async fn stop_driver(&mut self) -> Result<(), ScraperError> {
        self.release(ReleaseStep::Driver)
    }
}

/// 同じ `FakePage` を持つセッションを払い出す
pub struct FakeLauncher {
    page: Arc<FakePage>,
    log: Arc<Mutex<Vec<ReleaseStep>>>,
    failing: Option<ReleaseStep>,
    fail_open: bool,
    acquired: Mutex<Vec<LaunchOptions>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::with_page(Arc::new(FakePage::new()))
    }

    pub fn with_page(page: Arc<FakePage>) -> Self {
        Self {
            page,
            log: Arc::new(Mutex::new(Vec::new())),
            failing: None,
            fail_open: false,
            acquired: Mutex::new(Vec::new()),
        }
    }

    /// ブラウザ起動後のページ作成で失敗させる
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_release(mut self, step: ReleaseStep) -> Self {
        self.failing = Some(step);
        self
    }

    pub fn release_log(&self) -> Vec<ReleaseStep> {
        self.log.lock().unwrap().clone()
    }

    pub fn acquisitions(&self) -> Vec<LaunchOptions> {
        self.acquired.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn acquire(
        &self,
        options: &LaunchOptions,
        diag: &Diagnostics,
    ) -> Result<Box<dyn BrowserSession>, ScraperError> {
        self.acquired.lock().unwrap().push(options.clone());
        let mut session = FakeSession {
            page: self.page.clone(),
            log: self.log.clone(),
            failing: self.failing,
        };
        if self.fail_open {
            release_session(&mut session, diag).await;
            return Err(ScraperError::BrowserInit("コンテキスト作成エラー".into()));
        }
        Ok(Box::new(session))
    }
}
