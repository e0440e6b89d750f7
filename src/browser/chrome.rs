use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    BrowserContextId, SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetLocaleOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::locator::{js_str, Locator};
use super::session::{
    release_session, LaunchOptions, ACCEPT_LANGUAGE, DESKTOP_USER_AGENT, DESKTOP_VIEWPORT,
    LAUNCH_ARGS, LOCALE,
};
use crate::diagnostics::Diagnostics;
use crate::error::ScraperError;
use crate::traits::{BrowserSession, PageDriver, SessionLauncher};

/// 要素表示確認のインターバル
const VISIBILITY_POLL_MS: u64 = 250;
/// ネットワークアイドル判定のインターバル（ミリ秒）
const NETWORK_IDLE_CHECK_INTERVAL_MS: u64 = 500;
/// 連続3回アイドルでOK
const REQUIRED_IDLE_CHECKS: u32 = 3;
const DOWNLOAD_POLL_MS: u64 = 500;
const TARGET_ATTR: &str = "data-rms-target";

static NEXT_TARGET: AtomicU64 = AtomicU64::new(1);

/// chromiumoxide でセッションを起動する
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    chrome_executable: Option<PathBuf>,
    navigation_timeout: Duration,
}

impl Default for ChromeLauncher {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            navigation_timeout: Duration::from_secs(90),
        }
    }
}

impl ChromeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// `CHROME_PATH` / `CHROMIUM_PATH` からChromeのパスを取得
    pub fn from_env() -> Self {
        let chrome_executable = std::env::var("CHROME_PATH")
            .or_else(|_| std::env::var("CHROMIUM_PATH"))
            .ok()
            .map(PathBuf::from);
        Self {
            chrome_executable,
            ..Self::default()
        }
    }

    pub fn with_chrome_executable(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.chrome_executable = path;
        }
        self
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

}

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn acquire(
        &self,
        options: &LaunchOptions,
        diag: &Diagnostics,
    ) -> Result<Box<dyn BrowserSession>, ScraperError> {
        let mut session = ChromeSession::launch(self, options).await?;
        if let Err(e) = session.open_page(options, self.navigation_timeout).await {
            // 途中まで確保したリソースも解放する
            release_session(&mut session, diag).await;
            return Err(e);
        }
        Ok(Box::new(session))
    }
}

pub struct ChromeSession {
    browser: Browser,
    handler: Option<JoinHandle<()>>,
    context_id: Option<BrowserContextId>,
    page: Option<Arc<ChromePage>>,
    user_data_dir: PathBuf,
}

impl ChromeSession {
    async fn launch(
        launcher: &ChromeLauncher,
        options: &LaunchOptions,
    ) -> Result<Self, ScraperError> {
        info!("ブラウザを初期化中...");

        // セッションごとにユニークなユーザーデータディレクトリを使う
        let unique_id = format!(
            "{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );
        let user_data_dir = std::env::temp_dir().join(format!("rms-report-{}", unique_id));

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&user_data_dir)
            .window_size(DESKTOP_VIEWPORT.0, DESKTOP_VIEWPORT.1)
            .no_sandbox()
            .request_timeout(Duration::from_secs(60));

        if let Some(path) = &launcher.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        if !options.headless {
            builder = builder.with_head();
        }
        for arg in LAUNCH_ARGS {
            builder = builder.arg(*arg);
        }

        let config = builder
            .build()
            .map_err(|e| ScraperError::BrowserInit(format!("ブラウザ設定エラー: {}", e)))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        // ブラウザイベントハンドラをバックグラウンドで実行
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Browser event: {:?}", event);
            }
        });

        Ok(Self {
            browser,
            handler: Some(handler),
            context_id: None,
            page: None,
            user_data_dir,
        })
    }

    /// 独立したコンテキストとページを作成
    async fn open_page(
        &mut self,
        options: &LaunchOptions,
        navigation_timeout: Duration,
    ) -> Result<(), ScraperError> {
        let context_id = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| ScraperError::BrowserInit(format!("コンテキスト作成エラー: {}", e)))?
            .result
            .browser_context_id;
        self.context_id = Some(context_id.clone());

        std::fs::create_dir_all(&options.download_dir)?;
        let download_path = options
            .download_dir
            .canonicalize()
            .unwrap_or_else(|_| options.download_dir.clone());

        // ダウンロード先を設定
        let download_params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .browser_context_id(context_id.clone())
            .download_path(download_path.to_string_lossy().to_string())
            .events_enabled(true)
            .build()
            .map_err(|e| ScraperError::BrowserInit(format!("ダウンロード設定エラー: {}", e)))?;
        self.browser
            .execute(download_params)
            .await
            .map_err(|e| ScraperError::BrowserInit(format!("ダウンロード設定エラー: {}", e)))?;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id)
            .build()
            .map_err(ScraperError::BrowserInit)?;
        let page = self
            .browser
            .new_page(target)
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(DESKTOP_VIEWPORT.0 as i64)
            .height(DESKTOP_VIEWPORT.1 as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(ScraperError::BrowserInit)?;
        let user_agent = SetUserAgentOverrideParams::builder()
            .user_agent(DESKTOP_USER_AGENT)
            .accept_language(ACCEPT_LANGUAGE)
            .build()
            .map_err(ScraperError::BrowserInit)?;
        let locale = SetLocaleOverrideParams::builder().locale(LOCALE).build();

        let chrome_page = Arc::new(ChromePage::new(page, navigation_timeout));
        self.page = Some(chrome_page.clone());

        let page = &chrome_page.page;
        page.execute(metrics)
            .await
            .map_err(|e| ScraperError::BrowserInit(format!("表示サイズ設定エラー: {}", e)))?;
        page.execute(user_agent)
            .await
            .map_err(|e| ScraperError::BrowserInit(format!("UA設定エラー: {}", e)))?;
        page.execute(locale)
            .await
            .map_err(|e| ScraperError::BrowserInit(format!("ロケール設定エラー: {}", e)))?;

        info!("ブラウザ初期化完了");
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    fn page(&self) -> Result<Arc<dyn PageDriver>, ScraperError> {
        self.page
            .clone()
            .map(|page| page as Arc<dyn PageDriver>)
            .ok_or_else(|| ScraperError::BrowserInit("ブラウザが初期化されていません".into()))
    }

    async fn close_page(&mut self) -> Result<(), ScraperError> {
        if let Some(page) = self.page.take() {
            page.page
                .clone()
                .close()
                .await
                .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;
        }
        Ok(())
    }

    async fn close_context(&mut self) -> Result<(), ScraperError> {
        if let Some(context_id) = self.context_id.take() {
            self.browser
                .execute(DisposeBrowserContextParams::new(context_id))
                .await
                .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;
        }
        Ok(())
    }

    async fn close_browser(&mut self) -> Result<(), ScraperError> {
        self.browser
            .close()
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;
        self.browser.wait().await?;
        Ok(())
    }

    async fn stop_driver(&mut self) -> Result<(), ScraperError> {
        if let Some(handler) = self.handler.take() {
            handler.abort();
            let _ = handler.await;
        }
        if self.user_data_dir.exists() {
            std::fs::remove_dir_all(&self.user_data_dir)?;
        }
        Ok(())
    }
}

/// JSでの要素確認結果
#[derive(Debug, Deserialize)]
struct ElementState {
    found: bool,
    visible: bool,
    value: Option<String>,
}

pub struct ChromePage {
    page: Page,
    navigation_timeout: Duration,
}

impl ChromePage {
    pub fn new(page: Page, navigation_timeout: Duration) -> Self {
        Self {
            page,
            navigation_timeout,
        }
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T, ScraperError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| ScraperError::JavaScript(e.to_string()))?
            .into_value::<T>()
            .map_err(|e| ScraperError::JavaScript(e.to_string()))
    }

    async fn inspect(&self, locator: &Locator, value_expr: &str) -> Result<ElementState, ScraperError> {
        let script = format!(
            r#"
            (() => {{
                const el = {query};
                if (!el) return JSON.stringify({{ found: false, visible: false, value: null }});
                const rect = el.getBoundingClientRect();
                const style = window.getComputedStyle(el);
                const visible = rect.width > 0 && rect.height > 0
                    && style.visibility !== 'hidden' && style.display !== 'none';
                return JSON.stringify({{ found: true, visible: visible, value: {value_expr} }});
            }})()
            "#,
            query = locator.query_js(),
        );
        let json: String = self.eval(&script).await?;
        serde_json::from_str(&json).map_err(|e| ScraperError::JavaScript(e.to_string()))
    }

    /// ロケータに一致する要素に印を付けて chromiumoxide の Element として取得
    async fn element(&self, locator: &Locator) -> Result<Element, ScraperError> {
        let token = NEXT_TARGET.fetch_add(1, Ordering::Relaxed).to_string();
        let script = format!(
            r#"
            (() => {{
                const el = {query};
                if (!el) return false;
                el.setAttribute({attr}, {token});
                return true;
            }})()
            "#,
            query = locator.query_js(),
            attr = js_str(TARGET_ATTR),
            token = js_str(&token),
        );
        let tagged: bool = self.eval(&script).await?;
        if !tagged {
            return Err(ScraperError::ElementNotFound(locator.to_string()));
        }
        self.page
            .find_element(format!("[{}=\"{}\"]", TARGET_ATTR, token))
            .await
            .map_err(|e| ScraperError::ElementNotFound(format!("{}: {}", locator, e)))
    }

    fn list_files(dir: &Path) -> HashSet<PathBuf> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| path.is_file())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn is_partial_download(path: &Path) -> bool {
    let filename = path.file_name().unwrap_or_default().to_string_lossy();
    filename.ends_with(".crdownload") || filename.ends_with(".tmp")
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn goto(&self, url: &str) -> Result<(), ScraperError> {
        debug!("ページに移動します: {}", url);
        match tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ScraperError::Navigation(format!("{}: {}", url, e))),
            Err(_) => Err(ScraperError::Navigation(format!(
                "{}: {:?}以内に読み込みが完了しませんでした",
                url, self.navigation_timeout
            ))),
        }
    }

    /// Performance API でアクティブなリクエストを監視
    async fn wait_network_idle(&self, timeout: Duration) -> Result<(), ScraperError> {
        let start = Instant::now();
        let mut idle_count = 0;

        while start.elapsed() < timeout {
            let result = self
                .eval::<bool>(
                    r#"
                    (() => {
                        const entries = performance.getEntriesByType('resource');
                        const now = performance.now();
                        // 直近500ms以内に開始され、まだ終わっていないリクエストがあるか
                        const recentRequests = entries.filter(e => {
                            return (now - e.startTime) < 500 && e.duration === 0;
                        });
                        return document.readyState === 'complete' && recentRequests.length === 0;
                    })()
                "#,
                )
                .await;

            match result {
                Ok(true) => {
                    idle_count += 1;
                    if idle_count >= REQUIRED_IDLE_CHECKS {
                        debug!("Network idle after {:?}", start.elapsed());
                        return Ok(());
                    }
                }
                Ok(false) => idle_count = 0,
                Err(e) => {
                    debug!("Network idle check error: {}", e);
                    idle_count = 0;
                }
            }

            sleep(Duration::from_millis(NETWORK_IDLE_CHECK_INTERVAL_MS)).await;
        }

        warn!(
            "Network idle timeout after {:?}, proceeding anyway",
            start.elapsed()
        );
        Ok(())
    }

    async fn wait_visible(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<bool, ScraperError> {
        let start = Instant::now();
        loop {
            match self.inspect(locator, "null").await {
                Ok(state) if state.found && state.visible => return Ok(true),
                Ok(_) => {}
                // 画面遷移中はコンテキストが破棄されることがある
                Err(e) => debug!("表示確認エラー ({}): {}", locator, e),
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Ok(false);
            }
            let poll = Duration::from_millis(VISIBILITY_POLL_MS);
            sleep(poll.min(timeout - elapsed)).await;
        }
    }

    async fn click(&self, locator: &Locator) -> Result<(), ScraperError> {
        self.element(locator)
            .await?
            .click()
            .await
            .map_err(|e| ScraperError::Navigation(format!("{} クリック: {}", locator, e)))?;
        Ok(())
    }

    async fn fill(&self, locator: &Locator, text: &str) -> Result<(), ScraperError> {
        let element = self.element(locator).await?;
        element
            .click()
            .await
            .map_err(|e| ScraperError::Navigation(format!("{} クリック: {}", locator, e)))?;

        let clear = format!(
            r#"
            (() => {{
                const el = {query};
                if (!el) return false;
                el.value = '';
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                return true;
            }})()
            "#,
            query = locator.query_js(),
        );
        let _: bool = self.eval(&clear).await?;

        element
            .type_str(text)
            .await
            .map_err(|e| ScraperError::JavaScript(format!("{} 入力: {}", locator, e)))?;
        Ok(())
    }

    async fn press_enter(&self, locator: &Locator) -> Result<(), ScraperError> {
        self.element(locator)
            .await?
            .press_key("Enter")
            .await
            .map_err(|e| ScraperError::JavaScript(format!("{} Enter: {}", locator, e)))?;
        Ok(())
    }

    async fn check(&self, locator: &Locator) -> Result<(), ScraperError> {
        let checked = self.inspect(locator, "String(!!el.checked)").await?;
        if !checked.found {
            return Err(ScraperError::ElementNotFound(locator.to_string()));
        }
        if checked.value.as_deref() != Some("true") {
            self.click(locator).await?;
        }
        Ok(())
    }

    async fn activate(&self, locator: &Locator) -> Result<bool, ScraperError> {
        let script = format!(
            r#"
            (() => {{
                const el = {query};
                if (!el) return false;
                el.click();
                // フレームワークが反応しない場合のフォールバック
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                el.dispatchEvent(new MouseEvent('click', {{ bubbles: true }}));
                return true;
            }})()
            "#,
            query = locator.query_js(),
        );
        self.eval(&script).await
    }

    async fn text_content(&self, locator: &Locator) -> Result<Option<String>, ScraperError> {
        let state = self.inspect(locator, "(el.textContent || '').trim()").await?;
        Ok(state.value.filter(|_| state.found))
    }

    async fn input_value(&self, locator: &Locator) -> Result<Option<String>, ScraperError> {
        let state = self
            .inspect(locator, "(el.value === undefined ? null : String(el.value))")
            .await?;
        Ok(state.value.filter(|_| state.found))
    }

    async fn download(
        &self,
        locator: &Locator,
        dir: &Path,
        timeout: Duration,
    ) -> Result<PathBuf, ScraperError> {
        std::fs::create_dir_all(dir)?;
        let before = Self::list_files(dir);

        self.click(locator).await?;
        info!("ダウンロードを待機中: {:?}", dir);

        let start = Instant::now();
        loop {
            let finished = Self::list_files(dir)
                .into_iter()
                .filter(|path| !before.contains(path))
                .find(|path| !is_partial_download(path));
            if let Some(path) = finished {
                info!("ダウンロード完了: {:?}", path);
                return Ok(path);
            }

            if start.elapsed() > timeout {
                return Err(ScraperError::Download(format!(
                    "ダウンロードが{:?}以内に完了しませんでした",
                    timeout
                )));
            }

            sleep(Duration::from_millis(DOWNLOAD_POLL_MS)).await;
        }
    }

    async fn screenshot(&self) -> Result<Vec<u8>, ScraperError> {
        self.page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(|e| ScraperError::BrowserInit(format!("スクリーンショット: {}", e)))
    }

    async fn current_url(&self) -> Option<String> {
        self.page.url().await.ok().flatten()
    }
}
