use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::browser::{LaunchOptions, Locator};
use crate::diagnostics::Diagnostics;
use crate::error::ScraperError;

/// 1ページ分のブラウザ操作
///
/// 待機系の操作はすべて上限付きで、リトライは行わない。
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), ScraperError>;

    /// ネットワークが落ち着くまで待機（タイムアウト時は警告のみ）
    async fn wait_network_idle(&self, timeout: Duration) -> Result<(), ScraperError>;

    /// 要素が表示されるまで待機し、表示されたかを返す
    async fn wait_visible(&self, locator: &Locator, timeout: Duration)
        -> Result<bool, ScraperError>;

    async fn click(&self, locator: &Locator) -> Result<(), ScraperError>;

    /// 入力欄をクリアして文字列を入力
    async fn fill(&self, locator: &Locator, text: &str) -> Result<(), ScraperError>;

    async fn press_enter(&self, locator: &Locator) -> Result<(), ScraperError>;

    /// チェックボックスをONにする
    async fn check(&self, locator: &Locator) -> Result<(), ScraperError>;

    /// クリック + change/click イベントの手動発火。要素があったかを返す
    async fn activate(&self, locator: &Locator) -> Result<bool, ScraperError>;

    async fn text_content(&self, locator: &Locator) -> Result<Option<String>, ScraperError>;

    async fn input_value(&self, locator: &Locator) -> Result<Option<String>, ScraperError>;

    /// 要素をクリックしてダウンロードを待ち受け、保存先のパスを返す
    async fn download(
        &self,
        locator: &Locator,
        dir: &Path,
        timeout: Duration,
    ) -> Result<PathBuf, ScraperError>;

    /// PNGスクリーンショット
    async fn screenshot(&self) -> Result<Vec<u8>, ScraperError>;

    async fn current_url(&self) -> Option<String>;
}

/// ブラウザ + コンテキスト + ページの組
///
/// 解放は page → context → browser → driver の順で、それぞれ独立に行う。
#[async_trait]
pub trait BrowserSession: Send {
    fn page(&self) -> Result<Arc<dyn PageDriver>, ScraperError>;

    async fn close_page(&mut self) -> Result<(), ScraperError>;

    async fn close_context(&mut self) -> Result<(), ScraperError>;

    async fn close_browser(&mut self) -> Result<(), ScraperError>;

    async fn stop_driver(&mut self) -> Result<(), ScraperError>;
}

#[async_trait]
pub trait SessionLauncher: Send + Sync {
    /// 途中で失敗した場合は確保済みのリソースを `diag` に記録しながら解放してから返す
    async fn acquire(
        &self,
        options: &LaunchOptions,
        diag: &Diagnostics,
    ) -> Result<Box<dyn BrowserSession>, ScraperError>;
}
