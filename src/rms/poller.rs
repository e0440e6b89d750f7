use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use crate::browser::Locator;
use crate::config::{HistorySelectors, ScraperConfig};
use crate::diagnostics::Diagnostics;
use crate::error::ScraperError;
use crate::traits::PageDriver;

/// ダウンロード履歴の先頭行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRow {
    pub status: String,
    pub action_available: bool,
    pub no_data_marker: bool,
}

/// 監視の終了条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// ダウンロード可能
    Ready,
    /// 対象データなし
    NoData,
}

impl HistoryRow {
    /// 終了条件に達していなければ `None`
    pub fn classify(&self, complete_status: &str) -> Option<PollOutcome> {
        if self.status.trim() != complete_status {
            return None;
        }
        if self.no_data_marker {
            Some(PollOutcome::NoData)
        } else if self.action_available {
            Some(PollOutcome::Ready)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
    /// 完了後にダウンロードボタンの表示を待つ時間
    pub action_wait: Duration,
    pub complete_status: String,
}

impl PollSettings {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            interval: config.timeouts.poll_interval,
            max_wait: config.timeouts.poll_max_wait,
            action_wait: config.timeouts.download_action,
            complete_status: config.history.complete_status.clone(),
        }
    }
}

/// 履歴一覧の読み取り
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// 更新ボタンがあれば押す
    async fn refresh(&self) -> Result<(), ScraperError>;

    async fn latest_row(&self, action_wait: Duration) -> Result<HistoryRow, ScraperError>;
}

/// 履歴の先頭行が完了またはデータなしになるまで監視する
///
/// `max_wait` を締め切りとし、最後の確認は締め切りちょうどに行う。
pub async fn poll_until_terminal(
    source: &dyn HistorySource,
    settings: &PollSettings,
    diag: &Diagnostics,
) -> Result<PollOutcome, ScraperError> {
    diag.info(
        "poll",
        format!(
            "レポートの作成完了を待機します (最大{}秒, {}秒間隔)",
            settings.max_wait.as_secs(),
            settings.interval.as_secs()
        ),
    );

    let deadline = Instant::now() + settings.max_wait;
    let mut check = 0u32;
    loop {
        check += 1;
        if let Err(e) = source.refresh().await {
            diag.warn("poll", format!("履歴の更新に失敗しました: {}", e));
        }

        let action_wait = settings
            .action_wait
            .min(deadline.saturating_duration_since(Instant::now()));
        match source.latest_row(action_wait).await {
            Ok(row) => match row.classify(&settings.complete_status) {
                Some(PollOutcome::NoData) => {
                    diag.info("poll", "対象データがありません。");
                    return Ok(PollOutcome::NoData);
                }
                Some(PollOutcome::Ready) => {
                    diag.info("poll", "レポートの作成が完了しました。");
                    return Ok(PollOutcome::Ready);
                }
                None => diag.info(
                    "poll",
                    format!(
                        "ステータス確認 {}回目: {}",
                        check,
                        if row.status.is_empty() { "(空)" } else { row.status.as_str() }
                    ),
                ),
            },
            Err(e) => diag.warn("poll", format!("ステータス確認中にエラーが発生しました: {}", e)),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        sleep(settings.interval.min(remaining)).await;
    }

    diag.error(
        "poll",
        format!("{}秒以内にレポートが完了しませんでした", settings.max_wait.as_secs()),
    );
    Err(ScraperError::ReportGenerationTimeout(settings.max_wait))
}

/// ブラウザ上のダウンロード履歴テーブル
pub struct PageHistory<'a> {
    page: &'a dyn PageDriver,
    selectors: &'a HistorySelectors,
    /// 更新ボタン押下後、テーブルの再描画を待つ時間
    settle: Duration,
}

impl<'a> PageHistory<'a> {
    pub fn new(page: &'a dyn PageDriver, selectors: &'a HistorySelectors, settle: Duration) -> Self {
        Self {
            page,
            selectors,
            settle,
        }
    }

    pub(crate) fn status_locator(&self) -> Locator {
        Locator::css(&self.selectors.status_cell)
    }

    pub(crate) fn cell_locator(&self) -> Locator {
        Locator::css(&self.selectors.action_cell)
    }

    pub(crate) fn action_locator(&self) -> Locator {
        let cell = &self.selectors.action_cell;
        Locator::text(
            format!("{} a, {} button", cell, cell),
            &self.selectors.action_text,
        )
    }

    /// 先頭行のダウンロードボタンを押し、保存されたファイルのパスを返す
    pub async fn download_latest(
        &self,
        dir: &Path,
        timeout: Duration,
    ) -> Result<PathBuf, ScraperError> {
        self.page.download(&self.action_locator(), dir, timeout).await
    }
}

#[async_trait]
impl HistorySource for PageHistory<'_> {
    async fn refresh(&self) -> Result<(), ScraperError> {
        let button = Locator::css(&self.selectors.refresh_button);
        if self.page.wait_visible(&button, Duration::ZERO).await? {
            self.page.click(&button).await?;
            sleep(self.settle).await;
        }
        Ok(())
    }

    async fn latest_row(&self, action_wait: Duration) -> Result<HistoryRow, ScraperError> {
        let status = self
            .page
            .text_content(&self.status_locator())
            .await?
            .unwrap_or_default();
        if status != self.selectors.complete_status {
            return Ok(HistoryRow {
                status,
                action_available: false,
                no_data_marker: false,
            });
        }

        let cell = self
            .page
            .text_content(&self.cell_locator())
            .await?
            .unwrap_or_default();
        let no_data_marker = cell.contains(self.selectors.no_data_text.as_str());
        let action_available = !no_data_marker
            && self
                .page
                .wait_visible(&self.action_locator(), action_wait)
                .await?;

        Ok(HistoryRow {
            status,
            action_available,
            no_data_marker,
        })
    }
}
