//! 楽天RMS 広告コンソールの画面操作
//!
//! ログイン → レポート種別トップ → 日付指定 → レポート作成 → ダウンロード履歴の監視

mod login;
mod poller;
mod report;

use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::browser::Locator;
use crate::config::Timeouts;
use crate::error::ScraperError;
use crate::traits::PageDriver;

pub use login::{LoginFlow, LoginOutcome, LoginStep};
pub use poller::{poll_until_terminal, HistoryRow, HistorySource, PageHistory, PollOutcome, PollSettings};
pub use report::{jst_yesterday, report_date_range, DateRange, ReportFlow};

/// 要素が上限時間内に表示されるかを確認する
///
/// 表示されない場合やエラーの場合は `false`（呼び出し側でスキップ扱い）。
pub async fn attempt_optional(page: &dyn PageDriver, locator: &Locator, timeout: Duration) -> bool {
    match page.wait_visible(locator, timeout).await {
        Ok(visible) => visible,
        Err(e) => {
            debug!("表示確認に失敗しました ({}): {}", locator, e);
            false
        }
    }
}

/// ネットワークアイドル待機 + 描画待ち
pub(crate) async fn settle(page: &dyn PageDriver, timeouts: &Timeouts) -> Result<(), ScraperError> {
    page.wait_network_idle(timeouts.network_idle).await?;
    sleep(timeouts.settle).await;
    Ok(())
}
