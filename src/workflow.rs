//! 1リクエスト分の処理
//!
//! 種別解決 → セッション取得 → ログイン → レポート作成依頼 → 完了待ち → ダウンロード → 展開 → 解放

use std::path::PathBuf;

use chrono::Utc;
use tokio::time::timeout;

use crate::archive;
use crate::browser::{release_session, LaunchOptions};
use crate::config::ScraperConfig;
use crate::diagnostics::Diagnostics;
use crate::error::ScraperError;
use crate::registry::{self, ReportTypeDescriptor};
use crate::rms::{poll_until_terminal, LoginFlow, PageHistory, PollOutcome, PollSettings, ReportFlow};
use crate::service::ReportRequest;
use crate::traits::{PageDriver, SessionLauncher};

/// ダウンロードディレクトリ内のスクリーンショット保存先
pub const SCREENSHOT_DIR: &str = "screenshots";

/// レポートCSVを取得する
///
/// 対象データがない場合は `Ok(None)`。
/// セッションは成功・失敗にかかわらず1回だけ解放する。
pub async fn fetch_report_csv(
    launcher: &dyn SessionLauncher,
    config: &ScraperConfig,
    request: &ReportRequest,
    diag: &Diagnostics,
) -> Result<Option<PathBuf>, ScraperError> {
    let descriptor = registry::resolve(&request.report_type)?;
    config.credentials.validate()?;

    std::fs::create_dir_all(&request.download_dir)?;
    let mut diag = diag.clone().with_inline_screenshots(config.inline_screenshots);
    if config.capture_screenshots {
        let dir = request.download_dir.join(SCREENSHOT_DIR);
        std::fs::create_dir_all(&dir)?;
        diag = diag.with_screenshot_dir(Some(dir));
    }

    diag.info(
        "workflow",
        format!(
            "{}レポートの取得を開始します (保存先: {:?})",
            descriptor.label, request.download_dir
        ),
    );

    let options = LaunchOptions::new(request.headless, &request.download_dir);
    let mut session = launcher.acquire(&options, &diag).await?;

    let result = match session.page() {
        Ok(page) => {
            let stages = run_stages(page.as_ref(), config, descriptor, request, &diag);
            match timeout(config.timeouts.overall, stages).await {
                Ok(result) => result,
                Err(_) => {
                    diag.error("workflow", "処理全体がタイムアウトしました");
                    diag.capture(page.as_ref(), "error_timeout").await;
                    Err(ScraperError::Timeout(format!(
                        "{}秒以内に処理が完了しませんでした",
                        config.timeouts.overall.as_secs()
                    )))
                }
            }
        }
        Err(e) => Err(e),
    };

    release_session(session.as_mut(), &diag).await;

    match &result {
        Ok(Some(path)) => diag.info("workflow", format!("CSVファイルを取得しました: {:?}", path)),
        Ok(None) => diag.info("workflow", "対象データがないためCSVはありません"),
        Err(e) => diag.error("workflow", format!("レポート取得に失敗しました: {}", e)),
    }
    result
}

async fn run_stages(
    page: &dyn PageDriver,
    config: &ScraperConfig,
    descriptor: &ReportTypeDescriptor,
    request: &ReportRequest,
    diag: &Diagnostics,
) -> Result<Option<PathBuf>, ScraperError> {
    LoginFlow::new(page, config, diag).run().await?;

    if let Err(e) = ReportFlow::new(page, config, descriptor, diag)
        .request(request.target_date, Utc::now())
        .await
    {
        let category = match &e {
            ScraperError::DateAssignmentFailed { .. } => "date_not_set",
            ScraperError::LandingPageLoadFailed(_) => "error_landing",
            _ => "error_report",
        };
        diag.capture(page, category).await;
        return Err(e);
    }

    let history = PageHistory::new(page, &config.history, config.timeouts.settle);
    match poll_until_terminal(&history, &PollSettings::from_config(config), diag).await {
        Ok(PollOutcome::NoData) => return Ok(None),
        Ok(PollOutcome::Ready) => {}
        Err(e) => {
            let category = match &e {
                ScraperError::ReportGenerationTimeout(_) => "error_status_timeout",
                _ => "error_report",
            };
            diag.capture(page, category).await;
            return Err(e);
        }
    }

    let archive_path = match history
        .download_latest(&request.download_dir, config.timeouts.download)
        .await
    {
        Ok(path) => path,
        Err(e) => {
            diag.capture(page, "error_download").await;
            return Err(e);
        }
    };
    diag.info("workflow", format!("ダウンロード完了: {:?}", archive_path));

    let csv = archive::extract_report_csv(
        &archive_path,
        &request.download_dir,
        descriptor.slug,
        diag,
    )?;
    Ok(Some(csv))
}
