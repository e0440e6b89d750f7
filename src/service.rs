use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::NaiveDate;
use tower::Service;
use tracing::{info, warn};

use crate::browser::ChromeLauncher;
use crate::config::ScraperConfig;
use crate::diagnostics::Diagnostics;
use crate::error::ScraperError;
use crate::traits::SessionLauncher;
use crate::workflow::fetch_report_csv;

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// レポート取得リクエスト
#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub report_type: String,
    /// 未指定なら日本時間の昨日
    pub target_date: Option<NaiveDate>,
    pub download_dir: PathBuf,
    pub headless: bool,
}

impl ReportRequest {
    pub fn new(report_type: impl Into<String>) -> Self {
        Self {
            report_type: report_type.into(),
            target_date: None,
            download_dir: unique_download_dir(),
            headless: true,
        }
    }

    pub fn with_target_date(mut self, date: NaiveDate) -> Self {
        self.target_date = Some(date);
        self
    }

    pub fn with_download_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_dir = path.into();
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }
}

impl Default for ReportRequest {
    fn default() -> Self {
        Self::new("rpp")
    }
}

/// リクエストごとの一時ディレクトリ
fn unique_download_dir() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "rms-report-download-{}-{}-{}",
        std::process::id(),
        nanos,
        seq
    ))
}

/// 取得したCSV
#[derive(Debug)]
pub struct ReportCsv {
    pub csv_path: PathBuf,
    pub csv_content: Vec<u8>,
}

impl ReportCsv {
    pub fn new(csv_path: PathBuf) -> std::io::Result<Self> {
        let csv_content = std::fs::read(&csv_path)?;
        Ok(Self {
            csv_path,
            csv_content,
        })
    }
}

#[derive(Debug)]
pub enum ReportOutcome {
    Csv(ReportCsv),
    /// 対象データなし（エラーではない）
    NoData,
}

/// tower::Serviceを実装したレポート取得サービス
#[derive(Clone)]
pub struct ReportService {
    config: Arc<ScraperConfig>,
    launcher: Arc<dyn SessionLauncher>,
    diagnostics: Diagnostics,
}

impl ReportService {
    pub fn new(config: ScraperConfig) -> Self {
        let mut launcher =
            ChromeLauncher::from_env().with_navigation_timeout(config.timeouts.navigation);
        if config.chrome_executable.is_some() {
            launcher = launcher.with_chrome_executable(config.chrome_executable.clone());
        }
        Self {
            config: Arc::new(config),
            launcher: Arc::new(launcher),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn SessionLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }
}

impl Service<ReportRequest> for ReportService {
    type Response = ReportOutcome;
    type Error = ScraperError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ReportRequest) -> Self::Future {
        info!(
            "レポート取得リクエスト受信: type={}, date={:?}",
            req.report_type, req.target_date
        );
        let config = self.config.clone();
        let launcher = self.launcher.clone();
        let diagnostics = self.diagnostics.clone();

        Box::pin(async move {
            let artifacts = RequestArtifacts::snapshot(&req.download_dir);
            let fetched = fetch_report_csv(launcher.as_ref(), &config, &req, &diagnostics).await;
            let outcome = match fetched {
                Ok(Some(csv_path)) => ReportCsv::new(csv_path)
                    .map(ReportOutcome::Csv)
                    .map_err(ScraperError::from),
                Ok(None) => Ok(ReportOutcome::NoData),
                Err(e) => Err(e),
            };

            match &outcome {
                Ok(ReportOutcome::Csv(csv)) => info!(
                    "レポート取得完了: path={:?}, size={}bytes",
                    csv.csv_path,
                    csv.csv_content.len()
                ),
                Ok(ReportOutcome::NoData) => {
                    info!("対象データなし: type={}", req.report_type);
                    artifacts.remove();
                }
                Err(_) => artifacts.remove(),
            }
            outcome
        })
    }
}

/// リクエスト実行中にダウンロードディレクトリへ作られたもの
///
/// ディレクトリ自体がこのリクエストで作られた場合はディレクトリごと、
/// 既存のディレクトリなら実行前になかったエントリだけを削除対象にする。
struct RequestArtifacts {
    dir: PathBuf,
    preexisting: Option<HashSet<PathBuf>>,
}

impl RequestArtifacts {
    fn snapshot(dir: &Path) -> Self {
        let preexisting = std::fs::read_dir(dir).ok().map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .collect()
        });
        Self {
            dir: dir.to_path_buf(),
            preexisting,
        }
    }

    fn remove(&self) {
        let Some(preexisting) = &self.preexisting else {
            if self.dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                    warn!("ダウンロードディレクトリの削除に失敗しました: {:?}: {}", self.dir, e);
                }
            }
            return;
        };

        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for path in entries.filter_map(|entry| entry.ok()).map(|entry| entry.path()) {
            if preexisting.contains(&path) {
                continue;
            }
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            if let Err(e) = removed {
                warn!("生成ファイルの削除に失敗しました: {:?}: {}", path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Locator;
    use crate::diagnostics::{DiagnosticLevel, RecordingSink};
    use crate::registry;
    use crate::testing::{test_config, zip_bytes, FakeLauncher, FakePage, FakeRow};

    fn service_with(rows: Vec<FakeRow>) -> (ReportService, Arc<FakePage>) {
        let config = test_config();
        let page = Arc::new(FakePage::new().with_history(&config.history, rows));
        let tda = registry::resolve("tda").unwrap();
        page.show(&Locator::css(&config.login.console_entry));
        page.show(&Locator::css("body"));
        page.show(&tda.trigger_locators()[0]);
        let launcher = Arc::new(FakeLauncher::with_page(page.clone()));
        let service = ReportService::new(config).with_launcher(launcher);
        (service, page)
    }

    #[test]
    fn test_report_request_builder() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let req = ReportRequest::new("rpp-exp")
            .with_target_date(date)
            .with_download_path("/tmp/dl")
            .with_headless(false);

        assert_eq!(req.report_type, "rpp-exp");
        assert_eq!(req.target_date, Some(date));
        assert_eq!(req.download_dir, PathBuf::from("/tmp/dl"));
        assert!(!req.headless);
    }

    #[test]
    fn test_default_download_dirs_are_unique() {
        let a = ReportRequest::default();
        let b = ReportRequest::default();
        assert_eq!(a.report_type, "rpp");
        assert_ne!(a.download_dir, b.download_dir);
        assert!(a.download_dir.starts_with(std::env::temp_dir()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_csv_outcome_keeps_file() {
        let (mut service, page) =
            service_with(vec![FakeRow::new("完了", "ダウンロード").with_action()]);
        page.serve_download("tda.zip", zip_bytes(&[("tda_daily.csv", "a,b\n1,2\n")]));
        let dir = tempfile::tempdir().unwrap();
        let req = ReportRequest::new("TDA").with_download_path(dir.path().join("req"));

        let outcome = service.call(req).await.unwrap();

        match outcome {
            ReportOutcome::Csv(csv) => {
                assert_eq!(csv.csv_content, b"a,b\n1,2\n");
                assert!(csv.csv_path.exists());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_data_removes_download_dir() {
        let (mut service, _page) =
            service_with(vec![FakeRow::new("完了", "対象データがありません")]);
        let dir = tempfile::tempdir().unwrap();
        let download_dir = dir.path().join("req");
        let req = ReportRequest::new("tda").with_download_path(&download_dir);

        let outcome = service.call(req).await.unwrap();

        assert!(matches!(outcome, ReportOutcome::NoData));
        assert!(!download_dir.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_removes_download_dir() {
        let (mut service, page) = service_with(vec![FakeRow::new("完了", "ダウンロード").with_action()]);
        page.hide(&Locator::css("body"));
        let dir = tempfile::tempdir().unwrap();
        let download_dir = dir.path().join("req");
        let req = ReportRequest::new("tda").with_download_path(&download_dir);

        let err = service.call(req).await.unwrap_err();

        assert!(matches!(err, ScraperError::LandingPageLoadFailed(_)));
        assert!(!download_dir.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_callers_existing_files() {
        let (mut service, page) = service_with(vec![FakeRow::new("完了", "ダウンロード").with_action()]);
        page.hide(&Locator::css("body"));
        let dir = tempfile::tempdir().unwrap();
        let previous = dir.path().join("last_month_report.csv");
        std::fs::write(&previous, "a,b\n").unwrap();
        let req = ReportRequest::new("tda").with_download_path(dir.path());

        let err = service.call(req).await.unwrap_err();

        assert!(matches!(err, ScraperError::LandingPageLoadFailed(_)));
        assert!(dir.path().exists());
        assert_eq!(std::fs::read_to_string(&previous).unwrap(), "a,b\n");
        // screenshots/ はこのリクエストで作られたので消える
        assert!(!dir.path().join("screenshots").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_data_keeps_callers_existing_files() {
        let (mut service, _page) =
            service_with(vec![FakeRow::new("完了", "対象データがありません")]);
        let dir = tempfile::tempdir().unwrap();
        let previous = dir.path().join("last_month_report.csv");
        std::fs::write(&previous, "a,b\n").unwrap();
        let req = ReportRequest::new("tda").with_download_path(dir.path());

        let outcome = service.call(req).await.unwrap();

        assert!(matches!(outcome, ReportOutcome::NoData));
        assert!(previous.exists());
        let left: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(left.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_injected_diagnostics_reach_launcher() {
        let config = test_config();
        let launcher = Arc::new(FakeLauncher::new().failing_open());
        let sink = Arc::new(RecordingSink::new());
        let mut service = ReportService::new(config)
            .with_launcher(launcher.clone())
            .with_diagnostics(Diagnostics::new(sink.clone()));
        let dir = tempfile::tempdir().unwrap();
        let req = ReportRequest::new("tda").with_download_path(dir.path().join("req"));

        let err = service.call(req).await.unwrap_err();

        assert!(matches!(err, ScraperError::BrowserInit(_)));
        assert_eq!(launcher.release_log().len(), 4);
        assert!(sink.contains(DiagnosticLevel::Info, "ブラウザ終了完了"));
    }
}
