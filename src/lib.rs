//! 楽天RMS 広告レポートCSVスクレイパー
//!
//! - RMSにログインし、広告コンソールでレポート作成を依頼
//! - ダウンロード履歴の完了を待ってZIPを取得し、CSVを取り出す
//!
//! # 使用例
//!
//! ```rust,ignore
//! use rms_report_scraper::{Credentials, ReportOutcome, ReportRequest, ReportService, ScraperConfig};
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let credentials = Credentials::from_env().unwrap();
//!     let mut service = ReportService::new(ScraperConfig::new(credentials));
//!
//!     let request = ReportRequest::new("rpp")
//!         .with_download_path("./downloads")
//!         .with_headless(false);
//!
//!     match service.call(request).await.unwrap() {
//!         ReportOutcome::Csv(csv) => println!("CSV downloaded: {:?}", csv.csv_path),
//!         ReportOutcome::NoData => println!("対象データなし"),
//!     }
//! }
//! ```

pub mod archive;
pub mod browser;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod registry;
pub mod rms;
pub mod service;
pub mod traits;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

// 主要な型をリエクスポート
pub use browser::{ChromeLauncher, LaunchOptions, Locator};
pub use config::{CredentialPair, Credentials, ScraperConfig, Timeouts};
pub use diagnostics::{Diagnostics, DiagnosticsSink, RecordingSink, TracingSink};
pub use error::ScraperError;
pub use registry::{resolve, ReportType, ReportTypeDescriptor};
pub use service::{ReportCsv, ReportOutcome, ReportRequest, ReportService};
pub use traits::{BrowserSession, PageDriver, SessionLauncher};
pub use workflow::fetch_report_csv;
