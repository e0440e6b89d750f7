use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("サポートされていないレポート種別です: {given}. 利用可能: {}", .available.join(", "))]
    UnknownReportType {
        given: String,
        available: Vec<&'static str>,
    },

    #[error("認証情報が不足しています: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),

    #[error("ブラウザ初期化エラー: {0}")]
    BrowserInit(String),

    #[error("ナビゲーションエラー: {0}")]
    Navigation(String),

    #[error("ログインエラー ({step}): {source}")]
    LoginFailed {
        step: &'static str,
        #[source]
        source: Box<ScraperError>,
    },

    #[error("RMSメインメニューリンクが見つかりません")]
    LoginLandingNotFound,

    #[error("トップページが正しく読み込まれませんでした: {0}")]
    LandingPageLoadFailed(String),

    #[error("日付の設定に失敗しました ({field}): 期待値={expected}, 実際={}", .actual.as_deref().unwrap_or("なし"))]
    DateAssignmentFailed {
        field: &'static str,
        expected: String,
        actual: Option<String>,
    },

    #[error("完了状態のダウンロードリンクが{0:?}以内に見つかりませんでした")]
    ReportGenerationTimeout(Duration),

    #[error("ZIPファイル内にCSVファイルが見つかりませんでした: {0}")]
    NoCsvInArchive(PathBuf),

    #[error("ダウンロードエラー: {0}")]
    Download(String),

    #[error("タイムアウト: {0}")]
    Timeout(String),

    #[error("要素が見つかりません: {0}")]
    ElementNotFound(String),

    #[error("JavaScript実行エラー: {0}")]
    JavaScript(String),

    #[error("ファイル操作エラー: {0}")]
    FileIO(#[from] std::io::Error),

    #[error("ZIP展開エラー: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl ScraperError {
    /// サーバー設定の不備を示すエラーか
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ScraperError::UnknownReportType { .. } | ScraperError::MissingCredentials(_)
        )
    }
}
