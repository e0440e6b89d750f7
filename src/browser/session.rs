use std::path::PathBuf;

use crate::diagnostics::Diagnostics;
use crate::traits::BrowserSession;

/// 固定のデスクトップ表示サイズ
pub const DESKTOP_VIEWPORT: (u32, u32) = (1920, 1080);

pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

pub const LOCALE: &str = "ja-JP";
pub const ACCEPT_LANGUAGE: &str = "ja-JP,ja";

/// 制限された環境でのヘッドレス実行用の起動引数（サンドボックスなし、描画を固定）
pub const LAUNCH_ARGS: &[&str] = &[
    "--lang=ja-JP,ja",
    "--font-render-hinting=none",
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--force-color-profile=srgb",
    "--force-device-scale-factor=1",
    "--disable-blink-features=AutomationControlled",
];

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    /// ダウンロードを受け付けるディレクトリ
    pub download_dir: PathBuf,
}

impl LaunchOptions {
    pub fn new(headless: bool, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            headless,
            download_dir: download_dir.into(),
        }
    }
}

/// セッションを page → context → browser → driver の順に解放する
///
/// 各ステップの失敗は記録のみで、後続の解放は必ず実行する。
pub async fn release_session(session: &mut dyn BrowserSession, diag: &Diagnostics) {
    diag.info("release", "ブラウザを終了中...");

    if let Err(e) = session.close_page().await {
        diag.warn("release", format!("ページのクローズに失敗しました: {}", e));
    }
    if let Err(e) = session.close_context().await {
        diag.warn("release", format!("コンテキストのクローズに失敗しました: {}", e));
    }
    if let Err(e) = session.close_browser().await {
        diag.warn("release", format!("ブラウザのクローズに失敗しました: {}", e));
    }
    if let Err(e) = session.stop_driver().await {
        diag.warn("release", format!("ドライバの停止に失敗しました: {}", e));
    }

    diag.info("release", "ブラウザ終了完了");
}
