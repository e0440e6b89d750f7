use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ScraperError;

pub const DEFAULT_LOGIN_URL: &str = "https://glogin.rms.rakuten.co.jp/";
pub const DEFAULT_CONSOLE_BASE_URL: &str = "https://ad.rms.rakuten.co.jp";

/// ID + パスワードの組
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CredentialPair {
    #[serde(alias = "login_id", alias = "loginId", alias = "user_id", alias = "userId")]
    pub id: String,
    #[serde(alias = "password")]
    pub secret: String,
}

impl CredentialPair {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("id", &self.id)
            .field("secret", &"********")
            .finish()
    }
}

/// RMS (primary) と楽天会員 (secondary) の認証情報
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub primary: CredentialPair,
    pub secondary: CredentialPair,
}

impl Credentials {
    pub fn new(primary: CredentialPair, secondary: CredentialPair) -> Self {
        Self { primary, secondary }
    }

    /// 4つの値がすべて揃っているか確認
    pub fn validate(&self) -> Result<(), ScraperError> {
        let missing: Vec<&'static str> = [
            ("RMS login_id", &self.primary.id),
            ("RMS password", &self.primary.secret),
            ("Rakuten user_id", &self.secondary.id),
            ("Rakuten password", &self.secondary.secret),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ScraperError::MissingCredentials(missing))
        }
    }

    /// 環境変数から認証情報を読み込む
    ///
    /// - `RMS_LOGIN_ID` / `RMS_PASSWORD`、なければ `RMS_CREDENTIALS` (JSON)
    /// - `RAKUTEN_USER_ID` / `RAKUTEN_PASSWORD`、なければ `RAKUTEN_CREDENTIALS` (JSON)
    pub fn from_env() -> Result<Self, ScraperError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ScraperError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let primary = load_pair(&lookup, "RMS_LOGIN_ID", "RMS_PASSWORD", "RMS_CREDENTIALS");
        let secondary = load_pair(
            &lookup,
            "RAKUTEN_USER_ID",
            "RAKUTEN_PASSWORD",
            "RAKUTEN_CREDENTIALS",
        );
        let credentials = Self::new(primary, secondary);
        credentials.validate()?;
        Ok(credentials)
    }
}

fn load_pair<F>(lookup: &F, id_key: &str, secret_key: &str, json_key: &str) -> CredentialPair
where
    F: Fn(&str) -> Option<String>,
{
    let id = lookup(id_key).unwrap_or_default();
    let secret = lookup(secret_key).unwrap_or_default();
    if !id.is_empty() && !secret.is_empty() {
        return CredentialPair { id, secret };
    }

    // JSON形式の環境変数もサポート
    lookup(json_key)
        .and_then(|raw| match serde_json::from_str::<CredentialPair>(&raw) {
            Ok(pair) => Some(pair),
            Err(e) => {
                tracing::warn!("{} のJSON解析に失敗しました: {}", json_key, e);
                None
            }
        })
        .unwrap_or(CredentialPair { id, secret })
}

/// ログイン画面のセレクタ
#[derive(Debug, Clone)]
pub struct LoginSelectors {
    pub primary_id: String,
    pub primary_secret: String,
    pub submit: String,
    pub secondary_id: String,
    pub secondary_secret: String,
    /// 確認画面の「次へ」ボタン (CSS, テキスト)
    pub proceed: (String, String),
    pub console_entry: String,
    pub terms_accept: (String, String),
    pub interstitial_checkbox: String,
    pub interstitial_proceed: (String, String),
}

impl Default for LoginSelectors {
    fn default() -> Self {
        Self {
            primary_id: "input[name='login_id']".into(),
            primary_secret: "input[name='passwd']".into(),
            submit: "button[name='submit']".into(),
            secondary_id: "input[name='user_id']".into(),
            secondary_secret: "input[name='user_passwd']".into(),
            proceed: ("button[name='submit']".into(), "次へ".into()),
            console_entry: "a[href*='mainmenu.rms.rakuten.co.jp']".into(),
            terms_accept: ("button[type='submit']".into(), "RMSを利用します".into()),
            interstitial_checkbox: "input[type='checkbox'][name='confirm']".into(),
            interstitial_proceed: (
                "button.btn-reset.btn-round.btn-red".into(),
                "RMSメインメニューへ進む".into(),
            ),
        }
    }
}

/// ダウンロード履歴テーブルのセレクタと判定文言
#[derive(Debug, Clone)]
pub struct HistorySelectors {
    pub refresh_button: String,
    pub status_cell: String,
    pub action_cell: String,
    pub action_text: String,
    pub complete_status: String,
    pub no_data_text: String,
}

impl Default for HistorySelectors {
    fn default() -> Self {
        Self {
            refresh_button: "#btnDownloadHistoryRefresh".into(),
            status_cell: "table.table tbody tr:first-child td:nth-child(2) div.cell-content".into(),
            action_cell: "table.table tbody tr:first-child td:nth-child(3)".into(),
            action_text: "ダウンロード".into(),
            complete_status: "完了".into(),
            no_data_text: "対象データがありません".into(),
        }
    }
}

/// 各ステップの待機時間
#[derive(Debug, Clone)]
pub struct Timeouts {
    pub navigation: Duration,
    pub network_idle: Duration,
    pub optional_element: Duration,
    pub console_entry: Duration,
    pub terms: Duration,
    pub navigation_selector: Duration,
    pub trigger_candidate: Duration,
    /// クリック後の画面描画待ち
    pub settle: Duration,
    pub poll_interval: Duration,
    pub poll_max_wait: Duration,
    pub download_action: Duration,
    pub download: Duration,
    /// リクエスト全体の上限
    pub overall: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(90),
            network_idle: Duration::from_secs(30),
            optional_element: Duration::from_secs(10),
            console_entry: Duration::from_secs(60),
            terms: Duration::from_secs(5),
            navigation_selector: Duration::from_secs(20),
            trigger_candidate: Duration::from_secs(5),
            settle: Duration::from_secs(2),
            poll_interval: Duration::from_secs(5),
            poll_max_wait: Duration::from_secs(300),
            download_action: Duration::from_secs(5),
            download: Duration::from_secs(60),
            overall: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub credentials: Credentials,
    pub login_url: String,
    pub console_base_url: String,
    pub login: LoginSelectors,
    pub history: HistorySelectors,
    pub timeouts: Timeouts,
    /// 失敗時のスクリーンショットを `<download_dir>/screenshots` に保存する
    pub capture_screenshots: bool,
    /// スクリーンショットをbase64でdebugログにも出力する
    pub inline_screenshots: bool,
    pub chrome_executable: Option<PathBuf>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
            console_base_url: DEFAULT_CONSOLE_BASE_URL.to_string(),
            login: LoginSelectors::default(),
            history: HistorySelectors::default(),
            timeouts: Timeouts::default(),
            capture_screenshots: true,
            inline_screenshots: false,
            chrome_executable: None,
        }
    }
}

impl ScraperConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            ..Default::default()
        }
    }

    pub fn with_login_url(mut self, url: impl Into<String>) -> Self {
        self.login_url = url.into();
        self
    }

    pub fn with_console_base_url(mut self, url: impl Into<String>) -> Self {
        self.console_base_url = url.into();
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_screenshots(mut self, capture: bool) -> Self {
        self.capture_screenshots = capture;
        self
    }

    pub fn with_inline_screenshots(mut self, inline: bool) -> Self {
        self.inline_screenshots = inline;
        self
    }

    pub fn with_chrome_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.chrome_executable = Some(path.into());
        self
    }

    /// `{console_base}/{slug}/{landing}` を組み立てる
    pub fn landing_url(&self, slug: &str, landing_path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.console_base_url.trim_end_matches('/'),
            slug,
            landing_path.trim_start_matches('/')
        )
    }
}
