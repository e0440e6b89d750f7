use crate::browser::Locator;
use crate::config::ScraperConfig;
use crate::diagnostics::Diagnostics;
use crate::error::ScraperError;
use crate::traits::PageDriver;

use super::{attempt_optional, settle};

/// ログインの各段階
///
/// 順番に進み、任意の段階は画面に要素が出ていなければスキップする。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    NotLoggedIn,
    PrimaryCredentials,
    SecondaryCredentialCheck,
    ConfirmationCheck,
    ConsoleEntry,
    TermsCheck,
    InterstitialCheck,
    Authenticated,
}

impl LoginStep {
    pub fn name(self) -> &'static str {
        match self {
            LoginStep::NotLoggedIn => "not_logged_in",
            LoginStep::PrimaryCredentials => "primary_credentials",
            LoginStep::SecondaryCredentialCheck => "secondary_credentials",
            LoginStep::ConfirmationCheck => "confirmation",
            LoginStep::ConsoleEntry => "console_entry",
            LoginStep::TermsCheck => "terms",
            LoginStep::InterstitialCheck => "interstitial",
            LoginStep::Authenticated => "authenticated",
        }
    }

    fn next(self) -> LoginStep {
        match self {
            LoginStep::NotLoggedIn => LoginStep::PrimaryCredentials,
            LoginStep::PrimaryCredentials => LoginStep::SecondaryCredentialCheck,
            LoginStep::SecondaryCredentialCheck => LoginStep::ConfirmationCheck,
            LoginStep::ConfirmationCheck => LoginStep::ConsoleEntry,
            LoginStep::ConsoleEntry => LoginStep::TermsCheck,
            LoginStep::TermsCheck => LoginStep::InterstitialCheck,
            LoginStep::InterstitialCheck | LoginStep::Authenticated => LoginStep::Authenticated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepResult {
    Performed,
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginOutcome {
    pub performed: Vec<LoginStep>,
    pub skipped: Vec<LoginStep>,
}

pub struct LoginFlow<'a> {
    page: &'a dyn PageDriver,
    config: &'a ScraperConfig,
    diag: &'a Diagnostics,
}

impl<'a> LoginFlow<'a> {
    pub fn new(page: &'a dyn PageDriver, config: &'a ScraperConfig, diag: &'a Diagnostics) -> Self {
        Self { page, config, diag }
    }

    pub async fn run(&self) -> Result<LoginOutcome, ScraperError> {
        // 認証情報の不足は設定エラーとしてそのまま返す
        self.config.credentials.validate()?;

        self.diag.info("login", "ログイン処理開始...");
        let mut outcome = LoginOutcome::default();
        let mut step = LoginStep::NotLoggedIn;

        while step != LoginStep::Authenticated {
            match self.execute(step).await {
                Ok(StepResult::Performed) => outcome.performed.push(step),
                Ok(StepResult::Skipped) => outcome.skipped.push(step),
                Err(e) => {
                    self.diag.error(
                        "login",
                        format!("RMSログイン中にエラーが発生しました ({}): {}", step.name(), e),
                    );
                    self.diag
                        .capture(self.page, &format!("error_login_{}", step.name()))
                        .await;
                    return Err(ScraperError::LoginFailed {
                        step: step.name(),
                        source: Box::new(e),
                    });
                }
            }
            step = step.next();
        }

        self.diag.info("login", "ログイン処理が正常に完了しました");
        Ok(outcome)
    }

    async fn execute(&self, step: LoginStep) -> Result<StepResult, ScraperError> {
        let selectors = &self.config.login;
        let timeouts = &self.config.timeouts;
        let credentials = &self.config.credentials;

        match step {
            LoginStep::NotLoggedIn => {
                self.diag.info("login", "RMSログインページに移動します...");
                self.page.goto(&self.config.login_url).await?;
                Ok(StepResult::Performed)
            }
            LoginStep::PrimaryCredentials => {
                self.page
                    .fill(&Locator::css(&selectors.primary_id), &credentials.primary.id)
                    .await?;
                self.page
                    .fill(&Locator::css(&selectors.primary_secret), &credentials.primary.secret)
                    .await?;
                self.page.click(&Locator::css(&selectors.submit)).await?;
                settle(self.page, timeouts).await?;
                self.log_url("ログイン後のURL").await;
                Ok(StepResult::Performed)
            }
            LoginStep::SecondaryCredentialCheck => {
                let id_field = Locator::css(&selectors.secondary_id);
                if !attempt_optional(self.page, &id_field, timeouts.optional_element).await {
                    self.diag.info("login", "楽天会員ログイン画面はスキップされました。");
                    return Ok(StepResult::Skipped);
                }
                self.diag.info("login", "楽天会員ログイン情報を入力します...");
                self.page.fill(&id_field, &credentials.secondary.id).await?;
                self.page
                    .fill(
                        &Locator::css(&selectors.secondary_secret),
                        &credentials.secondary.secret,
                    )
                    .await?;
                self.page.click(&Locator::css(&selectors.submit)).await?;
                settle(self.page, timeouts).await?;
                Ok(StepResult::Performed)
            }
            LoginStep::ConfirmationCheck => {
                let (css, text) = &selectors.proceed;
                let proceed = Locator::text(css, text);
                if !attempt_optional(self.page, &proceed, timeouts.optional_element).await {
                    self.diag.info("login", "確認画面（次へボタン）はスキップされました。");
                    return Ok(StepResult::Skipped);
                }
                self.page.click(&proceed).await?;
                settle(self.page, timeouts).await?;
                Ok(StepResult::Performed)
            }
            LoginStep::ConsoleEntry => {
                let link = Locator::css(&selectors.console_entry);
                if !self.page.wait_visible(&link, timeouts.console_entry).await? {
                    return Err(ScraperError::LoginLandingNotFound);
                }
                self.page.click(&link).await?;
                settle(self.page, timeouts).await?;
                self.log_url("RMSメインメニュー後のURL").await;
                Ok(StepResult::Performed)
            }
            LoginStep::TermsCheck => {
                let (css, text) = &selectors.terms_accept;
                let accept = Locator::text(css, text);
                if !attempt_optional(self.page, &accept, timeouts.terms).await {
                    self.diag.info(
                        "login",
                        "RMS利用規約同意ボタンは表示されませんでした。既に同意済みとみなし処理を続行します。",
                    );
                    return Ok(StepResult::Skipped);
                }
                self.page.click(&accept).await?;
                settle(self.page, timeouts).await?;
                Ok(StepResult::Performed)
            }
            LoginStep::InterstitialCheck => Ok(self.interstitial().await),
            LoginStep::Authenticated => Ok(StepResult::Performed),
        }
    }

    /// 不定期に表示される確認画面。ここでの失敗はログインを中断しない
    async fn interstitial(&self) -> StepResult {
        let selectors = &self.config.login;
        let timeouts = &self.config.timeouts;
        let checkbox = Locator::css(&selectors.interstitial_checkbox);

        if !attempt_optional(self.page, &checkbox, timeouts.optional_element).await {
            self.diag.info("login", "確認画面は表示されませんでした。");
            return StepResult::Skipped;
        }

        let result: Result<(), ScraperError> = async {
            self.page.check(&checkbox).await?;
            let (css, text) = &selectors.interstitial_proceed;
            let proceed = Locator::text(css, text);
            if attempt_optional(self.page, &proceed, timeouts.optional_element).await {
                self.page.click(&proceed).await?;
                settle(self.page, timeouts).await?;
            } else {
                self.diag
                    .warn("login", "「RMSメインメニューへ進む」ボタンが見つかりません。");
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            self.diag.warn(
                "login",
                format!("確認画面の処理中にエラーが発生しましたが、処理を続行します: {}", e),
            );
            self.diag.capture(self.page, "warning_confirm_screen").await;
        }
        StepResult::Performed
    }

    async fn log_url(&self, label: &str) {
        if let Some(url) = self.page.current_url().await {
            self.diag.info("login", format!("{}: {}", label, url));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticLevel, RecordingSink};
    use crate::testing::{test_config, FakePage};
    use std::sync::Arc;

    fn console_link(config: &ScraperConfig) -> Locator {
        Locator::css(&config.login.console_entry)
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_optional_steps_performed() {
        let config = test_config();
        let login = &config.login;
        let page = FakePage::new();
        page.show(&Locator::css(&login.secondary_id));
        page.show(&Locator::text(&login.proceed.0, &login.proceed.1));
        page.show(&console_link(&config));
        page.show(&Locator::text(&login.terms_accept.0, &login.terms_accept.1));
        page.show(&Locator::css(&login.interstitial_checkbox));
        page.show(&Locator::text(
            &login.interstitial_proceed.0,
            &login.interstitial_proceed.1,
        ));

        let diag = Diagnostics::default();
        let outcome = LoginFlow::new(&page, &config, &diag).run().await.unwrap();

        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.performed.len(), 7);
        assert_eq!(page.value(&Locator::css(&login.primary_id)).as_deref(), Some("shop"));
        assert_eq!(
            page.value(&Locator::css(&login.secondary_secret)).as_deref(),
            Some("member-pass")
        );
        assert!(page.called(&format!("check {}", login.interstitial_checkbox)));
        assert_eq!(page.calls()[0], format!("goto {}", config.login_url));
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_optional_steps_are_skipped() {
        let config = test_config();
        let page = FakePage::new();
        page.show(&console_link(&config));
        let sink = Arc::new(RecordingSink::new());
        let diag = Diagnostics::new(sink.clone());

        let outcome = LoginFlow::new(&page, &config, &diag).run().await.unwrap();

        assert_eq!(
            outcome.skipped,
            vec![
                LoginStep::SecondaryCredentialCheck,
                LoginStep::ConfirmationCheck,
                LoginStep::TermsCheck,
                LoginStep::InterstitialCheck
            ]
        );
        assert!(outcome.performed.contains(&LoginStep::ConsoleEntry));
        assert!(sink.contains(DiagnosticLevel::Info, "楽天会員ログイン画面はスキップ"));
        assert!(page.value(&Locator::css(&config.login.secondary_id)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_console_link_fails_login() {
        let config = test_config();
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::new();
        let diag = Diagnostics::default().with_screenshot_dir(Some(dir.path().into()));

        let err = LoginFlow::new(&page, &config, &diag).run().await.unwrap_err();

        match err {
            ScraperError::LoginFailed { step, source } => {
                assert_eq!(step, "console_entry");
                assert!(matches!(*source, ScraperError::LoginLandingNotFound));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let shots: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(shots.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_error_is_wrapped() {
        let config = test_config();
        let page = FakePage::new();
        page.fail_goto(&config.login_url);
        let diag = Diagnostics::default();

        let err = LoginFlow::new(&page, &config, &diag).run().await.unwrap_err();

        match err {
            ScraperError::LoginFailed { step, source } => {
                assert_eq!(step, "not_logged_in");
                assert!(matches!(*source, ScraperError::Navigation(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interstitial_without_proceed_only_warns() {
        let config = test_config();
        let page = FakePage::new();
        page.show(&console_link(&config));
        page.show(&Locator::css(&config.login.interstitial_checkbox));
        let sink = Arc::new(RecordingSink::new());
        let diag = Diagnostics::new(sink.clone());

        let outcome = LoginFlow::new(&page, &config, &diag).run().await.unwrap();

        assert!(outcome.performed.contains(&LoginStep::InterstitialCheck));
        assert!(sink.contains(DiagnosticLevel::Warn, "RMSメインメニューへ進む"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_credentials_are_not_wrapped() {
        let mut config = test_config();
        config.credentials.secondary.secret.clear();
        let page = FakePage::new();
        let diag = Diagnostics::default();

        let err = LoginFlow::new(&page, &config, &diag).run().await.unwrap_err();

        assert!(matches!(err, ScraperError::MissingCredentials(ref m) if m == &vec!["Rakuten password"]));
        assert!(page.calls().is_empty());
    }

    #[test]
    fn test_step_sequence_ends_authenticated() {
        let mut step = LoginStep::NotLoggedIn;
        let mut visited = 0;
        while step != LoginStep::Authenticated {
            step = step.next();
            visited += 1;
        }
        assert_eq!(visited, 7);
        assert_eq!(LoginStep::Authenticated.next(), LoginStep::Authenticated);
    }
}
