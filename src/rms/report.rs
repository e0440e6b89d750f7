use chrono::{DateTime, Days, Duration as ChronoDuration, NaiveDate, Utc};
use tokio::time::sleep;

use crate::browser::Locator;
use crate::config::ScraperConfig;
use crate::diagnostics::Diagnostics;
use crate::error::ScraperError;
use crate::registry::ReportTypeDescriptor;
use crate::traits::PageDriver;

use super::{attempt_optional, settle};

/// 日本時間 (UTC+9)
const JST_OFFSET_HOURS: i64 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// 日本時間での「昨日」
pub fn jst_yesterday(now: DateTime<Utc>) -> NaiveDate {
    let jst_today = (now.naive_utc() + ChronoDuration::hours(JST_OFFSET_HOURS)).date();
    jst_today - Days::new(1)
}

/// 対象日付が指定されていればその1日、なければ日本時間の昨日1日
pub fn report_date_range(target_date: Option<NaiveDate>, now: DateTime<Utc>) -> DateRange {
    let day = target_date.unwrap_or_else(|| jst_yesterday(now));
    DateRange {
        start: day,
        end: day,
    }
}

/// レポート種別トップへの遷移からレポート作成依頼まで
pub struct ReportFlow<'a> {
    page: &'a dyn PageDriver,
    config: &'a ScraperConfig,
    descriptor: &'a ReportTypeDescriptor,
    diag: &'a Diagnostics,
}

impl<'a> ReportFlow<'a> {
    pub fn new(
        page: &'a dyn PageDriver,
        config: &'a ScraperConfig,
        descriptor: &'a ReportTypeDescriptor,
        diag: &'a Diagnostics,
    ) -> Self {
        Self {
            page,
            config,
            descriptor,
            diag,
        }
    }

    /// 日付入力を行った場合はその期間を返す
    pub async fn request(
        &self,
        target_date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateRange>, ScraperError> {
        self.open_landing().await?;
        self.open_navigation().await;
        self.select_subtype().await;

        let range = match self.descriptor.date_placeholders {
            Some((start, end)) => {
                let range = report_date_range(target_date, now);
                self.assign_dates(start, end, range).await?;
                Some(range)
            }
            None => None,
        };

        self.trigger_generation().await;
        self.open_history().await;
        Ok(range)
    }

    async fn open_landing(&self) -> Result<(), ScraperError> {
        let url = self
            .config
            .landing_url(self.descriptor.slug, self.descriptor.landing_path);
        self.diag.info(
            "report",
            format!("{}トップページに移動します: {}", self.descriptor.label, url),
        );

        self.page
            .goto(&url)
            .await
            .map_err(|e| ScraperError::LandingPageLoadFailed(format!("{}: {}", url, e)))?;
        settle(self.page, &self.config.timeouts).await?;

        let body = Locator::css("body");
        if !self
            .page
            .wait_visible(&body, self.config.timeouts.optional_element)
            .await?
        {
            return Err(ScraperError::LandingPageLoadFailed(url));
        }
        self.diag.info(
            "report",
            format!("{}トップページに正常に移動しました。", self.descriptor.label),
        );
        Ok(())
    }

    async fn open_navigation(&self) {
        let Some(selector) = self.descriptor.navigation_selector else {
            return;
        };
        let nav = Locator::css(selector);
        let timeouts = &self.config.timeouts;

        let result: Result<(), ScraperError> = async {
            if !self.page.wait_visible(&nav, timeouts.navigation_selector).await? {
                return Err(ScraperError::ElementNotFound(nav.to_string()));
            }
            self.page.click(&nav).await?;
            settle(self.page, timeouts).await
        }
        .await;

        match result {
            Ok(()) => self
                .diag
                .info("report", "ナビゲーションメニューの要素をクリックしました。"),
            Err(e) => self.diag.warn(
                "report",
                format!("ナビゲーションクリックに失敗しましたが続行します: {}", e),
            ),
        }
    }

    async fn select_subtype(&self) {
        let Some(selector) = self.descriptor.subtype_selector else {
            return;
        };
        match self.page.activate(&Locator::css(selector)).await {
            Ok(true) => self.diag.info("report", "レポートタイプを選択しました。"),
            Ok(false) => self.diag.warn(
                "report",
                format!("レポート種別の選択肢が見つかりませんでした: {}", selector),
            ),
            Err(e) => self.diag.warn(
                "report",
                format!("レポート種別選択に失敗しましたが続行します: {}", e),
            ),
        }
        sleep(self.config.timeouts.settle).await;
    }

    async fn assign_dates(
        &self,
        start_placeholder: &str,
        end_placeholder: &str,
        range: DateRange,
    ) -> Result<(), ScraperError> {
        let fields = [
            ("start", start_placeholder, range.start.format("%Y-%m-%d").to_string()),
            ("end", end_placeholder, range.end.format("%Y-%m-%d").to_string()),
        ];
        self.diag.info(
            "report",
            format!("期間を設定します: {} から {}", fields[0].2, fields[1].2),
        );

        for (field, placeholder, value) in &fields {
            let input = Locator::placeholder(*placeholder);
            // 入力の成否は読み戻しで判定する
            if let Err(e) = self.type_date(&input, value).await {
                self.diag
                    .warn("report", format!("{}日の入力に失敗しました: {}", field_label(field), e));
            }
        }

        for (field, placeholder, value) in fields {
            let actual = self
                .page
                .input_value(&Locator::placeholder(placeholder))
                .await?;
            self.diag
                .info("report", format!("設定後の{}日: {:?}", field_label(field), actual));
            if actual.as_deref() != Some(value.as_str()) {
                self.diag.warn("report", "日付が正しく設定されていません。");
                return Err(ScraperError::DateAssignmentFailed {
                    field,
                    expected: value,
                    actual,
                });
            }
        }

        self.diag.info("report", "日付の設定が完了しました。");
        Ok(())
    }

    async fn type_date(&self, input: &Locator, value: &str) -> Result<(), ScraperError> {
        self.page.click(input).await?;
        self.page.fill(input, value).await?;
        self.page.press_enter(input).await?;
        sleep(self.config.timeouts.settle).await;
        Ok(())
    }

    /// 候補のうち最初にクリックできたボタンでレポート作成を開始
    async fn trigger_generation(&self) {
        let timeout = self.config.timeouts.trigger_candidate;
        for candidate in self.descriptor.trigger_locators() {
            if !attempt_optional(self.page, &candidate, timeout).await {
                continue;
            }
            match self.page.click(&candidate).await {
                Ok(()) => {
                    self.diag
                        .info("report", format!("ダウンロードボタンをクリックしました: {}", candidate));
                    sleep(self.config.timeouts.settle).await;
                    return;
                }
                Err(e) => self
                    .diag
                    .info("report", format!("{} のクリックに失敗しました: {}", candidate, e)),
            }
        }
        self.diag
            .warn("report", "ダウンロードボタンをクリックできませんでした。");
    }

    async fn open_history(&self) {
        let link = Locator::text("a, button", self.descriptor.history_link_text);
        match self.page.activate(&link).await {
            Ok(true) => self.diag.info("report", "ダウンロード履歴をクリックしました。"),
            Ok(false) => self
                .diag
                .warn("report", "ダウンロード履歴リンクが見つかりませんでしたが続行します。"),
            Err(e) => self.diag.warn(
                "report",
                format!("ダウンロード履歴リンクに遷移できませんでしたが続行します: {}", e),
            ),
        }
        sleep(self.config.timeouts.settle).await;
    }
}

fn field_label(field: &str) -> &'static str {
    match field {
        "start" => "開始",
        _ => "終了",
    }
}
