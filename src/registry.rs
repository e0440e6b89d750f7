//! レポート種別レジストリ
//!
//! レポート種別ごとの画面操作パラメータ（遷移先、セレクタ、ボタン文言）を保持する。
//! 実行時に変更されないため、種別は閉じた列挙型として定義する。

use crate::browser::Locator;
use crate::error::ScraperError;

/// ダウンロード開始ボタンの候補 (CSS, テキスト)
pub type TriggerCandidate = (&'static str, &'static str);

/// 1種別分の画面操作パラメータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTypeDescriptor {
    pub slug: &'static str,
    pub label: &'static str,
    pub landing_path: &'static str,
    pub navigation_selector: Option<&'static str>,
    pub subtype_selector: Option<&'static str>,
    /// 日付入力欄のプレースホルダ (開始, 終了)
    pub date_placeholders: Option<(&'static str, &'static str)>,
    pub download_triggers: &'static [TriggerCandidate],
    pub history_link_text: &'static str,
}

impl ReportTypeDescriptor {
    pub fn trigger_locators(&self) -> Vec<Locator> {
        self.download_triggers
            .iter()
            .map(|(css, text)| Locator::text(*css, *text))
            .collect()
    }
}

const RPP_NAV_SELECTOR: &str = "#root > div > div.rpp-header > div:nth-child(2) > nav > div > div.rpp-nav > nav > ul > li:nth-child(6) > a > div";

const RPP_TRIGGERS: &[TriggerCandidate] = &[
    ("button", "全商品レポートダウンロード"),
    ("button", "ダウンロード"),
];

const GENERIC_TRIGGERS: &[TriggerCandidate] = &[("button", "ダウンロード"), ("a", "ダウンロード")];

const HISTORY_LINK_TEXT: &str = "ダウンロード履歴";

static RPP: ReportTypeDescriptor = ReportTypeDescriptor {
    slug: "rpp",
    label: "RPP",
    landing_path: "top",
    navigation_selector: Some(RPP_NAV_SELECTOR),
    subtype_selector: Some("#rdReportTypeItem"),
    date_placeholders: Some(("Select start", "Select end")),
    download_triggers: RPP_TRIGGERS,
    history_link_text: HISTORY_LINK_TEXT,
};

static RPP_EXP: ReportTypeDescriptor = ReportTypeDescriptor {
    slug: "rppexp",
    label: "RPP-EXP",
    landing_path: "top",
    navigation_selector: Some(RPP_NAV_SELECTOR),
    subtype_selector: Some("#rdReportTypeItem"),
    date_placeholders: Some(("Select start", "Select end")),
    download_triggers: RPP_TRIGGERS,
    history_link_text: HISTORY_LINK_TEXT,
};

static CPN_ADV: ReportTypeDescriptor = ReportTypeDescriptor {
    slug: "cpnadv",
    label: "クーポンアドバンス",
    landing_path: "top",
    navigation_selector: None,
    subtype_selector: None,
    date_placeholders: None,
    download_triggers: GENERIC_TRIGGERS,
    history_link_text: HISTORY_LINK_TEXT,
};

static TDA: ReportTypeDescriptor = ReportTypeDescriptor {
    slug: "tda",
    label: "TDA",
    landing_path: "top",
    navigation_selector: None,
    subtype_selector: None,
    date_placeholders: None,
    download_triggers: GENERIC_TRIGGERS,
    history_link_text: HISTORY_LINK_TEXT,
};

static TDA_EXP: ReportTypeDescriptor = ReportTypeDescriptor {
    slug: "tdaexp",
    label: "TDA-EXP",
    landing_path: "top",
    navigation_selector: None,
    subtype_selector: None,
    date_placeholders: None,
    download_triggers: GENERIC_TRIGGERS,
    history_link_text: HISTORY_LINK_TEXT,
};

static CPA: ReportTypeDescriptor = ReportTypeDescriptor {
    slug: "cpa",
    label: "楽天CPA",
    landing_path: "reports",
    navigation_selector: None,
    subtype_selector: None,
    date_placeholders: None,
    download_triggers: GENERIC_TRIGGERS,
    history_link_text: HISTORY_LINK_TEXT,
};

/// 具体的なレポート種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportType {
    Rpp,
    RppExp,
    CpnAdv,
    Tda,
    TdaExp,
    Cpa,
}

impl ReportType {
    pub const ALL: [ReportType; 6] = [
        ReportType::Rpp,
        ReportType::RppExp,
        ReportType::CpnAdv,
        ReportType::Tda,
        ReportType::TdaExp,
        ReportType::Cpa,
    ];

    pub fn descriptor(self) -> &'static ReportTypeDescriptor {
        match self {
            ReportType::Rpp => &RPP,
            ReportType::RppExp => &RPP_EXP,
            ReportType::CpnAdv => &CPN_ADV,
            ReportType::Tda => &TDA,
            ReportType::TdaExp => &TDA_EXP,
            ReportType::Cpa => &CPA,
        }
    }

    pub fn slug(self) -> &'static str {
        self.descriptor().slug
    }
}

enum Entry {
    Concrete(ReportType),
    Alias(&'static str),
}

const ALIASES: &[(&str, &str)] = &[("rpp-exp", "rppexp")];

fn lookup(key: &str) -> Option<Entry> {
    if let Some(report_type) = ReportType::ALL.iter().find(|t| t.slug() == key) {
        return Some(Entry::Concrete(*report_type));
    }
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, target)| Entry::Alias(*target))
}

/// 具体種別のslug一覧（エイリアスは含まない）
pub fn available_slugs() -> Vec<&'static str> {
    ReportType::ALL.iter().map(|t| t.slug()).collect()
}

/// キーを正規化して種別を解決する（大文字小文字は区別しない）
pub fn resolve_type(key: &str) -> Result<ReportType, ScraperError> {
    let normalized = key.trim().to_ascii_lowercase();
    let unknown = || ScraperError::UnknownReportType {
        given: key.to_string(),
        available: available_slugs(),
    };

    match lookup(&normalized).ok_or_else(unknown)? {
        Entry::Concrete(report_type) => Ok(report_type),
        // エイリアスは1段のみ辿る
        Entry::Alias(target) => match lookup(target) {
            Some(Entry::Concrete(report_type)) => Ok(report_type),
            _ => Err(unknown()),
        },
    }
}

pub fn resolve(key: &str) -> Result<&'static ReportTypeDescriptor, ScraperError> {
    resolve_type(key).map(ReportType::descriptor)
}
