use std::fmt;

/// ページ上の要素の指定方法
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// CSSセレクタ
    Css(String),
    /// CSSに一致する要素のうち、テキストを含む最初の要素
    Text { css: String, text: String },
    /// placeholder属性で指定する入力欄
    Placeholder(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn text(css: impl Into<String>, text: impl Into<String>) -> Self {
        Locator::Text {
            css: css.into(),
            text: text.into(),
        }
    }

    pub fn placeholder(placeholder: impl Into<String>) -> Self {
        Locator::Placeholder(placeholder.into())
    }

    /// 要素を返すJS式（見つからなければ null）
    pub fn query_js(&self) -> String {
        match self {
            Locator::Css(css) => format!("document.querySelector({})", js_str(css)),
            Locator::Placeholder(placeholder) => format!(
                "document.querySelector({})",
                js_str(&format!("input[placeholder=\"{}\"]", placeholder))
            ),
            Locator::Text { css, text } => format!(
                "(Array.from(document.querySelectorAll({})).find(el => el.textContent && el.textContent.includes({})) || null)",
                js_str(css),
                js_str(text)
            ),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(css) => write!(f, "{}", css),
            Locator::Text { css, text } => write!(f, "{}:has-text(\"{}\")", css, text),
            Locator::Placeholder(placeholder) => write!(f, "[placeholder=\"{}\"]", placeholder),
        }
    }
}

/// 文字列をJSの文字列リテラルに変換
pub(crate) fn js_str(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}
