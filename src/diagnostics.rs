//! 診断出力
//!
//! ログとスクリーンショットの出力先をフローに注入する。
//! 既定では `tracing` に流し、テストでは `RecordingSink` で内容を検証する。

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use base64::Engine;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::traits::PageDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub level: DiagnosticLevel,
    pub stage: &'static str,
    pub message: String,
}

pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, event: &DiagnosticEvent);
}

/// `tracing` に転送するシンク
#[derive(Debug, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&self, event: &DiagnosticEvent) {
        match event.level {
            DiagnosticLevel::Info => info!(stage = event.stage, "{}", event.message),
            DiagnosticLevel::Warn => warn!(stage = event.stage, "{}", event.message),
            DiagnosticLevel::Error => error!(stage = event.stage, "{}", event.message),
        }
    }
}

/// イベントをメモリに蓄積するシンク
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn contains(&self, level: DiagnosticLevel, needle: &str) -> bool {
        self.events()
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }
}

impl DiagnosticsSink for RecordingSink {
    fn record(&self, event: &DiagnosticEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticsSink>,
    screenshot_dir: Option<PathBuf>,
    inline_screenshots: bool,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("screenshot_dir", &self.screenshot_dir)
            .field("inline_screenshots", &self.inline_screenshots)
            .finish()
    }
}

impl Diagnostics {
    pub fn new(sink: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            sink,
            screenshot_dir: None,
            inline_screenshots: false,
        }
    }

    pub fn with_screenshot_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.screenshot_dir = dir;
        self
    }

    pub fn with_inline_screenshots(mut self, inline: bool) -> Self {
        self.inline_screenshots = inline;
        self
    }

    pub fn info(&self, stage: &'static str, message: impl Into<String>) {
        self.emit(DiagnosticLevel::Info, stage, message.into());
    }

    pub fn warn(&self, stage: &'static str, message: impl Into<String>) {
        self.emit(DiagnosticLevel::Warn, stage, message.into());
    }

    pub fn error(&self, stage: &'static str, message: impl Into<String>) {
        self.emit(DiagnosticLevel::Error, stage, message.into());
    }

    fn emit(&self, level: DiagnosticLevel, stage: &'static str, message: String) {
        self.sink.record(&DiagnosticEvent {
            level,
            stage,
            message,
        });
    }

    /// スクリーンショットを保存する。失敗しても呼び出し元のエラーは変えない
    pub async fn capture(&self, page: &dyn PageDriver, category: &str) -> Option<PathBuf> {
        if self.screenshot_dir.is_none() && !self.inline_screenshots {
            return None;
        }

        let png = match page.screenshot().await {
            Ok(png) => png,
            Err(e) => {
                self.warn("screenshot", format!("スクリーンショット取得に失敗しました: {}", e));
                return None;
            }
        };

        if self.inline_screenshots {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
            debug!("{} screenshot: data:image/png;base64,{}", category, encoded);
        }

        let dir = self.screenshot_dir.as_ref()?;
        let path = dir.join(screenshot_file_name(category));
        let written = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, &png));
        match written {
            Ok(()) => {
                self.info("screenshot", format!("スクリーンショットを保存しました: {:?}", path));
                Some(path)
            }
            Err(e) => {
                self.warn("screenshot", format!("スクリーンショット保存に失敗しました: {}", e));
                None
            }
        }
    }
}

fn screenshot_file_name(category: &str) -> String {
    format!("{}_{}.png", category, Utc::now().format("%Y%m%d%H%M%S%3f"))
}
