//! ダウンロードしたZIPからのCSV取り出し

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::diagnostics::Diagnostics;
use crate::error::ScraperError;

/// ZIPを `output_dir` に展開し、レポート種別に対応するCSVのパスを返す
///
/// ファイル名に種別名を含むCSVを優先し、なければ最初のCSV。
/// 展開に成功した場合のみZIPを削除する。
pub fn extract_report_csv(
    archive_path: &Path,
    output_dir: &Path,
    slug: &str,
    diag: &Diagnostics,
) -> Result<PathBuf, ScraperError> {
    diag.info("archive", format!("ZIPファイルを展開します: {:?}", archive_path));
    std::fs::create_dir_all(output_dir)?;

    let csv_entries = {
        let mut archive = zip::ZipArchive::new(File::open(archive_path)?)?;
        let mut entries = Vec::new();
        for index in 0..archive.len() {
            let entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let Some(name) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
                diag.warn("archive", format!("不正なエントリ名をスキップします: {}", entry.name()));
                continue;
            };
            if is_csv(&name) {
                entries.push(name);
            }
        }
        archive.extract(output_dir)?;
        entries
    };

    let slug = slug.to_lowercase();
    let selected = match csv_entries.iter().find(|name| file_name_contains(name, &slug)) {
        Some(name) => name,
        None => {
            let first = csv_entries
                .first()
                .ok_or_else(|| ScraperError::NoCsvInArchive(archive_path.to_path_buf()))?;
            diag.warn(
                "archive",
                format!(
                    "種別 {} に一致するCSVが見つからないため最初のCSVを使用します: {:?}",
                    slug, first
                ),
            );
            first
        }
    };
    let csv_path = output_dir.join(selected);

    if let Err(e) = std::fs::remove_file(archive_path) {
        diag.warn("archive", format!("ZIPファイルの削除に失敗しました: {}", e));
    }
    diag.info("archive", format!("CSVファイル: {:?}", csv_path));
    Ok(csv_path)
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

fn file_name_contains(path: &Path, needle: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_lowercase().contains(needle))
        .unwrap_or(false)
}
