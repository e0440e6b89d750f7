use rms_report_scraper::{Credentials, ReportOutcome, ReportRequest, ReportService, ScraperConfig};
use tower::Service;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // ログ設定 (RUST_LOG で上書き可)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 環境変数から認証情報を取得
    let credentials = Credentials::from_env().expect("RMS/楽天会員の認証情報が設定されていません");

    // 引数: レポート種別 [対象日 YYYY-MM-DD]
    let mut args = std::env::args().skip(1);
    let report_type = args.next().unwrap_or_else(|| "rpp".to_string());
    let mut request = ReportRequest::new(&report_type)
        .with_download_path("./downloads")
        .with_headless(false); // デバッグ用に表示モード
    if let Some(date) = args.next() {
        let date = chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .expect("日付は YYYY-MM-DD 形式で指定してください");
        request = request.with_target_date(date);
    }

    let mut service = ReportService::new(ScraperConfig::new(credentials));

    println!("=== RMS Report Scraper ({}) ===", report_type);

    match service.call(request).await {
        Ok(ReportOutcome::Csv(csv)) => {
            println!(
                "成功! CSV保存先: {:?} ({} bytes)",
                csv.csv_path,
                csv.csv_content.len()
            );
        }
        Ok(ReportOutcome::NoData) => {
            println!("対象データがありません");
        }
        Err(e) if e.is_configuration() => {
            eprintln!("設定エラー: {}", e);
        }
        Err(e) => {
            eprintln!("エラー: {}", e);
        }
    }
}
