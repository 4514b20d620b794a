//! `stockchat init`: create the config file and database.

use std::path::Path;

use chrono::{Local, NaiveDate};
use stockchat_config::AppConfig;
use stockchat_core::store::{DailyRecord, Stock};
use stockchat_store::SqliteStockStore;

use super::{CliResult, load_config, open_store};

pub async fn run(config_path: Option<&Path>, sample_data: bool) -> CliResult {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::config_path);

    println!("stockchat - setup");
    println!("=================\n");

    if path.exists() {
        println!("  Config already exists at: {}", path.display());
    } else {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, AppConfig::default_toml())?;
        println!("  Created config: {}", path.display());
    }

    let config = load_config(Some(&path))?;
    let store = open_store(&config).await?;
    println!("  Database ready: {}", config.database.url);

    if sample_data {
        let (stocks, days) = load_sample(&store).await?;
        println!("  Loaded sample data: {stocks} stocks, {days} daily records");
    }

    println!("\nNext steps:");
    println!("  1. Set an API key (OPENAI_API_KEY / ANTHROPIC_API_KEY) or run Ollama locally");
    println!("  2. stockchat status");
    println!("  3. stockchat chat");
    Ok(())
}

/// A handful of well-known listings with five trading days each.
async fn load_sample(store: &SqliteStockStore) -> Result<(u64, u64), Box<dyn std::error::Error>> {
    #[rustfmt::skip]
    let rows: [(&str, &str, &str, &str, f64, f64, f64, f64); 6] = [
        ("600000", "浦发银行", "SH", "银行", 5.3, 0.41, 2310.0, 7.85),
        ("000001", "平安银行", "SZ", "银行", 4.6, 0.52, 2150.0, 11.08),
        ("600519", "贵州茅台", "SH", "白酒", 27.9, 9.05, 21300.0, 1695.0),
        ("000858", "五粮液", "SZ", "白酒", 18.2, 4.71, 5600.0, 144.3),
        ("300750", "宁德时代", "SZ", "电池", 22.4, 5.28, 8850.0, 201.5),
        ("601318", "中国平安", "SH", "保险", 8.9, 1.02, 8600.0, 47.2),
    ];

    let now = Local::now().naive_local();
    let stocks: Vec<Stock> = rows
        .iter()
        .map(|&(code, name, market, industry, pe, pb, cap, _)| {
            let mut s = Stock::new(code, name);
            s.market = Some(market.into());
            s.industry = Some(industry.into());
            s.pe_ratio = Some(pe);
            s.pb_ratio = Some(pb);
            s.total_market_cap = Some(cap);
            s.updated_at = Some(now);
            s
        })
        .collect();

    let dates = ["2024-06-03", "2024-06-04", "2024-06-05", "2024-06-06", "2024-06-07"];
    let mut daily = Vec::new();
    for &(code, .., last_close) in &rows {
        for (i, date) in dates.iter().enumerate() {
            let drift = 1.0 + (i as f64 - 4.0) * 0.004;
            let close = (last_close * drift * 100.0).round() / 100.0;
            daily.push(DailyRecord {
                code: code.into(),
                trade_date: NaiveDate::parse_from_str(date, "%Y-%m-%d")?,
                open: Some(close * 0.998),
                close: Some(close),
                high: Some(close * 1.006),
                low: Some(close * 0.993),
                volume: Some(1_000_000 + i as i64 * 50_000),
                amount: Some(close * 1_000_000.0),
                change: None,
                pct_change: None,
                turnover_rate: None,
            });
        }
    }

    let stocks_written = store.upsert_stocks(&stocks).await?;
    let days_written = store.upsert_daily(&daily).await?;
    Ok((stocks_written, days_written))
}
