//! `stockchat status`: show configuration and database status.

use std::path::Path;

use stockchat_config::AppConfig;
use stockchat_core::store::StockStore;
use stockchat_providers::{ProviderKind, build_from_config};

use super::{CliResult, load_config, open_store};

pub async fn run(config_path: Option<&Path>, check: bool) -> CliResult {
    let config = load_config(config_path)?;
    let router = build_from_config(&config)?;
    let default_kind = router.default_kind();

    println!("stockchat status");
    println!("================");
    println!(
        "  Config:       {}",
        config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(AppConfig::config_path)
            .display()
    );
    println!("  Provider:     {default_kind}");
    match router.resolve(default_kind) {
        Ok((_, model)) => println!("  Model:        {model}"),
        Err(e) => println!("  Model:        - ({e})"),
    }
    let configured: Vec<String> = router.list().iter().map(ProviderKind::to_string).collect();
    println!("  Available:    {}", configured.join(", "));
    println!("  Max turns:    {}", config.chat.max_turns);
    println!(
        "  SQL limits:   default {}, max {}",
        config.sql.default_limit, config.sql.max_limit
    );

    println!("\n  Database:     {}", config.database.url);
    match open_store(&config).await {
        Ok(store) => match store.stats().await {
            Ok(stats) => {
                println!("  Stocks:       {}", stats.total_stocks);
                println!("  Daily rows:   {}", stats.total_daily_records);
                println!(
                    "  Latest date:  {}",
                    stats
                        .latest_trade_date
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "-".into())
                );
            }
            Err(e) => println!("  Stats unavailable: {e}"),
        },
        Err(e) => println!("  Not reachable: {e}"),
    }

    if check {
        print!("\n  Backend:      ");
        match router.resolve(default_kind) {
            Ok((provider, _)) => match provider.health_check().await {
                Ok(true) => println!("reachable"),
                Ok(false) => println!("responded with an error"),
                Err(e) => println!("unreachable ({e})"),
            },
            Err(e) => println!("{e}"),
        }
    }

    Ok(())
}
