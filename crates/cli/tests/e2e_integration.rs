//! End-to-end integration tests for stockchat.
//!
//! These tests exercise the full pipeline from a user question to the final
//! answer: scripted backend → orchestrator → real tool registry → real
//! SQLite store on disk.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde_json::{Value, json};
use stockchat_agent::{Orchestrator, TerminalState};
use stockchat_config::AppConfig;
use stockchat_core::error::ProviderError;
use stockchat_core::message::{Message, Role, ToolCallRequest};
use stockchat_core::provider::{NormalizedResponse, Provider, ProviderRequest};
use stockchat_core::store::{DailyRecord, Stock, StockStore};
use stockchat_providers::{ProviderKind, ProviderRouter};
use stockchat_store::SqliteStockStore;
use stockchat_tools::stock_registry;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence.
struct ScriptedProvider {
    responses: Mutex<VecDeque<NormalizedResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<NormalizedResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> ProviderRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<NormalizedResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let mut responses = self.responses.lock().unwrap();
        let count = self.requests.lock().unwrap().len();
        Ok(responses
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider exhausted at call #{count}")))
    }
}

/// Answers every question by running the SQL it finds after "SQL:" and
/// then summarizing the tool message it gets back.
struct SqlEchoProvider;

#[async_trait::async_trait]
impl Provider for SqlEchoProvider {
    fn name(&self) -> &str {
        "sql_echo"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<NormalizedResponse, ProviderError> {
        tokio::task::yield_now().await;
        if let Some(last) = request.messages.last().filter(|m| m.role == Role::Tool) {
            return Ok(NormalizedResponse::text(format!("result: {}", last.content)));
        }
        let question = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let sql = question.split("SQL:").nth(1).unwrap_or("SELECT 1").trim().to_string();
        NormalizedResponse::from_parts(
            None,
            vec![ToolCallRequest::new(
                ToolCallRequest::synthesize_id(),
                "execute_sql_query",
                json!({ "sql": sql }),
            )],
        )
    }
}

fn tool_call(name: &str, args: Value) -> ToolCallRequest {
    ToolCallRequest::new(ToolCallRequest::synthesize_id(), name, args)
}

fn tool_response(calls: Vec<ToolCallRequest>) -> NormalizedResponse {
    NormalizedResponse::from_parts(None, calls).unwrap()
}

// ── Fixture ──────────────────────────────────────────────────────────────

struct Env {
    store: Arc<SqliteStockStore>,
    config: AppConfig,
    _dir: tempfile::TempDir,
}

async fn env() -> Env {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.database.url = format!("sqlite://{}", dir.path().join("stocks.db").display());
    config.sql.default_limit = 50;

    let store = SqliteStockStore::connect(&config.database.url, 4).await.unwrap();

    // 120 synthetic listings so an unbounded SELECT exceeds the cap
    let mut stocks: Vec<Stock> = (0..120)
        .map(|i| {
            let mut s = Stock::new(format!("{:06}", 300000 + i), format!("测试{i}"));
            s.industry = Some("软件".into());
            s.pe_ratio = Some(10.0 + i as f64);
            s.total_market_cap = Some(100.0 + i as f64);
            s
        })
        .collect();
    let mut pufa = Stock::new("600000", "浦发银行");
    pufa.industry = Some("银行".into());
    pufa.pe_ratio = Some(5.2);
    pufa.pb_ratio = Some(0.41);
    pufa.total_market_cap = Some(2300.0);
    stocks.push(pufa);
    store.upsert_stocks(&stocks).await.unwrap();

    let daily: Vec<DailyRecord> = ["2024-06-05", "2024-06-06", "2024-06-07"]
        .iter()
        .enumerate()
        .map(|(i, d)| DailyRecord {
            code: "600000".into(),
            trade_date: NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap(),
            open: Some(7.8),
            close: Some(7.8 + i as f64 * 0.05),
            high: Some(7.95),
            low: Some(7.75),
            volume: Some(2_000_000),
            amount: Some(15_600_000.0),
            change: Some(0.05),
            pct_change: Some(0.64),
            turnover_rate: Some(0.07),
        })
        .collect();
    store.upsert_daily(&daily).await.unwrap();

    Env {
        store: Arc::new(store),
        config,
        _dir: dir,
    }
}

fn orchestrator(env: &Env, provider: Arc<dyn Provider>) -> Orchestrator {
    let mut router = ProviderRouter::new(ProviderKind::OpenAi);
    router.register(ProviderKind::OpenAi, provider, "mock-model");
    let store: Arc<dyn StockStore> = env.store.clone();
    let registry = stock_registry(store, &env.config);
    Orchestrator::from_config(Arc::new(router), Arc::new(registry), &env.config)
}

fn tool_messages(messages: &[Message]) -> Vec<&Message> {
    messages.iter().filter(|m| m.role == Role::Tool).collect()
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn direct_answer_takes_one_turn() {
    let env = env().await;
    let provider = ScriptedProvider::new(vec![NormalizedResponse::text("Hello! Ask me about stocks.")]);
    let orch = orchestrator(&env, provider.clone());

    let outcome = orch.run(vec![Message::user("hi")], ProviderKind::OpenAi, 5).await;

    assert_eq!(outcome.terminal_state, TerminalState::Done);
    assert_eq!(outcome.turns_used, 1);
    assert_eq!(provider.calls(), 1);
    // The full catalogue is declared on every request
    assert_eq!(provider.last_request().tools.len(), 6);
}

#[tokio::test]
async fn search_then_detail_then_answer() {
    let env = env().await;
    let provider = ScriptedProvider::new(vec![
        tool_response(vec![tool_call("search_stock", json!({"keyword": "浦发"}))]),
        tool_response(vec![
            tool_call("get_stock_detail", json!({"code": "600000"})),
            tool_call("get_stock_history", json!({"code": "600000", "days": "2"})),
        ]),
        NormalizedResponse::text("浦发银行 PE 5.2, last close 7.9."),
    ]);
    let orch = orchestrator(&env, provider.clone());

    let outcome = orch
        .run(vec![Message::user("浦发银行的市盈率是多少?")], ProviderKind::OpenAi, 5)
        .await;

    assert!(outcome.is_done());
    assert_eq!(outcome.turns_used, 3);

    let tools = tool_messages(outcome.appended());
    assert_eq!(tools.len(), 3);
    let search: Value = serde_json::from_str(&tools[0].content).unwrap();
    assert_eq!(search[0]["code"], "600000");
    let detail: Value = serde_json::from_str(&tools[1].content).unwrap();
    assert_eq!(detail["found"], true);
    assert_eq!(detail["pe_ratio"], 5.2);
    let history: Value = serde_json::from_str(&tools[2].content).unwrap();
    assert_eq!(history.as_array().unwrap().len(), 2);
    assert_eq!(history[0]["date"], "2024-06-07");

    // The backend saw the results in call order
    let last = provider.last_request();
    let sent_tools: Vec<&Message> = tool_messages(&last.messages);
    assert_eq!(sent_tools.len(), 3);
}

#[tokio::test]
async fn sql_delete_is_rejected_in_band_and_data_survives() {
    let env = env().await;
    let provider = ScriptedProvider::new(vec![
        tool_response(vec![tool_call("execute_sql_query", json!({"sql": "DELETE FROM stocks"}))]),
        NormalizedResponse::text("I can only read data."),
    ]);
    let orch = orchestrator(&env, provider);

    let outcome = orch.run(vec![Message::user("delete everything")], ProviderKind::OpenAi, 5).await;

    assert!(outcome.is_done());
    let tools = tool_messages(outcome.appended());
    assert!(tools[0].content.starts_with("Error: Query rejected"));
    assert_eq!(env.store.stats().await.unwrap().total_stocks, 121);
}

#[tokio::test]
async fn unbounded_select_is_capped() {
    let env = env().await;
    let provider = ScriptedProvider::new(vec![
        tool_response(vec![tool_call("execute_sql_query", json!({"sql": "SELECT * FROM stocks"}))]),
        NormalizedResponse::text("Here are some stocks."),
    ]);
    let orch = orchestrator(&env, provider);

    let outcome = orch.run(vec![Message::user("list stocks")], ProviderKind::OpenAi, 5).await;

    let tools = tool_messages(outcome.appended());
    let result: Value = serde_json::from_str(&tools[0].content).unwrap();
    assert_eq!(result["row_count"], 50);
    assert_eq!(result["limit_injected"], true);
}

#[tokio::test]
async fn bad_column_reports_engine_error_and_backend_recovers() {
    let env = env().await;
    let provider = ScriptedProvider::new(vec![
        tool_response(vec![tool_call("execute_sql_query", json!({"sql": "SELECT price FROM stocks"}))]),
        tool_response(vec![tool_call(
            "execute_sql_query",
            json!({"sql": "SELECT code, pe_ratio FROM stocks WHERE code = '600000'"}),
        )]),
        NormalizedResponse::text("PE is 5.2."),
    ]);
    let orch = orchestrator(&env, provider);

    let outcome = orch.run(vec![Message::user("PE?")], ProviderKind::OpenAi, 5).await;

    assert!(outcome.is_done());
    let tools = tool_messages(outcome.appended());
    assert!(tools[0].content.contains("no such column"));
    let retry: Value = serde_json::from_str(&tools[1].content).unwrap();
    assert_eq!(retry["rows"][0]["pe_ratio"], 5.2);
}

#[tokio::test]
async fn filter_without_arguments_is_bounded() {
    let env = env().await;
    let provider = ScriptedProvider::new(vec![
        tool_response(vec![tool_call("filter_stocks", Value::Null)]),
        NormalizedResponse::text("Top stocks by market cap."),
    ]);
    let orch = orchestrator(&env, provider);

    let outcome = orch.run(vec![Message::user("screen")], ProviderKind::OpenAi, 5).await;

    let tools = tool_messages(outcome.appended());
    let result: Value = serde_json::from_str(&tools[0].content).unwrap();
    assert_eq!(result["count"], env.config.tools.filter_default_limit);
    assert_eq!(result["results"][0]["code"], "600000");
}

#[tokio::test]
async fn looping_backend_stops_at_budget() {
    let env = env().await;
    let responses = (0..10)
        .map(|_| tool_response(vec![tool_call("get_database_stats", json!({}))]))
        .collect();
    let provider = ScriptedProvider::new(responses);
    let orch = orchestrator(&env, provider.clone());

    let outcome = orch.run(vec![Message::user("stats")], ProviderKind::OpenAi, 4).await;

    assert_eq!(outcome.terminal_state, TerminalState::BudgetExhausted);
    assert_eq!(outcome.turns_used, 4);
    assert_eq!(provider.calls(), 4);
    assert_eq!(tool_messages(outcome.appended()).len(), 4);
}

#[tokio::test]
async fn concurrent_runs_share_the_store_but_not_history() {
    let env = env().await;
    let orch = orchestrator(&env, Arc::new(SqlEchoProvider));

    let questions = [
        "count SQL: SELECT COUNT(*) AS n FROM stocks",
        "bank SQL: SELECT name FROM stocks WHERE code = '600000'",
        "days SQL: SELECT COUNT(*) AS d FROM stock_daily",
    ];
    let runs = questions
        .iter()
        .map(|q| orch.run(vec![Message::user(*q)], ProviderKind::OpenAi, 3));
    let outcomes = futures::future::join_all(runs).await;

    let answers: Vec<&str> = outcomes
        .iter()
        .map(|o| o.final_content.as_deref().unwrap())
        .collect();
    assert!(answers[0].contains("\"n\":121"));
    assert!(answers[1].contains("浦发银行"));
    assert!(answers[2].contains("\"d\":3"));

    for (outcome, question) in outcomes.iter().zip(questions) {
        assert!(outcome.is_done());
        assert_eq!(outcome.conversation.len(), 4);
        assert_eq!(outcome.conversation.messages()[0].content, question);
    }
}
