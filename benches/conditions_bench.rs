use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Map, Value};
use tradeops::conditions::{matches, ConditionTree};
use tradeops::types::AgentEvent;
use uuid::Uuid;

fn trade_closed() -> Map<String, Value> {
    AgentEvent {
        id: Uuid::new_v4(),
        agent_id: "trader".into(),
        kind: "trade_closed".into(),
        title: "closed BTC long".into(),
        summary: String::new(),
        tags: vec!["btc".into(), "swing".into()],
        trade_id: None,
        pnl: Some(812.5),
        pnl_percent: Some(2.4),
        metadata: json!({"symbol": "BTC", "venue": "binance"}),
        created_at: Utc::now(),
    }
    .condition_fields()
}

fn bench_parse(c: &mut Criterion) {
    let cond = json!({
        "kind": "trade_closed",
        "pnl": {"$gt": 500, "$lt": 10000},
        "pnl_percent": {"$gt": 1.5},
        "symbol": "BTC",
    });
    c.bench_function("ConditionTree::parse(4 fields)", |b| {
        b.iter(|| ConditionTree::parse(black_box(&cond)).unwrap());
    });
}

fn bench_match_parsed(c: &mut Criterion) {
    let fields = trade_closed();
    let tree = ConditionTree::parse(&json!({
        "kind": "trade_closed",
        "pnl": {"$gt": 500, "$lt": 10000},
        "symbol": "BTC",
    }))
    .unwrap();
    c.bench_function("ConditionTree::matches(hit)", |b| {
        b.iter(|| tree.matches(black_box(&fields)));
    });

    let miss = ConditionTree::parse(&json!({"pnl": {"$lt": 0}, "symbol": "BTC"})).unwrap();
    c.bench_function("ConditionTree::matches(miss on first field)", |b| {
        b.iter(|| miss.matches(black_box(&fields)));
    });
}

fn bench_match_raw(c: &mut Criterion) {
    let fields = trade_closed();
    let cond = json!({"pnl": {"$gt": 500}, "tags": ["btc", "swing"]});
    c.bench_function("matches(raw json)", |b| {
        b.iter(|| matches(black_box(&fields), black_box(&cond)));
    });
}

criterion_group!(benches, bench_parse, bench_match_parsed, bench_match_raw);
criterion_main!(benches);
