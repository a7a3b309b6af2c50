//! Batches read from JSON and persisted through the snapshot store.

use water_ledger::{
    AppConfig, LedgerError, Outcome, Request, SaleListing, SnapshotStore,
};

const MARKET_OPENING: &str = r#"[
    {"caller": "treasury", "type": "set_unit_price", "price": 1000000},
    {"caller": "treasury", "type": "set_fee_percent", "percent": 5},
    {"caller": "treasury", "type": "issue_resource", "to": "farmer", "amount": 100},
    {"caller": "farmer", "type": "add_for_sale", "amount": 100, "price": 2000000}
]"#;

fn config() -> AppConfig {
    AppConfig::parse("owner = \"treasury\"\n[terms]\nreserve_cap = 500\n").unwrap()
}

#[test]
fn opening_batch_lists_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("ledger.json"));
    let mut ledger = config().build_ledger().unwrap();

    let requests: Vec<Request> = serde_json::from_str(MARKET_OPENING).unwrap();
    let outcomes = ledger.apply_batch(&requests, [7u8; 32], 1_700_000_000).unwrap();
    assert_eq!(
        outcomes.last(),
        Some(&Outcome::Listing(SaleListing {
            amount: 100,
            price: 2_000_000
        }))
    );
    // issued 100, then listed 100
    assert_eq!(ledger.view_reserve(), 200);
    assert_eq!(ledger.calculate_fee(2_000_000), Ok(100_000));
    store.save(&ledger).unwrap();

    let mut reloaded = store.load().unwrap();
    assert_eq!(reloaded.state_root(), ledger.state_root());
    assert_eq!(
        reloaded.apply_batch(&requests, [7u8; 32], 1_700_000_001),
        Err(LedgerError::DuplicateBatch)
    );
}

#[test]
fn failing_request_discards_the_whole_batch() {
    let mut ledger = config().build_ledger().unwrap();
    let requests: Vec<Request> = serde_json::from_str(
        r#"[
            {"caller": "treasury", "type": "issue_resource", "to": "farmer", "amount": 300},
            {"caller": "farmer", "type": "add_for_sale", "amount": 250, "price": 10}
        ]"#,
    )
    .unwrap();
    let err = ledger.apply_batch(&requests, [1u8; 32], 1).unwrap_err();
    assert!(matches!(err, LedgerError::ReserveLimitExceeded { cap: 500, .. }));
    assert_eq!(ledger.view_reserve(), 0);
    assert_eq!(ledger.balance_of("farmer").resource, 0);
    assert!(ledger.events().is_empty());
    assert_eq!(ledger.meta().height, 0);
}

#[test]
fn outcomes_serialise_with_type_tags() {
    let json = serde_json::to_value(Outcome::Amount(42)).unwrap();
    assert_eq!(json, serde_json::json!({"type": "amount", "value": 42}));
}
