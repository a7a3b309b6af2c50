//! Property tests over random call sequences.

use proptest::prelude::*;
use water_ledger::{Call, Ledger, LedgerError, MarketTerms, Request, UnderflowPolicy};

const OWNER: &str = "owner";
const USERS: [&str; 3] = ["alice", "bob", "carol"];

fn caller_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(OWNER.to_string()),
        (0..USERS.len()).prop_map(|i| USERS[i].to_string()),
    ]
}

fn account_strategy() -> impl Strategy<Value = String> {
    (0..USERS.len()).prop_map(|i| USERS[i].to_string())
}

fn owner_call_strategy() -> impl Strategy<Value = Call> {
    prop_oneof![
        (0u64..300).prop_map(|price| Call::SetUnitPrice { price }),
        (0u64..120).prop_map(|percent| Call::SetFeePercent { percent }),
        (0u64..120).prop_map(|percent| Call::SetRefundPercent { percent }),
        (0u64..400).prop_map(|limit| Call::SetReserveCap { limit }),
        (-200i64..200).prop_map(|delta| Call::AdjustReserve { delta }),
    ]
}

fn trade_call_strategy() -> impl Strategy<Value = Call> {
    prop_oneof![
        (account_strategy(), 0u64..80).prop_map(|(to, amount)| Call::IssueResource { to, amount }),
        (0u64..5_000).prop_map(|amount| Call::DepositCurrency { amount }),
        (0u64..5_000).prop_map(|amount| Call::WithdrawCurrency { amount }),
        (0u64..60, 0u64..50).prop_map(|(amount, price)| Call::AddForSale { amount, price }),
        (0u64..60).prop_map(|amount| Call::RemoveFromSale { amount }),
        (0u64..50).prop_map(|price| Call::SetListingPrice { price }),
        (account_strategy(), 0u64..40).prop_map(|(seller, amount)| Call::Purchase { seller, amount }),
        (0u64..40).prop_map(|amount| Call::Redeem { amount }),
    ]
}

fn call_strategy() -> impl Strategy<Value = Call> {
    prop_oneof![owner_call_strategy(), trade_call_strategy()]
}

fn request_strategy() -> impl Strategy<Value = Request> {
    (caller_strategy(), call_strategy()).prop_map(|(caller, call)| Request { caller, call })
}

fn policy_strategy() -> impl Strategy<Value = UnderflowPolicy> {
    prop_oneof![Just(UnderflowPolicy::Clamp), Just(UnderflowPolicy::Reject)]
}

fn fresh(policy: UnderflowPolicy) -> Ledger {
    let terms = MarketTerms {
        reserve_cap: 250,
        ..MarketTerms::default()
    };
    Ledger::with_terms(OWNER, terms, policy).unwrap()
}

proptest! {
    #[test]
    fn reserve_never_exceeds_cap(
        policy in policy_strategy(),
        requests in proptest::collection::vec(request_strategy(), 0..64),
    ) {
        let mut ledger = fresh(policy);
        for request in &requests {
            let _ = ledger.execute(&request.caller, &request.call);
            prop_assert!(ledger.view_reserve() <= ledger.terms().reserve_cap);
        }
    }

    #[test]
    fn rejected_calls_change_nothing(
        requests in proptest::collection::vec(request_strategy(), 0..64),
    ) {
        let mut ledger = fresh(UnderflowPolicy::Reject);
        for request in &requests {
            let before = ledger.clone();
            if ledger.execute(&request.caller, &request.call).is_err() {
                prop_assert_eq!(&ledger, &before);
            }
        }
    }

    #[test]
    fn listings_stay_covered_by_balances(
        requests in proptest::collection::vec(request_strategy(), 0..64),
    ) {
        let mut ledger = fresh(UnderflowPolicy::Clamp);
        for request in &requests {
            let _ = ledger.execute(&request.caller, &request.call);
            for user in USERS.iter().copied().chain([OWNER]) {
                prop_assert!(ledger.listing_of(user).amount <= ledger.balance_of(user).resource);
            }
        }
    }

    #[test]
    fn non_owner_configuration_calls_fail(
        caller in account_strategy(),
        value in 0u64..1_000,
    ) {
        let mut ledger = fresh(UnderflowPolicy::Clamp);
        let before = ledger.clone();
        for call in [
            Call::SetUnitPrice { price: value },
            Call::SetFeePercent { percent: value },
            Call::SetRefundPercent { percent: value },
            Call::SetReserveCap { limit: value },
            Call::AdjustReserve { delta: value as i64 },
        ] {
            let err = ledger.execute(&caller, &call).unwrap_err();
            let is_not_owner = matches!(err, LedgerError::NotOwner { .. });
            prop_assert!(is_not_owner);
        }
        prop_assert_eq!(ledger, before);
    }

    #[test]
    fn batches_commit_all_or_nothing(
        requests in proptest::collection::vec(request_strategy(), 1..16),
        seed in any::<u8>(),
    ) {
        let mut ledger = fresh(UnderflowPolicy::Clamp);
        let before = ledger.clone();
        match ledger.apply_batch(&requests, [seed; 32], 1) {
            Ok(outcomes) => {
                prop_assert_eq!(outcomes.len(), requests.len());
                prop_assert_eq!(ledger.meta().height, 1);
            }
            Err(_) => prop_assert_eq!(ledger, before),
        }
    }
}
