use std::sync::Arc;

use parking_lot::Mutex;

use super::{Amount, BatchId, Call, Ledger, LedgerError, LedgerSnapshot, Outcome, Request};

/// Cloneable handle serialising every operation on one ledger behind a
/// single lock.
#[derive(Clone, Debug)]
pub struct SharedLedger {
    inner: Arc<Mutex<Ledger>>,
}

impl SharedLedger {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    pub fn execute(&self, caller: &str, call: &Call) -> Result<Outcome, LedgerError> {
        self.inner.lock().execute(caller, call)
    }

    pub fn apply_batch(
        &self,
        requests: &[Request],
        batch_id: BatchId,
        timestamp: u64,
    ) -> Result<Vec<Outcome>, LedgerError> {
        self.inner.lock().apply_batch(requests, batch_id, timestamp)
    }

    /// Runs `f` with the lock held, for reads that need a consistent view.
    pub fn read<R>(&self, f: impl FnOnce(&Ledger) -> R) -> R {
        f(&self.inner.lock())
    }

    pub fn view_reserve(&self) -> Amount {
        self.inner.lock().view_reserve()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.inner.lock().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn concurrent_listings_respect_the_cap() {
        let mut ledger = Ledger::new("owner");
        ledger.set_reserve_cap("owner", 700).unwrap();
        for idx in 0..8 {
            ledger
                .issue_resource("owner", &format!("seller-{idx}"), 50)
                .unwrap();
        }
        // 400 issued, room for 60 of the 80 listing attempts.
        let shared = SharedLedger::new(ledger);
        let handles: Vec<_> = (0..8)
            .map(|idx| {
                let shared = shared.clone();
                thread::spawn(move || {
                    let caller = format!("seller-{idx}");
                    let mut accepted = 0;
                    for _ in 0..10 {
                        let call = Call::AddForSale {
                            amount: 5,
                            price: 1,
                        };
                        if shared.execute(&caller, &call).is_ok() {
                            accepted += 1;
                        }
                    }
                    accepted
                })
            })
            .collect();
        let accepted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 60);
        assert_eq!(shared.view_reserve(), 700);
        shared.read(|l| assert!(l.view_reserve() <= l.terms().reserve_cap));
    }
}
