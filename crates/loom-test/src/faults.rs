//! Fault injection for pipeline tests
//!
//! Processors that fail on chosen items, always, or at random with a fixed
//! seed, plus resources whose release fails.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

use loom_core::{Processor, Resource, ResourceError};

/// Fails on the given 1-based item numbers, passes everything else through
#[derive(Clone, Debug)]
pub struct FailOnItem {
    failing: BTreeSet<usize>,
    seen: usize,
}

impl FailOnItem {
    pub fn new(item: usize) -> Self {
        Self::on_items([item])
    }

    pub fn on_items(items: impl IntoIterator<Item = usize>) -> Self {
        Self {
            failing: items.into_iter().collect(),
            seen: 0,
        }
    }
}

impl Processor for FailOnItem {
    fn process(&mut self, input: Value) -> Result<Value, String> {
        self.seen += 1;
        if self.failing.contains(&self.seen) {
            return Err(format!("injected failure on item {}", self.seen));
        }
        Ok(input)
    }
}

/// Fails every call
#[derive(Clone, Debug)]
pub struct AlwaysFail {
    reason: String,
}

impl AlwaysFail {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Processor for AlwaysFail {
    fn process(&mut self, _input: Value) -> Result<Value, String> {
        Err(self.reason.clone())
    }
}

/// Fails with a fixed probability, reproducible from its seed
#[derive(Debug)]
pub struct FlakyProcessor {
    rng: StdRng,
    failure_rate: f64,
}

impl FlakyProcessor {
    pub fn new(seed: u64, failure_rate: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }
}

impl Processor for FlakyProcessor {
    fn process(&mut self, input: Value) -> Result<Value, String> {
        if self.rng.gen_bool(self.failure_rate) {
            Err("flaky failure".to_string())
        } else {
            Ok(input)
        }
    }
}

/// Pass-through that counts invocations
#[derive(Clone, Debug, Default)]
pub struct CountingProcessor {
    calls: Arc<AtomicUsize>,
}

impl CountingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared counter, readable after the processor moved into a component
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Processor for CountingProcessor {
    fn process(&mut self, input: Value) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(input)
    }
}

/// Resource that records its release and optionally fails it
#[derive(Clone, Debug, Default)]
pub struct ProbeResource {
    released: Arc<AtomicUsize>,
    fail: bool,
}

impl ProbeResource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn releases(&self) -> Arc<AtomicUsize> {
        self.released.clone()
    }
}

impl Resource for ProbeResource {
    fn release(&mut self) -> Result<(), ResourceError> {
        self.released.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ResourceError::new("injected release failure"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_on_item_is_one_based() {
        let mut p = FailOnItem::new(3);
        let results: Vec<bool> = (0..5).map(|i| p.process(Value::from(i)).is_ok()).collect();
        assert_eq!(results, vec![true, true, false, true, true]);
    }

    #[test]
    fn test_flaky_is_reproducible() {
        let run = |seed| {
            let mut p = FlakyProcessor::new(seed, 0.5);
            (0..32)
                .map(|_| p.process(Value::Null).is_ok())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(7), run(7));
        assert!(FlakyProcessor::new(1, 0.0).process(Value::Null).is_ok());
        assert!(FlakyProcessor::new(1, 1.0).process(Value::Null).is_err());
    }

    #[test]
    fn test_counting_processor_shares_counter() {
        let p = CountingProcessor::new();
        let counter = p.counter();
        let mut moved = p;
        moved.process(Value::Null).unwrap();
        moved.process(Value::Null).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_probe_resource() {
        let mut ok = ProbeResource::new();
        let mut bad = ProbeResource::failing();
        assert!(ok.release().is_ok());
        assert!(bad.release().is_err());
        assert_eq!(bad.releases().load(Ordering::SeqCst), 1);
    }
}
