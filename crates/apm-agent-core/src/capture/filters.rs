// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::capture::record::ErrorRecord;

type Filter = Box<dyn Fn(ErrorRecord) -> Option<ErrorRecord> + Send + Sync>;

/// Ordered chain of user functions run on every record before it is sent.
/// Returning `None` vetoes the record.
#[derive(Default)]
pub struct Filters {
    filters: Vec<Filter>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&mut self, filter: F)
    where
        F: Fn(ErrorRecord) -> Option<ErrorRecord> + Send + Sync + 'static,
    {
        self.filters.push(Box::new(filter));
    }

    pub fn process(&self, record: ErrorRecord) -> Option<ErrorRecord> {
        self.filters
            .iter()
            .try_fold(record, |record, filter| filter(record))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl std::fmt::Debug for Filters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filters")
            .field("len", &self.filters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::record::Machine;
    use crate::config::ErrorLevel;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn record(message: &str) -> ErrorRecord {
        ErrorRecord {
            message: message.to_string(),
            param_message: None,
            exception: None,
            stacktrace: None,
            culprit: None,
            http: None,
            user: None,
            extra: Map::new(),
            machine: Machine {
                hostname: "host".to_string(),
            },
            timestamp: "2025-01-01T00:00:00.000Z".to_string(),
            level: ErrorLevel::Error,
        }
    }

    #[test]
    fn test_empty_chain_passes_record_through() {
        let filters = Filters::new();
        assert!(filters.is_empty());
        assert_eq!(filters.process(record("a")), Some(record("a")));
    }

    #[test]
    fn test_filters_run_in_order() {
        let mut filters = Filters::new();
        filters.add(|mut r| {
            r.message.push('1');
            Some(r)
        });
        filters.add(|mut r| {
            r.message.push('2');
            Some(r)
        });

        let processed = filters.process(record("m")).unwrap();
        assert_eq!(processed.message, "m12");
        assert_eq!(filters.len(), 2);
    }

    #[test]
    fn test_veto_stops_the_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut filters = Filters::new();
        filters.add(|r| if r.message == "secret" { None } else { Some(r) });
        filters.add(move |r| {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(r)
        });

        assert!(filters.process(record("secret")).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(filters.process(record("public")).is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
