//! Per-client exchange history.
//!
//! Append-only: workers add an entry after each successful reply, and the
//! report is read once the session is over.

use std::fmt::Write as _;
use std::net::SocketAddr;

use dashmap::DashMap;
use serde::Serialize;

/// One answered payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    /// Position in this client's history, starting at 0.
    pub sequence: u64,
    pub received: String,
    pub sent: String,
}

/// Full history for one remote address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientHistory {
    pub address: SocketAddr,
    pub exchanges: Vec<Exchange>,
}

#[derive(Debug, Default)]
pub struct ExchangeLog {
    clients: DashMap<SocketAddr, Vec<Exchange>>,
}

impl ExchangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an exchange and return the sequence number it was given.
    ///
    /// Numbering is per address and gap-free because the shard lock is held
    /// across reading the length and pushing.
    pub fn record(&self, address: SocketAddr, received: String, sent: String) -> u64 {
        let mut history = self.clients.entry(address).or_default();
        let sequence = history.len() as u64;
        history.push(Exchange {
            sequence,
            received,
            sent,
        });
        sequence
    }

    pub fn entries(&self, address: &SocketAddr) -> Vec<Exchange> {
        self.clients
            .get(address)
            .map(|history| history.value().clone())
            .unwrap_or_default()
    }

    /// Every address with at least one exchange, sorted.
    pub fn addresses(&self) -> Vec<SocketAddr> {
        let mut addresses: Vec<_> = self.clients.iter().map(|entry| *entry.key()).collect();
        addresses.sort_unstable();
        addresses
    }

    /// Total number of exchanges across all clients.
    pub fn len(&self) -> usize {
        self.clients.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn histories(&self) -> Vec<ClientHistory> {
        self.addresses()
            .into_iter()
            .map(|address| ClientHistory {
                address,
                exchanges: self.entries(&address),
            })
            .collect()
    }

    /// Human-readable report, one block per client.
    pub fn render(&self) -> String {
        let mut out = String::from("All the messages that were sent: Client -> Server\n");
        for history in self.histories() {
            let _ = writeln!(out, "\nClient: [{}], messages are:", history.address);
            for exchange in &history.exchanges {
                let _ = writeln!(
                    out,
                    "  ({}, {:?}, {:?})",
                    exchange.sequence, exchange.received, exchange.sent
                );
            }
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.histories())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn sequence_numbers_are_per_client() {
        let log = ExchangeLog::new();
        assert_eq!(log.record(addr(1), "a".into(), "A".into()), 0);
        assert_eq!(log.record(addr(1), "b".into(), "B".into()), 1);
        assert_eq!(log.record(addr(2), "c".into(), "C".into()), 0);

        let first = log.entries(&addr(1));
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].received, "b");
        assert_eq!(log.len(), 3);
        assert_eq!(log.addresses(), vec![addr(1), addr(2)]);
    }

    #[test]
    fn concurrent_appends_have_no_gaps() {
        let log = Arc::new(ExchangeLog::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for n in 0..50 {
                        log.record(addr(7), format!("{t}-{n}"), String::new());
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let sequences: Vec<u64> = log.entries(&addr(7)).iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (0..400).collect::<Vec<_>>());
    }

    #[test]
    fn unknown_address_has_no_entries() {
        let log = ExchangeLog::new();
        assert!(log.entries(&addr(9)).is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn render_lists_each_client() {
        let log = ExchangeLog::new();
        log.record(addr(5000), "hi".into(), "Hello, client! I received your message: hi.".into());

        let report = log.render();
        assert!(report.contains("Client: [127.0.0.1:5000], messages are:"));
        assert!(report.contains(r#"(0, "hi", "Hello, client! I received your message: hi.")"#));
    }

    #[test]
    fn json_report_is_structured() {
        let log = ExchangeLog::new();
        log.record(addr(5001), "x".into(), "y".into());

        let value: serde_json::Value = serde_json::from_str(&log.to_json().unwrap()).unwrap();
        assert_eq!(value[0]["address"], "127.0.0.1:5001");
        assert_eq!(value[0]["exchanges"][0]["sequence"], 0);
        assert_eq!(value[0]["exchanges"][0]["received"], "x");
    }
}
