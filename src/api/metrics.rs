//! Metrics Collection
//!
//! Counters for DNS traffic and record provisioning.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::dns::wire::Rcode;

/// Metrics collector
#[derive(Default)]
pub struct Metrics {
    /// Start time for uptime calculation
    start_time: Option<Instant>,

    /// DNS queries received
    pub dns_queries: AtomicU64,

    /// Queries answered with NOERROR
    pub dns_answered: AtomicU64,

    /// Queries nobody in the chain claimed (REFUSED)
    pub dns_declined: AtomicU64,

    /// SERVFAIL responses
    pub dns_server_failures: AtomicU64,

    /// NOTIMP responses
    pub dns_not_implemented: AtomicU64,

    /// FORMERR responses to unparseable queries
    pub dns_format_errors: AtomicU64,

    /// Records written through the API
    pub records_appended: AtomicU64,

    /// Records deleted through the API
    pub records_deleted: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Increment DNS queries
    pub fn inc_dns_queries(&self) {
        self.dns_queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a response by its code
    pub fn record_rcode(&self, rcode: Rcode) {
        let counter = match rcode {
            Rcode::NoError => &self.dns_answered,
            Rcode::Refused => &self.dns_declined,
            Rcode::NotImp => &self.dns_not_implemented,
            Rcode::ServFail => &self.dns_server_failures,
            Rcode::FormErr => &self.dns_format_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_records_appended(&self, n: u64) {
        self.records_appended.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_records_deleted(&self, n: u64) {
        self.records_deleted.fetch_add(n, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let counters: [(&str, &str, &AtomicU64); 8] = [
            ("etcd_dns_queries_total", "DNS queries received", &self.dns_queries),
            ("etcd_dns_answered_total", "DNS queries answered", &self.dns_answered),
            ("etcd_dns_declined_total", "DNS queries refused as out of scope", &self.dns_declined),
            ("etcd_dns_server_failures_total", "SERVFAIL responses", &self.dns_server_failures),
            ("etcd_dns_not_implemented_total", "NOTIMP responses", &self.dns_not_implemented),
            ("etcd_dns_format_errors_total", "FORMERR responses", &self.dns_format_errors),
            ("etcd_dns_records_appended_total", "Records written", &self.records_appended),
            ("etcd_dns_records_deleted_total", "Records deleted", &self.records_deleted),
        ];

        let mut out = String::new();
        for (name, help, counter) in counters {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n\n",
                counter.load(Ordering::Relaxed)
            ));
        }
        out.push_str(&format!(
            "# HELP etcd_dns_uptime_seconds Service uptime in seconds\n# TYPE etcd_dns_uptime_seconds gauge\netcd_dns_uptime_seconds {}\n",
            self.uptime_secs()
        ));
        out
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "dns": {
                "queries": self.dns_queries.load(Ordering::Relaxed),
                "answered": self.dns_answered.load(Ordering::Relaxed),
                "declined": self.dns_declined.load(Ordering::Relaxed),
                "server_failures": self.dns_server_failures.load(Ordering::Relaxed),
                "not_implemented": self.dns_not_implemented.load(Ordering::Relaxed),
                "format_errors": self.dns_format_errors.load(Ordering::Relaxed),
            },
            "records": {
                "appended": self.records_appended.load(Ordering::Relaxed),
                "deleted": self.records_deleted.load(Ordering::Relaxed),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_export() {
        let metrics = Metrics::new();
        metrics.inc_dns_queries();
        metrics.record_rcode(Rcode::Refused);
        metrics.add_records_appended(3);

        let prom = metrics.to_prometheus();
        assert!(prom.contains("etcd_dns_queries_total 1"));
        assert!(prom.contains("etcd_dns_records_appended_total 3"));

        let json = metrics.to_json();
        assert_eq!(json["dns"]["queries"], 1);
        assert_eq!(json["dns"]["declined"], 1);
        assert_eq!(json["records"]["appended"], 3);
    }
}
