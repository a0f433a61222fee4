//! DNS Request Handlers
//!
//! A [`Chain`] passes each query through its handlers in order until one
//! of them does something other than decline. [`EtcdPlugin`] answers
//! names of its zone from etcd and declines everything else, including
//! names it has no record for.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

use crate::dns::wire::{type_name, Query, RData, ResourceRecord, TYPE_A, TYPE_CNAME, TYPE_TXT};
use crate::naming::in_zone;
use crate::resolver::Resolver;
use crate::types::RecordType;

/// What a handler did with a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Answer section of a successful response
    Answer(Vec<ResourceRecord>),

    /// Not mine, let the next handler try
    Decline,

    /// In-zone failure that must be reported as SERVFAIL
    ServerFailure(String),

    /// Query type this handler does not serve
    NotImplemented,
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn serve(&self, query: &Query) -> Outcome;
}

/// Ordered list of handlers
#[derive(Default, Clone)]
pub struct Chain {
    handlers: Vec<Arc<dyn Handler>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// First non-declining outcome, or `Decline` if every handler passed
    pub async fn serve(&self, query: &Query) -> Outcome {
        for handler in &self.handlers {
            match handler.serve(query).await {
                Outcome::Decline => debug!("{} declined {}", handler.name(), query.name),
                outcome => return outcome,
            }
        }
        Outcome::Decline
    }
}

/// Answers queries for one zone from etcd
pub struct EtcdPlugin {
    /// Lower-case FQDN
    zone: String,

    resolver: Resolver,

    /// TTL of every answer record
    ttl: u32,
}

impl EtcdPlugin {
    pub fn new(zone: impl Into<String>, resolver: Resolver, ttl: u32) -> Self {
        Self {
            zone: zone.into(),
            resolver,
            ttl,
        }
    }

    fn record(&self, name: &str, data: RData) -> ResourceRecord {
        ResourceRecord {
            name: name.to_string(),
            ttl: self.ttl,
            data,
        }
    }

    /// Follow a CNAME one step; the target must be an A record
    async fn chase(&self, qname: &str, target: &str) -> Outcome {
        let found = match self.resolver.lookup(target, &self.zone).await {
            Ok(found) => found,
            Err(e) => return Outcome::ServerFailure(format!("unable to lookup name on etcd: {}", e)),
        };

        if found.rtype != RecordType::A {
            return Outcome::ServerFailure(format!(
                "CNAME target {} resolved to {} instead of A",
                target, found.rtype
            ));
        }

        match found.value.parse::<Ipv4Addr>() {
            Ok(ip) => Outcome::Answer(vec![
                self.record(qname, RData::Cname(target.to_string())),
                self.record(target, RData::A(ip)),
            ]),
            Err(_) => Outcome::ServerFailure(format!("{} holds invalid address {:?}", target, found.value)),
        }
    }
}

#[async_trait]
impl Handler for EtcdPlugin {
    fn name(&self) -> &'static str {
        "etcd"
    }

    async fn serve(&self, query: &Query) -> Outcome {
        let qname = query.name.as_str();
        debug!("class: {}, type: {}, qname: {}", query.qclass, type_name(query.qtype), qname);

        if !in_zone(qname, &self.zone) {
            return Outcome::Decline;
        }

        if !matches!(query.qtype, TYPE_A | TYPE_CNAME | TYPE_TXT) {
            return Outcome::NotImplemented;
        }

        let found = match self.resolver.lookup(qname, &self.zone).await {
            Ok(found) => found,
            Err(e) => {
                debug!("lookup of {} failed, passing on: {}", qname, e);
                return Outcome::Decline;
            }
        };

        let outcome = match found.rtype {
            RecordType::A => match found.value.parse::<Ipv4Addr>() {
                Ok(ip) => Outcome::Answer(vec![self.record(qname, RData::A(ip))]),
                Err(_) => Outcome::ServerFailure(format!("{} holds invalid address {:?}", qname, found.value)),
            },
            RecordType::Cname => self.chase(qname, &found.value).await,
            RecordType::Txt => Outcome::Answer(vec![self.record(qname, RData::Txt(found.value))]),
        };

        if let Outcome::Answer(answers) = &outcome {
            debug!("answer: {:?}", answers);
        }
        outcome
    }
}
