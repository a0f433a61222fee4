//! Cross-module scenarios: provisioning through the API, answering over the
//! DNS wire format and leadership hand-over, all on one `MemoryStore`.

mod provisioning;

use axum::body::Body;
use axum::http::{header, Request};
use std::sync::Arc;
use tokio::sync::watch;

use crate::api::{ApiState, Metrics};
use crate::dns::wire::CLASS_IN;
use crate::dns::{Chain, EtcdPlugin};
use crate::election::CampaignState;
use crate::naming::KeyScheme;
use crate::records::RecordStore;
use crate::resolver::Resolver;
use crate::store::{Health, MemoryStore};

const ZONE: &str = "example.org.";

fn scheme() -> KeyScheme {
    KeyScheme::new("dns", "/")
}

/// DNS chain serving `ZONE` from `store`
fn chain(store: &MemoryStore) -> Chain {
    let resolver = Resolver::new(Arc::new(store.clone()), scheme());
    Chain::new().with(Arc::new(EtcdPlugin::new(ZONE, resolver, 604_800)))
}

fn api_state(store: &MemoryStore, leader: Option<watch::Receiver<CampaignState>>) -> Arc<ApiState> {
    Arc::new(ApiState {
        zone: ZONE.to_string(),
        records: Arc::new(RecordStore::new(Arc::new(store.clone()), scheme())),
        metrics: Arc::new(Metrics::new()),
        health: Health::new(),
        leader,
    })
}

fn post_records(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/zones/example.org/records")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Standard query with RD set
fn query_packet(name: &str, qtype: u16) -> Vec<u8> {
    let mut data = vec![0x12, 0x34, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
    for label in name.trim_end_matches('.').split('.') {
        data.push(label.len() as u8);
        data.extend_from_slice(label.as_bytes());
    }
    data.push(0);
    data.extend_from_slice(&qtype.to_be_bytes());
    data.extend_from_slice(&CLASS_IN.to_be_bytes());
    data
}

fn rcode(response: &[u8]) -> u8 {
    response[3] & 0x0F
}

fn answer_count(response: &[u8]) -> u16 {
    u16::from_be_bytes([response[6], response[7]])
}
