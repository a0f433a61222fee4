use std::time::Duration;
use tower::ServiceExt;

use super::*;
use crate::api::router;
use crate::dns::respond;
use crate::dns::wire::{Rcode, TYPE_A, TYPE_TXT};
use crate::store::KvStore;

#[tokio::test]
async fn test_provisioned_cname_answers_over_the_wire() {
    let store = MemoryStore::new();
    let app = router(api_state(&store, None));

    let response = app
        .oneshot(post_records(serde_json::json!([
            { "name": "www", "type": "CNAME", "value": "web" },
            { "name": "web", "type": "A", "value": "192.0.2.10" },
        ])))
        .await
        .unwrap();
    assert!(response.status().is_success());

    let chain = chain(&store);
    let metrics = Metrics::new();
    let reply = respond(&chain, &metrics, &query_packet("WWW.Example.org", TYPE_A)).await.unwrap();

    assert_eq!(rcode(&reply), Rcode::NoError as u8);
    assert_eq!(answer_count(&reply), 2);
    assert_eq!(reply[reply.len() - 4..], [192, 0, 2, 10]);
}

#[tokio::test(start_paused = true)]
async fn test_expired_record_stops_resolving() {
    let store = MemoryStore::new();
    let records = RecordStore::new(Arc::new(store.clone()), scheme());
    records
        .append(
            ZONE,
            &[crate::types::RecordSpec {
                name: "_acme-challenge".to_string(),
                rtype: "TXT".to_string(),
                value: "token".to_string(),
                ttl: Some(30),
            }],
        )
        .await
        .unwrap();

    let chain = chain(&store);
    let metrics = Metrics::new();
    let packet = query_packet("_acme-challenge.example.org", TYPE_TXT);

    let reply = respond(&chain, &metrics, &packet).await.unwrap();
    assert_eq!(rcode(&reply), Rcode::NoError as u8);

    tokio::time::advance(Duration::from_secs(31)).await;

    let reply = respond(&chain, &metrics, &packet).await.unwrap();
    assert_eq!(rcode(&reply), Rcode::Refused as u8);
    assert_eq!(answer_count(&reply), 0);
}

#[tokio::test]
async fn test_name_with_two_types_is_not_answered() {
    let store = MemoryStore::new();
    store.put("dns/example.org/dup/A", "10.0.0.1", None).await.unwrap();
    store.put("dns/example.org/dup/TXT", "hello", None).await.unwrap();

    let chain = chain(&store);
    let metrics = Metrics::new();
    let reply = respond(&chain, &metrics, &query_packet("dup.example.org", TYPE_A)).await.unwrap();

    assert_eq!(rcode(&reply), Rcode::Refused as u8);
    assert_eq!(answer_count(&reply), 0);
}
