//! UDP DNS Server
//!
//! Receives queries, runs them through the handler chain and maps the
//! outcome onto a response code.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::api::Metrics;
use crate::dns::handler::{Chain, Outcome};
use crate::dns::wire::{build_format_error, build_response, parse_query, Rcode, DNS_MAX_PACKET_SIZE};

/// Run the DNS server
pub async fn run_dns_server(port: u16, chain: Arc<Chain>, metrics: Arc<Metrics>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = Arc::new(UdpSocket::bind(addr).await?);

    info!("🌐 DNS server listening on {}", addr);

    loop {
        let mut buf = [0u8; DNS_MAX_PACKET_SIZE];
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                let request = buf[..len].to_vec();
                let chain = chain.clone();
                let metrics = metrics.clone();
                let socket = socket.clone();

                tokio::spawn(async move {
                    if let Some(response) = respond(&chain, &metrics, &request).await {
                        if let Err(e) = socket.send_to(&response, src).await {
                            debug!("DNS reply to {} failed: {}", src, e);
                        }
                    }
                });
            }
            Err(e) => {
                error!("DNS socket error: {}", e);
            }
        }
    }
}

/// Build the reply for one datagram, `None` when it should be ignored
pub async fn respond(chain: &Chain, metrics: &Metrics, request: &[u8]) -> Option<Vec<u8>> {
    let query = match parse_query(request) {
        Ok(query) => query,
        Err(e) => {
            let response = build_format_error(request);
            if response.is_some() {
                debug!("malformed query, answering FORMERR: {}", e);
                metrics.inc_dns_queries();
                metrics.record_rcode(Rcode::FormErr);
            }
            return response;
        }
    };

    if query.is_response() {
        return None;
    }
    metrics.inc_dns_queries();

    let (rcode, answers) = if query.opcode() != 0 {
        (Rcode::NotImp, Vec::new())
    } else {
        match chain.serve(&query).await {
            Outcome::Answer(answers) => (Rcode::NoError, answers),
            Outcome::Decline => (Rcode::Refused, Vec::new()),
            Outcome::NotImplemented => (Rcode::NotImp, Vec::new()),
            Outcome::ServerFailure(reason) => {
                warn!("SERVFAIL for {}: {}", query.name, reason);
                (Rcode::ServFail, Vec::new())
            }
        }
    };
    metrics.record_rcode(rcode);

    match build_response(&query, rcode, &answers) {
        Ok(response) => Some(response),
        Err(e) => {
            warn!("could not encode response for {}: {}", query.name, e);
            metrics.record_rcode(Rcode::ServFail);
            build_response(&query, Rcode::ServFail, &[]).ok()
        }
    }
}
