//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use qfos_core::types::{BotCategory, Provider, Request};

/// A normalized request with deterministic identity.
pub fn request(provider: &str, ms: i64, path: &str, n: u64) -> Request {
    Request {
        id: Uuid::from_u64_pair(0, n),
        timestamp: Utc.timestamp_millis_opt(ms).unwrap(),
        client_ip: "203.0.113.7".to_string(),
        method: "GET".to_string(),
        host: "example.com".to_string(),
        path: path.to_string(),
        status_code: 200,
        user_agent: "ChatGPT-User/1.0".to_string(),
        provider: Provider::from(provider),
        bot_category: BotCategory::UserRequest,
        query_string: None,
        response_bytes: None,
        request_bytes: None,
        response_time_ms: None,
        cache_status: None,
        edge_location: None,
        referer: None,
        protocol: None,
        ssl_protocol: None,
    }
}

/// Synthetic fan-out corpus with known structure.
///
/// `fanouts` bursts of six requests each. Within a burst the gaps are
/// 9, 9, 60, 9, 9 ms and all six requests share one URL theme unique to
/// the burst. The gap between bursts is 600 ms, shortened to 300 ms after
/// every fourth burst so that a 500 ms window merges some unrelated
/// neighbors while a 100 ms window never does.
pub fn fanout_corpus(provider: &str, fanouts: usize, id_base: u64) -> Vec<Request> {
    const INTRA_GAPS: [i64; 5] = [9, 9, 60, 9, 9];

    let mut requests = Vec::with_capacity(fanouts * 6);
    let mut clock = 0i64;
    let mut n = id_base;

    for fanout in 0..fanouts {
        for j in 0..6 {
            if j > 0 {
                clock += INTRA_GAPS[j - 1];
            }
            let path = format!("/kb/topic{fanout:02}/item{:04}", fanout * 10 + j);
            requests.push(request(provider, clock, &path, n));
            n += 1;
        }
        clock += if fanout % 4 == 3 { 300 } else { 600 };
    }

    requests
}
