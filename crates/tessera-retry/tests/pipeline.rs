//! Request pipeline integration tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tessera_core::diagnostics::{CollectingSink, DiagnosticKind};
use tessera_core::request::headers;
use tessera_core::status::{codes, sub_codes};
use tessera_core::types::{CircuitBreakerConfig, EndpointConfig, HedgingConfig, OperationConfig};
use tessera_core::{
    DocumentError, ErrorKind, OperationType, RequestContext, ResilienceConfig, ResourceType,
    Response,
};
use tessera_retry::RequestPipeline;

use common::{failure_response, MockCache, MockTransport, COLLECTION, RID};

const EAST: &str = "East US";
const WEST: &str = "West US";

fn two_region_config() -> ResilienceConfig {
    ResilienceConfig {
        endpoint: EndpointConfig {
            preferred_regions: vec![EAST.to_string(), WEST.to_string()],
            ..EndpointConfig::default()
        },
        ..ResilienceConfig::default()
    }
}

fn read() -> RequestContext {
    RequestContext::new(OperationType::Read, ResourceType::Document)
        .with_collection(COLLECTION, RID)
        .with_partition_key_range("0")
}

#[tokio::test(start_paused = true)]
async fn test_session_token_is_recorded_and_sent_back() {
    let transport = Arc::new(MockTransport::new(|_, call| {
        let token = format!("0:1#{}#1=20", call * 100);
        Ok(Response::new(200).with_header(headers::SESSION_TOKEN, token))
    }));
    let pipeline =
        RequestPipeline::builder(ResilienceConfig::default(), transport.clone(), MockCache::new(RID))
            .build();

    pipeline.send(read()).await.unwrap();
    pipeline.send(read()).await.unwrap();
    pipeline.send(read()).await.unwrap();

    let sent = transport.sent();
    assert_eq!(sent[0].session_token(), None);
    assert_eq!(sent[1].session_token(), Some("0:1#100#1=20"));
    assert_eq!(sent[2].session_token(), Some("0:1#200#1=20"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_operations_merge_tokens() {
    let transport = Arc::new(MockTransport::new(|_, call| {
        let token = format!("0:1#{}#1=20", call * 100);
        Ok(Response::new(200).with_header(headers::SESSION_TOKEN, token))
    }));
    let pipeline =
        RequestPipeline::builder(ResilienceConfig::default(), transport.clone(), MockCache::new(RID))
            .build();

    let results = join_all((0..8).map(|_| pipeline.send(read()))).await;
    assert!(results.iter().all(Result::is_ok));

    pipeline.send(read()).await.unwrap();
    let last = transport.sent().pop().unwrap();
    assert_eq!(last.session_token(), Some("0:1#800#1=20"));
}

#[tokio::test(start_paused = true)]
async fn test_caller_token_and_metadata_requests_are_left_alone() {
    let transport = Arc::new(MockTransport::new(|_, _| {
        Ok(Response::new(200).with_header(headers::SESSION_TOKEN, "0:1#500#1=20"))
    }));
    let pipeline =
        RequestPipeline::builder(ResilienceConfig::default(), transport.clone(), MockCache::new(RID))
            .build();

    pipeline.send(read()).await.unwrap();

    let mut pinned = read();
    pinned.set_session_token("0:1#7#1=3");
    pipeline.send(pinned).await.unwrap();

    let metadata = RequestContext::new(OperationType::Read, ResourceType::Collection)
        .with_collection(COLLECTION, RID);
    pipeline.send(metadata).await.unwrap();

    let sent = transport.sent();
    assert_eq!(sent[1].session_token(), Some("0:1#7#1=3"));
    assert_eq!(sent[2].session_token(), None);
}

#[tokio::test(start_paused = true)]
async fn test_fails_over_to_next_region() {
    let transport = Arc::new(MockTransport::new(|request, _| {
        match request.target_region.as_deref() {
            Some(EAST) => Ok(failure_response(codes::SERVICE_UNAVAILABLE, 0)),
            _ => Ok(Response::new(200).with_region(WEST)),
        }
    }));
    let sink = Arc::new(CollectingSink::new());
    let pipeline = RequestPipeline::builder(two_region_config(), transport.clone(), MockCache::new(RID))
        .with_diagnostics(sink.clone())
        .build();

    let response = pipeline.send(read()).await.unwrap();
    assert_eq!(response.region.as_deref(), Some(WEST));
    assert_eq!(
        transport.sent_regions(),
        vec![Some(EAST.to_string()), Some(WEST.to_string())]
    );
    assert!(!pipeline.endpoints().is_available_for(EAST, OperationType::Read));
    assert_eq!(
        sink.count(|k| matches!(k, DiagnosticKind::RegionMarkedUnavailable { .. })),
        1
    );

    // the next read starts in the healthy region
    pipeline.send(read()).await.unwrap();
    assert_eq!(transport.sent_regions()[2].as_deref(), Some(WEST));
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_routes_around_region() {
    let config = ResilienceConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            ..CircuitBreakerConfig::default()
        },
        ..two_region_config()
    };
    let transport = Arc::new(MockTransport::new(|request, _| {
        match request.target_region.as_deref() {
            Some(EAST) => Ok(failure_response(codes::GONE, sub_codes::SERVER_GENERATED_410)),
            _ => Ok(Response::new(200)),
        }
    }));
    let sink = Arc::new(CollectingSink::new());
    let pipeline = RequestPipeline::builder(config, transport.clone(), MockCache::new(RID))
        .with_diagnostics(sink.clone())
        .build();

    for _ in 0..3 {
        pipeline.send(read()).await.unwrap();
    }

    let regions: Vec<_> = transport
        .sent_regions()
        .into_iter()
        .map(|r| r.unwrap_or_default())
        .collect();
    assert_eq!(regions, vec![EAST, WEST, EAST, WEST, WEST]);
    assert!(pipeline.breaker().state(EAST, "0").is_open());
    assert!(pipeline.endpoints().is_available_for(EAST, OperationType::Read));
    assert_eq!(
        sink.count(|k| matches!(k, DiagnosticKind::CircuitOpened { .. })),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_trial_request_closes_circuit_after_cooldown() {
    let config = ResilienceConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown_ms: 1_000,
            ..CircuitBreakerConfig::default()
        },
        ..two_region_config()
    };
    let transport = Arc::new(MockTransport::new(|request, call| {
        match (request.target_region.as_deref(), call) {
            (Some(EAST), 1) => Ok(failure_response(
                codes::SERVICE_UNAVAILABLE,
                sub_codes::SERVER_GENERATED_503,
            )),
            _ => Ok(Response::new(200)),
        }
    }));
    let pipeline = RequestPipeline::builder(config, transport.clone(), MockCache::new(RID)).build();

    pipeline.send(read()).await.unwrap();
    assert!(pipeline.breaker().state(EAST, "0").is_open());

    // past both the cooldown and the endpoint mark
    tokio::time::advance(Duration::from_secs(301)).await;
    pipeline.send(read()).await.unwrap();

    assert_eq!(transport.sent_regions()[2].as_deref(), Some(EAST));
    assert!(pipeline.breaker().state(EAST, "0").is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_hedged_read_uses_faster_region() {
    let config = ResilienceConfig {
        hedging: HedgingConfig {
            enabled: true,
            min_delay_ms: 200,
        },
        ..two_region_config()
    };
    let transport = Arc::new(
        MockTransport::new(|request, _| {
            Ok(Response::new(200).with_region(request.target_region.clone().unwrap_or_default()))
        })
        .with_latency(EAST, Duration::from_millis(500))
        .with_latency(WEST, Duration::from_millis(100)),
    );
    let pipeline = RequestPipeline::builder(config, transport.clone(), MockCache::new(RID)).build();

    let response = pipeline.send(read()).await.unwrap();
    assert_eq!(response.region.as_deref(), Some(WEST));

    // writes are never hedged
    let write = RequestContext::new(OperationType::Create, ResourceType::Document)
        .with_collection(COLLECTION, RID)
        .with_partition_key_range("0");
    let response = pipeline.send(write).await.unwrap();
    assert_eq!(response.region.as_deref(), Some(EAST));
}

#[tokio::test(start_paused = true)]
async fn test_hedged_read_honours_end_to_end_timeout() {
    let config = ResilienceConfig {
        hedging: HedgingConfig {
            enabled: true,
            min_delay_ms: 200,
        },
        operation: OperationConfig {
            end_to_end_timeout_ms: Some(1_000),
        },
        ..two_region_config()
    };
    let transport = Arc::new(MockTransport::new(|_, _| {
        Err(DocumentError::network("connection reset by peer", true))
    }));
    let pipeline = RequestPipeline::builder(config, transport.clone(), MockCache::new(RID)).build();

    let start = Instant::now();
    let err = pipeline.send(read()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(err.message().contains("end-to-end timeout of 1000ms"));
    assert_eq!(start.elapsed(), Duration::from_secs(1));

    // neither branch keeps sending once the budget is spent
    let calls = transport.calls();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_unused_hedge_leaves_recovering_circuit_untouched() {
    let config = ResilienceConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown_ms: 1_000,
            ..CircuitBreakerConfig::default()
        },
        hedging: HedgingConfig {
            enabled: true,
            min_delay_ms: 200,
        },
        ..two_region_config()
    };
    let transport = Arc::new(MockTransport::new(|request, _| {
        Ok(Response::new(200).with_region(request.target_region.clone().unwrap_or_default()))
    }));
    let pipeline = RequestPipeline::builder(config, transport.clone(), MockCache::new(RID)).build();

    assert!(pipeline.breaker().try_record_failure(
        WEST,
        "0",
        codes::SERVICE_UNAVAILABLE,
        sub_codes::SERVER_GENERATED_503,
    ));
    assert!(pipeline.breaker().state(WEST, "0").is_open());
    tokio::time::advance(Duration::from_millis(1_001)).await;

    // East answers well inside the hedge delay
    let response = pipeline.send(read()).await.unwrap();
    assert_eq!(response.region.as_deref(), Some(EAST));
    assert_eq!(transport.sent_regions(), vec![Some(EAST.to_string())]);

    assert!(pipeline.breaker().state(WEST, "0").is_open());
    assert!(pipeline.breaker().is_available(WEST, "0"));
    assert!(pipeline.breaker().state(WEST, "0").is_half_open());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_surfaces_cancelled_error() {
    let transport = Arc::new(
        MockTransport::new(|_, _| Ok(failure_response(codes::TOO_MANY_REQUESTS, 3200)))
            .with_latency(EAST, Duration::from_millis(100)),
    );
    let pipeline = RequestPipeline::builder(two_region_config(), transport, MockCache::new(RID)).build();

    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            token.cancel();
        })
    };

    let err = pipeline
        .send_with_cancellation(read(), token)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(err.message().contains("status 429"));
}

#[tokio::test(start_paused = true)]
async fn test_recreated_collection_drops_stale_tokens() {
    let transport = Arc::new(MockTransport::new(|request, _| {
        match (request.collection_rid.as_deref(), request.session_token()) {
            (Some(RID), None) => {
                Ok(Response::new(200).with_header(headers::SESSION_TOKEN, "0:1#900#1=20"))
            }
            (Some(RID), Some(_)) => Ok(failure_response(
                codes::NOT_FOUND,
                sub_codes::READ_SESSION_NOT_AVAILABLE,
            )),
            _ => Ok(Response::new(200)),
        }
    }));
    let cache = MockCache::new(RID);
    let sink = Arc::new(CollectingSink::new());
    let config = ResilienceConfig {
        session_retry: tessera_core::types::BackoffPolicy {
            max_wait_ms: 20,
            ..tessera_core::types::BackoffPolicy::session_default()
        },
        ..ResilienceConfig::default()
    };
    let pipeline = RequestPipeline::builder(config, transport.clone(), cache.clone())
        .with_diagnostics(sink.clone())
        .build();

    pipeline.send(read()).await.unwrap();

    cache.set_rid("rid-2");
    let response = pipeline.send(read()).await;
    assert!(response.is_ok());

    let last = transport.sent().pop().unwrap();
    assert_eq!(last.collection_rid.as_deref(), Some("rid-2"));
    assert!(last.session_token().is_none());
    assert_eq!(
        sink.count(|k| matches!(k, DiagnosticKind::SessionTokenCleared { .. })),
        1
    );
}

#[tokio::test]
async fn test_transport_error_gets_region_attached() {
    let transport = Arc::new(MockTransport::new(|_, _| {
        Err(DocumentError::network("tls handshake rejected", false))
    }));
    let pipeline = RequestPipeline::builder(two_region_config(), transport, MockCache::new(RID)).build();

    let err = pipeline.send(read()).await.unwrap_err();
    assert_eq!(err.region(), Some(EAST));
    assert_eq!(err.kind(), ErrorKind::Fatal);
}
