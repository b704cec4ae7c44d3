use std::time::Duration;

use relay_core::{
    BoxedHandler, DispatchError, HandlerError, QueryMessage, ResponseType, into_handler,
};
use relay_framework::SimpleQueryBus;

#[derive(Debug, thiserror::Error)]
#[error("projection unavailable")]
struct ProjectionUnavailable;

fn card_summary_query() -> QueryMessage {
    QueryMessage::named(
        "FetchCardSummaries",
        (),
        ResponseType::multiple_instances_of::<String>(),
    )
}

fn listing(items: &'static [&'static str]) -> BoxedHandler<QueryMessage> {
    into_handler(move |_: QueryMessage| async move {
        Ok::<_, HandlerError>(items.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    })
}

fn failing() -> BoxedHandler<QueryMessage> {
    into_handler(|_: QueryMessage| async {
        Err::<Vec<String>, _>(HandlerError::new(ProjectionUnavailable))
    })
}

#[tokio::test]
async fn test_scatter_gather_isolates_failing_handler() {
    let bus = SimpleQueryBus::new();
    let list = ResponseType::multiple_instances_of::<String>();
    bus.subscribe("FetchCardSummaries", "primary", list, listing(&["gc-1", "gc-2"]));
    bus.subscribe("FetchCardSummaries", "replica", list, failing());
    bus.subscribe("FetchCardSummaries", "archive", list, listing(&["gc-0"]));

    let entries = bus.scatter_gather(card_summary_query()).await.unwrap();

    let origins: Vec<_> = entries.iter().map(|e| e.origin.as_str()).collect();
    assert_eq!(origins, vec!["primary", "replica", "archive"]);
    assert!(entries[0].is_success());
    assert!(!entries[1].is_success());
    assert!(entries[2].is_success());
    assert!(matches!(
        entries[1].error(),
        Some(DispatchError::Handler(error)) if error.is::<ProjectionUnavailable>()
    ));
    assert_eq!(
        entries[0].response().and_then(|r| r.list::<String>()),
        Some(vec!["gc-1".to_string(), "gc-2".to_string()])
    );
}

#[tokio::test]
async fn test_scatter_gather_reports_one_entry_per_handler() {
    const HANDLERS: usize = 6;
    const FAILING: usize = 2;

    let bus = SimpleQueryBus::new();
    let list = ResponseType::multiple_instances_of::<String>();
    for i in 0..HANDLERS {
        let handler = if i < FAILING { failing() } else { listing(&["x"]) };
        bus.subscribe("FetchCardSummaries", format!("h{i}"), list, handler);
    }

    let entries = bus.scatter_gather(card_summary_query()).await.unwrap();
    assert_eq!(entries.len(), HANDLERS);
    assert_eq!(entries.iter().filter(|e| !e.is_success()).count(), FAILING);
}

#[tokio::test(start_paused = true)]
async fn test_per_call_timeout_overrides_bus_default() {
    let bus = SimpleQueryBus::with_handler_timeout(Duration::from_secs(60));
    bus.subscribe(
        "FetchCardSummaries",
        "slow",
        ResponseType::multiple_instances_of::<String>(),
        into_handler(|_: QueryMessage| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, HandlerError>(Vec::<String>::new())
        }),
    );

    let entries = bus
        .scatter_gather_with_timeout(card_summary_query(), Duration::from_millis(100))
        .await
        .unwrap();
    assert!(matches!(entries[0].error(), Some(DispatchError::Timeout { .. })));

    let entries = bus.scatter_gather(card_summary_query()).await.unwrap();
    assert!(entries[0].is_success());
}

#[tokio::test]
async fn test_point_to_point_failure_propagates() {
    let bus = SimpleQueryBus::new();
    bus.subscribe(
        "FetchCardSummaries",
        "broken",
        ResponseType::multiple_instances_of::<String>(),
        failing(),
    );

    let error = bus.query(card_summary_query()).await.unwrap_err();
    assert!(error.as_handler_error().is_some_and(|e| e.is::<ProjectionUnavailable>()));
}
