use std::sync::{Arc, Mutex};
use std::time::Duration;

use relay_core::{
    CommandMessage, DuplicateResolution, EventMessage, HandlerError, Message,
    Segment, into_handler,
};
use relay_framework::EventBus;
use relay_runtime::{ProcessorConfig, RelayConfig, RelayRuntime, RuntimeError};

const PROCESSOR: &str = "gift-cards";

fn config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.command_bus.duplicate_resolution = DuplicateResolution::Reject;
    config.processors.insert(
        PROCESSOR.into(),
        ProcessorConfig {
            initial_segment_count: 2,
            claim_interval_ms: 10,
            idle_poll_ms: 10,
            ..Default::default()
        },
    );
    config
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(start_paused = true)]
async fn test_commands_feed_processors_and_admin_reports() {
    let runtime = RelayRuntime::from_config(&config()).unwrap();

    let store = runtime.event_store().clone();
    runtime
        .command_bus()
        .subscribe(
            "RedeemCard",
            "GiftCard",
            into_handler(move |command: CommandMessage| {
                let card = command.payload_as::<String>().cloned().unwrap_or_default();
                let event = EventMessage::named("CardRedeemed", card.clone())
                    .for_aggregate(card, 0)
                    .caused_by(&command);
                let published = store.publish_one(event);
                async move { published }
            }),
        )
        .unwrap();
    assert!(
        runtime
            .command_bus()
            .subscribe(
                "RedeemCard",
                "GiftCardCopy",
                into_handler(|_: CommandMessage| async { Ok::<_, HandlerError>(()) }),
            )
            .is_err()
    );

    let redeemed = Arc::new(Mutex::new(Vec::new()));
    let seen = redeemed.clone();
    let processor = runtime
        .processor_builder(PROCESSOR)
        .subscribe(
            "CardRedeemed",
            "CardSummaryProjection",
            into_handler(move |event: EventMessage| {
                let card = event.payload_as::<String>().cloned().unwrap_or_default();
                seen.lock().unwrap().push(card);
                async { Ok::<_, HandlerError>(()) }
            }),
        )
        .build()
        .unwrap();
    assert_eq!(processor.config().initial_segment_count, 2);

    runtime.register_processor(processor.clone()).await.unwrap();
    assert!(matches!(
        runtime.register_processor(processor).await,
        Err(RuntimeError::ProcessorExists(_))
    ));
    runtime.start().await.unwrap();

    for card in ["gc-1", "gc-2", "gc-3", "gc-4"] {
        runtime
            .command_bus()
            .dispatch(CommandMessage::named("RedeemCard", card.to_string()))
            .await
            .unwrap();
    }
    wait_until(|| redeemed.lock().unwrap().len() == 4).await;

    let overview = runtime.handlers().await;
    assert_eq!(overview.commands.len(), 1);
    assert_eq!(overview.events[PROCESSOR].len(), 1);
    assert_eq!(overview.len(), 2);

    let processor = runtime.processor(PROCESSOR).await.unwrap();
    wait_until(|| processor.status().len() == 2).await;
    let report = runtime.processor_status(PROCESSOR).await.unwrap();
    assert!(report.running);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["segments"].as_array().map(Vec::len), Some(2));

    let (kept, handed_off) = runtime.split_segment(PROCESSOR, 0).await.unwrap();
    assert_eq!((kept.id(), handed_off.id()), (0, 2));
    wait_until(|| processor.status().len() == 3).await;

    let merged = runtime.merge_segment(PROCESSOR, 2).await.unwrap();
    assert_eq!(merged, Segment::new(0, 1).unwrap());
    wait_until(|| processor.status().len() == 2).await;

    runtime.set_blacklisting(PROCESSOR, false).await.unwrap();
    assert!(!runtime.processor_status(PROCESSOR).await.unwrap().blacklisting);
    assert!(matches!(
        runtime.split_segment("unknown", 0).await,
        Err(RuntimeError::ProcessorNotFound(_))
    ));

    runtime.shutdown().await.unwrap();
    assert!(runtime.status().await.iter().all(|report| !report.running));
}

#[tokio::test]
async fn test_invalid_processor_settings_are_rejected() {
    let mut config = config();
    if let Some(processor) = config.processors.get_mut(PROCESSOR) {
        processor.initial_segment_count = 3;
    }
    assert!(matches!(
        RelayRuntime::from_config(&config),
        Err(RuntimeError::Config(_))
    ));
}

#[tokio::test]
async fn test_programmatic_configuration() {
    let mut overrides = config();
    overrides.query_bus.handler_timeout_ms = 750;
    let runtime = RelayRuntime::builder()
        .without_env()
        .merge(overrides)
        .build()
        .unwrap();

    assert_eq!(runtime.query_bus().handler_timeout(), Duration::from_millis(750));
    assert_eq!(runtime.config().processor(PROCESSOR).initial_segment_count, 2);
    assert!(!runtime.is_running().await);
}
