use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use relay_core::{
    BoxedHandler, CommandMessage, DispatchError, DuplicateResolution, HandlerError,
    InterceptorChain, Message, MetaData, RegistrationError, dispatch_interceptor,
    handler_interceptor, into_handler,
};
use relay_framework::SimpleCommandBus;

#[derive(Debug, Clone)]
struct RedeemCard {
    card_id: String,
    amount: u32,
}

fn redeem_card(amount: u32) -> CommandMessage {
    CommandMessage::named(
        "RedeemCard",
        RedeemCard {
            card_id: "gc-42".into(),
            amount,
        },
    )
}

fn tagged_handler(tag: &'static str, calls: Arc<AtomicUsize>) -> BoxedHandler<CommandMessage> {
    into_handler(move |command: CommandMessage| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            let card = command
                .payload_as::<RedeemCard>()
                .ok_or_else(|| HandlerError::msg("unexpected payload"))?;
            Ok::<_, HandlerError>(format!("{tag}:{}:{}", card.card_id, card.amount))
        }
    })
}

#[tokio::test]
async fn test_redeem_card_duplicate_keeps_first_by_default() {
    let bus = SimpleCommandBus::new();
    let first_calls = Arc::new(AtomicUsize::new(0));
    let second_calls = Arc::new(AtomicUsize::new(0));

    bus.subscribe("RedeemCard", "GiftCard", tagged_handler("first", first_calls.clone()))
        .unwrap();
    bus.subscribe("RedeemCard", "GiftCardCopy", tagged_handler("second", second_calls.clone()))
        .expect("default policy accepts the duplicate registration call");

    let result = bus.dispatch(redeem_card(10)).await.unwrap();
    assert_eq!(result.get::<String>().as_deref(), Some("first:gc-42:10"));
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);

    let handlers = bus.handlers();
    assert_eq!(handlers.len(), 1);
    assert_eq!(handlers[0].origin, "GiftCard");
}

#[tokio::test]
async fn test_redeem_card_duplicate_rejected() {
    let bus = SimpleCommandBus::builder()
        .resolution(DuplicateResolution::Reject)
        .build();
    let calls = Arc::new(AtomicUsize::new(0));

    bus.subscribe("RedeemCard", "GiftCard", tagged_handler("first", calls.clone()))
        .unwrap();
    let error = bus
        .subscribe("RedeemCard", "GiftCardCopy", tagged_handler("second", calls.clone()))
        .unwrap_err();
    assert!(matches!(
        &error,
        RegistrationError::DuplicateHandler { name, existing_origin, candidate_origin }
            if name == "RedeemCard"
                && existing_origin == "GiftCard"
                && candidate_origin == "GiftCardCopy"
    ));

    let result = bus.dispatch(redeem_card(3)).await.unwrap();
    assert_eq!(result.get::<String>().as_deref(), Some("first:gc-42:3"));
}

#[tokio::test]
async fn test_reject_policy_accepts_exactly_one_of_many() {
    let bus = SimpleCommandBus::builder()
        .resolution(DuplicateResolution::Reject)
        .build();
    let calls = Arc::new(AtomicUsize::new(0));

    let successes = (0..8)
        .filter(|i| {
            bus.subscribe("RedeemCard", format!("origin-{i}"), tagged_handler("any", calls.clone()))
                .is_ok()
        })
        .count();

    assert_eq!(successes, 1);
    assert_eq!(bus.handlers().len(), 1);
}

#[tokio::test]
async fn test_replace_policy_routes_to_newest() {
    let bus = SimpleCommandBus::builder()
        .resolution(DuplicateResolution::Replace)
        .build();
    let calls = Arc::new(AtomicUsize::new(0));

    bus.subscribe("RedeemCard", "old", tagged_handler("old", calls.clone()))
        .unwrap();
    bus.subscribe("RedeemCard", "new", tagged_handler("new", calls.clone()))
        .unwrap();

    let result = bus.dispatch(redeem_card(1)).await.unwrap();
    assert_eq!(result.get::<String>().as_deref(), Some("new:gc-42:1"));
}

#[tokio::test]
async fn test_vetoing_dispatch_interceptor_prevents_invocation() {
    let bus = SimpleCommandBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    bus.subscribe("RedeemCard", "GiftCard", tagged_handler("first", calls.clone()))
        .unwrap();
    bus.register_dispatch_interceptor(dispatch_interceptor(|command: CommandMessage| {
        match command.payload_as::<RedeemCard>() {
            Some(card) if card.amount > 100 => Err(DispatchError::vetoed("amount exceeds limit")),
            _ => Ok(command),
        }
    }));

    let error = bus.dispatch(redeem_card(500)).await.unwrap_err();
    assert!(matches!(error, DispatchError::Vetoed { reason } if reason == "amount exceeds limit"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    bus.dispatch(redeem_card(50)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_every_stage_entered_when_all_proceed() {
    let bus = SimpleCommandBus::new();
    let entries = Arc::new(AtomicUsize::new(0));
    bus.subscribe("RedeemCard", "GiftCard", tagged_handler("h", entries.clone()))
        .unwrap();

    const INTERCEPTORS: usize = 4;
    for _ in 0..INTERCEPTORS {
        let entries = entries.clone();
        bus.register_handler_interceptor(handler_interceptor(
            move |command: CommandMessage, chain: InterceptorChain<_>| {
                entries.fetch_add(1, Ordering::SeqCst);
                chain.proceed(command)
            },
        ));
    }

    bus.dispatch(redeem_card(1)).await.unwrap();
    assert_eq!(entries.load(Ordering::SeqCst), INTERCEPTORS + 1);
}

#[tokio::test]
async fn test_missing_proceed_truncates_pipeline() {
    let bus = SimpleCommandBus::new();
    let entries = Arc::new(AtomicUsize::new(0));
    bus.subscribe("RedeemCard", "GiftCard", tagged_handler("h", entries.clone()))
        .unwrap();

    let counting = |entries: Arc<AtomicUsize>| {
        handler_interceptor(move |command: CommandMessage, chain: InterceptorChain<_>| {
            entries.fetch_add(1, Ordering::SeqCst);
            chain.proceed(command)
        })
    };
    bus.register_handler_interceptor(counting(entries.clone()));
    {
        let entries = entries.clone();
        bus.register_handler_interceptor(handler_interceptor(
            move |_: CommandMessage, _: InterceptorChain<_>| {
                entries.fetch_add(1, Ordering::SeqCst);
                async { Ok(relay_core::Payload::new(String::from("denied"))) }
            },
        ));
    }
    bus.register_handler_interceptor(counting(entries.clone()));

    let result = bus.dispatch(redeem_card(1)).await.unwrap();
    assert_eq!(result.get::<String>().as_deref(), Some("denied"));
    assert_eq!(entries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_dispatch_interceptor_metadata_reaches_handler() {
    let bus = SimpleCommandBus::builder().spawn_handlers(true).build();
    bus.register_dispatch_interceptor(dispatch_interceptor(|command: CommandMessage| {
        Ok(command.and_metadata(MetaData::with("user", "clerk-7")))
    }));
    bus.subscribe(
        "RedeemCard",
        "GiftCard",
        into_handler(|command: CommandMessage| async move {
            Ok::<_, HandlerError>(command.metadata().get_str("user").map(str::to_owned))
        }),
    )
    .unwrap();

    let result = bus.dispatch(redeem_card(1)).await.unwrap();
    assert_eq!(result.get::<Option<String>>(), Some(Some("clerk-7".to_string())));
}
