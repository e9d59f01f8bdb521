use meshgate::core::fanout::{Fanout, FanoutEvent};

#[tokio::test]
async fn subscriber_receives_emitted_events() {
    let fanout: std::sync::Arc<Fanout<String>> = std::sync::Arc::new(Fanout::new());
    let mut rx = fanout.subscribe();

    fanout.emit(FanoutEvent::Put("a".to_string()));
    match rx.recv().await.unwrap() {
        FanoutEvent::Put(v) => assert_eq!(v, "a"),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn late_subscriber_gets_init_immediately_once_initialized() {
    let fanout: std::sync::Arc<Fanout<String>> = std::sync::Arc::new(Fanout::new());
    fanout.set_init();

    let mut rx = fanout.subscribe();
    match rx.recv().await.unwrap() {
        FanoutEvent::Init => {}
        other => panic!("expected Init, got {other:?}"),
    }
}

#[tokio::test]
async fn early_subscriber_does_not_get_a_spurious_init() {
    let fanout: std::sync::Arc<Fanout<String>> = std::sync::Arc::new(Fanout::new());
    let mut rx = fanout.subscribe();

    fanout.emit(FanoutEvent::Put("first".to_string()));
    match rx.recv().await.unwrap() {
        FanoutEvent::Put(v) => assert_eq!(v, "first"),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn subscriber_count_tracks_live_subscriptions() {
    let fanout: std::sync::Arc<Fanout<String>> = std::sync::Arc::new(Fanout::new());
    assert_eq!(fanout.subscriber_count(), 0);

    let _rx1 = fanout.subscribe();
    let _rx2 = fanout.subscribe();
    assert_eq!(fanout.subscriber_count(), 2);
}

#[tokio::test]
async fn dropped_subscriber_is_pruned_on_next_emit() {
    let fanout: std::sync::Arc<Fanout<String>> = std::sync::Arc::new(Fanout::new());
    let rx = fanout.subscribe();
    drop(rx);

    fanout.emit(FanoutEvent::Delete("gone".to_string()));
    assert_eq!(fanout.subscriber_count(), 0);
}
