use progress_core::{InboundMessage, UpdateRouter};

#[test]
fn unknown_and_replaced_messages_are_noops() {
    let mut router = UpdateRouter::new();

    let events = router.route(InboundMessage::Unknown {
        kind: "queue_position".to_string(),
    });
    assert!(events.is_empty());

    let events = router.route(InboundMessage::ConnectionReplaced);
    assert!(events.is_empty());

    assert_eq!(router.ledger().live_len(), 0);
    assert_eq!(router.ledger().completed_len(), 0);
    assert_eq!(router.stats().ignored, 2);
    assert_eq!(router.stats().diagnostics, 0);
}
