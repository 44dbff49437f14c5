use std::collections::BTreeMap;
use std::sync::{Arc, Once};

use pretty_assertions::assert_eq;
use progress_core::{
    CompletedDesign, DesignReady, DiagnosticKind, ImageUpdate, InboundMessage, RouterEvent,
    UpdateRouter, DEFAULT_STAGE_LABEL,
};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(progress_logging::initialize_for_tests);
}

fn router() -> UpdateRouter {
    init_logging();
    UpdateRouter::with_clock(Arc::new(|| 1_000))
}

fn image_update(file_name: &str, stage: &str) -> InboundMessage {
    InboundMessage::ImageUpdate(ImageUpdate {
        file_name: file_name.to_string(),
        stage: stage.to_string(),
        image_url: Some(format!("https://cdn.example.com/{stage}.png")),
        timestamp: Some(5_000),
    })
}

fn design_ready(design_id: &str) -> InboundMessage {
    InboundMessage::DesignReady(DesignReady {
        design_id: design_id.to_string(),
        name: Some("Sunset tee".to_string()),
        price: Some(29.0),
        images: vec!["https://cdn.example.com/front.png".to_string()],
        image_urls: BTreeMap::new(),
        palette_name: Some("Sunset".to_string()),
    })
}

fn stage_events(events: &[RouterEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, RouterEvent::StageAdvanced(_)))
        .count()
}

fn design_events(events: &[RouterEvent]) -> Vec<CompletedDesign> {
    events
        .iter()
        .filter_map(|event| match event {
            RouterEvent::DesignReady(design) => Some(design.clone()),
            _ => None,
        })
        .collect()
}

const FILE: &str = "renders/tee_cid_42_palette_id_3_flavor_1.png";
const DESIGN_ID: &str = "tee_cid_42_palette_id_3_flavor_1";
const KEY: &str = "palette_id_3_flavor_1";

#[test]
fn duplicate_stage_then_design_ready_scenario() {
    let mut router = router();
    let mut events = Vec::new();
    events.extend(router.route(image_update(FILE, "background_removed")));
    events.extend(router.route(image_update(FILE, "background_removed")));
    events.extend(router.route(image_update(FILE, "upscaled")));
    events.extend(router.route(design_ready(DESIGN_ID)));

    assert_eq!(stage_events(&events), 2);
    assert_eq!(design_events(&events).len(), 1);
    assert_eq!(router.ledger().live_len(), 0);
    assert_eq!(router.ledger().completed_len(), 1);

    let done = router.ledger().get_completed(KEY).unwrap();
    assert_eq!(done.design_id, DESIGN_ID);
    assert_eq!(done.name, "Sunset tee");
    assert_eq!(done.price, Some(29.0));
    assert_eq!(
        done.image_urls.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["background_removed", "image_0", "upscaled"]
    );

    let stats = router.stats();
    assert_eq!(stats.routed, 4);
    assert_eq!(stats.stages_advanced, 2);
    assert_eq!(stats.duplicates_dropped, 1);
    assert_eq!(stats.designs_completed, 1);
}

#[test]
fn repeated_pairs_record_each_stage_once_in_any_order() {
    let mut router = router();
    let order = [
        "upscaled",
        "uploaded",
        "upscaled",
        "vectorized",
        "uploaded",
        "uploaded",
        "vectorized",
    ];
    let mut advanced = 0;
    for stage in order {
        advanced += stage_events(&router.route(image_update("tee_cid_7.png", stage)));
    }

    let record = router.ledger().get("tee_cid_7").unwrap();
    let stages: Vec<_> = record.stages.iter().map(|s| s.stage.as_str()).collect();
    assert_eq!(stages, vec!["upscaled", "uploaded", "vectorized"]);
    assert_eq!(advanced, 3);
}

#[test]
fn file_name_variants_share_one_timeline() {
    let mut router = router();
    router.route(image_update("uploads/Tee_CID_9.png", "uploaded"));
    router.route(image_update("tee_cid_9_bg.webp", "background_removed"));
    router.route(image_update("TEE_cid_9_bg.webp", "background_removed"));

    assert_eq!(router.ledger().live_len(), 1);
    assert_eq!(router.ledger().get("tee_cid_9").unwrap().stages.len(), 2);
}

#[test]
fn stage_advanced_carries_label_and_image() {
    let mut router = router();
    let events = router.route(image_update(FILE, "palette_applied"));
    let RouterEvent::StageAdvanced(advanced) = &events[0] else {
        panic!("expected StageAdvanced, got {events:?}");
    };
    assert_eq!(advanced.key, KEY);
    assert_eq!(advanced.label, "Palette applied");
    assert_eq!(advanced.color, "#FF9800");
    assert_eq!(
        advanced.image_url.as_deref(),
        Some("https://cdn.example.com/palette_applied.png")
    );
    assert_eq!(advanced.timestamp, 5_000);

    let events = router.route(image_update(FILE, "hyperdrive"));
    let RouterEvent::StageAdvanced(advanced) = &events[0] else {
        panic!("expected StageAdvanced, got {events:?}");
    };
    assert_eq!(advanced.label, DEFAULT_STAGE_LABEL);
}

#[test]
fn missing_timestamp_uses_clock() {
    let mut router = router();
    let events = router.route(InboundMessage::ImageUpdate(ImageUpdate {
        file_name: "mug_cid_1.png".to_string(),
        stage: "uploaded".to_string(),
        image_url: None,
        timestamp: None,
    }));
    let RouterEvent::StageAdvanced(advanced) = &events[0] else {
        panic!("expected StageAdvanced, got {events:?}");
    };
    assert_eq!(advanced.timestamp, 1_000);
    assert_eq!(advanced.image_url, None);
    assert_eq!(router.ledger().get("mug_cid_1").unwrap().start_time, 1_000);
}

#[test]
fn repeated_design_ready_emits_once() {
    let mut router = router();
    let first = router.route(design_ready("design-77"));
    let second = router.route(design_ready("design-77"));
    let third = router.route(design_ready(" DESIGN-77 "));

    assert_eq!(design_events(&first).len(), 1);
    assert!(second.is_empty());
    assert!(third.is_empty());
    assert_eq!(router.ledger().completed_len(), 1);
}

#[test]
fn design_ready_without_progress_still_completes() {
    let mut router = router();
    let events = router.route(design_ready("fast_cid_5"));

    assert_eq!(design_events(&events).len(), 1);
    assert!(router.ledger().get_completed("fast_cid_5").is_some());
    assert!(router.ledger().get("fast_cid_5").is_none());
    assert_eq!(router.ledger().live_len(), 0);
}

#[test]
fn late_stage_after_completion_is_dropped() {
    let mut router = router();
    router.route(image_update(FILE, "uploaded"));
    router.route(design_ready(DESIGN_ID));
    let events = router.route(image_update(FILE, "mockup_rendered"));

    assert!(events.is_empty());
    assert_eq!(router.ledger().live_len(), 0);
    assert_eq!(router.stats().late_updates_dropped, 1);
}

#[test]
fn design_name_falls_back_to_palette_then_default() {
    let mut router = router();
    let events = router.route(InboundMessage::DesignReady(DesignReady {
        design_id: "a".to_string(),
        name: Some("  ".to_string()),
        price: None,
        images: Vec::new(),
        image_urls: BTreeMap::new(),
        palette_name: Some("Ocean".to_string()),
    }));
    assert_eq!(design_events(&events)[0].name, "Ocean");

    let events = router.route(InboundMessage::DesignReady(DesignReady {
        design_id: "b".to_string(),
        name: None,
        price: None,
        images: Vec::new(),
        image_urls: BTreeMap::new(),
        palette_name: None,
    }));
    assert_eq!(design_events(&events)[0].name, "Custom design");
}

#[test]
fn unrecognized_file_name_emits_diagnostic() {
    let mut router = router();
    let events = router.route(image_update("holiday.jpg", "uploaded"));

    assert_eq!(events.len(), 1);
    let RouterEvent::Diagnostic(diagnostic) = &events[0] else {
        panic!("expected Diagnostic, got {events:?}");
    };
    assert_eq!(diagnostic.kind, DiagnosticKind::UnrecognizedFileName);
    assert_eq!(router.ledger().live_len(), 0);
    assert_eq!(router.stats().diagnostics, 1);
}

#[test]
fn empty_design_id_and_stage_emit_diagnostics() {
    let mut router = router();
    let events = router.route(design_ready("   "));
    assert!(matches!(
        &events[..],
        [RouterEvent::Diagnostic(d)] if d.kind == DiagnosticKind::EmptyDesignId
    ));

    let events = router.route(image_update("tee_cid_1.png", " "));
    assert!(matches!(
        &events[..],
        [RouterEvent::Diagnostic(d)] if d.kind == DiagnosticKind::EmptyStage
    ));
    assert_eq!(router.ledger().completed_len(), 0);
}

#[test]
fn malformed_frame_emits_diagnostic() {
    let mut router = router();
    let events = router.route_frame("{not json");
    assert!(matches!(
        &events[..],
        [RouterEvent::Diagnostic(d)] if d.kind == DiagnosticKind::MalformedFrame
    ));

    let events = router.route_frame(
        r#"{"type":"image_update","fileName":"tee_cid_2.png","stage":"uploaded","imageUrl":"u","timestamp":1}"#,
    );
    assert_eq!(stage_events(&events), 1);
}

#[test]
fn reset_clears_ledger_and_dedup_set() {
    let mut router = router();
    router.route(image_update("tee_cid_3.png", "uploaded"));
    router.route(design_ready("done_cid_1"));

    router.reset();

    assert_eq!(router.ledger().live_len(), 0);
    assert_eq!(router.ledger().completed_len(), 0);
    assert_eq!(router.stats().routed, 0);

    // Previously seen pair is accepted again.
    let events = router.route(image_update("tee_cid_3.png", "uploaded"));
    assert_eq!(stage_events(&events), 1);
    let events = router.route(design_ready("done_cid_1"));
    assert_eq!(design_events(&events).len(), 1);
}

#[test]
fn restored_designs_suppress_repeat_completion() {
    let mut router = router();
    router.restore_completed(vec![CompletedDesign {
        design_id: DESIGN_ID.to_string(),
        name: "Sunset tee".to_string(),
        price: None,
        image_urls: BTreeMap::new(),
    }]);

    assert!(router.route(design_ready(DESIGN_ID)).is_empty());
    assert!(router.route(image_update(FILE, "uploaded")).is_empty());
    assert!(router.ledger().get_completed(KEY).is_some());
}
