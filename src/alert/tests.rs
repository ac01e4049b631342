use super::*;
use crate::config::{AlertConfig, ContactsConfig};
use crate::detection::{AssessedDetection, BoundingBox, DangerTier, Detection, RiskAssessment};
use crate::events::{EventBus, WildwatchEvent};
use crate::mock::{RecordingNotifier, SentMessage};
use crate::storage::{EventStore, MemoryEventStore};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn contacts() -> ContactsConfig {
    ContactsConfig {
        owner_numbers: vec!["+1000".to_string()],
        owner_emails: vec!["owner@farm.local".to_string()],
        authority_numbers: vec!["+9000".to_string()],
        authority_emails: vec!["ranger@forest.gov".to_string()],
    }
}

struct Harness {
    dispatcher: AlertDispatcher,
    notifier: Arc<RecordingNotifier>,
    store: Arc<MemoryEventStore>,
    bus: Arc<EventBus>,
}

fn harness(notifier: RecordingNotifier, contacts: ContactsConfig) -> Harness {
    let notifier = Arc::new(notifier);
    let store = Arc::new(MemoryEventStore::default());
    let bus = Arc::new(EventBus::new(16));
    let dispatcher = AlertDispatcher::new(
        &AlertConfig::default(),
        contacts,
        Arc::new(AlertThrottle::new(Duration::from_secs(60))),
        notifier.clone(),
        store.clone(),
        bus.clone(),
    );
    Harness {
        dispatcher,
        notifier,
        store,
        bus,
    }
}

fn entry(label: &str, tier: DangerTier, distance_cm: u32) -> AssessedDetection {
    AssessedDetection {
        detection: Detection::new(BoundingBox::new(0.0, 0.0, 50.0, 50.0), label, 0.9),
        assessment: RiskAssessment { tier, distance_cm },
    }
}

#[test]
fn test_throttle_admits_once_per_window() {
    let throttle = AlertThrottle::new(Duration::from_secs(60));
    let t0 = Instant::now();

    assert!(throttle.admit(AlertCategory::DangerHigh, t0));
    assert!(!throttle.admit(AlertCategory::DangerHigh, t0 + Duration::from_secs(30)));
    assert!(throttle.admit(AlertCategory::DangerHigh, t0 + Duration::from_secs(60)));
}

#[test]
fn test_throttle_categories_are_independent() {
    let throttle = AlertThrottle::new(Duration::from_secs(60));
    let t0 = Instant::now();

    assert!(throttle.admit(AlertCategory::DangerHigh, t0));
    assert!(throttle.admit(AlertCategory::Proximity, t0));
    assert!(!throttle.admit(AlertCategory::Proximity, t0 + Duration::from_secs(1)));
    assert!(throttle.admit(AlertCategory::MediumDanger, t0 + Duration::from_secs(1)));
}

#[test]
fn test_throttle_status_queries() {
    let throttle = AlertThrottle::new(Duration::from_secs(60));
    let t0 = Instant::now();

    assert_eq!(throttle.remaining(AlertCategory::System, t0), Duration::ZERO);
    assert!(throttle.last_fired(AlertCategory::System).is_none());

    throttle.admit(AlertCategory::System, t0);
    assert_eq!(throttle.last_fired(AlertCategory::System), Some(t0));
    assert_eq!(
        throttle.remaining(AlertCategory::System, t0 + Duration::from_secs(45)),
        Duration::from_secs(15)
    );

    throttle.reset(AlertCategory::System);
    assert!(throttle.admit(AlertCategory::System, t0 + Duration::from_secs(1)));
}

#[test]
fn test_throttle_scoped_per_camera() {
    let throttle = AlertThrottle::new(Duration::from_secs(60));
    let t0 = Instant::now();

    assert!(throttle.admit_scoped(AlertCategory::System, 4, t0));
    assert!(throttle.admit_scoped(AlertCategory::System, 5, t0 + Duration::from_secs(1)));
    assert!(!throttle.admit_scoped(AlertCategory::System, 4, t0 + Duration::from_secs(30)));
    assert_eq!(
        throttle.last_fired(AlertCategory::System),
        Some(t0 + Duration::from_secs(1))
    );

    throttle.reset(AlertCategory::System);
    assert!(throttle.admit_scoped(AlertCategory::System, 4, t0 + Duration::from_secs(31)));
}

#[test]
fn test_throttle_concurrent_admission() {
    let throttle = Arc::new(AlertThrottle::new(Duration::from_secs(60)));
    let now = Instant::now();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let throttle = Arc::clone(&throttle);
            thread::spawn(move || throttle.admit(AlertCategory::DangerHigh, now))
        })
        .collect();

    let admitted = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|admitted| *admitted)
        .count();
    assert_eq!(admitted, 1);
}

#[test]
fn test_delivery_status_from_counts() {
    assert_eq!(DeliveryStatus::from_counts(0, 0), DeliveryStatus::NoRecipients);
    assert_eq!(DeliveryStatus::from_counts(3, 3), DeliveryStatus::Sent);
    assert_eq!(DeliveryStatus::from_counts(3, 1), DeliveryStatus::Partial);
    assert_eq!(DeliveryStatus::from_counts(2, 0), DeliveryStatus::Failed);
}

#[tokio::test]
async fn test_danger_alert_reaches_both_groups() {
    let h = harness(RecordingNotifier::new(), contacts());
    let mut events = h.bus.subscribe();

    let request = AlertRequest::danger(3, &entry("tiger", DangerTier::High, 840), 15);
    let alert = h.dispatcher.fire(request, Instant::now()).await.unwrap();

    assert_eq!(alert.category, AlertCategory::DangerHigh);
    assert_eq!(alert.delivery, DeliveryStatus::Sent);
    assert!(alert.message.contains("tiger"));
    assert!(alert.message.contains("Camera 3"));

    let recipients = h.notifier.recipients();
    for expected in ["+1000", "owner@farm.local", "+9000", "ranger@forest.gov"] {
        assert!(recipients.contains(&expected.to_string()), "{expected}");
    }

    let authority_sms = h
        .notifier
        .sent()
        .into_iter()
        .find_map(|message| match message {
            SentMessage::Sms { number, text } if number == "+9000" => Some(text),
            _ => None,
        })
        .unwrap();
    assert!(authority_sms.contains("Owner contact: +1000"));

    assert_eq!(h.store.list_recent_alerts(10).await.len(), 1);
    match events.try_recv().unwrap() {
        WildwatchEvent::AlertFired { alert: published } => assert_eq!(published.id, alert.id),
        other => panic!("unexpected event: {}", other.description()),
    }
}

#[tokio::test]
async fn test_proximity_alert_is_owner_only() {
    let h = harness(RecordingNotifier::new(), contacts());

    let request = AlertRequest::proximity(1, &entry("person", DangerTier::Human, 10));
    let alert = h.dispatcher.fire(request, Instant::now()).await.unwrap();

    assert_eq!(alert.recipients, vec!["+1000".to_string()]);
    assert_eq!(h.notifier.recipients(), vec!["+1000".to_string()]);
    assert!(alert.message.starts_with("SECURITY ALERT!"));
}

#[tokio::test]
async fn test_throttled_alert_is_not_sent_or_recorded() {
    let h = harness(RecordingNotifier::new(), contacts());
    let now = Instant::now();

    let request = AlertRequest::medium(1, &entry("deer", DangerTier::Medium, 40));
    assert!(h.dispatcher.fire(request.clone(), now).await.is_some());
    assert!(h
        .dispatcher
        .fire(request, now + Duration::from_secs(5))
        .await
        .is_none());

    assert_eq!(h.notifier.sent().len(), 1);
    assert_eq!(h.store.list_recent_alerts(10).await.len(), 1);
}

#[tokio::test]
async fn test_failed_delivery_is_still_recorded() {
    let h = harness(RecordingNotifier::failing_for(["+1000"]), contacts());

    let alert = h
        .dispatcher
        .fire(AlertRequest::system(Some(2), "camera feed lost"), Instant::now())
        .await
        .unwrap();

    assert_eq!(alert.delivery, DeliveryStatus::Failed);
    assert_eq!(alert.message.split(" [").next(), Some("SYSTEM ALERT (Camera 2): camera feed lost"));
    assert_eq!(h.store.list_recent_alerts(1).await[0].id, alert.id);
}

#[tokio::test]
async fn test_alert_without_recipients() {
    let h = harness(RecordingNotifier::new(), ContactsConfig::default());

    let alert = h
        .dispatcher
        .fire(AlertRequest::system(None, "system stopped"), Instant::now())
        .await
        .unwrap();

    assert_eq!(alert.delivery, DeliveryStatus::NoRecipients);
    assert!(alert.recipients.is_empty());
    assert!(h.notifier.sent().is_empty());
}

#[test]
fn test_category_names() {
    assert_eq!(AlertCategory::DangerHigh.as_str(), "danger_high");
    assert_eq!(
        serde_json::to_string(&AlertCategory::MediumDanger).unwrap(),
        "\"medium_danger\""
    );
    assert_eq!(
        AlertCategory::DangerHigh.audience(),
        &[StakeholderGroup::Owner, StakeholderGroup::Authority]
    );
}

#[tokio::test]
async fn test_system_alerts_throttled_per_camera() {
    let h = harness(RecordingNotifier::new(), contacts());
    let now = Instant::now();

    let lost = |id| AlertRequest::system(Some(id), "camera feed lost");
    assert!(h.dispatcher.fire(lost(4), now).await.is_some());
    assert!(h.dispatcher.fire(lost(5), now).await.is_some());
    assert!(h
        .dispatcher
        .fire(lost(4), now + Duration::from_secs(10))
        .await
        .is_none());

    // Service-wide notices bypass the cooldown
    for _ in 0..2 {
        assert!(h
            .dispatcher
            .fire(AlertRequest::system(None, "system stopped"), now)
            .await
            .is_some());
    }

    assert_eq!(h.store.list_recent_alerts(10).await.len(), 4);
}
