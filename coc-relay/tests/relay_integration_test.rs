//! Integration tests for the alert relay.
//!
//! Drives the relay, the resolution engine and the dispatcher end to end
//! against an in-memory transport.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use coc_relay::{
    build_router, CallbackQuery, ChatId, ChatTransport, CorrelationTable, Dispatcher, Feed,
    FeedEvent, IncomingMessage, Keyboard, MessageId, MetricsState, Relay, RelayOutcome,
    ResolutionEngine, ResolutionKind, ResolveError, ResolveStage, Statistics, TransportError,
    TransportResult, TriggerMatcher, Update, UserId, UserIdentity,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_test::{assert_err, assert_ok};
use tower::ServiceExt;

const SOURCE_CHAT: ChatId = -1001001;
const TARGET_CHAT: ChatId = -1002002;
const IGNORED_SENDER: UserId = 555;
const OPERATOR: UserId = 42;

// ============================================================================
// Mock transport
// ============================================================================

#[derive(Debug, Clone)]
struct Sent {
    chat_id: ChatId,
    message_id: MessageId,
    text: String,
    keyboard: Keyboard,
}

#[derive(Debug, Clone)]
struct Edited {
    chat_id: ChatId,
    message_id: MessageId,
    text: String,
}

#[derive(Debug, Clone)]
struct Replied {
    chat_id: ChatId,
    reply_to: MessageId,
    text: String,
}

#[derive(Default)]
struct Failures {
    send: bool,
    edit: bool,
    reply: bool,
}

struct MockTransport {
    next_id: AtomicI64,
    sent: Mutex<Vec<Sent>>,
    edited: Mutex<Vec<Edited>>,
    replied: Mutex<Vec<Replied>>,
    acknowledged: Mutex<Vec<String>>,
    discarded: Mutex<Vec<(ChatId, MessageId)>>,
    texts: Mutex<HashMap<(ChatId, MessageId), String>>,
    users: Mutex<HashMap<UserId, UserIdentity>>,
    failures: Mutex<Failures>,
}

impl MockTransport {
    fn new(first_id: MessageId) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(first_id),
            sent: Mutex::new(Vec::new()),
            edited: Mutex::new(Vec::new()),
            replied: Mutex::new(Vec::new()),
            acknowledged: Mutex::new(Vec::new()),
            discarded: Mutex::new(Vec::new()),
            texts: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
            failures: Mutex::new(Failures::default()),
        })
    }

    fn with_user(self: Arc<Self>, user: UserIdentity) -> Arc<Self> {
        self.users.lock().unwrap().insert(user.id, user);
        self
    }

    fn fail_send(&self) {
        self.failures.lock().unwrap().send = true;
    }

    fn fail_edit(&self) {
        self.failures.lock().unwrap().edit = true;
    }

    fn fail_reply(&self) {
        self.failures.lock().unwrap().reply = true;
    }

    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn edited(&self) -> Vec<Edited> {
        self.edited.lock().unwrap().clone()
    }

    fn replied(&self) -> Vec<Replied> {
        self.replied.lock().unwrap().clone()
    }

    fn api_error(method: &str) -> TransportError {
        TransportError::Api {
            method: method.into(),
            description: "Bad Request: chat not found".into(),
        }
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn send_with_buttons(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: &Keyboard,
    ) -> TransportResult<MessageId> {
        if self.failures.lock().unwrap().send {
            return Err(Self::api_error("sendMessage"));
        }
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.texts
            .lock()
            .unwrap()
            .insert((chat_id, message_id), text.to_string());
        self.sent.lock().unwrap().push(Sent {
            chat_id,
            message_id,
            text: text.to_string(),
            keyboard: keyboard.clone(),
        });
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> TransportResult<()> {
        if self.failures.lock().unwrap().edit {
            return Err(Self::api_error("editMessageText"));
        }
        self.edited.lock().unwrap().push(Edited {
            chat_id,
            message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn reply(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        text: &str,
    ) -> TransportResult<MessageId> {
        if self.failures.lock().unwrap().reply {
            return Err(Self::api_error("sendMessage"));
        }
        self.replied.lock().unwrap().push(Replied {
            chat_id,
            reply_to,
            text: text.to_string(),
        });
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn fetch_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> TransportResult<String> {
        self.texts
            .lock()
            .unwrap()
            .get(&(chat_id, message_id))
            .cloned()
            .ok_or(TransportError::MessageUnavailable {
                chat_id,
                message_id,
            })
    }

    async fn resolve_user(&self, user_id: UserId) -> TransportResult<UserIdentity> {
        self.users
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .ok_or(TransportError::UserUnavailable(user_id))
    }

    async fn discard_message(&self, chat_id: ChatId, message_id: MessageId) {
        self.discarded.lock().unwrap().push((chat_id, message_id));
    }

    async fn acknowledge_callback(&self, callback_id: &str) -> TransportResult<()> {
        self.acknowledged
            .lock()
            .unwrap()
            .push(callback_id.to_string());
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    triage: Arc<MockTransport>,
    source: Arc<MockTransport>,
    correlation: Arc<CorrelationTable>,
    stats: Arc<Statistics>,
    relay: Arc<Relay>,
    engine: Arc<ResolutionEngine>,
    dispatcher: Arc<Dispatcher>,
}

fn operator() -> UserIdentity {
    UserIdentity {
        id: OPERATOR,
        first_name: "Ivan".into(),
        last_name: Some("Petrov".into()),
        username: Some("ipetrov".into()),
    }
}

fn harness_with(triggers: &[&str]) -> Harness {
    let triage = MockTransport::new(9000).with_user(operator());
    let source = MockTransport::new(100);
    let correlation = Arc::new(CorrelationTable::new());
    let stats = Arc::new(Statistics::new(chrono_tz::UTC).unwrap());

    let relay = Arc::new(Relay::new(
        TriggerMatcher::new(triggers.iter().copied(), IGNORED_SENDER),
        triage.clone(),
        TARGET_CHAT,
        correlation.clone(),
        stats.clone(),
    ));
    let engine = Arc::new(ResolutionEngine::new(
        correlation.clone(),
        stats.clone(),
        triage.clone(),
        source.clone(),
        SOURCE_CHAT,
        TARGET_CHAT,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        relay.clone(),
        engine.clone(),
        stats.clone(),
        source.clone(),
        triage.clone(),
        SOURCE_CHAT,
        TARGET_CHAT,
    ));

    Harness {
        triage,
        source,
        correlation,
        stats,
        relay,
        engine,
        dispatcher,
    }
}

fn harness() -> Harness {
    harness_with(&["cpu", "disk"])
}

fn alert(message_id: MessageId, sender_id: UserId, text: &str) -> IncomingMessage {
    IncomingMessage {
        chat_id: SOURCE_CHAT,
        message_id,
        sender_id: Some(sender_id),
        text: Some(text.into()),
    }
}

fn press(relayed_id: MessageId, data: &str) -> CallbackQuery {
    CallbackQuery {
        id: format!("cb-{relayed_id}-{data}"),
        data: data.into(),
        chat_id: TARGET_CHAT,
        message_id: relayed_id,
        actor_id: OPERATOR,
    }
}

async fn relay_one(h: &Harness, source_id: MessageId, text: &str) -> MessageId {
    match h.relay.on_inbound_message(&alert(source_id, 7, text)).await {
        Ok(RelayOutcome::Relayed { relayed_id, .. }) => relayed_id,
        other => panic!("expected relay, got {other:?}"),
    }
}

// ============================================================================
// Relay
// ============================================================================

#[tokio::test]
async fn test_alert_relayed_with_buttons_and_link() {
    let h = harness();

    let outcome = assert_ok!(
        h.relay
            .on_inbound_message(&alert(77, 7, "prod-db CPU 95%"))
            .await
    );

    assert_eq!(
        outcome,
        RelayOutcome::Relayed {
            source_id: 77,
            relayed_id: 9000
        }
    );

    let sent = h.triage.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].chat_id, TARGET_CHAT);
    assert_eq!(sent[0].message_id, 9000);
    assert_eq!(
        sent[0].text,
        "prod-db CPU 95%\n\nСсылка: https://t.me/c/1001001/77"
    );

    let tags: Vec<&str> = sent[0]
        .keyboard
        .iter()
        .flatten()
        .map(|b| b.callback_data.as_str())
        .collect();
    assert_eq!(
        tags,
        vec![
            "alert_received",
            "alert_flapping",
            "alert_not_critical",
            "alert_other"
        ]
    );

    assert_eq!(h.stats.alerts_total(), 1);
    assert!(h.stats.snapshot().last_alert_at.is_some());
    assert_eq!(h.correlation.pending(), 1);
    assert!(h.source.replied().is_empty());
}

#[tokio::test]
async fn test_non_matching_message_ignored() {
    let h = harness();

    let outcome = h
        .relay
        .on_inbound_message(&alert(78, 7, "deploy finished"))
        .await
        .unwrap();

    assert_eq!(outcome, RelayOutcome::Ignored);
    assert!(h.triage.sent().is_empty());
    assert_eq!(h.stats.alerts_total(), 0);
    assert_eq!(h.correlation.pending(), 0);
}

#[tokio::test]
async fn test_ignored_sender_never_relayed() {
    let h = harness();

    let outcome = h
        .relay
        .on_inbound_message(&alert(79, IGNORED_SENDER, "CPU critical"))
        .await
        .unwrap();

    assert_eq!(outcome, RelayOutcome::Ignored);
    assert!(h.triage.sent().is_empty());
    assert_eq!(h.stats.alerts_total(), 0);
}

#[tokio::test]
async fn test_empty_trigger_set_relays_nothing() {
    let h = harness_with(&[]);

    let outcome = h
        .relay
        .on_inbound_message(&alert(80, 7, "CPU critical"))
        .await
        .unwrap();

    assert_eq!(outcome, RelayOutcome::Ignored);
    assert!(h.triage.sent().is_empty());
}

#[tokio::test]
async fn test_send_failure_counts_error_and_skips_correlation() {
    let h = harness();
    h.triage.fail_send();

    assert_err!(
        h.relay
            .on_inbound_message(&alert(81, 7, "disk full on db-1"))
            .await
    );
    let snap = h.stats.snapshot();
    assert_eq!(snap.alerts_total, 1);
    assert_eq!(snap.errors("relay"), 1);
    assert_eq!(h.correlation.pending(), 0);
}

// ============================================================================
// Resolution
// ============================================================================

#[tokio::test]
async fn test_accept_edits_relay_and_acknowledges_source() {
    let h = harness();
    let relayed_id = relay_one(&h, 77, "prod-db CPU 95%").await;

    let resolution = assert_ok!(h.engine.resolve(&press(relayed_id, "alert_received")).await);

    assert_eq!(resolution.kind, ResolutionKind::Received);
    assert_eq!(resolution.source_id, 77);
    assert_eq!(resolution.responsible, operator());

    let edited = h.triage.edited();
    assert_eq!(edited.len(), 1);
    assert_eq!(edited[0].chat_id, TARGET_CHAT);
    assert_eq!(edited[0].message_id, relayed_id);
    assert_eq!(
        edited[0].text,
        "<s>prod-db CPU 95%\n\nСсылка: https://t.me/c/1001001/77</s>\n\n\
         <b>Алерт принят в работу, отправлено сообщение в COC!</b>\n\n\
         Ответственный - Ivan Petrov (@ipetrov)"
    );

    let replied = h.source.replied();
    assert_eq!(replied.len(), 1);
    assert_eq!(replied[0].chat_id, SOURCE_CHAT);
    assert_eq!(replied[0].reply_to, 77);
    assert!(ResolutionKind::Received
        .phrases()
        .contains(&replied[0].text.as_str()));
    assert_eq!(resolution.acknowledgement, Some(replied[0].text.as_str()));

    let snap = h.stats.snapshot();
    assert_eq!(snap.resolved(ResolutionKind::Received), 1);
    assert_eq!(h.correlation.pending(), 0);

    let body = h.stats.encode().unwrap();
    assert!(body.contains(
        r#"alerts_handled_total{resolution="received",responsible="ipetrov"} 1"#
    ));
}

#[tokio::test]
async fn test_flapping_and_not_critical_use_their_phrases() {
    let h = harness();
    let flap = relay_one(&h, 10, "CPU spike").await;
    let minor = relay_one(&h, 11, "disk 81%").await;

    h.engine
        .resolve(&press(flap, "alert_flapping"))
        .await
        .unwrap();
    h.engine
        .resolve(&press(minor, "alert_not_critical"))
        .await
        .unwrap();

    let replied = h.source.replied();
    assert_eq!(replied.len(), 2);
    assert_eq!(replied[0].reply_to, 10);
    assert!(ResolutionKind::Flapping
        .phrases()
        .contains(&replied[0].text.as_str()));
    assert_eq!(replied[1].reply_to, 11);
    assert!(ResolutionKind::NotCritical
        .phrases()
        .contains(&replied[1].text.as_str()));

    let edited = h.triage.edited();
    assert!(edited[0]
        .text
        .contains("Алерт принят как флапающий, отправлено сообщение в COC!"));
    assert!(edited[1]
        .text
        .contains("Алерт принят как некритический, отправлено сообщение в COC!"));

    let snap = h.stats.snapshot();
    assert_eq!(snap.resolved(ResolutionKind::Flapping), 1);
    assert_eq!(snap.resolved(ResolutionKind::NotCritical), 1);
}

#[tokio::test]
async fn test_other_edits_without_source_reply() {
    let h = harness();
    let relayed_id = relay_one(&h, 12, "CPU 99%").await;

    let resolution = h
        .engine
        .resolve(&press(relayed_id, "alert_other"))
        .await
        .unwrap();

    assert_eq!(resolution.acknowledgement, None);
    assert!(h.source.replied().is_empty());

    let edited = h.triage.edited();
    assert_eq!(edited.len(), 1);
    assert!(edited[0]
        .text
        .contains("<b>Алерт проигнорирован или обработан вручную.</b>"));
    assert_eq!(
        h.stats.snapshot().resolved(ResolutionKind::Other),
        1
    );
}

#[tokio::test]
async fn test_legacy_received_tag_accepted() {
    let h = harness();
    let relayed_id = relay_one(&h, 13, "CPU 99%").await;

    let resolution = h
        .engine
        .resolve(&press(relayed_id, "alert_recieved"))
        .await
        .unwrap();

    assert_eq!(resolution.kind, ResolutionKind::Received);
}

#[tokio::test]
async fn test_second_press_is_stale() {
    let h = harness();
    let relayed_id = relay_one(&h, 14, "CPU 99%").await;

    h.engine
        .resolve(&press(relayed_id, "alert_received"))
        .await
        .unwrap();
    let before = h.stats.snapshot();

    let err = assert_err!(h.engine.resolve(&press(relayed_id, "alert_flapping")).await);

    assert!(matches!(err, ResolveError::StaleCorrelation(id) if id == relayed_id));
    assert_eq!(
        *h.triage.discarded.lock().unwrap(),
        vec![(TARGET_CHAT, relayed_id), (TARGET_CHAT, relayed_id)]
    );
    assert_eq!(h.triage.edited().len(), 1);
    assert_eq!(h.source.replied().len(), 1);
    assert_eq!(h.stats.snapshot(), before);
}

#[tokio::test]
async fn test_concurrent_presses_resolve_once() {
    let h = harness();
    let relayed_id = relay_one(&h, 15, "CPU 99%").await;

    let press_a = press(relayed_id, "alert_received");
    let press_b = press(relayed_id, "alert_other");
    let (a, b) = tokio::join!(h.engine.resolve(&press_a), h.engine.resolve(&press_b),);

    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    assert_eq!(h.triage.edited().len(), 1);
    let snap = h.stats.snapshot();
    let resolved: u64 = snap.resolved.values().sum();
    assert_eq!(resolved, 1);
}

#[tokio::test]
async fn test_unknown_action_leaves_entry() {
    let h = harness();
    let relayed_id = relay_one(&h, 16, "CPU 99%").await;

    let err = h
        .engine
        .resolve(&press(relayed_id, "alert_snooze"))
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::UnknownAction(ref tag) if tag == "alert_snooze"));
    assert_eq!(h.correlation.pending(), 1);
    assert!(h.triage.edited().is_empty());
    assert!(h.stats.snapshot().errors.is_empty());
}

#[tokio::test]
async fn test_edit_failure_counts_error_and_consumes_entry() {
    let h = harness();
    let relayed_id = relay_one(&h, 17, "CPU 99%").await;
    h.triage.fail_edit();

    let err = h
        .engine
        .resolve(&press(relayed_id, "alert_received"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ResolveError::Transport {
            stage: ResolveStage::Edit,
            ..
        }
    ));
    let snap = h.stats.snapshot();
    assert_eq!(snap.errors("resolution"), 1);
    assert_eq!(snap.resolved(ResolutionKind::Received), 0);
    assert_eq!(h.correlation.pending(), 0);

    // The source acknowledgement is still posted
    let replied = h.source.replied();
    assert_eq!(replied.len(), 1);
    assert_eq!(replied[0].reply_to, 17);

    let again = h
        .engine
        .resolve(&press(relayed_id, "alert_received"))
        .await
        .unwrap_err();
    assert!(matches!(again, ResolveError::StaleCorrelation(_)));
}

#[tokio::test]
async fn test_reply_failure_counts_error() {
    let h = harness();
    let relayed_id = relay_one(&h, 18, "CPU 99%").await;
    h.source.fail_reply();

    let err = h
        .engine
        .resolve(&press(relayed_id, "alert_not_critical"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ResolveError::Transport {
            stage: ResolveStage::Reply,
            ..
        }
    ));
    assert_eq!(h.stats.snapshot().errors("resolution"), 1);
    assert_eq!(h.correlation.pending(), 0);

    // The relay is still edited
    let edited = h.triage.edited();
    assert_eq!(edited.len(), 1);
    assert_eq!(edited[0].message_id, relayed_id);
    assert!(edited[0]
        .text
        .contains("Алерт принят как некритический, отправлено сообщение в COC!"));
}

#[tokio::test]
async fn test_unresolvable_operator_fails_at_identity() {
    let h = harness();
    let relayed_id = relay_one(&h, 19, "CPU 99%").await;

    let mut query = press(relayed_id, "alert_received");
    query.actor_id = 404;

    let err = h.engine.resolve(&query).await.unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Transport {
            stage: ResolveStage::Identity,
            ..
        }
    ));
    assert!(h.triage.edited().is_empty());
    assert_eq!(h.stats.snapshot().errors("resolution"), 1);
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_dispatcher_routes_alert_then_callback() {
    let h = harness();

    h.dispatcher
        .handle(FeedEvent {
            feed: Feed::Source,
            update: Update::Message(alert(20, 7, "CPU 99% on api-3")),
        })
        .await;

    let sent = h.triage.sent();
    assert_eq!(sent.len(), 1);
    let relayed_id = sent[0].message_id;

    let query = press(relayed_id, "alert_received");
    h.dispatcher
        .handle(FeedEvent {
            feed: Feed::Triage,
            update: Update::Callback(query.clone()),
        })
        .await;

    assert_eq!(*h.triage.acknowledged.lock().unwrap(), vec![query.id]);
    assert_eq!(h.triage.edited().len(), 1);
    assert_eq!(h.source.replied().len(), 1);
    assert_eq!(h.stats.snapshot().resolved(ResolutionKind::Received), 1);
}

#[tokio::test]
async fn test_dispatcher_ignores_triage_chat_messages() {
    let h = harness();

    h.dispatcher
        .handle(FeedEvent {
            feed: Feed::Triage,
            update: Update::Message(IncomingMessage {
                chat_id: TARGET_CHAT,
                message_id: 21,
                sender_id: Some(7),
                text: Some("CPU 99%".into()),
            }),
        })
        .await;

    assert!(h.triage.sent().is_empty());
    assert_eq!(h.stats.alerts_total(), 0);
}

#[tokio::test]
async fn test_dispatcher_ignores_presses_outside_target_chat() {
    let h = harness();
    let relayed_id = relay_one(&h, 29, "CPU 99%").await;

    let mut query = press(relayed_id, "alert_received");
    query.chat_id = -1003003;
    h.dispatcher
        .handle(FeedEvent {
            feed: Feed::Triage,
            update: Update::Callback(query.clone()),
        })
        .await;

    assert_eq!(h.correlation.pending(), 1);
    assert!(h.triage.edited().is_empty());
    assert!(h.source.replied().is_empty());
    assert_eq!(*h.triage.acknowledged.lock().unwrap(), vec![query.id]);
    assert_eq!(
        *h.triage.discarded.lock().unwrap(),
        vec![(-1003003, relayed_id)]
    );
}

#[tokio::test]
async fn test_stats_command_replies_on_its_feed() {
    let h = harness();
    let relayed_id = relay_one(&h, 22, "CPU 99%").await;
    h.engine
        .resolve(&press(relayed_id, "alert_flapping"))
        .await
        .unwrap();

    h.dispatcher
        .handle(FeedEvent {
            feed: Feed::Triage,
            update: Update::Message(IncomingMessage {
                chat_id: TARGET_CHAT,
                message_id: 23,
                sender_id: Some(OPERATOR),
                text: Some("/stats".into()),
            }),
        })
        .await;

    let replied = h.triage.replied();
    assert_eq!(replied.len(), 1);
    assert_eq!(replied[0].chat_id, TARGET_CHAT);
    assert_eq!(replied[0].reply_to, 23);
    assert!(replied[0].text.starts_with("<b>DevPlatform COC Alerts Bot</b>"));
    assert!(replied[0].text.contains("Всего получено алертов - 1."));
    assert!(replied[0].text.contains("Флапы - 1"));
}

#[tokio::test]
async fn test_stats_reply_failure_counted() {
    let h = harness();
    h.source.fail_reply();

    h.dispatcher
        .handle(FeedEvent {
            feed: Feed::Source,
            update: Update::Message(alert(24, 7, "/stats")),
        })
        .await;

    assert_eq!(h.stats.snapshot().errors("stats"), 1);
    assert!(h.triage.sent().is_empty());
}

#[tokio::test]
async fn test_spawned_dispatcher_drains_channel() {
    let h = harness();
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let handle = Dispatcher::spawn(h.dispatcher.clone(), rx);

    tx.send(FeedEvent {
        feed: Feed::Source,
        update: Update::Message(alert(25, 7, "disk 97%")),
    })
    .await
    .unwrap();
    drop(tx);
    handle.await.unwrap();

    for _ in 0..50 {
        if h.correlation.pending() == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(h.correlation.pending(), 1);
    assert_eq!(h.triage.sent().len(), 1);
}

// ============================================================================
// Metrics endpoint
// ============================================================================

fn metrics_app(h: &Harness) -> axum::Router {
    build_router(Arc::new(MetricsState {
        stats: h.stats.clone(),
        correlation: h.correlation.clone(),
    }))
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_counters() {
    let h = harness();
    let relayed_id = relay_one(&h, 26, "CPU 99%").await;
    h.engine
        .resolve(&press(relayed_id, "alert_other"))
        .await
        .unwrap();

    let response = metrics_app(&h)
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("alerts_total 1"));
    assert!(text.contains(
        r#"alerts_handled_total{resolution="other",responsible="ipetrov"} 1"#
    ));
    assert!(text.contains("app_start_timestamp_seconds"));
}

#[tokio::test]
async fn test_health_reports_pending_correlations() {
    let h = harness();
    relay_one(&h, 27, "CPU 99%").await;
    relay_one(&h, 28, "disk 99%").await;

    let response = metrics_app(&h)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "coc-relay");
    assert_eq!(json["pending_correlations"], 2);
}
