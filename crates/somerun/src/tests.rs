//! Tests for the provider, publisher and consumer against a recording transport.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use somepack::Payload;
use somepack::text;
use somerpc::EventGroupId;
use somerpc::EventId;
use somerpc::Message;
use somerpc::MessageKind;
use somerpc::MethodId;
use somerpc::ReturnCode;
use somerpc::ServiceAddress;

use crate::config;
use crate::config::Config;
use crate::consumer::Consumer;
use crate::consumer::SubscriptionState;
use crate::correlator::CorrelationMode;
use crate::correlator::Error;
use crate::methods;
use crate::provider::EventOffer;
use crate::provider::Provider;
use crate::publisher::PublishedMetric;
use crate::publisher::Publisher;
use crate::telemetry::Metric;
use crate::telemetry::ScriptedSource;
use crate::transport;
use crate::transport::Inbound;
use crate::transport::Transport;

const ADDR: ServiceAddress = ServiceAddress::new(0x1234, 0x5678);

#[derive(Clone, Debug, PartialEq, Eq)]
enum Call {
    Send(Message),
    Notify(EventId, String),
    Subscribe(EventGroupId),
    Unsubscribe(EventGroupId),
    Release,
    OfferEvent(EventId, EventGroupId),
    OfferService,
    StopOffer,
}

/// Records every outbound call. Optionally refuses notifications for one event.
#[derive(Default)]
struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    refuse: Option<EventId>,
}

impl RecordingTransport {
    fn refusing(event: EventId) -> Self {
        Self {
            refuse: Some(event),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn sent(&self) -> Vec<Message> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn notified(&self) -> Vec<(EventId, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Notify(event, text) => Some((event, text)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, message: Message) -> transport::Result<()> {
        self.record(Call::Send(message));
        Ok(())
    }

    async fn notify(&self, address: ServiceAddress, event: EventId, payload: Payload) -> transport::Result<()> {
        if self.refuse == Some(event) {
            return Err(transport::Error::EventNotOffered { address, event });
        }
        self.record(Call::Notify(event, payload.to_text_lossy().into_owned()));
        Ok(())
    }

    async fn offer_service(&self, _address: ServiceAddress) -> transport::Result<()> {
        self.record(Call::OfferService);
        Ok(())
    }

    async fn stop_offer_service(&self, _address: ServiceAddress) -> transport::Result<()> {
        self.record(Call::StopOffer);
        Ok(())
    }

    async fn offer_event(&self, _address: ServiceAddress, event: EventId, group: EventGroupId) -> transport::Result<()> {
        self.record(Call::OfferEvent(event, group));
        Ok(())
    }

    async fn request_service(&self, _address: ServiceAddress) -> transport::Result<()> {
        Ok(())
    }

    async fn release_service(&self, _address: ServiceAddress) -> transport::Result<()> {
        self.record(Call::Release);
        Ok(())
    }

    async fn subscribe(&self, _address: ServiceAddress, group: EventGroupId) -> transport::Result<()> {
        self.record(Call::Subscribe(group));
        Ok(())
    }

    async fn unsubscribe(&self, _address: ServiceAddress, group: EventGroupId) -> transport::Result<()> {
        self.record(Call::Unsubscribe(group));
        Ok(())
    }

    async fn recv(&self) -> transport::Result<Option<Inbound>> {
        std::future::pending().await
    }
}

fn scripted() -> Arc<ScriptedSource> {
    let source = Arc::new(ScriptedSource::new());
    source.push_cpu([100, 0, 50, 800, 50, 0, 0, 0]);
    source.push_cpu([120, 0, 60, 810, 60, 0, 0, 0]);
    source.set_meminfo(Some("MemTotal: 16000000 kB\nMemAvailable: 12000000 kB\n"));
    source
}

fn provider(transport: Arc<RecordingTransport>) -> Provider {
    let table = methods::standard(scripted()).unwrap();
    let events = vec![
        EventOffer { event: methods::EVENT_CPU, group: methods::GROUP_CPU },
        EventOffer { event: methods::EVENT_MEMORY, group: methods::GROUP_MEMORY },
    ];
    Provider::new("server", ADDR, transport, table, events)
}

fn request(method: u16, payload: Option<&str>, token: u64) -> Message {
    Message::request(ADDR, MethodId(method), payload.map(Payload::from))
        .with_client(somerpc::ClientId(7))
        .with_token(somerpc::CorrelationToken(token))
}

// --- Provider ---

#[tokio::test]
async fn test_provider_offers_events_before_service() {
    let transport = Arc::new(RecordingTransport::default());
    let provider = provider(transport.clone());
    provider.offer().await.unwrap();

    assert_eq!(transport.calls(), vec![
        Call::OfferEvent(methods::EVENT_CPU, methods::GROUP_CPU),
        Call::OfferEvent(methods::EVENT_MEMORY, methods::GROUP_MEMORY),
        Call::OfferService,
    ]);
}

#[tokio::test]
async fn test_every_request_gets_exactly_one_response() {
    let transport = Arc::new(RecordingTransport::default());
    let provider = provider(transport.clone());

    let requests = vec![
        request(0x42, Some("Hello from client!"), 1),
        request(0x42, None, 2),
        request(0x44, None, 3),
        request(0x45, Some(""), 4),
        request(0x99, None, 5),
        request(0x43, Some("not a method"), 6),
    ];
    for req in &requests {
        provider.on_request_received(req.clone()).await.unwrap();
    }

    let sent = transport.sent();
    assert_eq!(sent.len(), requests.len());
    assert_eq!(provider.responses_sent(), requests.len() as u64);
    for (req, resp) in requests.iter().zip(&sent) {
        assert_eq!(resp.kind, MessageKind::Response);
        assert_eq!(resp.method, req.method);
        assert_eq!(resp.client, req.client);
        assert_eq!(resp.token, req.token);
    }
}

#[tokio::test]
async fn test_response_payload_is_handler_bytes() {
    let transport = Arc::new(RecordingTransport::default());
    let provider = provider(transport.clone());

    let hello = provider.on_request_received(request(0x42, Some("hi"), 1)).await.unwrap();
    assert_eq!(hello.payload, Some(Payload::from(methods::HELLO_REPLY)));
    assert_eq!(hello.return_code, ReturnCode::Ok);

    let unknown = provider.on_request_received(request(0x99, None, 2)).await.unwrap();
    assert_eq!(unknown.payload, Some(Payload::from(text::UNKNOWN_METHOD)));
    assert_eq!(unknown.return_code, ReturnCode::UnknownMethod);

    let memory = provider.on_request_received(request(0x45, None, 3)).await.unwrap();
    assert_eq!(
        memory.payload.unwrap().to_text(),
        Ok("Mem Used: 4000000 kB / Total: 16000000 kB")
    );
}

#[tokio::test]
async fn test_failed_handler_is_answered() {
    let transport = Arc::new(RecordingTransport::default());
    let mut table = somerpc::MethodTable::new();
    table
        .register(MethodId(0x50), |_: &Payload| Err(somerpc::HandlerError::from("disk on fire")))
        .unwrap();
    let provider = Provider::new("server", ADDR, transport.clone(), table, vec![]);

    let response = provider.on_request_received(request(0x50, None, 1)).await.unwrap();
    assert_eq!(response.return_code, ReturnCode::NotOk);
    assert_eq!(response.payload, Some(Payload::from("Error: disk on fire")));
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn test_provider_rejects_non_requests() {
    let transport = Arc::new(RecordingTransport::default());
    let provider = provider(transport.clone());

    let note = Message::notification(ADDR, methods::EVENT_CPU, Payload::from("x"));
    assert!(provider.on_request_received(note).await.is_err());
    assert!(transport.sent().is_empty());
}

// --- Publisher ---

fn publisher(transport: Arc<RecordingTransport>) -> Publisher {
    let metrics = vec![
        PublishedMetric { metric: Metric::Cpu, event: methods::EVENT_CPU, group: methods::GROUP_CPU },
        PublishedMetric { metric: Metric::Memory, event: methods::EVENT_MEMORY, group: methods::GROUP_MEMORY },
    ];
    Publisher::new(ADDR, transport, scripted(), metrics, Duration::from_secs(2)).unwrap()
}

#[test]
fn test_publisher_rejects_zero_interval() {
    let transport = Arc::new(RecordingTransport::default());
    let built = Publisher::new(ADDR, transport.clone(), scripted(), Vec::new(), Duration::ZERO);
    assert!(matches!(built, Err(config::Error::Invalid(_))));

    let mut config = Config::default();
    config.publisher.interval_ms = 0;
    let built = Publisher::from_config(&config, transport, scripted());
    assert!(matches!(built, Err(config::Error::Invalid(_))));
}

#[tokio::test]
async fn test_tick_emits_in_configured_order() {
    let transport = Arc::new(RecordingTransport::default());
    let mut publisher = publisher(transport.clone());

    assert_eq!(publisher.tick().await, 2);
    assert_eq!(publisher.tick().await, 2);

    assert_eq!(transport.notified(), vec![
        (methods::EVENT_CPU, "CPU Usage: 0.000000%".to_string()),
        (methods::EVENT_MEMORY, "Memory Usage: Mem Used: 4000000 kB / Total: 16000000 kB".to_string()),
        (methods::EVENT_CPU, "CPU Usage: 60.000000%".to_string()),
        (methods::EVENT_MEMORY, "Memory Usage: Mem Used: 4000000 kB / Total: 16000000 kB".to_string()),
    ]);
    assert_eq!(publisher.report().ticks, 2);
    assert_eq!(publisher.report().sent, 4);
}

#[tokio::test]
async fn test_failing_metric_does_not_block_others() {
    let transport = Arc::new(RecordingTransport::refusing(methods::EVENT_CPU));
    let mut publisher = publisher(transport.clone());

    for _ in 0..3 {
        assert_eq!(publisher.tick().await, 1);
    }
    let report = publisher.report();
    assert_eq!((report.ticks, report.sent, report.failed), (3, 3, 3));
    assert!(transport.notified().iter().all(|(event, _)| *event == methods::EVENT_MEMORY));
}

#[tokio::test]
async fn test_degraded_memory_is_still_published() {
    let transport = Arc::new(RecordingTransport::default());
    let source = scripted();
    source.set_meminfo(None);
    let metrics = vec![
        PublishedMetric { metric: Metric::Memory, event: methods::EVENT_MEMORY, group: methods::GROUP_MEMORY },
        PublishedMetric { metric: Metric::Cpu, event: methods::EVENT_CPU, group: methods::GROUP_CPU },
    ];
    let mut publisher = Publisher::new(ADDR, transport.clone(), source, metrics, Duration::from_secs(2)).unwrap();

    publisher.tick().await;
    let notified = transport.notified();
    assert_eq!(notified.len(), 2);
    assert_eq!(notified[0].1, "Memory Usage: Error: Could not read scripted/meminfo");
    assert_eq!(notified[1].0, methods::EVENT_CPU);
}

#[tokio::test(start_paused = true)]
async fn test_publisher_stops_on_cancel() {
    let transport = Arc::new(RecordingTransport::default());
    let cancel = tokio_util::sync::CancellationToken::new();
    let handle = publisher(transport.clone()).spawn(cancel.clone());

    tokio::time::sleep(Duration::from_millis(4500)).await;
    cancel.cancel();
    let report = handle.await.unwrap();

    // ticks at 0s, 2s and 4s
    assert_eq!(report.ticks, 3);
    assert_eq!(transport.notified().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_initial_delay_postpones_first_tick() {
    let transport = Arc::new(RecordingTransport::default());
    let cancel = tokio_util::sync::CancellationToken::new();
    let handle = publisher(transport.clone())
        .with_initial_delay(Duration::from_millis(500))
        .spawn(cancel.clone());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(transport.notified().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.notified().len(), 2);

    cancel.cancel();
    assert_eq!(handle.await.unwrap().ticks, 1);
}

// --- Consumer ---

fn consumer(transport: Arc<RecordingTransport>) -> Consumer {
    Consumer::new("client", transport, CorrelationMode::Token, Duration::from_secs(5)).unwrap()
}

#[test]
fn test_consumer_rejects_zero_timeout() {
    let transport = Arc::new(RecordingTransport::default());
    let built = Consumer::new("client", transport.clone(), CorrelationMode::Token, Duration::ZERO);
    assert!(matches!(built, Err(config::Error::Invalid(_))));

    let mut config = Config::default();
    config.client.request_timeout_ms = 0;
    let built = Consumer::from_config("client", &config, transport.clone());
    assert!(matches!(built, Err(config::Error::Invalid(_))));

    assert!(Consumer::from_config("client", &Config::default(), transport).is_ok());
}

#[tokio::test]
async fn test_available_edge_subscribes_and_sends_initial_requests() {
    let transport = Arc::new(RecordingTransport::default());
    let consumer = consumer(transport.clone());
    consumer.subscribe_on_available(ADDR, EventGroupId(1));
    consumer.subscribe_on_available(ADDR, EventGroupId(2));
    consumer.request_on_available(ADDR, methods::METHOD_HELLO, Some(Payload::from("Hello from client!")));

    // nothing happens before the service shows up
    assert!(transport.calls().is_empty());
    assert_eq!(consumer.subscription_state(ADDR, EventGroupId(1)), Some(SubscriptionState::Pending));

    consumer.on_availability_changed(ADDR, true).await;
    consumer.on_availability_changed(ADDR, true).await;

    let calls = transport.calls();
    assert_eq!(calls.iter().filter(|c| matches!(c, Call::Subscribe(_))).count(), 2);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, methods::METHOD_HELLO);
    assert!(!sent[0].token.is_none());
    assert_eq!(consumer.subscription_state(ADDR, EventGroupId(2)), Some(SubscriptionState::Active));
}

#[tokio::test]
async fn test_unavailable_edge_marks_subscriptions_stale_and_fails_calls() {
    let transport = Arc::new(RecordingTransport::default());
    let consumer = consumer(transport.clone());
    consumer.subscribe_on_available(ADDR, EventGroupId(1));
    consumer.on_availability_changed(ADDR, true).await;

    let call = consumer.send_request(ADDR, methods::METHOD_CPU, None).await.unwrap();
    consumer.on_availability_changed(ADDR, false).await;

    assert_eq!(consumer.subscription_state(ADDR, EventGroupId(1)), Some(SubscriptionState::Stale));
    assert_eq!(call.wait().await, Err(Error::ServiceUnavailable(ADDR)));
    assert!(consumer.correlator().is_empty());

    // the next edge subscribes again
    consumer.on_availability_changed(ADDR, true).await;
    assert_eq!(consumer.subscription_state(ADDR, EventGroupId(1)), Some(SubscriptionState::Active));
    assert_eq!(
        transport.calls().iter().filter(|c| matches!(c, Call::Subscribe(_))).count(),
        2
    );
}

#[tokio::test]
async fn test_response_reaches_caller() {
    let transport = Arc::new(RecordingTransport::default());
    let consumer = consumer(transport.clone());

    let call = consumer.send_request(ADDR, methods::METHOD_HELLO, None).await.unwrap();
    let sent = transport.sent();
    assert_eq!(sent[0].token, call.token());

    consumer.on_response_received(sent[0].response(ReturnCode::Ok, Payload::from("Hello from server!")));
    let response = call.wait().await.unwrap();
    assert_eq!(response.payload, Some(Payload::from("Hello from server!")));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_call_times_out() {
    let transport = Arc::new(RecordingTransport::default());
    let consumer = consumer(transport.clone());

    let call = consumer.send_request(ADDR, methods::METHOD_HELLO, None).await.unwrap();
    assert_eq!(call.wait().await, Err(Error::Timeout));
    assert!(consumer.correlator().is_empty());

    // a late response is dropped without effect
    let late = transport.sent()[0].response(ReturnCode::Ok, Payload::from("late"));
    consumer.on_response_received(late);
    assert!(consumer.correlator().is_empty());
}

#[tokio::test]
async fn test_notifications_reach_their_handler() {
    let transport = Arc::new(RecordingTransport::default());
    let consumer = consumer(transport);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    consumer.on_event(ADDR, methods::EVENT_CPU, move |note: &Message| {
        sink.lock().unwrap().push(note.payload_or_empty().to_text_lossy().into_owned());
    });

    consumer.on_notification(Message::notification(ADDR, methods::EVENT_CPU, Payload::from("CPU Usage: 1.000000%")));
    // no handler registered, logged only
    consumer.on_notification(Message::notification(ADDR, methods::EVENT_MEMORY, Payload::default()));

    assert_eq!(*seen.lock().unwrap(), vec!["CPU Usage: 1.000000%".to_string()]);
}

#[tokio::test]
async fn test_release_unsubscribes_and_forgets_declarations() {
    let transport = Arc::new(RecordingTransport::default());
    let consumer = consumer(transport.clone());
    consumer.subscribe_on_available(ADDR, EventGroupId(1));
    consumer.request_on_available(ADDR, methods::METHOD_HELLO, None);
    consumer.on_availability_changed(ADDR, true).await;
    let call = consumer.send_request(ADDR, methods::METHOD_CPU, None).await.unwrap();

    consumer.release(ADDR).await.unwrap();

    let calls = transport.calls();
    let tail = &calls[calls.len() - 2..];
    assert_eq!(tail, &[Call::Unsubscribe(EventGroupId(1)), Call::Release]);
    assert_eq!(consumer.subscription_state(ADDR, EventGroupId(1)), None);
    assert_eq!(call.wait().await, Err(Error::ServiceUnavailable(ADDR)));

    // a later available edge has nothing left to do
    let before = transport.calls().len();
    consumer.on_availability_changed(ADDR, true).await;
    assert_eq!(transport.calls().len(), before);
}
