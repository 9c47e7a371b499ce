//! "First conversation" integration scenario: two stations connect over an
//! in-memory serial pair and exchange payloads through the service layer.
mod helpers;

use embassy_sync::channel::Channel;
use helpers::{MockSerialPort, MockTimer};
use linkfd::infra::crc::CrcMode;
use linkfd::protocol::link::LinkConfig;
use linkfd::protocol::service::{
    CommandChannel, DeliveryChannel, LinkService, NotificationChannel,
};
use static_cell::StaticCell;
use tokio::time::Duration;

const MTU: usize = 8;

type Commands = CommandChannel<MTU, 4>;
type Deliveries = DeliveryChannel<MTU, 8>;

static EMITTER_COMMANDS: StaticCell<Commands> = StaticCell::new();
static EMITTER_DELIVERIES: StaticCell<Deliveries> = StaticCell::new();
static EMITTER_NOTIFICATIONS: StaticCell<NotificationChannel> = StaticCell::new();
static READER_COMMANDS: StaticCell<Commands> = StaticCell::new();
static READER_DELIVERIES: StaticCell<Deliveries> = StaticCell::new();
static READER_NOTIFICATIONS: StaticCell<NotificationChannel> = StaticCell::new();

#[tokio::test]
async fn conversation_over_the_service_layer() {
    let emitter_commands = &*EMITTER_COMMANDS.init(Channel::new());
    let emitter_deliveries = &*EMITTER_DELIVERIES.init(Channel::new());
    let emitter_notifications = &*EMITTER_NOTIFICATIONS.init(Channel::new());
    let reader_commands = &*READER_COMMANDS.init(Channel::new());
    let reader_deliveries = &*READER_DELIVERIES.init(Channel::new());
    let reader_notifications = &*READER_NOTIFICATIONS.init(Channel::new());

    let (emitter_port, reader_port) = MockSerialPort::create_pair();
    let config = LinkConfig {
        retry_timeout: 50,
        crc: CrcMode::Crc16,
        ..LinkConfig::default()
    };

    let emitter = LinkService::<_, _, 1, MTU, 7, 32, 4, 8>::new(
        &config,
        emitter_port,
        MockTimer::new(),
        Some(emitter_commands),
        Some(emitter_deliveries),
        Some(emitter_notifications),
    )
    .expect("emitter service must build");
    let reader = LinkService::<_, _, 1, MTU, 7, 32, 4, 8>::new(
        &config,
        reader_port,
        MockTimer::new(),
        Some(reader_commands),
        Some(reader_deliveries),
        Some(reader_notifications),
    )
    .expect("reader service must build");

    let emitter_parts = emitter.into_parts();
    let reader_parts = reader.into_parts();
    let emitter_handle = emitter_parts.handle.expect("command channel was provided");
    let reader_handle = reader_parts.handle.expect("command channel was provided");
    let mut emitter_inbox = emitter_parts.inbox.expect("delivery channel was provided");
    let mut reader_inbox = reader_parts.inbox.expect("delivery channel was provided");
    let mut emitter_events = emitter_parts.events.expect("events channel was provided");
    let mut reader_events = reader_parts.events.expect("events channel was provided");

    let emitter_runner = emitter_parts.runner.drive();
    let reader_runner = reader_parts.runner.drive();

    tokio::select! {
        result = emitter_runner => {
            panic!("emitter runner ended unexpectedly: {:?}", result);
        }
        result = reader_runner => {
            panic!("reader runner ended unexpectedly: {:?}", result);
        }
        result = tokio::time::timeout(Duration::from_secs(20), async {
            // Both stations open the link on their own after the idle timeout.
            assert!(emitter_events.recv().await.connected);
            assert!(reader_events.recv().await.connected);

            let mut clock = MockTimer::new();
            let message = b"hello from emitter";
            emitter_handle
                .send_to(&mut clock, 0, message, 1000)
                .await
                .expect("queueing the message must succeed");
            reader_handle
                .send_to(&mut clock, 0, b"hi back", 1000)
                .await
                .expect("queueing the reply must succeed");

            // The message crosses fragmented into MTU-sized packets and
            // arrives in order.
            let mut text = Vec::new();
            while text.len() < message.len() {
                let delivery = reader_inbox.recv().await;
                assert_eq!(delivery.address, 0);
                text.extend_from_slice(delivery.bytes());
            }
            assert_eq!(text, message);

            let reply = emitter_inbox.recv().await;
            assert_eq!(reply.bytes(), b"hi back");
        }) => {
            result.expect("conversation timed out");
        }
    }
}
