use super::*;
use crate::infra::crc::CrcMode;
use crate::protocol::engine::LinkMode;

#[derive(Default)]
struct RecHandler {
    received: usize,
    connects: i32,
}

impl LinkHandler for RecHandler {
    fn on_received(&mut self, _address: u8, _payload: &[u8]) {
        self.received += 1;
    }

    fn on_sent(&mut self, _address: u8, _payload: &[u8]) {}

    fn on_connect(&mut self, _address: u8, connected: bool) {
        self.connects += if connected { 1 } else { -1 };
    }
}

type TestLink = SerialLink<RecHandler, 1, 16, 7, 32>;

fn test_config() -> LinkConfig {
    LinkConfig {
        retry_timeout: 100,
        crc: CrcMode::Off,
        ..LinkConfig::default()
    }
}

const SABM_IN: [u8; 4] = [0x7E, 0x03, 0x2F, 0x7E];
const UA_OUT: [u8; 4] = [0x7E, 0x01, 0x73, 0x7E];

#[test]
fn codec_buffer_must_cover_mtu() {
    let result = SerialLink::<RecHandler, 1, 16, 7, 8>::new(&test_config(), RecHandler::default());
    assert!(matches!(result, Err(LinkError::OutOfMemory)));
}

#[test]
fn response_streams_through_two_byte_buffers() {
    let mut link = TestLink::new(&test_config(), RecHandler::default()).unwrap();
    link.on_rx_data(0, &SABM_IN);
    assert_eq!(link.handler().connects, 1);

    let mut stream = [0u8; 8];
    let mut total = 0;
    loop {
        let mut chunk = [0u8; 2];
        let len = link.get_tx_data(0, &mut chunk).unwrap();
        if len == 0 {
            break;
        }
        stream[total..total + len].copy_from_slice(&chunk[..len]);
        total += len;
    }
    assert_eq!(&stream[..total], &UA_OUT);
}

#[test]
fn pump_tx_uses_four_byte_staging() {
    let mut link = TestLink::new(&test_config(), RecHandler::default()).unwrap();
    link.on_rx_data(0, &SABM_IN);
    let mut sink = [0u8; 8];
    let mut sunk = 0;
    let moved = link
        .pump_tx(0, &mut |bytes: &[u8]| {
            sink[sunk..sunk + bytes.len()].copy_from_slice(bytes);
            sunk += bytes.len();
            bytes.len()
        })
        .unwrap();
    assert_eq!(moved, 4);
    assert_eq!(&sink[..sunk], &UA_OUT);
}

#[test]
fn pump_rx_reads_from_callback() {
    let mut link = TestLink::new(&test_config(), RecHandler::default()).unwrap();
    let moved = link.pump_rx(0, &mut |buf: &mut [u8]| {
        buf[..SABM_IN.len()].copy_from_slice(&SABM_IN);
        SABM_IN.len()
    });
    assert_eq!(moved, 4);
    assert!(link.is_connected());
}

#[test]
fn nrm_primary_without_registered_peers() {
    let config = LinkConfig {
        mode: LinkMode::Nrm,
        peers_count: 2,
        ..test_config()
    };
    let mut link =
        SerialLink::<RecHandler, 2, 16, 7, 32>::new(&config, RecHandler::default()).unwrap();
    let mut out = [0u8; 16];
    assert_eq!(link.get_tx_data(100, &mut out), Err(LinkError::UnknownPeer));
}

#[test]
fn crc_protected_round_trip_between_two_links() {
    let config = LinkConfig {
        retry_timeout: 100,
        crc: CrcMode::Crc16,
        ..LinkConfig::default()
    };
    let mut alice = TestLink::new(&config, RecHandler::default()).unwrap();
    let mut bob = TestLink::new(&config, RecHandler::default()).unwrap();

    // Alice opens the link after her idle timeout, Bob answers.
    let mut wire = [0u8; 32];
    let len = alice.get_tx_data(100, &mut wire).unwrap();
    assert!(len > 0);
    bob.on_rx_data(100, &wire[..len]);
    let len = bob.get_tx_data(100, &mut wire).unwrap();
    alice.on_rx_data(100, &wire[..len]);
    assert!(alice.is_connected());
    assert!(bob.is_connected());

    // One payload with a real checksum on the wire.
    assert_eq!(alice.send_packet(&[0xDE, 0xAD]), Ok(()));
    let len = alice.get_tx_data(101, &mut wire).unwrap();
    bob.on_rx_data(101, &wire[..len]);
    assert_eq!(bob.handler().received, 1);
}
