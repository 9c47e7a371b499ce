use super::*;

#[test]
fn events_set_clear_take() {
    let mut events = Events::default();
    assert!(!events.contains(Events::HAS_MARKER));
    events.insert(Events::HAS_MARKER | Events::TX_DATA_AVAILABLE);
    assert!(events.contains(Events::HAS_MARKER));
    assert!(events.take(Events::TX_DATA_AVAILABLE));
    assert!(!events.contains(Events::TX_DATA_AVAILABLE));
    assert!(events.contains(Events::HAS_MARKER));
    events.remove(Events::HAS_MARKER);
    assert!(!events.take(Events::HAS_MARKER));
}

#[test]
fn window_occupancy_predicates() {
    let mut peer = PeerSlot::UNUSED;
    assert!(!peer.has_unconfirmed_frames());
    assert!(peer.all_frames_are_sent());
    assert!(peer.can_accept_i_frames());

    // Queue three frames, send one.
    peer.last_ns = 3;
    peer.next_ns = 1;
    assert!(peer.has_unconfirmed_frames());
    assert!(!peer.all_frames_are_sent());

    // Window full: seven outstanding frames, one slot reserved.
    peer.confirm_ns = 0;
    peer.last_ns = 7;
    assert!(!peer.can_accept_i_frames());
    peer.confirm_ns = 1;
    assert!(peer.can_accept_i_frames());
}

#[test]
fn window_full_wraps_around() {
    let mut peer = PeerSlot::UNUSED;
    peer.confirm_ns = 5;
    peer.last_ns = 4;
    assert!(!peer.can_accept_i_frames());
    peer.confirm_ns = 6;
    assert!(peer.can_accept_i_frames());
}

#[test]
fn reset_window_clears_counters_only() {
    let mut peer = PeerSlot::UNUSED;
    peer.address = 0x05;
    peer.state = PeerState::Connected;
    peer.confirm_ns = 2;
    peer.last_ns = 4;
    peer.next_ns = 3;
    peer.next_nr = 6;
    peer.sent_nr = 5;
    peer.sent_reject = true;
    peer.reset_window();
    assert_eq!(peer.confirm_ns, 0);
    assert_eq!(peer.last_ns, 0);
    assert_eq!(peer.next_ns, 0);
    assert_eq!(peer.next_nr, 0);
    assert_eq!(peer.sent_nr, 0);
    assert!(!peer.sent_reject);
    assert_eq!(peer.address, 0x05);
    assert_eq!(peer.state, PeerState::Connected);
}
