//! Fuzz target for the connection state machine
//!
//! # Invariants
//!
//! - Rejected events leave the state unchanged
//! - `Connected` is only reached from `Connecting` via `Authenticated`
//! - Every disconnect-type event ends in `Disconnected` when accepted
//! - The pure machine and the shared monitor agree after every event

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tessera_core::{Connection, ConnectionEvent, ConnectionMonitor, ConnectionState};

#[derive(Debug, Clone, Arbitrary)]
enum Event {
    ConnectRequested,
    Authenticated,
    ConnectFailed,
    TransportLost,
    Disconnect,
}

impl Event {
    fn to_event(&self) -> ConnectionEvent {
        match self {
            Event::ConnectRequested => ConnectionEvent::ConnectRequested,
            Event::Authenticated => ConnectionEvent::Authenticated,
            Event::ConnectFailed => ConnectionEvent::ConnectFailed { reason: "fuzz".into() },
            Event::TransportLost => ConnectionEvent::TransportLost { reason: "fuzz".into() },
            Event::Disconnect => ConnectionEvent::Disconnect,
        }
    }
}

fuzz_target!(|events: Vec<Event>| {
    let mut machine = Connection::new();
    let monitor = ConnectionMonitor::new();

    for event in events {
        let event = event.to_event();
        let before = machine.state();
        let result = machine.handle(&event);
        let shared = monitor.apply(&event);
        assert_eq!(result, shared);

        match result {
            Ok(after) => {
                if after == ConnectionState::Connected {
                    assert_eq!(before, ConnectionState::Connecting);
                    assert_eq!(event, ConnectionEvent::Authenticated);
                }
                if matches!(
                    event,
                    ConnectionEvent::ConnectFailed { .. }
                        | ConnectionEvent::TransportLost { .. }
                        | ConnectionEvent::Disconnect
                ) {
                    assert_eq!(after, ConnectionState::Disconnected);
                }
            }
            Err(_) => assert_eq!(machine.state(), before),
        }

        assert_eq!(monitor.state(), machine.state());
        assert_eq!(monitor.ensure_connected().is_ok(), machine.state() == ConnectionState::Connected);
    }
});
