//! Session registry and membership protocol.
//!
//! These tests verify critical invariants:
//! - Resolving a session twice yields the same handle
//! - A group session id is only assigned once every member got the ticket
//! - Group messages without a ticket from their sender fail without side effects
//! - Idle session locks are pruned
//! - Membership operations refuse to run concurrently with a bootstrap

use std::time::Duration;

use tessera_core::{
    Channel, ConnectionError, ConnectionEvent, ConnectionMonitor, ConnectionState, MessageKind,
    SessionError, SessionKey, SessionProvider, Store,
};
use tessera_harness::{SimNetwork, SimPeer, StaticDirectory};
use tessera_proto::{Identity, ServiceMessage, SessionId};

struct World {
    network: SimNetwork,
    alice: SimPeer,
    bob: SimPeer,
    carol: SimPeer,
}

fn world() -> World {
    let network = SimNetwork::new();
    let directory = StaticDirectory::new();
    let alice = SimPeer::new("alice", 21, &network, &directory);
    let bob = SimPeer::new("bob", 22, &network, &directory);
    let carol = SimPeer::new("carol", 23, &network, &directory);
    World { network, alice, bob, carol }
}

fn team() -> Identity {
    Identity::new("team")
}

fn add_group(owner: &SimPeer, members: &[&SimPeer]) -> Channel {
    let cards = members.iter().map(|p| p.card()).collect();
    owner.store.create_channel(Channel::group(team(), cards)).unwrap()
}

/// INVARIANT: resolving twice without rotation returns the same handle.
#[tokio::test]
async fn pairwise_resolution_is_stable() {
    let World { alice, bob, .. } = world();
    let registry = alice.client.registry();
    let channel = alice.store.create_channel(Channel::single(bob.card())).unwrap();

    let first = registry.resolve_sender_session(&channel).await.unwrap();
    let second = registry.resolve_sender_session(&channel).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.key, SessionKey::Pairwise(Identity::new("bob")));
    assert_eq!(registry.session_count(), 1);
}

/// INVARIANT: a bootstrapped group session id is visible on the channel and
/// stable across resolutions.
#[tokio::test]
async fn group_bootstrap_assigns_session_once() {
    let World { network, alice, bob, carol, .. } = world();
    let channel = add_group(&alice, &[&bob, &carol]);
    let registry = alice.client.registry();

    let handle = registry.resolve_sender_session(&channel).await.unwrap();
    let reloaded = alice.store.get_channel(&team()).unwrap().unwrap();
    assert_eq!(reloaded.session_id, Some(handle.session_id));

    let again = registry.resolve_sender_session(&reloaded).await.unwrap();
    assert_eq!(again, handle);
    assert_eq!(network.sent_count(MessageKind::Service), 2);
}

/// INVARIANT: if any member misses the ticket, no session id is assigned.
#[tokio::test]
async fn failed_fan_out_assigns_nothing() {
    let World { network, alice, bob, carol, .. } = world();
    let channel = add_group(&alice, &[&bob, &carol]);
    network.fail_deliveries_to(carol.identity().clone());

    let err = alice.client.registry().resolve_sender_session(&channel).await.unwrap_err();
    assert!(matches!(err, SessionError::FanOut { .. }));
    assert!(err.is_retryable());
    assert_eq!(alice.store.get_channel(&team()).unwrap().unwrap().session_id, None);
    assert_eq!(network.sent_count(MessageKind::Service), 1);
}

/// INVARIANT: a group message whose ticket never arrived is reported and
/// changes nothing.
#[tokio::test]
async fn receiver_without_ticket_reports_missing_service_message() {
    let World { alice, bob, .. } = world();
    let channel = add_group(&bob, &[&alice]);
    let session_id = SessionId([7; 32]);

    let err = bob
        .client
        .registry()
        .resolve_receiver_session(&channel, session_id, alice.identity())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::MissingServiceMessage { ref sender, session_id: sid }
            if sender == alice.identity() && sid == session_id
    ));
    assert_eq!(bob.store.get_channel(&team()).unwrap().unwrap().session_id, None);
    assert_eq!(bob.client.registry().session_count(), 0);
}

/// INVARIANT: a ticket from another member never stands in for the
/// sender's own. The message is reported and nothing is persisted.
#[tokio::test]
async fn receiver_ignores_tickets_from_other_members() {
    let World { alice, bob, carol, .. } = world();
    let ticket = alice.provider.start_group_session(&[bob.card(), carol.card()]).unwrap();
    let members = vec![alice.identity().clone(), bob.identity().clone(), carol.identity().clone()];
    let message = ServiceMessage::new_session(team(), ticket.session_id, members, ticket.bytes);

    bob.client.registry().accept_service_message(alice.identity(), message).await.unwrap();
    let channel = bob.store.get_channel(&team()).unwrap().unwrap();
    assert_eq!(channel.members, vec![Identity::new("alice"), Identity::new("carol")]);

    let err = bob
        .client
        .registry()
        .resolve_receiver_session(&channel, ticket.session_id, carol.identity())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::MissingServiceMessage { ref sender, session_id }
            if sender == carol.identity() && session_id == ticket.session_id
    ));
    assert_eq!(bob.store.service_message_count(), 1);
    assert_eq!(bob.store.get_channel(&team()).unwrap().unwrap().session_id, None);
    assert_eq!(bob.client.registry().session_count(), 0);

    let handle = bob
        .client
        .registry()
        .resolve_receiver_session(&channel, ticket.session_id, alice.identity())
        .await
        .unwrap();
    assert_eq!(handle.session_id, ticket.session_id);
    assert_eq!(bob.store.service_message_count(), 0);
}

/// INVARIANT: locks for peers and channels with nothing in flight are
/// dropped, so the lock table does not grow with every contact ever seen.
#[tokio::test]
async fn idle_locks_are_pruned() {
    let World { alice, bob, carol, .. } = world();
    let registry = alice.client.registry();
    for peer in [&bob, &carol] {
        let channel = alice.store.create_channel(Channel::single(peer.card())).unwrap();
        registry.resolve_sender_session(&channel).await.unwrap();
    }
    assert!(registry.lock_count() <= 1);

    let channel = add_group(&alice, &[&bob, &carol]);
    registry.resolve_sender_session(&channel).await.unwrap();
    assert!(registry.lock_count() <= 1);
    assert_eq!(registry.session_count(), 3);
}

#[tokio::test]
async fn membership_change_needs_a_bootstrapped_group() {
    let World { alice, bob, carol, .. } = world();
    let registry = alice.client.registry();

    add_group(&alice, &[&bob]);
    let err = registry.change_membership(&team(), &[carol.identity().clone()], &[]).await;
    assert!(matches!(err, Err(SessionError::NoActiveSession { .. })));

    alice.store.create_channel(Channel::single(bob.card())).unwrap();
    let err = registry.change_membership(bob.identity(), &[], &[]).await;
    assert!(matches!(err, Err(SessionError::NotAGroup { .. })));

    let err = registry.rotate(&Identity::new("nowhere")).await;
    assert!(matches!(err, Err(SessionError::UnknownChannel { .. })));
}

/// INVARIANT: rotation and membership changes never interleave with a
/// bootstrap of the same channel.
#[tokio::test]
async fn membership_operations_refuse_during_bootstrap() {
    let World { network, alice, bob, carol, .. } = world();
    let channel = add_group(&alice, &[&bob, &carol]);
    network.stall_deliveries_to(carol.identity().clone());
    let registry = alice.client.registry();

    let bootstrap = registry.resolve_sender_session(&channel);
    tokio::pin!(bootstrap);
    assert!(tokio::time::timeout(Duration::from_millis(20), &mut bootstrap).await.is_err());

    let err = registry.change_membership(&team(), &[], &[]).await;
    assert!(matches!(err, Err(SessionError::BootstrapInProgress { .. })));
    let err = registry.rotate(&team()).await;
    assert!(matches!(err, Err(SessionError::BootstrapInProgress { .. })));
}

#[tokio::test]
async fn unknown_member_needs_a_directory_card() {
    let World { alice, bob, .. } = world();
    let channel = add_group(&alice, &[&bob]);
    alice.client.registry().resolve_sender_session(&channel).await.unwrap();

    let mallory = [Identity::new("mallory")];
    let err = alice.client.registry().change_membership(&team(), &mallory, &[]).await;
    assert!(matches!(err, Err(SessionError::Directory(_))));
}

#[tokio::test]
async fn foreign_service_message_for_single_channel_is_rejected() {
    let World { alice, bob, .. } = world();
    bob.store.create_channel(Channel::single(alice.card())).unwrap();
    let ticket = alice.provider.start_group_session(&[bob.card()]).unwrap();
    let message = ServiceMessage::new_session(
        alice.identity().clone(),
        ticket.session_id,
        vec![alice.identity().clone(), bob.identity().clone()],
        ticket.bytes,
    );

    let err = bob.client.registry().accept_service_message(alice.identity(), message).await;
    assert!(matches!(err, Err(SessionError::NotAGroup { .. })));
}

#[tokio::test]
async fn lost_resolves_when_the_connection_drops() {
    let monitor = ConnectionMonitor::new();
    monitor.apply(&ConnectionEvent::ConnectRequested).unwrap();
    monitor.apply(&ConnectionEvent::Authenticated).unwrap();

    let waiter = monitor.clone();
    let lost = tokio::spawn(async move { waiter.lost().await });
    tokio::task::yield_now().await;
    assert!(!lost.is_finished());

    monitor.apply(&ConnectionEvent::TransportLost { reason: "reset".into() }).unwrap();
    let err = lost.await.unwrap();
    assert_eq!(err, ConnectionError::NotConnected { state: ConnectionState::Disconnected });
}
