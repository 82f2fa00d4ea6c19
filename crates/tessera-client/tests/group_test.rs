//! Group session bootstrap, out-of-order delivery and membership changes
//! across simulated peers.

use tessera_client::{ProcessError, Processed, SendError};
use tessera_core::{
    Channel, MessageBody, MessageKind, MessageState, ServiceOutcome, SessionError, Store,
    TransportEvent,
};
use tessera_harness::{InvariantRegistry, SimNetwork, SimPeer, StaticDirectory, SystemSnapshot};
use tessera_proto::Identity;

struct Group {
    network: SimNetwork,
    directory: StaticDirectory,
    alice: SimPeer,
    bob: SimPeer,
    carol: SimPeer,
    team: Identity,
}

fn group() -> Group {
    let network = SimNetwork::new();
    let directory = StaticDirectory::new();
    let alice = SimPeer::new("alice", 11, &network, &directory);
    let bob = SimPeer::new("bob", 12, &network, &directory);
    let carol = SimPeer::new("carol", 13, &network, &directory);
    for peer in [&alice, &bob, &carol] {
        peer.connect();
    }

    let team = Identity::new("team");
    let channel = Channel::group(team.clone(), vec![bob.card(), carol.card()]);
    alice.store.create_channel(channel).unwrap();
    network.register_group(team.clone(), vec![
        alice.identity().clone(),
        bob.identity().clone(),
        carol.identity().clone(),
    ]);
    Group { network, directory, alice, bob, carol, team }
}

fn outcomes(results: &[Result<Option<Processed>, ProcessError>]) -> Vec<String> {
    results
        .iter()
        .map(|r| match r {
            Ok(Some(Processed::Stored(m))) => match &m.body {
                MessageBody::Text { body } => format!("text:{body}"),
                other => format!("{other:?}"),
            },
            Ok(Some(Processed::Service(outcome))) => format!("service:{outcome:?}"),
            Ok(other) => format!("{other:?}"),
            Err(e) => format!("error:{e}"),
        })
        .collect()
}

fn session_of(peer: &SimPeer, team: &Identity) -> Option<tessera_proto::SessionId> {
    peer.store.get_channel(team).unwrap().and_then(|c| c.session_id)
}

#[tokio::test]
async fn first_group_message_bootstraps_the_session() {
    let Group { network, alice, bob, carol, team, .. } = group();

    let receipt = alice.send_text("team", "hello team").await.unwrap();
    assert_eq!(network.sent_count(MessageKind::Service), 2);
    assert_eq!(network.sent_count(MessageKind::Group), 1);
    assert_eq!(receipt.transport_id.as_str(), "m3");
    let session_id = session_of(&alice, &team).unwrap();

    for peer in [&bob, &carol] {
        let results = peer.deliver().await;
        assert_eq!(outcomes(&results), vec!["service:Stored", "text:hello team"]);
        assert_eq!(session_of(peer, &team), Some(session_id));
    }

    let bobs_view = bob.store.get_channel(&team).unwrap().unwrap();
    assert_eq!(bobs_view.members, vec![Identity::new("alice"), Identity::new("carol")]);
    assert_eq!(bob.store.service_message_count(), 0);

    InvariantRegistry::standard()
        .assert_all(&SystemSnapshot::capture(&[&alice, &bob, &carol]), "after bootstrap");
}

#[tokio::test]
async fn group_message_before_ticket_is_not_persisted() {
    let Group { alice, bob, team, .. } = group();
    alice.send_text("team", "too early").await.unwrap();

    let events = bob.take_events();
    assert_eq!(events.len(), 2);
    let router = bob.client.router();

    let early = router.handle(events[1].clone()).await;
    assert!(matches!(
        early,
        Err(ProcessError::Session(SessionError::MissingServiceMessage { ref sender, .. }))
            if *sender == Identity::new("alice")
    ));
    assert!(bob.store.all_messages().is_empty());

    let stored = router.handle(events[0].clone()).await.unwrap();
    assert_eq!(stored, Some(Processed::Service(ServiceOutcome::Stored)));

    let redelivered = router.handle(events[1].clone()).await.unwrap();
    let Some(Processed::Stored(message)) = redelivered else {
        panic!("expected stored message");
    };
    assert_eq!(message.channel, team);
    assert_eq!(bob.messages("team").len(), 1);
}

#[tokio::test]
async fn duplicate_ticket_is_ignored() {
    let Group { alice, bob, .. } = group();
    alice.send_text("team", "once").await.unwrap();

    let events = bob.take_events();
    let router = bob.client.router();
    let first = router.handle(events[0].clone()).await.unwrap();
    let again = router.handle(events[0].clone()).await.unwrap();
    assert_eq!(first, Some(Processed::Service(ServiceOutcome::Stored)));
    assert_eq!(again, Some(Processed::Service(ServiceOutcome::Duplicate)));
    assert_eq!(bob.store.service_message_count(), 1);
}

#[tokio::test]
async fn unreachable_member_rolls_back_bootstrap() {
    let Group { network, alice, bob, carol, team, .. } = group();
    network.fail_deliveries_to(carol.identity().clone());

    let failure = alice.send_text("team", "anyone?").await.unwrap_err();
    assert!(matches!(
        failure.error,
        SendError::Session(SessionError::FanOut { ref member, .. }) if *member == Identity::new("carol")
    ));
    assert!(failure.error.is_retryable());
    assert_eq!(session_of(&alice, &team), None);
    assert_eq!(network.sent_count(MessageKind::Group), 0);
    assert_eq!(alice.messages("team")[0].state, MessageState::Failed);

    network.heal(carol.identity());
    alice.send_text("team", "second try").await.unwrap();
    let session_id = session_of(&alice, &team).unwrap();

    let results = bob.deliver().await;
    assert_eq!(outcomes(&results), vec!["service:Stored", "service:Stored", "text:second try"]);
    assert_eq!(session_of(&bob, &team), Some(session_id));

    let results = carol.deliver().await;
    assert_eq!(outcomes(&results), vec!["service:Stored", "text:second try"]);
}

#[tokio::test]
async fn concurrent_sends_bootstrap_once() {
    let Group { network, alice, bob, .. } = group();

    let (first, second) =
        tokio::join!(alice.send_text("team", "one"), alice.send_text("team", "two"));
    first.unwrap();
    second.unwrap();

    assert_eq!(network.sent_count(MessageKind::Service), 2);
    assert_eq!(network.sent_count(MessageKind::Group), 2);

    let results = bob.deliver().await;
    let texts: Vec<_> = outcomes(&results).into_iter().filter(|o| o.starts_with("text:")).collect();
    assert_eq!(texts.len(), 2);
}

#[tokio::test]
async fn added_member_joins_from_change_ticket() {
    let Group { network, directory, alice, bob, carol, team } = group();
    alice.send_text("team", "before dave").await.unwrap();
    bob.deliver().await;
    carol.deliver().await;

    let dave = SimPeer::new("dave", 14, &network, &directory);
    dave.connect();
    network.register_group(team.clone(), vec![
        alice.identity().clone(),
        bob.identity().clone(),
        carol.identity().clone(),
        dave.identity().clone(),
    ]);

    let registry = alice.client.registry();
    let change =
        registry.change_membership(&team, &[dave.identity().clone()], &[]).await.unwrap();
    assert_eq!(change.recipients.len(), 3);
    registry.announce_membership(&change).await.unwrap();
    alice.send_text("team", "welcome dave").await.unwrap();

    for peer in [&bob, &carol] {
        assert_eq!(outcomes(&peer.deliver().await), vec!["service:Applied", "text:welcome dave"]);
    }
    assert_eq!(outcomes(&dave.deliver().await), vec!["service:Stored", "text:welcome dave"]);

    InvariantRegistry::standard()
        .assert_all(&SystemSnapshot::capture(&[&alice, &bob, &carol, &dave]), "after adding dave");
}

#[tokio::test]
async fn removed_member_drops_the_session() {
    let Group { network, alice, bob, carol, team, .. } = group();
    alice.send_text("team", "all of us").await.unwrap();
    bob.deliver().await;
    carol.deliver().await;

    let registry = alice.client.registry();
    let change =
        registry.change_membership(&team, &[], &[carol.identity().clone()]).await.unwrap();
    registry.announce_membership(&change).await.unwrap();
    network.register_group(team.clone(), vec![alice.identity().clone(), bob.identity().clone()]);

    assert_eq!(outcomes(&carol.deliver().await), vec!["service:Removed"]);
    assert_eq!(session_of(&carol, &team), None);

    alice.send_text("team", "just us").await.unwrap();
    assert_eq!(outcomes(&bob.deliver().await), vec!["service:Applied", "text:just us"]);
    assert!(carol.take_events().is_empty());

    let alices_view = alice.store.get_channel(&team).unwrap().unwrap();
    assert_eq!(alices_view.members, vec![Identity::new("bob")]);
}

#[tokio::test]
async fn rotation_replaces_the_session() {
    let Group { alice, bob, carol, team, .. } = group();
    alice.send_text("team", "old").await.unwrap();
    bob.deliver().await;
    carol.deliver().await;
    let old = session_of(&alice, &team).unwrap();

    let rotated = alice.client.registry().rotate(&team).await.unwrap();
    assert_ne!(rotated.session_id, old);
    assert_eq!(session_of(&alice, &team), Some(rotated.session_id));

    alice.send_text("team", "new").await.unwrap();
    assert_eq!(outcomes(&bob.deliver().await), vec!["service:Stored", "text:new"]);
    assert_eq!(session_of(&bob, &team), Some(rotated.session_id));
}

#[tokio::test]
async fn members_can_reply_on_the_group_session() {
    let Group { alice, bob, carol, .. } = group();
    alice.send_text("team", "question").await.unwrap();
    bob.deliver().await;
    carol.deliver().await;

    bob.send_text("team", "answer").await.unwrap();
    let at_alice = alice.deliver().await;
    let at_carol = carol.deliver().await;
    assert_eq!(outcomes(&at_alice), vec!["text:answer"]);
    assert_eq!(outcomes(&at_carol), vec!["text:answer"]);

    let reply = alice.messages("team").into_iter().find(|m| m.incoming).unwrap();
    assert_eq!(reply.author, Identity::new("bob"));
    assert!(matches!(bob.take_events().as_slice(), [] | [TransportEvent::Receipt { .. }]));
}
