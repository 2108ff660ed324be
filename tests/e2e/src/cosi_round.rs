//! E2E Test: CoSi Round Over Real Links
//!
//! A leader runs one full CoSi round against two cosigners:
//! - The relayer it is directly linked to
//! - A second consumer it can only reach through that relayer
//!
//! Then verifies finalization suppression:
//! - A finalization already delivered is not sent again
//! - A finalization the peer confirmed first is never sent

use {
    kernel_p2p::{
        test_handle::Event, CosiSignature, Hash, Key, PeerId, Signature,
    },
    kernel_p2p_e2e_tests::helpers::*,
    std::time::Duration,
    tokio::time::sleep,
};

fn count<F>(events: &[Event], pred: F) -> usize
where
    F: Fn(&Event) -> bool,
{
    events.iter().filter(|event| pred(event)).count()
}

fn finalizations(node: &TestNode, from: &PeerId, snapshot: &[u8]) -> usize {
    count(&node.handle.events(), |event| {
        matches!(event, Event::Finalization { peer, snapshot: s } if peer == from && s == snapshot)
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: announcement → commitment → challenge → response → finalization
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cosi_round_direct_and_relayed() {
    init_logging();
    let relayer = start_relayer("relayer", Vec::new()).await;
    let leader = start_consumer("leader", vec![relayer.endpoint()]).await;
    let cosigner = start_consumer("cosigner", vec![relayer.endpoint()]).await;
    wait_linked(&leader, &relayer).await;
    wait_linked(&cosigner, &relayer).await;

    let snapshot = b"snapshot-1".to_vec();
    let snapshot_hash = Hash::digest(&snapshot);
    let leader_id = leader.id();

    // Step 1: announce to both cosigners.
    for target in [relayer.id(), cosigner.id()] {
        leader
            .node
            .send_snapshot_announcement_message(&target, &snapshot, &Key([1; 32]))
            .unwrap();
    }
    for node in [&relayer, &cosigner] {
        assert!(
            node.handle
                .wait_for(SETTLE_TIMEOUT, |events| {
                    events.iter().any(|event| {
                        matches!(event, Event::Announcement { peer, .. } if *peer == leader_id)
                    })
                })
                .await,
            "announcement never reached {}",
            node.id()
        );
    }
    println!("✓ Announcement delivered directly and through the relayer");

    // Step 2: commitments back to the leader; only the relayer wants the body.
    relayer
        .node
        .send_snapshot_commitment_message(&leader_id, &snapshot_hash, &Key([2; 32]), true)
        .unwrap();
    cosigner
        .node
        .send_snapshot_commitment_message(&leader_id, &snapshot_hash, &Key([3; 32]), false)
        .unwrap();
    assert!(
        leader
            .handle
            .wait_for(SETTLE_TIMEOUT, |events| {
                count(events, |event| matches!(event, Event::Commitment { .. })) == 2
            })
            .await
    );
    let events = leader.handle.events();
    assert!(events.contains(&Event::Commitment {
        peer: relayer.id(),
        snapshot: snapshot_hash,
        commitment: Key([2; 32]),
        want_tx: true,
    }));
    assert!(events.contains(&Event::Commitment {
        peer: cosigner.id(),
        snapshot: snapshot_hash,
        commitment: Key([3; 32]),
        want_tx: false,
    }));
    println!("✓ Commitments aggregated by the leader");

    // Step 3: challenges, with the transaction only where it was asked for.
    let cosi = CosiSignature {
        signature: Signature([9; 64]),
        mask: 0b11,
    };
    leader
        .node
        .send_transaction_challenge_message(&relayer.id(), &snapshot_hash, &cosi, Some(&b"tx"[..]))
        .unwrap();
    leader
        .node
        .send_transaction_challenge_message(&cosigner.id(), &snapshot_hash, &cosi, None)
        .unwrap();
    let expected_relayer = Event::Challenge {
        peer: leader_id,
        snapshot: snapshot_hash,
        transaction: Some(b"tx".to_vec()),
    };
    let expected_cosigner = Event::Challenge {
        peer: leader_id,
        snapshot: snapshot_hash,
        transaction: None,
    };
    assert!(
        relayer
            .handle
            .wait_for(SETTLE_TIMEOUT, |events| events.contains(&expected_relayer))
            .await
    );
    assert!(
        cosigner
            .handle
            .wait_for(SETTLE_TIMEOUT, |events| events.contains(&expected_cosigner))
            .await
    );
    println!("✓ Challenges delivered");

    // Step 4: responses.
    for node in [&relayer, &cosigner] {
        node.node
            .send_snapshot_response_message(&leader_id, &snapshot_hash, &Key([4; 32]))
            .unwrap();
    }
    assert!(
        leader
            .handle
            .wait_for(SETTLE_TIMEOUT, |events| {
                count(events, |event| matches!(event, Event::Response { .. })) == 2
            })
            .await
    );
    println!("✓ Responses aggregated by the leader");

    // Step 5: finalization.
    for target in [relayer.id(), cosigner.id()] {
        leader
            .node
            .send_snapshot_finalization_message(&target, &snapshot_hash, &snapshot)
            .unwrap();
    }
    for node in [&relayer, &cosigner] {
        assert!(
            wait_until(SETTLE_TIMEOUT, || finalizations(node, &leader_id, &snapshot) == 1).await,
            "finalization never reached {}",
            node.id()
        );
    }
    println!("✓ Finalization delivered");

    // Step 6: a second finalization of the same snapshot is suppressed.
    for target in [relayer.id(), cosigner.id()] {
        leader
            .node
            .send_snapshot_finalization_message(&target, &snapshot_hash, &snapshot)
            .unwrap();
    }
    sleep(Duration::from_millis(500)).await;
    assert_eq!(finalizations(&relayer, &leader_id, &snapshot), 1);
    assert_eq!(finalizations(&cosigner, &leader_id, &snapshot), 1);
    println!("✓ Repeated finalization suppressed");

    cosigner.node.teardown().await;
    leader.node.teardown().await;
    relayer.node.teardown().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: a confirm received first prevents the finalization from being sent
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_confirm_suppresses_finalization() {
    init_logging();
    let relayer = start_relayer("relayer", Vec::new()).await;
    let leader = start_consumer("leader", vec![relayer.endpoint()]).await;
    wait_linked(&leader, &relayer).await;

    let snapshot = b"snapshot-2".to_vec();
    let snapshot_hash = Hash::digest(&snapshot);
    let marker = Hash::digest(b"marker");
    let leader_id = leader.id();
    let relayer_id = relayer.id();

    // The confirm and the marker share the normal queue, so once the
    // leader has seen the marker it has handled the confirm.
    relayer
        .node
        .send_snapshot_confirm_message(&leader_id, &snapshot_hash)
        .unwrap();
    relayer
        .node
        .send_transaction_request_message(&leader_id, &marker)
        .unwrap();
    let seen_marker = Event::TransactionRequest {
        peer: relayer_id,
        hash: marker,
    };
    assert!(
        leader
            .handle
            .wait_for(SETTLE_TIMEOUT, |events| events.contains(&seen_marker))
            .await
    );

    leader
        .node
        .send_snapshot_finalization_message(&relayer_id, &snapshot_hash, &snapshot)
        .unwrap();
    leader
        .node
        .send_transaction_request_message(&relayer_id, &marker)
        .unwrap();
    let seen_marker = Event::TransactionRequest {
        peer: leader_id,
        hash: marker,
    };
    assert!(
        relayer
            .handle
            .wait_for(SETTLE_TIMEOUT, |events| events.contains(&seen_marker))
            .await
    );
    assert_eq!(finalizations(&relayer, &leader_id, &snapshot), 0);
    println!("✓ Confirmed snapshot never re-sent");

    leader.node.teardown().await;
    relayer.node.teardown().await;
}
