mod common;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chord_ring::{Chord, ChordConfig, ChordError, ChordId, LocalAdaptor, LocalChord, Ring, Sha256Hasher};
use tokio::time::{sleep, timeout};

use common::{id, make_ring, make_ring_with, test_config};


async fn assert_all_readable(ring: &Ring<String>, stored: &BTreeMap<ChordId, String>) {
	for reader in ring.ids() {
		let reader = ring.node(reader).unwrap();
		for (key, value) in stored {
			match reader.get_id(*key).await {
				Ok(found) => assert_eq!(&found, value, "key {} read through {}", key, reader.id()),
				Err(e) => panic!("key {} unreadable through {}: {}", key, reader.id(), e),
			}
		}
	}
}

#[tokio::test]
async fn keys_survive_joins_and_leaves() {
	let mut ring = make_ring(&[20, 120]).await;
	let writer = ring.node(id(20)).unwrap();

	let mut stored = BTreeMap::new();
	for k in 0..40u64 {
		let key = id(k * 6 + 1);
		let value = format!("v{}", k);
		writer.put_id(key, value.clone()).await.unwrap();
		stored.insert(key, value);
	}
	assert_eq!(ring.total_keys().await.unwrap(), stored.len());

	let joins = [60u64, 200, 90, 5, 250];
	for n in joins {
		ring.add_node(n).await.unwrap();
		// nothing is lost or duplicated even before stabilization
		assert_eq!(ring.total_keys().await.unwrap(), stored.len(), "after {} joined", n);
		ring.converge(20).await.unwrap();
		assert_all_readable(&ring, &stored).await;
	}

	let leaves = [20u64, 120, 250, 60];
	for n in leaves {
		ring.remove_node(n).await.unwrap();
		assert_eq!(ring.total_keys().await.unwrap(), stored.len(), "after {} left", n);
		ring.converge(20).await.unwrap();
		assert_all_readable(&ring, &stored).await;
	}

	assert_eq!(ring.ids(), vec![id(5), id(90), id(200)]);
	ring.shutdown().await;
}

#[tokio::test]
async fn keys_follow_ownership_after_every_round() {
	let mut ring = make_ring(&[0, 128]).await;
	let writer = ring.node(id(0)).unwrap();
	for k in 0..16u64 {
		writer.put_id(id(k * 16 + 3), format!("v{}", k)).await.unwrap();
	}

	// join through the highest node rather than the lowest
	for n in [64u64, 192, 32, 96] {
		ring.add_node_via(n, Some(id(128))).await.unwrap();
		ring.converge(20).await.unwrap();
		for snapshot in ring.snapshots().await.unwrap() {
			for key in snapshot.keys() {
				assert_eq!(ring.owner_of(key), Some(snapshot.id), "key {} held by {}", key, snapshot.id);
			}
		}
	}
	assert_eq!(ring.total_keys().await.unwrap(), 16);
	ring.shutdown().await;
}

#[tokio::test]
async fn writes_right_after_a_join_reach_the_newcomer() {
	let mut ring = make_ring(&[10, 50, 100, 150]).await;
	let writer = ring.node(id(10)).unwrap();

	ring.add_node(75u64).await.unwrap();
	// 50 still names 100 as its successor, so both writes are routed to 100 first
	assert_eq!(writer.put_id(id(75), "seventy-five".to_string()).await.unwrap(), id(75));
	assert_eq!(writer.put_id(id(60), "sixty".to_string()).await.unwrap(), id(75));
	assert_eq!(ring.node(id(100)).unwrap().predecessor().await.unwrap(), Some(id(75)));
	assert!(ring.node(id(100)).unwrap().snapshot().await.unwrap().store.is_empty());

	ring.converge(10).await.unwrap();
	assert_eq!(writer.get_id(id(75)).await.unwrap(), "seventy-five");
	assert_eq!(ring.node(id(150)).unwrap().get_id(id(60)).await.unwrap(), "sixty");
	ring.shutdown().await;
}

#[tokio::test]
async fn writes_racing_a_join_are_kept() {
	let mut ring = make_ring(&[10, 50, 100, 150]).await;
	let writer = ring.node(id(10)).unwrap();
	let keys = [55u64, 60, 65, 70, 75, 80, 90];

	let (joined, written) = tokio::join!(ring.add_node(75u64), async {
		let mut stored = BTreeMap::new();
		for k in keys {
			let value = format!("v{}", k);
			writer.put_id(id(k), value.clone()).await?;
			stored.insert(id(k), value);
		}
		Ok::<_, ChordError>(stored)
	});
	joined.unwrap();
	let stored = written.unwrap();

	assert_eq!(ring.total_keys().await.unwrap(), keys.len());
	ring.converge(10).await.unwrap();
	assert_all_readable(&ring, &stored).await;
	ring.shutdown().await;
}

#[tokio::test]
async fn writes_racing_a_leave_are_kept() {
	let config = ChordConfig {
		routing_retries: 10,
		..test_config(8)
	};
	let mut ring = make_ring_with(config, &[10, 50, 100, 150], Arc::new(Sha256Hasher)).await;
	let writer = ring.node(id(10)).unwrap();
	let keys = [20u64, 30, 40, 45, 60];

	let (left, written) = tokio::join!(ring.remove_node(50u64), async {
		let mut stored = BTreeMap::new();
		for k in keys {
			let value = format!("v{}", k);
			writer.put_id(id(k), value.clone()).await?;
			stored.insert(id(k), value);
		}
		Ok::<_, ChordError>(stored)
	});
	left.unwrap();
	let stored = written.unwrap();

	assert_eq!(ring.total_keys().await.unwrap(), keys.len());
	ring.converge(10).await.unwrap();
	assert_all_readable(&ring, &stored).await;
	ring.shutdown().await;
}

#[tokio::test]
async fn failed_leave_keeps_the_node_and_its_keys() {
	let mut ring = make_ring(&[10, 50, 100]).await;
	let writer = ring.node(id(10)).unwrap();
	assert_eq!(writer.put_id(id(30), "kept".to_string()).await.unwrap(), id(50));

	// 50 cannot hand its keys to a successor that is gone
	ring.crash_node(100u64).await.unwrap();
	assert!(ring.remove_node(50u64).await.is_err());
	assert_eq!(ring.ids(), vec![id(10), id(50)]);
	assert_eq!(ring.total_keys().await.unwrap(), 1);
	assert_eq!(writer.get_id(id(30)).await.unwrap(), "kept");

	// once the ring has healed the leave goes through
	ring.converge(10).await.unwrap();
	ring.remove_node(50u64).await.unwrap();
	assert_eq!(ring.total_keys().await.unwrap(), 1);
	assert!(ring.node(id(10)).unwrap().snapshot().await.unwrap().holds(id(30)));
	ring.shutdown().await;
}

#[tokio::test]
async fn crashed_successor_is_replaced() {
	let mut ring = make_ring(&[10, 50, 100, 150]).await;
	let writer = ring.node(id(10)).unwrap();
	assert_eq!(writer.put_id(id(75), "lost".to_string()).await.unwrap(), id(100));
	assert_eq!(writer.put_id(id(120), "kept".to_string()).await.unwrap(), id(150));

	ring.crash_node(100u64).await.unwrap();
	let rounds = ring.converge(10).await.unwrap();
	assert!(rounds > 0);

	assert_eq!(ring.node(id(50)).unwrap().successor().await.unwrap(), id(150));
	assert_eq!(ring.node(id(150)).unwrap().predecessor().await.unwrap(), Some(id(50)));

	// nothing is replicated, so the crashed node's keys are gone
	assert!(matches!(writer.get_id(id(75)).await, Err(ChordError::NotFound(_))));
	assert_eq!(writer.get_id(id(120)).await.unwrap(), "kept");
	assert_eq!(writer.put_id(id(75), "again".to_string()).await.unwrap(), id(150));
	ring.shutdown().await;
}

#[tokio::test]
async fn check_predecessor_clears_dead_predecessor() {
	let mut ring = make_ring(&[10, 50, 100]).await;
	ring.crash_node(50u64).await.unwrap();

	let node = ring.node(id(100)).unwrap();
	assert_eq!(node.predecessor().await.unwrap(), Some(id(50)));
	assert!(node.check_predecessor().await.unwrap());
	assert_eq!(node.predecessor().await.unwrap(), None);
	// nothing left to clear
	assert!(!node.check_predecessor().await.unwrap());

	ring.converge(10).await.unwrap();
	assert_eq!(node.predecessor().await.unwrap(), Some(id(10)));
	ring.shutdown().await;
}

#[tokio::test]
async fn lookup_routes_around_crashed_finger() {
	let mut ring = make_ring(&[10, 50, 100, 150, 200, 230]).await;
	ring.crash_node(150u64).await.unwrap();

	// 10's longest finger is 150; the lookup steps back to 100 instead
	let node = ring.node(id(10)).unwrap();
	assert_eq!(node.find_successor(id(210)).await.unwrap(), id(230));
	let snapshot = node.snapshot().await.unwrap();
	assert!(snapshot.fingers.iter().all(|f| f.node != id(150)));

	ring.converge(10).await.unwrap();
	ring.shutdown().await;
}

#[tokio::test]
async fn background_maintenance_converges() {
	let config = ChordConfig {
		maintenance_interval_ms: Some(10),
		..test_config(8)
	};
	let mut ring: Ring<String> = Ring::new(config).unwrap();
	for n in [200u64, 10, 90, 150, 40] {
		ring.add_node(n).await.unwrap();
	}

	let converged = timeout(Duration::from_secs(20), async {
		while ring.check().await.is_err() {
			sleep(Duration::from_millis(20)).await;
		}
	})
	.await;
	assert!(converged.is_ok(), "ring did not converge: {:?}", ring.check().await);

	ring.remove_node(90u64).await.unwrap();
	let converged = timeout(Duration::from_secs(20), async {
		while ring.check().await.is_err() {
			sleep(Duration::from_millis(20)).await;
		}
	})
	.await;
	assert!(converged.is_ok(), "ring did not converge after a leave: {:?}", ring.check().await);
	ring.shutdown().await;
}

#[tokio::test]
async fn concurrent_joins_converge() {
	let adaptor: LocalAdaptor<String> = LocalAdaptor::new();
	let start = |n: u64, seed: Option<ChordId>| {
		let adaptor = adaptor.clone();
		async move {
			let chord: LocalChord<String> = Chord::new(id(n), test_config(8), adaptor)?;
			chord.start(seed).await
		}
	};

	let first = start(0, None).await.unwrap();
	let (a, b, c, d, e) = tokio::join!(
		start(40, Some(id(0))),
		start(80, Some(id(0))),
		start(120, Some(id(0))),
		start(160, Some(id(0))),
		start(200, Some(id(0))),
	);
	let handles = vec![first, a.unwrap(), b.unwrap(), c.unwrap(), d.unwrap(), e.unwrap()];
	let mut ids: Vec<ChordId> = handles.iter().map(|h| h.id()).collect();
	ids.sort();

	let mut settled = false;
	for _ in 0..30 {
		for handle in &handles {
			let node = handle.get_associate();
			node.stabilize().await.unwrap();
			node.check_predecessor().await.unwrap();
			node.refresh_fingers().await.unwrap();
		}

		let mut all_correct = true;
		for handle in &handles {
			let node = handle.get_associate();
			let position = ids.iter().position(|n| *n == handle.id()).unwrap();
			let expected_succ = ids[(position + 1) % ids.len()];
			let expected_pred = ids[(position + ids.len() - 1) % ids.len()];
			all_correct &= node.successor().await.unwrap() == expected_succ;
			all_correct &= node.predecessor().await.unwrap() == Some(expected_pred);
		}
		if all_correct {
			settled = true;
			break;
		}
	}
	assert!(settled, "concurrent joins never settled");

	let entry = handles[0].get_associate();
	assert_eq!(entry.find_successor(id(100)).await.unwrap(), id(120));
	assert_eq!(entry.find_successor(id(201)).await.unwrap(), id(0));

	for handle in handles {
		handle.stop().await;
	}
}

#[tokio::test]
async fn graceful_leaves_down_to_one_node() {
	let mut ring = make_ring(&[30, 60, 90, 120]).await;
	let writer = ring.node(id(30)).unwrap();
	for k in 0..10u64 {
		writer.put_id(id(k * 25), format!("v{}", k)).await.unwrap();
	}

	for n in [30u64, 90, 120] {
		ring.remove_node(n).await.unwrap();
		assert_eq!(ring.total_keys().await.unwrap(), 10);
		ring.converge(10).await.unwrap();
	}

	let last = ring.node(id(60)).unwrap();
	assert_eq!(last.successor().await.unwrap(), id(60));
	assert_eq!(last.predecessor().await.unwrap(), Some(id(60)));
	assert_eq!(last.snapshot().await.unwrap().store.len(), 10);
	ring.shutdown().await;
}
