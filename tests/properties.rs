//! Property tests for the lease protocol, cleanup and the write path.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use shapesync::{CleanupMonitor, LockManager, MemorySessionStore, MemoryShapeStore, RetryPolicy, ShapeRepo, ShapeStore};
use shapesync_core::{
    CanvasId, CleanupKey, CleanupRecord, NewShape, Point, SessionId, ShapeId, ShapeStyle, SyncError, UserId,
};

const USERS: [&str; 3] = ["alice", "bob", "carol"];
const SHAPES: usize = 4;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

struct World {
    shapes: MemoryShapeStore,
    sessions: MemorySessionStore,
    repo: ShapeRepo,
    monitor: CleanupMonitor,
    locks: Vec<LockManager>,
}

impl World {
    fn new() -> Self {
        let shapes = MemoryShapeStore::new();
        let sessions = MemorySessionStore::new();
        let repo = ShapeRepo::new(Arc::new(shapes.clone()), CanvasId::from("main"), RetryPolicy::no_retry());
        let monitor = CleanupMonitor::new(repo.clone(), Arc::new(sessions.clone()), Duration::from_secs(5));
        let locks = USERS
            .iter()
            .map(|u| LockManager::new(repo.clone(), Arc::new(sessions.clone()), SessionId::from(format!("{u}-tab"))))
            .collect();
        Self {
            shapes,
            sessions,
            repo,
            monitor,
            locks,
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Acquire { user: usize, shape: usize, origin: Option<(i16, i16)> },
    Release { user: usize, shape: usize },
    Disconnect { user: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..USERS.len(), 0..SHAPES, proptest::option::of((any::<i16>(), any::<i16>())))
            .prop_map(|(user, shape, origin)| Op::Acquire { user, shape, origin }),
        2 => (0..USERS.len(), 0..SHAPES).prop_map(|(user, shape)| Op::Release { user, shape }),
        1 => (0..USERS.len()).prop_map(|user| Op::Disconnect { user }),
    ]
}

fn user(idx: usize) -> UserId {
    UserId::from(USERS[idx])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// No user ever holds more than one shape, whatever order leases are
    /// taken, released and abandoned in.
    #[test]
    fn single_lease_per_user(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        runtime().block_on(async {
            let world = World::new();
            let drafts = (0..SHAPES).map(|i| NewShape::rectangle(i as f64, 0.0, 1.0, 1.0)).collect();
            let ids: Vec<ShapeId> = world
                .repo
                .batch_create(drafts, &user(0))
                .await
                .unwrap()
                .into_iter()
                .map(|s| s.id)
                .collect();

            for op in ops {
                match op {
                    Op::Acquire { user: u, shape, origin } => {
                        let origin = origin.map(|(x, y)| Point::new(x as f64, y as f64));
                        let result = world.locks[u]
                            .acquire(&ids[shape], &user(u), origin, &CancellationToken::new())
                            .await;
                        if let Err(e) = result {
                            prop_assert!(matches!(e, SyncError::LockConflict { .. }), "unexpected {e:?}");
                        }
                    }
                    Op::Release { user: u, shape } => {
                        // only the holder releases in a well-behaved client
                        let held = world.repo.require(&ids[shape]).await.unwrap();
                        if held.lock_holder() == Some(&user(u)) {
                            world.locks[u].release(&ids[shape], &user(u)).await.unwrap();
                        }
                    }
                    Op::Disconnect { user: u } => {
                        let session = world.locks[u].session_id().clone();
                        world.sessions.disconnect(&session);
                        world.sessions.reconnect(&session);
                        world.monitor.process_pending().await;
                    }
                }

                let snapshot = world.repo.list().await.unwrap();
                for u in 0..USERS.len() {
                    let held = snapshot.iter().filter(|s| s.lock_holder() == Some(&user(u))).count();
                    prop_assert!(held <= 1, "{} holds {held} shapes", USERS[u]);
                }
                for shape in &snapshot {
                    prop_assert_eq!(shape.lock.is_locked, shape.lock.locked_by.is_some());
                }
            }
            Ok(())
        })?;
    }

    /// Applying the same cleanup record twice ends where applying it once does.
    #[test]
    fn cleanup_is_idempotent(
        holder in prop_oneof![Just(None), Just(Some(0usize)), Just(Some(1usize))],
        origin in proptest::option::of((-500.0f64..500.0, -500.0f64..500.0)),
    ) {
        runtime().block_on(async {
            let world = World::new();
            let shape = world
                .repo
                .create(NewShape::rectangle(10.0, 10.0, 5.0, 5.0), &user(0))
                .await
                .unwrap();
            if let Some(h) = holder {
                world.repo.commit_lock_swap(&[], &shape.id, &user(h)).await.unwrap();
            }

            let origin = origin.map(|(x, y)| Point::new(x, y));
            let key = CleanupKey::new("alice-tab".into(), user(0), shape.id.clone());
            let record = CleanupRecord::for_lease("main".into(), user(0), shape.id.clone(), origin, 1);

            world.monitor.process(&key, &record).await;
            let once = world.repo.require(&shape.id).await.unwrap();
            world.monitor.process(&key, &record).await;
            let twice = world.repo.require(&shape.id).await.unwrap();

            prop_assert_eq!(&once, &twice);
            if holder == Some(0) {
                prop_assert!(!once.lock.is_locked);
                if let Some(p) = origin {
                    prop_assert_eq!(once.position(), p);
                }
            } else {
                let expected_holder = holder.map(user);
                prop_assert_eq!(once.lock_holder(), expected_holder.as_ref());
                prop_assert_eq!(once.position(), Point::new(10.0, 10.0));
            }
            Ok(())
        })?;
    }

    /// A batch with any invalid member leaves the store untouched.
    #[test]
    fn batch_create_is_all_or_nothing(
        widths in proptest::collection::vec(-5.0f64..50.0, 1..8),
    ) {
        runtime().block_on(async {
            let world = World::new();
            let drafts: Vec<NewShape> = widths.iter().map(|w| NewShape::rectangle(0.0, 0.0, *w, 1.0)).collect();
            let result = world.repo.batch_create(drafts, &user(0)).await;
            let stored = world.shapes.list(&CanvasId::from("main")).await.unwrap();

            if widths.iter().any(|w| *w < 0.0) {
                prop_assert!(result.is_err());
                prop_assert!(stored.is_empty());
            } else {
                prop_assert_eq!(stored.len(), widths.len());
            }
            Ok(())
        })?;
    }

    /// Caller-supplied fields survive a create and read back unchanged.
    #[test]
    fn create_then_read_round_trips(
        x in -1e6f64..1e6,
        y in -1e6f64..1e6,
        w in 0.0f64..1e4,
        h in 0.0f64..1e4,
        opacity in 0.0f64..=1.0,
        rotation in 0.0f64..360.0,
        fill in proptest::option::of("#[0-9a-f]{6}"),
    ) {
        runtime().block_on(async {
            let world = World::new();
            let style = ShapeStyle {
                fill,
                opacity,
                rotation,
                ..ShapeStyle::default()
            };
            let draft = NewShape::circle(x, y, w, h).with_style(style);
            let created = world.repo.create(draft.clone(), &user(1)).await.unwrap();
            let read = world.repo.require(&created.id).await.unwrap();

            prop_assert_eq!(&read.body, &draft.body);
            prop_assert_eq!(&read.style, &draft.style);
            prop_assert!(read.audit.created_at > 0);
            prop_assert_eq!(&read.audit.created_by, &user(1));
            prop_assert!(!read.lock.is_locked);
            prop_assert!(read.lock.locked_by.is_none());
            Ok(())
        })?;
    }
}
