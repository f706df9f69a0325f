//! End-to-end scenarios: two clients sharing one shape store and one session store.

use std::sync::Arc;
use std::time::Duration;

use shapesync::{
    CanvasClient, CleanupMonitor, MemorySessionStore, MemoryShapeStore, NewShape, Point, SessionId, SessionStore, ShapeId,
    ShapePatch, ShapeStyle, SyncConfig, SyncError, UserId,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct World {
    shapes: MemoryShapeStore,
    sessions: MemorySessionStore,
}

impl World {
    fn new() -> Self {
        init_tracing();
        Self {
            shapes: MemoryShapeStore::new(),
            sessions: MemorySessionStore::new(),
        }
    }

    async fn client(&self, user: &str) -> CanvasClient {
        let config = SyncConfig {
            session_id: Some(SessionId::from(format!("{user}-tab"))),
            ..SyncConfig::default()
        };
        CanvasClient::connect(
            &config,
            UserId::from(user),
            Arc::new(self.shapes.clone()),
            Arc::new(self.sessions.clone()),
        )
        .await
        .unwrap()
    }
}

/// Let background tasks run until `check` holds
async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn update_of_shape_locked_by_another_user_conflicts() {
    let world = World::new();
    let alice = world.client("alice").await;
    let bob = world.client("bob").await;

    let s1 = alice.add_shape(NewShape::rectangle(0.0, 0.0, 10.0, 10.0)).await.unwrap();
    alice.lock_shape(&s1.id).await.unwrap();
    eventually(|| bob.shape(&s1.id).is_some_and(|s| s.lock.is_locked)).await;
    let before = bob.shape(&s1.id).unwrap();

    let result = bob.update_shape(&s1.id, ShapePatch::position(50.0, 50.0)).await;
    assert!(matches!(
        result,
        Err(SyncError::LockConflict { ref locked_by, .. }) if *locked_by == UserId::from("alice")
    ));
    // only bob's attempted change is undone
    assert_eq!(bob.shape(&s1.id), Some(before));
    let stored = alice.repo().require(&s1.id).await.unwrap();
    assert_eq!(stored.position(), Point::new(0.0, 0.0));
    assert_eq!(stored.lock_holder(), Some(&UserId::from("alice")));
}

#[tokio::test(start_paused = true)]
async fn locking_a_second_shape_releases_the_first() {
    let world = World::new();
    let alice = world.client("alice").await;
    let shapes = alice
        .batch_create(vec![
            NewShape::rectangle(0.0, 0.0, 10.0, 10.0),
            NewShape::rectangle(20.0, 0.0, 10.0, 10.0),
        ])
        .await
        .unwrap();
    let (s1, s2) = (&shapes[0].id, &shapes[1].id);

    alice.lock_shape(s1).await.unwrap();
    let lease = alice.lock_shape(s2).await.unwrap();
    assert_eq!(lease.released, vec![s1.clone()]);

    let repo = alice.repo();
    assert!(!repo.require(s1).await.unwrap().lock.is_locked);
    assert_eq!(repo.require(s2).await.unwrap().lock_holder(), Some(alice.user()));
    assert_eq!(repo.locked_by(alice.user()).await.unwrap().len(), 1);
    assert_eq!(world.sessions.hook_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn abrupt_disconnect_mid_drag_reverts_and_unlocks() {
    let world = World::new();
    let alice = world.client("alice").await;
    let bob = world.client("bob").await;

    let s1 = alice.add_shape(NewShape::rectangle(5.0, 6.0, 10.0, 10.0)).await.unwrap();
    alice.begin_drag(&s1.id).await.unwrap();
    alice.update_shape(&s1.id, ShapePatch::position(80.0, 90.0)).await.unwrap();

    // alice's process dies: the session store fires her hooks
    let session = SessionId::from("alice-tab");
    drop(alice);
    assert_eq!(world.sessions.disconnect(&session), 1);

    eventually(|| bob.shape(&s1.id).is_some_and(|s| !s.lock.is_locked)).await;
    let stored = bob.repo().require(&s1.id).await.unwrap();
    assert_eq!(stored.position(), Point::new(5.0, 6.0));
    assert!(!stored.lock.is_locked);
    assert!(world.sessions.pending_cleanup().await.unwrap_or_default().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cleanup_written_while_no_monitor_ran_is_applied_on_next_tick() {
    let world = World::new();
    let alice = world.client("alice").await;
    let s1 = alice.add_shape(NewShape::rectangle(1.0, 1.0, 2.0, 2.0)).await.unwrap();
    alice.lock_shape(&s1.id).await.unwrap();
    let repo = alice.repo().clone();
    drop(alice);
    world.sessions.disconnect(&SessionId::from("alice-tab"));

    let monitor = CleanupMonitor::new(
        repo.clone(),
        Arc::new(world.sessions.clone()),
        Duration::from_secs(5),
    );
    assert_eq!(monitor.process_pending().await, 1);
    assert!(!repo.require(&s1.id).await.unwrap().lock.is_locked);
    assert_eq!(monitor.process_pending().await, 0);
}

#[tokio::test(start_paused = true)]
async fn batch_create_with_one_invalid_shape_persists_nothing() {
    let world = World::new();
    let alice = world.client("alice").await;
    let bad_style = ShapeStyle {
        opacity: 1.5,
        ..ShapeStyle::default()
    };

    let result = alice
        .batch_create(vec![
            NewShape::rectangle(0.0, 0.0, 1.0, 1.0),
            NewShape::circle(0.0, 0.0, 1.0, 1.0).with_style(bad_style),
            NewShape::text(0.0, 0.0, "hello"),
        ])
        .await;

    assert!(matches!(result, Err(SyncError::Invalid(_))));
    assert!(alice.repo().list().await.unwrap().is_empty());
    assert!(alice.shapes().is_empty());
    assert_eq!(world.shapes.commit_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn delete_that_times_out_restores_the_shape() {
    let world = World::new();
    let alice = world.client("alice").await;
    let s1 = alice.add_shape(NewShape::rectangle(3.0, 4.0, 5.0, 6.0)).await.unwrap();
    let id: ShapeId = s1.id.clone();
    eventually(|| alice.shape(&id).is_some_and(|s| s.audit.created_at == s1.audit.created_at)).await;
    let before = alice.shape(&id).unwrap();

    // first attempt plus three retries
    world
        .shapes
        .fail_times(SyncError::DeadlineExceeded("commit".into()), 4);
    let started = tokio::time::Instant::now();
    let result = alice.delete_shape(&id).await;

    assert!(matches!(result, Err(SyncError::DeadlineExceeded(_))));
    assert_eq!(started.elapsed(), Duration::from_millis(1_000 + 1_500 + 2_250));
    assert_eq!(alice.shape(&id), Some(before));
    assert!(alice.repo().get(&id).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn idle_lease_expires_but_active_drag_keeps_it() {
    let world = World::new();
    let alice = world.client("alice").await;
    let shapes = alice
        .batch_create(vec![
            NewShape::rectangle(0.0, 0.0, 1.0, 1.0),
            NewShape::rectangle(5.0, 5.0, 1.0, 1.0),
        ])
        .await
        .unwrap();

    alice.lock_shape(&shapes[0].id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert!(!alice.repo().require(&shapes[0].id).await.unwrap().lock.is_locked);

    alice.begin_drag(&shapes[1].id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(alice.repo().require(&shapes[1].id).await.unwrap().lock.is_locked);

    alice.end_drag(&shapes[1].id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert!(!alice.repo().require(&shapes[1].id).await.unwrap().lock.is_locked);
}

#[tokio::test(start_paused = true)]
async fn drag_after_lease_expiry_holds_the_lock_again() {
    let world = World::new();
    let alice = world.client("alice").await;
    let bob = world.client("bob").await;
    let s1 = alice.add_shape(NewShape::rectangle(0.0, 0.0, 4.0, 4.0)).await.unwrap();

    alice.lock_shape(&s1.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert!(alice.interaction().shape_id().is_none());

    alice.begin_drag(&s1.id).await.unwrap();
    assert_eq!(
        alice.repo().require(&s1.id).await.unwrap().lock_holder(),
        Some(&UserId::from("alice"))
    );

    let result = bob.lock_shape(&s1.id).await;
    assert!(matches!(
        result,
        Err(SyncError::LockConflict { ref locked_by, .. }) if *locked_by == UserId::from("alice")
    ));
}
