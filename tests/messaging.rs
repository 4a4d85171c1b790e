//! End-to-end pipeline scenarios over an in-memory store, with fake
//! connections backed by real mpsc channels.

use huddle::{
    ApiError, AppState, ConnId,
    auth::UserIdentity,
    db,
    events::{ClientEvent, ServerEvent},
    messages::{MessagePayload, pipeline},
    rooms::ws,
};
use tokio::sync::mpsc;
use uuid::Uuid;

async fn test_state() -> AppState {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init(&pool).await.unwrap();
    AppState::new(
        pool,
        b"test-secret",
        std::env::temp_dir().join("huddle-test-uploads"),
    )
}

fn user(name: &str) -> UserIdentity {
    UserIdentity {
        id: Uuid::now_v7(),
        name: name.to_string(),
    }
}

/// Registers a fake connection: a peer entry plus presence, like the
/// websocket layer does on upgrade.
fn connect(state: &AppState, identity: Option<&UserIdentity>) -> (ConnId, mpsc::UnboundedReceiver<String>) {
    let conn = Uuid::now_v7();
    let (tx, rx) = mpsc::unbounded_channel();
    state.peers.insert(conn, tx);
    if let Some(user) = identity {
        state.presence.register(user.id, conn);
    }
    (conn, rx)
}

fn next_event(rx: &mut mpsc::UnboundedReceiver<String>) -> Option<ServerEvent> {
    rx.try_recv().ok().map(|frame| serde_json::from_str(&frame).unwrap())
}

#[tokio::test]
async fn anonymous_connection_cannot_send_even_after_join() {
    let state = test_state().await;
    let owner = user("Ada");
    let group = state.groups.create(owner.id, "Team").await.unwrap();

    let (conn, _rx) = connect(&state, None);
    state.rooms.join(conn, group.id);

    let err = pipeline::send_message(&state, None, group.id, &MessagePayload::text("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized));
}

#[tokio::test]
async fn anonymous_connection_is_refused_room_entry_and_sees_no_fanout() {
    let state = test_state().await;
    let ada = user("Ada");
    let group = state.groups.create(ada.id, "Team").await.unwrap();

    let (anon_conn, mut anon_rx) = connect(&state, None);
    ws::handle_event(
        &state,
        anon_conn,
        None,
        ClientEvent::Join { group_id: group.id },
    )
    .await;

    // The join is refused, reported only to the requesting connection.
    match next_event(&mut anon_rx) {
        Some(ServerEvent::Error { message }) => assert_eq!(message, "unauthorized"),
        other => panic!("expected error event, got {other:?}"),
    }
    assert!(state.rooms.subscribers(group.id).is_empty());

    pipeline::send_message(&state, Some(&ada), group.id, &MessagePayload::text("secret"))
        .await
        .unwrap();
    assert!(next_event(&mut anon_rx).is_none());
}

#[tokio::test]
async fn send_to_missing_group_is_not_found() {
    let state = test_state().await;
    let ada = user("Ada");
    let err = pipeline::send_message(&state, Some(&ada), Uuid::now_v7(), &MessagePayload::text("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn revoked_member_is_forbidden_despite_room_join() {
    let state = test_state().await;
    let ada = user("Ada");
    let bob = user("Bob");
    let group = state.groups.create(ada.id, "Team").await.unwrap();
    state.groups.add_member(group.id, bob.id).await.unwrap();

    let (bob_conn, _rx) = connect(&state, Some(&bob));
    state.rooms.join(bob_conn, group.id);

    pipeline::send_message(&state, Some(&bob), group.id, &MessagePayload::text("hi"))
        .await
        .unwrap();

    // Membership revoked after the join: the next send must re-check the
    // durable record and fail.
    state.groups.remove_member(group.id, bob.id).await.unwrap();
    let err = pipeline::send_message(&state, Some(&bob), group.id, &MessagePayload::text("again"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
}

#[tokio::test]
async fn empty_payload_is_rejected_before_any_side_effect() {
    let state = test_state().await;
    let ada = user("Ada");
    let group = state.groups.create(ada.id, "Team").await.unwrap();

    let err = pipeline::send_message(&state, Some(&ada), group.id, &MessagePayload::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidArgument(_)));
    assert!(state.messages.list_recent(group.id, 50).await.unwrap().is_empty());
    assert_eq!(
        state.groups.get(group.id).await.unwrap().unwrap().last_message_id,
        None
    );
}

#[tokio::test]
async fn end_to_end_send_persists_points_and_fans_out() {
    let state = test_state().await;
    let ada = user("Ada");
    let bob = user("Bob");
    let group = state.groups.create(ada.id, "Team").await.unwrap();

    // Bob is not yet a member.
    let err = pipeline::send_message(&state, Some(&bob), group.id, &MessagePayload::text("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    state.groups.add_member(group.id, bob.id).await.unwrap();

    let (ada_conn, mut ada_rx) = connect(&state, Some(&ada));
    state.rooms.join(ada_conn, group.id);
    let (bob_conn, mut bob_rx) = connect(&state, Some(&bob));
    state.rooms.join(bob_conn, group.id);
    // A connection that never joined the room.
    let (_idle_conn, mut idle_rx) = connect(&state, Some(&ada));

    let sent = pipeline::send_message(&state, Some(&bob), group.id, &MessagePayload::text("hi"))
        .await
        .unwrap();

    // Durable, pointer updated, populated with sender attributes.
    let stored = state.messages.get(sent.id).await.unwrap().unwrap();
    assert_eq!(stored.text.as_deref(), Some("hi"));
    assert_eq!(stored.sender_name, "Bob");
    assert_eq!(
        state.groups.get(group.id).await.unwrap().unwrap().last_message_id,
        Some(sent.id)
    );

    // Joined connections receive it; the idle one gets nothing until it
    // asks the history service.
    for rx in [&mut ada_rx, &mut bob_rx] {
        match next_event(rx) {
            Some(ServerEvent::Message { message }) => assert_eq!(message.id, sent.id),
            other => panic!("expected message event, got {other:?}"),
        }
    }
    assert!(next_event(&mut idle_rx).is_none());

    let history = pipeline::recent(&state, &ada, group.id, 50).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, sent.id);
}

#[tokio::test]
async fn history_requires_membership() {
    let state = test_state().await;
    let ada = user("Ada");
    let mallory = user("Mallory");
    let group = state.groups.create(ada.id, "Team").await.unwrap();

    let err = pipeline::recent(&state, &mallory, group.id, 50).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
}

#[tokio::test]
async fn mark_read_is_idempotent_and_checks_existence() {
    let state = test_state().await;
    let ada = user("Ada");
    let group = state.groups.create(ada.id, "Team").await.unwrap();
    let sent = pipeline::send_message(&state, Some(&ada), group.id, &MessagePayload::text("hi"))
        .await
        .unwrap();

    pipeline::mark_read(&state, &ada, sent.id).await.unwrap();
    pipeline::mark_read(&state, &ada, sent.id).await.unwrap();
    let stored = state.messages.get(sent.id).await.unwrap().unwrap();
    assert_eq!(stored.read_by, vec![ada.id]);

    let err = pipeline::mark_read(&state, &ada, Uuid::now_v7()).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn delete_requires_sender_or_admin() {
    let state = test_state().await;
    let ada = user("Ada"); // owner, admin
    let bob = user("Bob"); // sender
    let carol = user("Carol"); // plain member
    let group = state.groups.create(ada.id, "Team").await.unwrap();
    state.groups.add_member(group.id, bob.id).await.unwrap();
    state.groups.add_member(group.id, carol.id).await.unwrap();

    let sent = pipeline::send_message(&state, Some(&bob), group.id, &MessagePayload::text("hi"))
        .await
        .unwrap();

    let err = pipeline::delete_message(&state, &carol, sent.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    pipeline::delete_message(&state, &ada, sent.id).await.unwrap();
    assert!(state.messages.get(sent.id).await.unwrap().is_none());
    assert!(state.messages.list_recent(group.id, 50).await.unwrap().is_empty());

    let err = pipeline::delete_message(&state, &ada, sent.id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn sender_may_delete_own_message() {
    let state = test_state().await;
    let ada = user("Ada");
    let bob = user("Bob");
    let group = state.groups.create(ada.id, "Team").await.unwrap();
    state.groups.add_member(group.id, bob.id).await.unwrap();

    let sent = pipeline::send_message(&state, Some(&bob), group.id, &MessagePayload::text("mine"))
        .await
        .unwrap();
    pipeline::delete_message(&state, &bob, sent.id).await.unwrap();
    assert!(state.messages.get(sent.id).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_sends_converge_pointer_to_newest() {
    let state = test_state().await;
    let ada = user("Ada");
    let group = state.groups.create(ada.id, "Team").await.unwrap();

    let (one, two) = (MessagePayload::text("one"), MessagePayload::text("two"));
    let (a, b) = tokio::join!(
        pipeline::send_message(&state, Some(&ada), group.id, &one),
        pipeline::send_message(&state, Some(&ada), group.id, &two),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    let newest = if (a.created_at, a.seq) > (b.created_at, b.seq) { a.id } else { b.id };

    assert_eq!(
        state.groups.get(group.id).await.unwrap().unwrap().last_message_id,
        Some(newest)
    );
}

#[tokio::test]
async fn presence_broadcast_carries_full_snapshot() {
    let state = test_state().await;
    let ada = user("Ada");
    let bob = user("Bob");

    let (_ada_conn, mut ada_rx) = connect(&state, Some(&ada));
    huddle::presence::broadcast_online(&state.presence, &state.peers);
    match next_event(&mut ada_rx) {
        Some(ServerEvent::OnlineUsers { users }) => assert_eq!(users, vec![ada.id]),
        other => panic!("expected online_users, got {other:?}"),
    }

    let (bob_conn, mut bob_rx) = connect(&state, Some(&bob));
    huddle::presence::broadcast_online(&state.presence, &state.peers);

    // Everyone gets the complete set, never a delta.
    let mut expected = vec![ada.id, bob.id];
    expected.sort_unstable();
    for rx in [&mut ada_rx, &mut bob_rx] {
        match next_event(rx) {
            Some(ServerEvent::OnlineUsers { users }) => assert_eq!(users, expected),
            other => panic!("expected online_users, got {other:?}"),
        }
    }

    state.presence.unregister(bob.id, bob_conn);
    assert_eq!(state.presence.snapshot(), vec![ada.id]);
}

#[tokio::test]
async fn group_list_preview_tolerates_deleted_pointer() {
    let state = test_state().await;
    let ada = user("Ada");
    let group = state.groups.create(ada.id, "Team").await.unwrap();
    let sent = pipeline::send_message(&state, Some(&ada), group.id, &MessagePayload::text("hi"))
        .await
        .unwrap();

    pipeline::delete_message(&state, &ada, sent.id).await.unwrap();

    // Pointer still references the deleted message; resolution treats it
    // as absent.
    let loaded = state.groups.get(group.id).await.unwrap().unwrap();
    assert_eq!(loaded.last_message_id, Some(sent.id));
    assert!(state.messages.get(sent.id).await.unwrap().is_none());
}
