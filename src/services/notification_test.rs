use super::*;
use crate::db::models::NotificationKind;
use crate::state::test_helpers::{seed_user, test_app_state};

async fn deliver(state: &AppState, who: &Identity, title: &str) -> Notification {
    let notification =
        Notification::new(who.user_id, NotificationKind::ProjectInvitation, title, "join us", serde_json::json!({}));
    state.store.insert_notification(&notification).await.unwrap();
    notification
}

#[tokio::test]
async fn unread_count_follows_mark_read() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let first = deliver(&state, &alice, "first").await;
    deliver(&state, &alice, "second").await;

    assert_eq!(unread_count(&state, &alice).await.unwrap(), UnreadCount { count: 2 });
    mark_read(&state, &alice, first.id).await.unwrap();
    mark_read(&state, &alice, first.id).await.unwrap();
    assert_eq!(unread_count(&state, &alice).await.unwrap().count, 1);

    let inbox = list(&state, &alice).await.unwrap();
    let read: Vec<(&str, bool)> = inbox.iter().map(|n| (n.title.as_str(), n.read)).collect();
    assert_eq!(read, vec![("second", false), ("first", true)]);
}

#[tokio::test]
async fn mark_all_read_touches_only_the_caller() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let bob = seed_user(&state, "bob").await;
    deliver(&state, &alice, "a1").await;
    deliver(&state, &alice, "a2").await;
    deliver(&state, &bob, "b1").await;

    assert_eq!(mark_all_read(&state, &alice).await.unwrap(), 2);
    assert_eq!(mark_all_read(&state, &alice).await.unwrap(), 0);
    assert_eq!(unread_count(&state, &alice).await.unwrap().count, 0);
    assert_eq!(unread_count(&state, &bob).await.unwrap().count, 1);
}

#[tokio::test]
async fn someone_elses_notification_is_not_found() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let mallory = seed_user(&state, "mallory").await;
    let note = deliver(&state, &alice, "private").await;

    let err = mark_read(&state, &mallory, note.id).await.unwrap_err();
    assert!(matches!(err, NotificationError::NotFound(id) if id == note.id));
    assert_eq!(err.error_code(), "E_NOTIFICATION_NOT_FOUND");
    assert!(matches!(delete(&state, &mallory, note.id).await, Err(NotificationError::NotFound(_))));
    assert_eq!(list(&state, &alice).await.unwrap().len(), 1);

    delete(&state, &alice, note.id).await.unwrap();
    assert!(list(&state, &alice).await.unwrap().is_empty());
    assert!(matches!(delete(&state, &alice, note.id).await, Err(NotificationError::NotFound(_))));
}
