use super::*;
use serde_json::json;

fn actor() -> Actor {
    Actor { id: Uuid::nil(), email: "o@x.com".into(), name: "Owner".into() }
}

#[test]
fn join_project_parses_from_wire_shape() {
    let project_id = Uuid::new_v4();
    let msg: ClientMessage =
        serde_json::from_value(json!({"event": "join_project", "data": {"projectId": project_id}})).unwrap();
    assert_eq!(msg, ClientMessage::JoinProject { project_id });
}

#[test]
fn sync_since_defaults_to_zero() {
    let project_id = Uuid::new_v4();
    let msg: ClientMessage =
        serde_json::from_value(json!({"event": "sync_since", "data": {"projectId": project_id}})).unwrap();
    assert_eq!(msg, ClientMessage::SyncSince { project_id, since_seq: 0 });
}

#[test]
fn unknown_event_is_rejected() {
    let result: Result<ClientMessage, _> = serde_json::from_value(json!({"event": "explode", "data": {}}));
    assert!(result.is_err());
}

#[test]
fn presence_update_omits_missing_user_name() {
    let msg = ServerMessage::PresenceUpdate {
        project_id: Uuid::nil(),
        online_count: 0,
        action: PresenceAction::UserLeft,
        user_id: Uuid::nil(),
        user_name: None,
    };
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["event"], "presence_update");
    assert_eq!(value["data"]["action"], "user_left");
    assert_eq!(value["data"]["onlineCount"], 0);
    assert!(value["data"].get("userName").is_none());
}

#[test]
fn board_event_flattens_type_and_payload() {
    let msg = ServerMessage::BoardEvent(EventEnvelope {
        project_id: Uuid::nil(),
        actor: actor(),
        timestamp: 42,
        seq: 7,
        kind: BoardEventKind::TaskDeleted(TaskDeleted { task_id: Uuid::nil(), column_id: Uuid::nil() }),
    });
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["event"], "board_event");
    assert_eq!(value["data"]["type"], "task_deleted");
    assert_eq!(value["data"]["seq"], 7);
    assert_eq!(value["data"]["actor"]["email"], "o@x.com");
    assert_eq!(value["data"]["payload"]["taskId"], Uuid::nil().to_string());

    let back: ServerMessage = serde_json::from_value(value).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn member_event_type_matches_serialized_tag() {
    let info = MemberInfo { user_id: Uuid::nil(), email: "m@x.com".into(), name: "M".into(), role: Role::Member };
    for kind in [
        MemberEventKind::MemberAdded(info.clone()),
        MemberEventKind::MemberRemoved(info.clone()),
        MemberEventKind::MemberRoleChanged(info.clone()),
    ] {
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["type"], kind.event_type());
        assert_eq!(value["payload"]["role"], "MEMBER");
    }
}

#[test]
fn member_added_is_recorded_as_member_joined() {
    let info = MemberInfo { user_id: Uuid::nil(), email: "m@x.com".into(), name: "M".into(), role: Role::Viewer };
    assert_eq!(MemberEventKind::MemberAdded(info).action(), "member_joined");
}

#[test]
fn deleted_task_event_links_no_task() {
    let kind = BoardEventKind::TaskDeleted(TaskDeleted { task_id: Uuid::new_v4(), column_id: Uuid::new_v4() });
    assert_eq!(kind.task_id(), None);
    assert_eq!(kind.action(), "task_deleted");
}

#[test]
fn error_event_carries_code() {
    #[derive(Debug, thiserror::Error)]
    #[error("nope")]
    struct Nope;
    impl ErrorCode for Nope {
        fn error_code(&self) -> &'static str {
            "E_NOPE"
        }
    }

    let value = serde_json::to_value(ServerMessage::error_from(&Nope)).unwrap();
    assert_eq!(value, json!({"event": "error", "data": {"code": "E_NOPE", "message": "nope"}}));
}
