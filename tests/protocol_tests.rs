//! Wire-format tests for the realtime protocol types.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use pinpal_sync::protocol::{
    Action, ClientCommand, Participant, Role, ServerEvent, SideKind, UNASSIGNED_TEAM,
};
use serde_json::{json, Value};

// ── Inbound events ──────────────────────────────────────────────────

#[test]
fn parses_initial_data() {
    let event = ServerEvent::parse(
        r#"{
            "type": "initialData",
            "members": [
                {
                    "memberId": 1,
                    "memberName": "Kim",
                    "memberRole": "STAFF",
                    "grade": 2,
                    "game1": 180,
                    "memberAvg": 170,
                    "teamNumber": 1,
                    "confirmedJoin": true,
                    "sideGrade1": false,
                    "sideAvg": true,
                    "scoreCounting": true
                }
            ],
            "cardDraw": null
        }"#,
    );

    let ServerEvent::InitialData { members, card_draw } = event else {
        panic!("expected InitialData, got {event:?}");
    };
    assert!(card_draw.is_none());
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].member_id, 1);
    assert_eq!(members[0].member_role, Role::Staff);
    assert_eq!(members[0].game1, Some(180));
    assert_eq!(members[0].game2, None);
    assert!(members[0].side_avg);
    assert!(members[0].score_counting);
}

#[test]
fn parses_bare_array_as_snapshot() {
    let event = ServerEvent::parse(r#"[{"memberId": 5, "memberName": "Lee"}]"#);

    let ServerEvent::Snapshot(members) = event else {
        panic!("expected Snapshot, got {event:?}");
    };
    assert_eq!(members[0].member_id, 5);
    assert_eq!(members[0].member_name, "Lee");
    assert_eq!(members[0].team_number, UNASSIGNED_TEAM);
}

#[test]
fn parses_team_number_update() {
    let event =
        ServerEvent::parse(r#"{"type":"teamNumberUpdate","userId":3,"teamNumber":2,"seq":9}"#);
    assert_eq!(
        event,
        ServerEvent::TeamNumberUpdate {
            user_id: 3,
            team_number: 2,
            seq: Some(9),
        }
    );
}

#[test]
fn seq_is_optional_on_patches() {
    let event = ServerEvent::parse(r#"{"type":"teamNumberUpdate","userId":3,"teamNumber":2}"#);
    assert_eq!(
        event,
        ServerEvent::TeamNumberUpdate {
            user_id: 3,
            team_number: 2,
            seq: None,
        }
    );
}

#[test]
fn parses_batch_updates() {
    let event = ServerEvent::parse(
        r#"{"type":"batchTeamNumberUpdate","updates":[
            {"userId":1,"teamNumber":1},
            {"userId":2,"teamNumber":1}
        ]}"#,
    );
    let ServerEvent::BatchTeamNumberUpdate { updates, seq } = event else {
        panic!("expected BatchTeamNumberUpdate, got {event:?}");
    };
    assert_eq!(updates.len(), 2);
    assert!(seq.is_none());

    let event = ServerEvent::parse(r#"{"type":"batchGradeUpdate","updates":[{"userId":1,"grade":3}]}"#);
    let ServerEvent::BatchGradeUpdate { updates, .. } = event else {
        panic!("expected BatchGradeUpdate, got {event:?}");
    };
    assert_eq!(updates[0].grade, 3);
}

#[test]
fn parses_score_updated_with_flattened_scores() {
    let event = ServerEvent::parse(
        r#"{"type":"scoreUpdated","userId":7,"game1Score":200,"game2Score":190,"game4Score":210}"#,
    );
    let ServerEvent::ScoreUpdated {
        user_id, scores, ..
    } = event
    else {
        panic!("expected ScoreUpdated, got {event:?}");
    };
    assert_eq!(user_id, 7);
    assert_eq!(scores.game1_score, Some(200));
    assert_eq!(scores.game3_score, None);
    assert_eq!(scores.game4_score, Some(210));
}

#[test]
fn parses_side_updated() {
    let event = ServerEvent::parse(r#"{"type":"sideUpdated","userId":4,"sideType":"grade1"}"#);
    assert_eq!(
        event,
        ServerEvent::SideUpdated {
            user_id: 4,
            side_type: SideKind::Grade1,
            seq: None,
        }
    );

    let event = ServerEvent::parse(r#"{"type":"sideUpdated","userId":4,"sideType":"avg"}"#);
    let ServerEvent::SideUpdated { side_type, .. } = event else {
        panic!("expected SideUpdated, got {event:?}");
    };
    assert_eq!(side_type, SideKind::Avg);
}

#[test]
fn parses_confirmed_and_score_counting() {
    assert_eq!(
        ServerEvent::parse(r#"{"type":"confirmedUpdated","userId":9,"confirmed":true}"#),
        ServerEvent::ConfirmedUpdated {
            user_id: 9,
            confirmed: true,
            seq: None,
        }
    );
    assert_eq!(
        ServerEvent::parse(r#"{"type":"scoreCountingUpdated","scoreCounting":false}"#),
        ServerEvent::ScoreCountingUpdated {
            score_counting: false,
        }
    );
}

#[test]
fn parses_new_participant_join() {
    let event = ServerEvent::parse(
        r#"{"type":"newParticipantJoin","newParticipant":{"memberId":11,"memberName":"Park"}}"#,
    );
    let ServerEvent::NewParticipantJoin { participant } = event else {
        panic!("expected NewParticipantJoin, got {event:?}");
    };
    assert_eq!(participant.member_id, 11);
}

#[test]
fn parses_card_draw_events() {
    let event = ServerEvent::parse(
        r#"{"type":"cardDrawStart","cardDraw":{
            "cards":[{"cardId":"c1","grade":1,"teamNumber":2}],
            "startedBy":7
        }}"#,
    );
    let ServerEvent::CardDrawStart { card_draw } = event else {
        panic!("expected CardDrawStart, got {event:?}");
    };
    let session = card_draw.unwrap();
    assert_eq!(session.cards[0].card_id, "c1");
    assert_eq!(session.started_by, Some(7));

    assert_eq!(
        ServerEvent::parse(r#"{"type":"cardSelected","cardId":"c1","userId":3}"#),
        ServerEvent::CardSelected {
            card_id: "c1".to_owned(),
            user_id: 3,
        }
    );
    assert_eq!(
        ServerEvent::parse(r#"{"type":"cardDrawReset"}"#),
        ServerEvent::CardDrawReset
    );
}

#[test]
fn parses_pong() {
    assert_eq!(ServerEvent::parse(r#"{"type":"pong"}"#), ServerEvent::Pong);
}

#[test]
fn unknown_type_passes_through() {
    let event = ServerEvent::parse(r#"{"type":"somethingNew","value":1}"#);
    let ServerEvent::Unknown(value) = event else {
        panic!("expected Unknown, got {event:?}");
    };
    assert_eq!(value["type"], "somethingNew");
    assert_eq!(value["value"], 1);
}

#[test]
fn known_type_with_malformed_body_passes_through() {
    // Missing required fields; must be forwarded, not dropped.
    let event = ServerEvent::parse(r#"{"type":"teamNumberUpdate","oops":true}"#);
    assert!(matches!(event, ServerEvent::Unknown(_)));
}

#[test]
fn object_without_type_passes_through() {
    let event = ServerEvent::parse(r#"{"hello":"world"}"#);
    assert!(matches!(event, ServerEvent::Unknown(_)));
}

#[test]
fn invalid_json_degrades_to_raw() {
    let event = ServerEvent::parse("not json at all {{{");
    assert_eq!(event, ServerEvent::Raw("not json at all {{{".to_owned()));
}

// ── Outbound commands ───────────────────────────────────────────────

#[test]
fn action_destination_table() {
    let table = [
        (Action::UpdateTeam, "updateTeamNumber"),
        (Action::UpdateGrade, "updateGrade"),
        (Action::UpdateScore, "updateScore"),
        (Action::JoinSide, "updateSide"),
        (Action::Confirm, "updateConfirm"),
        (Action::ScoreCounting, "updateScoreCounting"),
        (Action::CardDrawStart, "cardDrawStart"),
        (Action::CardSelect, "cardSelect"),
        (Action::CardDrawReset, "cardDrawReset"),
        (Action::RequestInitialData, "initialData"),
        (Action::Subscribe, "subscribe"),
        (Action::Ping, "ping"),
    ];
    for (action, destination) in table {
        assert_eq!(action.destination(), destination);
    }
}

#[test]
fn command_envelope_carries_action_and_room() {
    let msg = ClientCommand::new(Action::Ping, 42).to_message();
    let value: Value = serde_json::from_str(&msg).unwrap();
    assert_eq!(value["action"], "ping");
    assert_eq!(value["gameId"], 42);
}

#[test]
fn command_envelope_merges_payload_fields() {
    let msg = ClientCommand::new(Action::UpdateScore, 42)
        .with_payload(json!({ "userId": 7, "game1Score": 200 }))
        .to_message();
    let value: Value = serde_json::from_str(&msg).unwrap();
    assert_eq!(value["action"], "updateScore");
    assert_eq!(value["gameId"], 42);
    assert_eq!(value["userId"], 7);
    assert_eq!(value["game1Score"], 200);
}

#[test]
fn unknown_action_routes_to_default_destination() {
    let msg = ClientCommand::new(Action::Other("futureThing".to_owned()), 42).to_message();
    let value: Value = serde_json::from_str(&msg).unwrap();
    assert_eq!(value["action"], "message");
    assert_eq!(value["originalAction"], "futureThing");
}

// ── Participant arithmetic ──────────────────────────────────────────

#[test]
fn totals_skip_unentered_games() {
    let mut p = Participant::new(1, "Kim");
    p.game1 = Some(180);
    p.game3 = Some(200);
    p.member_avg = 150;

    assert_eq!(p.total(), 380);
    assert_eq!(p.net_total(), 80);
    assert_eq!(p.entered_scores().count(), 2);
}

#[test]
fn participant_roundtrips_through_wire_names() {
    let mut p = Participant::new(1, "Kim");
    p.member_role = Role::Master;
    p.game2 = Some(190);
    p.gender = Some("FEMALE".to_owned());

    let value = serde_json::to_value(&p).unwrap();
    assert_eq!(value["memberId"], 1);
    assert_eq!(value["memberRole"], "MASTER");
    assert_eq!(value["game2"], 190);
    assert_eq!(value["gender"], "FEMALE");
    // Unset optionals stay off the wire.
    assert!(value.get("memberProfile").is_none());

    let back: Participant = serde_json::from_value(value).unwrap();
    assert_eq!(back, p);
}
