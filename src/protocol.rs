//! Wire types for the scoreboard realtime channel.
//!
//! Inbound messages are JSON objects carrying a `type` discriminator, with
//! two historical quirks the parser has to absorb:
//!
//! - the server may send a bare JSON array as a full roster snapshot;
//! - unknown `type`s must be delivered to consumers unchanged, not dropped.
//!
//! Both rule out a plain `#[serde(tag = "type")]` enum, so inbound parsing
//! goes through [`ServerEvent::parse`] over a `serde_json::Value`.
//!
//! Outbound messages are `{action, gameId, ...payload}` envelopes; the
//! [`Action`] table maps client intents to server destination strings.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for participants (server-side member id).
pub type ParticipantId = i64;

/// Unique identifier for rooms (one live scoring event).
pub type RoomId = i64;

/// Team number meaning "not assigned to any team".
pub const UNASSIGNED_TEAM: i32 = 0;

/// Grade band meaning "not yet graded".
pub const UNASSIGNED_GRADE: i32 = 0;

// ── Enums ───────────────────────────────────────────────────────────

/// Club role of a participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Regular club member.
    #[default]
    Member,
    /// Club staff; may operate the scoreboard.
    Staff,
    /// Club master; full operator permissions.
    Master,
}

/// Which of the two independent side competitions a flag refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SideKind {
    /// Grade-1 side pot.
    Grade1,
    /// Average-based side pot.
    Avg,
}

// ── Roster types ────────────────────────────────────────────────────

/// One row of the live roster, as serialized by the server.
///
/// The room-wide `scoreCounting` flag is logically a single value but the
/// wire format stores it redundantly on every row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub member_id: ParticipantId,
    pub member_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_profile: Option<String>,
    #[serde(default)]
    pub member_role: Role,
    /// Grade band; [`UNASSIGNED_GRADE`] until an operator assigns one.
    #[serde(default)]
    pub grade: i32,
    /// Per-game pinfall, `None` until the score is entered.
    #[serde(default)]
    pub game1: Option<i32>,
    #[serde(default)]
    pub game2: Option<i32>,
    #[serde(default)]
    pub game3: Option<i32>,
    #[serde(default)]
    pub game4: Option<i32>,
    /// Running average baseline used for team aggregates.
    #[serde(default)]
    pub member_avg: i32,
    /// Team number; [`UNASSIGNED_TEAM`] until assigned.
    #[serde(default)]
    pub team_number: i32,
    #[serde(default)]
    pub confirmed_join: bool,
    #[serde(default)]
    pub side_grade1: bool,
    #[serde(default)]
    pub side_avg: bool,
    #[serde(default)]
    pub score_counting: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
}

impl Participant {
    /// Create a participant with the required identity fields and defaults
    /// for everything else.
    pub fn new(member_id: ParticipantId, member_name: impl Into<String>) -> Self {
        Self {
            member_id,
            member_name: member_name.into(),
            member_profile: None,
            member_role: Role::default(),
            grade: UNASSIGNED_GRADE,
            game1: None,
            game2: None,
            game3: None,
            game4: None,
            member_avg: 0,
            team_number: UNASSIGNED_TEAM,
            confirmed_join: false,
            side_grade1: false,
            side_avg: false,
            score_counting: false,
            game_name: None,
            gender: None,
        }
    }

    /// Entered game scores, in game order.
    pub fn entered_scores(&self) -> impl Iterator<Item = i32> + '_ {
        [self.game1, self.game2, self.game3, self.game4]
            .into_iter()
            .flatten()
    }

    /// Total pinfall over the entered games.
    pub fn total(&self) -> i32 {
        self.entered_scores().sum()
    }

    /// Total pinfall relative to the member's average baseline, the unit
    /// that team standings are ranked by.
    pub fn net_total(&self) -> i32 {
        self.entered_scores().map(|s| s - self.member_avg).sum()
    }
}

/// Team-number patch entry inside a batch update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TeamAssignment {
    pub user_id: ParticipantId,
    pub team_number: i32,
}

/// Grade patch entry inside a batch update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GradeAssignment {
    pub user_id: ParticipantId,
    pub grade: i32,
}

/// The four per-game scores, set atomically together.
///
/// Field names match the server's score-update DTO (`game1Score`…).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameScores {
    #[serde(default)]
    pub game1_score: Option<i32>,
    #[serde(default)]
    pub game2_score: Option<i32>,
    #[serde(default)]
    pub game3_score: Option<i32>,
    #[serde(default)]
    pub game4_score: Option<i32>,
}

// ── Card draw ───────────────────────────────────────────────────────

/// One claimable card in a card-draw session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DrawCard {
    pub card_id: String,
    /// Grade band this card is drawable by.
    pub grade: i32,
    /// Team the claimant is assigned to.
    pub team_number: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_by: Option<ParticipantId>,
}

/// Server-issued card-draw session state (randomized team assignment).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CardDrawSession {
    #[serde(default)]
    pub cards: Vec<DrawCard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_by: Option<ParticipantId>,
}

// ── Inbound events ──────────────────────────────────────────────────

/// A message delivered on the room's realtime channel.
///
/// Patch variants carry an optional `seq` so the store can discard
/// out-of-order deliveries; the current server does not emit sequence
/// numbers, in which case patches apply unconditionally.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Full state in response to an initial-data request.
    InitialData {
        members: Vec<Participant>,
        card_draw: Option<CardDrawSession>,
    },
    /// Bare-array roster snapshot (legacy server push format).
    Snapshot(Vec<Participant>),
    /// One participant moved to a team.
    TeamNumberUpdate {
        user_id: ParticipantId,
        team_number: i32,
        seq: Option<u64>,
    },
    /// Several participants moved to teams in one atomic pass.
    BatchTeamNumberUpdate {
        updates: Vec<TeamAssignment>,
        seq: Option<u64>,
    },
    /// Several participants regraded in one atomic pass.
    BatchGradeUpdate {
        updates: Vec<GradeAssignment>,
        seq: Option<u64>,
    },
    /// A participant's four game scores were (re)entered.
    ScoreUpdated {
        user_id: ParticipantId,
        scores: GameScores,
        seq: Option<u64>,
    },
    /// A participant toggled a side-competition opt-in.
    SideUpdated {
        user_id: ParticipantId,
        side_type: SideKind,
        seq: Option<u64>,
    },
    /// A participant confirmed (or revoked) attendance.
    ConfirmedUpdated {
        user_id: ParticipantId,
        confirmed: bool,
        seq: Option<u64>,
    },
    /// The room-wide score-counting switch flipped. Consumers should
    /// refresh via an initial-data request instead of patching locally.
    ScoreCountingUpdated { score_counting: bool },
    /// Someone joined the room mid-event.
    NewParticipantJoin { participant: Participant },
    /// A card-draw session opened.
    CardDrawStart { card_draw: Option<CardDrawSession> },
    /// A card was claimed.
    CardSelected {
        card_id: String,
        user_id: ParticipantId,
    },
    /// The card-draw session was discarded.
    CardDrawReset,
    /// Heartbeat reply.
    Pong,
    /// Well-formed JSON with an unrecognized shape, passed through so
    /// consumers can handle message types this crate does not know about.
    Unknown(Value),
    /// Payload that was not valid JSON, delivered raw so consumers can
    /// decide how to degrade.
    Raw(String),
}

fn decode<T: DeserializeOwned>(value: &Value) -> Option<T> {
    serde_json::from_value(value.clone()).ok()
}

impl ServerEvent {
    /// Parse one inbound text frame. Never fails: malformed input degrades
    /// to [`ServerEvent::Raw`], unrecognized shapes to [`ServerEvent::Unknown`].
    pub fn parse(text: &str) -> ServerEvent {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => return ServerEvent::Raw(text.to_owned()),
        };

        if value.is_array() {
            return match decode::<Vec<Participant>>(&value) {
                Some(members) => ServerEvent::Snapshot(members),
                None => ServerEvent::Unknown(value),
            };
        }

        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return ServerEvent::Unknown(value);
        };

        let parsed = match kind {
            "initialData" => decode::<InitialDataWire>(&value).map(|w| ServerEvent::InitialData {
                members: w.members,
                card_draw: w.card_draw,
            }),
            "teamNumberUpdate" => {
                decode::<TeamNumberUpdateWire>(&value).map(|w| ServerEvent::TeamNumberUpdate {
                    user_id: w.user_id,
                    team_number: w.team_number,
                    seq: w.seq,
                })
            }
            "batchTeamNumberUpdate" => {
                decode::<BatchTeamWire>(&value).map(|w| ServerEvent::BatchTeamNumberUpdate {
                    updates: w.updates,
                    seq: w.seq,
                })
            }
            "batchGradeUpdate" => {
                decode::<BatchGradeWire>(&value).map(|w| ServerEvent::BatchGradeUpdate {
                    updates: w.updates,
                    seq: w.seq,
                })
            }
            "scoreUpdated" => decode::<ScoreUpdatedWire>(&value).map(|w| ServerEvent::ScoreUpdated {
                user_id: w.user_id,
                scores: w.scores,
                seq: w.seq,
            }),
            "sideUpdated" => decode::<SideUpdatedWire>(&value).map(|w| ServerEvent::SideUpdated {
                user_id: w.user_id,
                side_type: w.side_type,
                seq: w.seq,
            }),
            "confirmedUpdated" => {
                decode::<ConfirmedUpdatedWire>(&value).map(|w| ServerEvent::ConfirmedUpdated {
                    user_id: w.user_id,
                    confirmed: w.confirmed,
                    seq: w.seq,
                })
            }
            "scoreCountingUpdated" => {
                decode::<ScoreCountingWire>(&value).map(|w| ServerEvent::ScoreCountingUpdated {
                    score_counting: w.score_counting,
                })
            }
            "newParticipantJoin" => {
                decode::<NewParticipantWire>(&value).map(|w| ServerEvent::NewParticipantJoin {
                    participant: w.new_participant,
                })
            }
            "cardDrawStart" => decode::<CardDrawStartWire>(&value).map(|w| ServerEvent::CardDrawStart {
                card_draw: w.card_draw,
            }),
            "cardSelected" => decode::<CardSelectedWire>(&value).map(|w| ServerEvent::CardSelected {
                card_id: w.card_id,
                user_id: w.user_id,
            }),
            "cardDrawReset" => Some(ServerEvent::CardDrawReset),
            "pong" => Some(ServerEvent::Pong),
            _ => None,
        };

        // A known type with a malformed body is still forwarded, not dropped.
        parsed.unwrap_or(ServerEvent::Unknown(value))
    }
}

// Per-variant wire shapes. Kept private; `ServerEvent` is the public face.

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitialDataWire {
    #[serde(default)]
    members: Vec<Participant>,
    #[serde(default)]
    card_draw: Option<CardDrawSession>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeamNumberUpdateWire {
    user_id: ParticipantId,
    team_number: i32,
    #[serde(default)]
    seq: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchTeamWire {
    #[serde(default)]
    updates: Vec<TeamAssignment>,
    #[serde(default)]
    seq: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGradeWire {
    #[serde(default)]
    updates: Vec<GradeAssignment>,
    #[serde(default)]
    seq: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoreUpdatedWire {
    user_id: ParticipantId,
    #[serde(flatten)]
    scores: GameScores,
    #[serde(default)]
    seq: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SideUpdatedWire {
    user_id: ParticipantId,
    side_type: SideKind,
    #[serde(default)]
    seq: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmedUpdatedWire {
    user_id: ParticipantId,
    confirmed: bool,
    #[serde(default)]
    seq: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoreCountingWire {
    score_counting: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewParticipantWire {
    new_participant: Participant,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardDrawStartWire {
    #[serde(default)]
    card_draw: Option<CardDrawSession>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardSelectedWire {
    card_id: String,
    user_id: ParticipantId,
}

// ── Outbound commands ───────────────────────────────────────────────

/// Client intents, mapped to server destination strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Assign team numbers.
    UpdateTeam,
    /// Assign grade bands.
    UpdateGrade,
    /// Enter a participant's game scores.
    UpdateScore,
    /// Toggle a side-competition opt-in.
    JoinSide,
    /// Confirm attendance with a code.
    Confirm,
    /// Flip the room-wide score-counting switch.
    ScoreCounting,
    /// Open a card-draw session.
    CardDrawStart,
    /// Claim a card.
    CardSelect,
    /// Discard the card-draw session.
    CardDrawReset,
    /// Request a full state snapshot.
    RequestInitialData,
    /// Subscribe to the room topic.
    Subscribe,
    /// Heartbeat.
    Ping,
    /// Anything this crate does not know about. Routed to the default
    /// destination so future actions still reach the server.
    Other(String),
}

impl Action {
    /// Server destination string for this action.
    pub fn destination(&self) -> &str {
        match self {
            Action::UpdateTeam => "updateTeamNumber",
            Action::UpdateGrade => "updateGrade",
            Action::UpdateScore => "updateScore",
            Action::JoinSide => "updateSide",
            Action::Confirm => "updateConfirm",
            Action::ScoreCounting => "updateScoreCounting",
            Action::CardDrawStart => "cardDrawStart",
            Action::CardSelect => "cardSelect",
            Action::CardDrawReset => "cardDrawReset",
            Action::RequestInitialData => "initialData",
            Action::Subscribe => "subscribe",
            Action::Ping => "ping",
            Action::Other(_) => "message",
        }
    }
}

/// Outbound `{action, gameId, ...payload}` envelope.
#[derive(Debug, Clone)]
pub struct ClientCommand {
    pub action: Action,
    pub game_id: RoomId,
    /// Extra envelope fields; must be a JSON object (or `Null` for none).
    pub payload: Value,
}

impl ClientCommand {
    /// Create a command with an empty payload.
    pub fn new(action: Action, game_id: RoomId) -> Self {
        Self {
            action,
            game_id,
            payload: Value::Null,
        }
    }

    /// Attach extra envelope fields. Non-object values are ignored when
    /// serializing.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Serialize to the wire envelope.
    pub fn to_message(&self) -> String {
        let mut map = serde_json::Map::new();
        map.insert(
            "action".to_owned(),
            Value::String(self.action.destination().to_owned()),
        );
        if let Action::Other(name) = &self.action {
            map.insert("originalAction".to_owned(), Value::String(name.clone()));
        }
        map.insert("gameId".to_owned(), Value::from(self.game_id));
        if let Value::Object(extra) = &self.payload {
            for (k, v) in extra {
                map.insert(k.clone(), v.clone());
            }
        }
        Value::Object(map).to_string()
    }
}
