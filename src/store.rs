//! Authoritative client-side scoreboard state.
//!
//! The [`ScoreboardStore`] holds the room roster plus the UI-facing pieces
//! of state that ride along with it (modal visibility, the card-draw
//! session, the female handicap). Reads hand out an `Arc` snapshot of the
//! roster so render paths never hold the store lock; every mutation builds
//! a fresh roster and swaps it in whole.
//!
//! [`apply`](ScoreboardStore::apply) is the single entry point for inbound
//! events. Patches that carry a sequence number are gated per participant:
//! a patch at or below the last applied sequence for that participant is
//! discarded, so replayed or reordered deliveries cannot roll state back.
//! Patches without a sequence number apply unconditionally.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::protocol::{
    CardDrawSession, GameScores, Participant, ParticipantId, ServerEvent, SideKind,
    UNASSIGNED_TEAM,
};

/// Overlay dialogs the scoreboard UI can show, at most one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modal {
    /// Grade-band assignment dialog.
    Grade,
    /// Team assignment dialog.
    Team,
    /// Attendance confirmation dialog.
    Confirm,
    /// Side-pot participant list.
    SideJoinUsers,
    /// Side-pot standings.
    SideRanking,
    /// Score entry dialog.
    ScoreInput,
}

/// UI-facing state that lives alongside the roster.
#[derive(Debug, Clone, Default)]
pub struct UiState {
    /// Currently open modals.
    pub open_modals: HashSet<Modal>,
    /// Active card-draw session, if one is running.
    pub card_draw: Option<CardDrawSession>,
    /// Pins added to every female participant's total when ranking.
    pub female_handicap: i32,
}

#[derive(Debug, Default)]
struct StoreState {
    roster: Arc<Vec<Participant>>,
    last_seq: HashMap<ParticipantId, u64>,
    ui: UiState,
}

/// Shared, internally synchronized scoreboard state.
///
/// Cheap to clone via `Arc`; typically one per room.
#[derive(Debug, Default)]
pub struct ScoreboardStore {
    state: Mutex<StoreState>,
}

impl ScoreboardStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Rebuild the roster under the lock and swap it in.
    fn mutate_roster(&self, f: impl FnOnce(&mut Vec<Participant>)) {
        let mut state = self.lock();
        let mut roster = state.roster.as_ref().clone();
        f(&mut roster);
        state.roster = Arc::new(roster);
    }

    /// Gate a sequenced patch for one participant. Returns `false` when the
    /// patch is at or below the last applied sequence and must be dropped.
    fn admit_seq(state: &mut StoreState, id: ParticipantId, seq: Option<u64>) -> bool {
        let Some(seq) = seq else {
            return true;
        };
        match state.last_seq.get(&id) {
            Some(&last) if seq <= last => {
                debug!(participant = id, seq, last, "discarding out-of-order patch");
                false
            }
            _ => {
                state.last_seq.insert(id, seq);
                true
            }
        }
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Current roster snapshot. The returned `Arc` is immutable; later
    /// mutations swap in a new roster and never touch this one.
    pub fn roster(&self) -> Arc<Vec<Participant>> {
        Arc::clone(&self.lock().roster)
    }

    /// Look up one participant by id.
    pub fn participant(&self, id: ParticipantId) -> Option<Participant> {
        self.lock()
            .roster
            .iter()
            .find(|p| p.member_id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Room-wide score-counting switch. The wire format stores it
    /// redundantly on every roster row; any row answers for the room.
    pub fn score_counting(&self) -> bool {
        self.lock()
            .roster
            .first()
            .map(|p| p.score_counting)
            .unwrap_or(false)
    }

    /// Total pinfall for a participant with the female handicap applied.
    fn adjusted_total(p: &Participant, female_handicap: i32) -> i32 {
        let games = p.entered_scores().count() as i32;
        let handicap = if p
            .gender
            .as_deref()
            .is_some_and(|g| g.eq_ignore_ascii_case("female"))
        {
            female_handicap * games
        } else {
            0
        };
        p.total() + handicap
    }

    /// Individual standings: participants ordered by handicap-adjusted
    /// total pinfall, highest first. Ties keep roster order.
    pub fn rankings(&self) -> Vec<Participant> {
        let state = self.lock();
        let handicap = state.ui.female_handicap;
        let mut ranked = state.roster.as_ref().clone();
        ranked.sort_by(|a, b| {
            Self::adjusted_total(b, handicap).cmp(&Self::adjusted_total(a, handicap))
        });
        ranked
    }

    /// Team standings as `(team_number, net_total)` ordered best first.
    ///
    /// A team's net total sums each member's pinfall over their average
    /// baseline, so unevenly skilled teams compete fairly. Unassigned
    /// participants (team 0) are excluded.
    pub fn team_standings(&self) -> Vec<(i32, i32)> {
        let state = self.lock();
        let mut totals: HashMap<i32, i32> = HashMap::new();
        for p in state.roster.iter() {
            if p.team_number == UNASSIGNED_TEAM {
                continue;
            }
            *totals.entry(p.team_number).or_insert(0) += p.net_total();
        }
        let mut standings: Vec<(i32, i32)> = totals.into_iter().collect();
        standings.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        standings
    }

    /// Team currently in first place, if any team has assigned members.
    pub fn first_place_team(&self) -> Option<i32> {
        self.team_standings().first().map(|(team, _)| *team)
    }

    /// Participant currently leading the individual standings.
    pub fn first_place_individual(&self) -> Option<Participant> {
        self.rankings().into_iter().next()
    }

    /// UI state snapshot.
    pub fn ui(&self) -> UiState {
        self.lock().ui.clone()
    }

    // ── Roster mutations ────────────────────────────────────────────

    /// Replace the entire roster. Nothing from the previous roster
    /// survives, including per-participant sequence bookkeeping.
    pub fn replace_roster(&self, roster: Vec<Participant>) {
        let mut state = self.lock();
        state.roster = Arc::new(roster);
        state.last_seq.clear();
    }

    /// Add a participant. If a row with the same id already exists it is
    /// replaced, not duplicated.
    pub fn add_participant(&self, participant: Participant) {
        self.mutate_roster(|roster| {
            roster.retain(|p| p.member_id != participant.member_id);
            roster.push(participant);
        });
    }

    /// Set one participant's team number. Unknown ids are ignored.
    pub fn set_team_number(&self, id: ParticipantId, team_number: i32) {
        self.mutate_roster(|roster| {
            if let Some(p) = roster.iter_mut().find(|p| p.member_id == id) {
                p.team_number = team_number;
            }
        });
    }

    /// Apply a batch of team assignments. Entries naming unknown ids are
    /// skipped; the rest still apply.
    pub fn apply_team_assignments(&self, updates: &[(ParticipantId, i32)]) {
        self.mutate_roster(|roster| {
            for &(id, team_number) in updates {
                match roster.iter_mut().find(|p| p.member_id == id) {
                    Some(p) => p.team_number = team_number,
                    None => debug!(participant = id, "team assignment for unknown participant"),
                }
            }
        });
    }

    /// Apply a batch of grade assignments, skipping unknown ids.
    pub fn apply_grade_assignments(&self, updates: &[(ParticipantId, i32)]) {
        self.mutate_roster(|roster| {
            for &(id, grade) in updates {
                match roster.iter_mut().find(|p| p.member_id == id) {
                    Some(p) => p.grade = grade,
                    None => debug!(participant = id, "grade assignment for unknown participant"),
                }
            }
        });
    }

    /// Reset every participant to unassigned (team 0).
    pub fn clear_team_assignments(&self) {
        self.mutate_roster(|roster| {
            for p in roster.iter_mut() {
                p.team_number = UNASSIGNED_TEAM;
            }
        });
    }

    /// Flip one participant's side-pot opt-in flag.
    pub fn toggle_side(&self, id: ParticipantId, side: SideKind) {
        self.mutate_roster(|roster| {
            if let Some(p) = roster.iter_mut().find(|p| p.member_id == id) {
                match side {
                    SideKind::Grade1 => p.side_grade1 = !p.side_grade1,
                    SideKind::Avg => p.side_avg = !p.side_avg,
                }
            }
        });
    }

    /// Set one participant's attendance confirmation.
    pub fn set_confirmed(&self, id: ParticipantId, confirmed: bool) {
        self.mutate_roster(|roster| {
            if let Some(p) = roster.iter_mut().find(|p| p.member_id == id) {
                p.confirmed_join = confirmed;
            }
        });
    }

    /// Set all four of a participant's game scores atomically. A `None`
    /// clears the corresponding game.
    pub fn set_scores(&self, id: ParticipantId, scores: GameScores) {
        self.mutate_roster(|roster| {
            if let Some(p) = roster.iter_mut().find(|p| p.member_id == id) {
                p.game1 = scores.game1_score;
                p.game2 = scores.game2_score;
                p.game3 = scores.game3_score;
                p.game4 = scores.game4_score;
            }
        });
    }

    fn set_score_counting(&self, score_counting: bool) {
        self.mutate_roster(|roster| {
            for p in roster.iter_mut() {
                p.score_counting = score_counting;
            }
        });
    }

    // ── UI mutations ────────────────────────────────────────────────

    pub fn open_modal(&self, modal: Modal) {
        self.lock().ui.open_modals.insert(modal);
    }

    pub fn close_modal(&self, modal: Modal) {
        self.lock().ui.open_modals.remove(&modal);
    }

    pub fn is_modal_open(&self, modal: Modal) -> bool {
        self.lock().ui.open_modals.contains(&modal)
    }

    pub fn set_female_handicap(&self, pins: i32) {
        self.lock().ui.female_handicap = pins;
    }

    /// Active card-draw session, if any.
    pub fn card_draw(&self) -> Option<CardDrawSession> {
        self.lock().ui.card_draw.clone()
    }

    fn start_card_draw(&self, session: Option<CardDrawSession>) {
        self.lock().ui.card_draw = session;
    }

    fn select_card(&self, card_id: &str, user_id: ParticipantId) {
        if let Some(session) = self.lock().ui.card_draw.as_mut() {
            if let Some(card) = session.cards.iter_mut().find(|c| c.card_id == card_id) {
                card.selected_by = Some(user_id);
            }
        }
    }

    fn reset_card_draw(&self) {
        self.lock().ui.card_draw = None;
    }

    /// Drop everything: roster, sequence bookkeeping, and UI state.
    pub fn reset(&self) {
        let mut state = self.lock();
        *state = StoreState::default();
    }

    // ── Event application ───────────────────────────────────────────

    /// Fold one inbound event into the store.
    ///
    /// Snapshot-bearing events replace the roster wholesale and reset
    /// sequence bookkeeping. Patch events apply in place, subject to
    /// per-participant sequence gating. Events the store has no use for
    /// ([`Pong`](ServerEvent::Pong), [`Unknown`](ServerEvent::Unknown),
    /// [`Raw`](ServerEvent::Raw)) are ignored.
    pub fn apply(&self, event: &ServerEvent) {
        match event {
            ServerEvent::InitialData { members, card_draw } => {
                self.replace_roster(members.clone());
                self.start_card_draw(card_draw.clone());
            }
            ServerEvent::Snapshot(members) => {
                self.replace_roster(members.clone());
            }
            ServerEvent::TeamNumberUpdate {
                user_id,
                team_number,
                seq,
            } => {
                if Self::admit_seq(&mut self.lock(), *user_id, *seq) {
                    self.set_team_number(*user_id, *team_number);
                }
            }
            ServerEvent::BatchTeamNumberUpdate { updates, seq } => {
                let admitted: Vec<(ParticipantId, i32)> = {
                    let mut state = self.lock();
                    updates
                        .iter()
                        .filter(|u| Self::admit_seq(&mut state, u.user_id, *seq))
                        .map(|u| (u.user_id, u.team_number))
                        .collect()
                };
                self.apply_team_assignments(&admitted);
            }
            ServerEvent::BatchGradeUpdate { updates, seq } => {
                let admitted: Vec<(ParticipantId, i32)> = {
                    let mut state = self.lock();
                    updates
                        .iter()
                        .filter(|u| Self::admit_seq(&mut state, u.user_id, *seq))
                        .map(|u| (u.user_id, u.grade))
                        .collect()
                };
                self.apply_grade_assignments(&admitted);
            }
            ServerEvent::ScoreUpdated {
                user_id,
                scores,
                seq,
            } => {
                if Self::admit_seq(&mut self.lock(), *user_id, *seq) {
                    self.set_scores(*user_id, *scores);
                }
            }
            ServerEvent::SideUpdated {
                user_id,
                side_type,
                seq,
            } => {
                if Self::admit_seq(&mut self.lock(), *user_id, *seq) {
                    self.toggle_side(*user_id, *side_type);
                }
            }
            ServerEvent::ConfirmedUpdated {
                user_id,
                confirmed,
                seq,
            } => {
                if Self::admit_seq(&mut self.lock(), *user_id, *seq) {
                    self.set_confirmed(*user_id, *confirmed);
                }
            }
            ServerEvent::ScoreCountingUpdated { score_counting } => {
                self.set_score_counting(*score_counting);
            }
            ServerEvent::NewParticipantJoin { participant } => {
                self.add_participant(participant.clone());
            }
            ServerEvent::CardDrawStart { card_draw } => {
                self.start_card_draw(card_draw.clone());
            }
            ServerEvent::CardSelected { card_id, user_id } => {
                self.select_card(card_id, *user_id);
            }
            ServerEvent::CardDrawReset => {
                self.reset_card_draw();
            }
            ServerEvent::Pong | ServerEvent::Unknown(_) | ServerEvent::Raw(_) => {}
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::{DrawCard, GradeAssignment, TeamAssignment};

    fn bowler(id: ParticipantId, name: &str, avg: i32, scores: [i32; 4]) -> Participant {
        let mut p = Participant::new(id, name);
        p.member_avg = avg;
        p.game1 = Some(scores[0]);
        p.game2 = Some(scores[1]);
        p.game3 = Some(scores[2]);
        p.game4 = Some(scores[3]);
        p
    }

    #[test]
    fn team_standings_sum_net_pinfall() {
        let store = ScoreboardStore::new();
        let mut a = bowler(1, "A", 180, [200, 190, 180, 210]);
        a.team_number = 1;
        let mut b = bowler(2, "B", 150, [150, 160, 170, 140]);
        b.team_number = 1;
        store.replace_roster(vec![a, b]);

        // A nets 780 - 4*180 = 60, B nets 620 - 4*150 = 20.
        assert_eq!(store.team_standings(), vec![(1, 80)]);
    }

    #[test]
    fn team_standings_skip_unassigned() {
        let store = ScoreboardStore::new();
        let mut a = bowler(1, "A", 100, [150, 150, 150, 150]);
        a.team_number = 2;
        let b = bowler(2, "B", 100, [300, 300, 300, 300]);
        assert_eq!(b.team_number, UNASSIGNED_TEAM);
        store.replace_roster(vec![a, b]);

        assert_eq!(store.team_standings(), vec![(2, 200)]);
        assert_eq!(store.first_place_team(), Some(2));
    }

    #[test]
    fn rankings_order_by_total_descending() {
        let store = ScoreboardStore::new();
        store.replace_roster(vec![
            bowler(1, "low", 0, [100, 100, 100, 100]),
            bowler(2, "high", 0, [200, 200, 200, 200]),
        ]);

        let ranked = store.rankings();
        assert_eq!(ranked[0].member_id, 2);
        assert_eq!(store.first_place_individual().unwrap().member_id, 2);
    }

    #[test]
    fn female_handicap_adjusts_rankings() {
        let store = ScoreboardStore::new();
        let mut f = bowler(1, "F", 0, [190, 190, 190, 190]);
        f.gender = Some("FEMALE".to_owned());
        let m = bowler(2, "M", 0, [195, 195, 195, 195]);
        store.replace_roster(vec![f, m]);

        assert_eq!(store.first_place_individual().unwrap().member_id, 2);
        store.set_female_handicap(10);
        assert_eq!(store.first_place_individual().unwrap().member_id, 1);
    }

    #[test]
    fn batch_update_skips_unknown_ids() {
        let store = ScoreboardStore::new();
        store.replace_roster(vec![Participant::new(1, "A"), Participant::new(2, "B")]);

        store.apply(&ServerEvent::BatchTeamNumberUpdate {
            updates: vec![
                TeamAssignment {
                    user_id: 1,
                    team_number: 3,
                },
                TeamAssignment {
                    user_id: 99,
                    team_number: 4,
                },
            ],
            seq: None,
        });

        assert_eq!(store.participant(1).unwrap().team_number, 3);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn replace_roster_retains_nothing() {
        let store = ScoreboardStore::new();
        store.replace_roster(vec![Participant::new(1, "A")]);
        let before = store.roster();

        store.replace_roster(vec![Participant::new(2, "B")]);

        assert_eq!(store.len(), 1);
        assert!(store.participant(1).is_none());
        // The old snapshot handed to a reader is untouched.
        assert_eq!(before[0].member_id, 1);
    }

    #[test]
    fn snapshot_reads_are_isolated_from_later_mutations() {
        let store = ScoreboardStore::new();
        store.replace_roster(vec![Participant::new(1, "A")]);

        let snapshot = store.roster();
        store.set_team_number(1, 5);

        assert_eq!(snapshot[0].team_number, UNASSIGNED_TEAM);
        assert_eq!(store.participant(1).unwrap().team_number, 5);
    }

    #[test]
    fn stale_sequenced_patch_is_discarded() {
        let store = ScoreboardStore::new();
        store.replace_roster(vec![Participant::new(1, "A")]);

        store.apply(&ServerEvent::TeamNumberUpdate {
            user_id: 1,
            team_number: 2,
            seq: Some(5),
        });
        store.apply(&ServerEvent::TeamNumberUpdate {
            user_id: 1,
            team_number: 9,
            seq: Some(4),
        });

        assert_eq!(store.participant(1).unwrap().team_number, 2);
    }

    #[test]
    fn unsequenced_patch_applies_unconditionally() {
        let store = ScoreboardStore::new();
        store.replace_roster(vec![Participant::new(1, "A")]);

        store.apply(&ServerEvent::TeamNumberUpdate {
            user_id: 1,
            team_number: 2,
            seq: Some(5),
        });
        store.apply(&ServerEvent::TeamNumberUpdate {
            user_id: 1,
            team_number: 7,
            seq: None,
        });

        assert_eq!(store.participant(1).unwrap().team_number, 7);
    }

    #[test]
    fn snapshot_resets_sequence_gating() {
        let store = ScoreboardStore::new();
        store.replace_roster(vec![Participant::new(1, "A")]);
        store.apply(&ServerEvent::TeamNumberUpdate {
            user_id: 1,
            team_number: 2,
            seq: Some(10),
        });

        store.apply(&ServerEvent::Snapshot(vec![Participant::new(1, "A")]));
        store.apply(&ServerEvent::TeamNumberUpdate {
            user_id: 1,
            team_number: 3,
            seq: Some(1),
        });

        assert_eq!(store.participant(1).unwrap().team_number, 3);
    }

    #[test]
    fn batch_grade_applies_per_entry() {
        let store = ScoreboardStore::new();
        store.replace_roster(vec![Participant::new(1, "A"), Participant::new(2, "B")]);

        store.apply(&ServerEvent::BatchGradeUpdate {
            updates: vec![
                GradeAssignment {
                    user_id: 1,
                    grade: 1,
                },
                GradeAssignment {
                    user_id: 2,
                    grade: 3,
                },
            ],
            seq: None,
        });

        assert_eq!(store.participant(1).unwrap().grade, 1);
        assert_eq!(store.participant(2).unwrap().grade, 3);
    }

    #[test]
    fn side_updated_toggles() {
        let store = ScoreboardStore::new();
        store.replace_roster(vec![Participant::new(1, "A")]);

        store.apply(&ServerEvent::SideUpdated {
            user_id: 1,
            side_type: SideKind::Grade1,
            seq: None,
        });
        assert!(store.participant(1).unwrap().side_grade1);

        store.apply(&ServerEvent::SideUpdated {
            user_id: 1,
            side_type: SideKind::Grade1,
            seq: None,
        });
        assert!(!store.participant(1).unwrap().side_grade1);
    }

    #[test]
    fn score_counting_flag_is_room_wide() {
        let store = ScoreboardStore::new();
        store.replace_roster(vec![Participant::new(1, "A"), Participant::new(2, "B")]);
        assert!(!store.score_counting());

        store.apply(&ServerEvent::ScoreCountingUpdated {
            score_counting: true,
        });

        assert!(store.score_counting());
        assert!(store.roster().iter().all(|p| p.score_counting));
    }

    #[test]
    fn new_participant_join_replaces_duplicate_id() {
        let store = ScoreboardStore::new();
        store.replace_roster(vec![Participant::new(1, "old name")]);

        store.apply(&ServerEvent::NewParticipantJoin {
            participant: Participant::new(1, "new name"),
        });

        assert_eq!(store.len(), 1);
        assert_eq!(store.participant(1).unwrap().member_name, "new name");
    }

    #[test]
    fn card_draw_lifecycle() {
        let store = ScoreboardStore::new();
        let session = CardDrawSession {
            cards: vec![DrawCard {
                card_id: "c1".to_owned(),
                grade: 1,
                team_number: 2,
                selected_by: None,
            }],
            started_by: Some(7),
        };

        store.apply(&ServerEvent::CardDrawStart {
            card_draw: Some(session),
        });
        store.apply(&ServerEvent::CardSelected {
            card_id: "c1".to_owned(),
            user_id: 5,
        });

        let draw = store.card_draw().unwrap();
        assert_eq!(draw.cards[0].selected_by, Some(5));

        store.apply(&ServerEvent::CardDrawReset);
        assert!(store.card_draw().is_none());
    }

    #[test]
    fn modal_flags_toggle_independently() {
        let store = ScoreboardStore::new();
        store.open_modal(Modal::Team);
        store.open_modal(Modal::ScoreInput);
        store.close_modal(Modal::Team);

        assert!(!store.is_modal_open(Modal::Team));
        assert!(store.is_modal_open(Modal::ScoreInput));
    }

    #[test]
    fn reset_clears_everything() {
        let store = ScoreboardStore::new();
        store.replace_roster(vec![Participant::new(1, "A")]);
        store.open_modal(Modal::Grade);
        store.set_female_handicap(10);

        store.reset();

        assert!(store.is_empty());
        assert!(!store.is_modal_open(Modal::Grade));
        assert_eq!(store.ui().female_handicap, 0);
    }

    #[test]
    fn clear_team_assignments_unassigns_everyone() {
        let store = ScoreboardStore::new();
        let mut a = Participant::new(1, "A");
        a.team_number = 1;
        let mut b = Participant::new(2, "B");
        b.team_number = 2;
        store.replace_roster(vec![a, b]);

        store.clear_team_assignments();

        assert!(store
            .roster()
            .iter()
            .all(|p| p.team_number == UNASSIGNED_TEAM));
    }
}
