//! Lobby presence and position reconciliation.
//!
//! [`LobbyPresence`] keeps this client's view of who is in the lobby and
//! where. Three inputs feed it:
//!
//! - the roster fetched during [`bootstrap`](LobbyPresence::bootstrap),
//! - presence broadcasts from other clients ([`apply_event`](LobbyPresence::apply_event)),
//! - the local user's optimistic moves ([`begin_move`](LobbyPresence::begin_move) /
//!   [`complete_move`](LobbyPresence::complete_move)).
//!
//! Moves are optimistic: the new position is written to both the "my
//! position" slot and the member map before the backend is asked, and both
//! are restored from a snapshot taken before the write if the backend
//! refuses. Only one move may be pending at a time.
//!
//! The occupied-cell check is local. Two clients moving into the same cell at
//! once both pass it; the backend keeps whichever write lands last and the
//! losing client is only corrected by a later broadcast or roster fetch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::BackendApi;
use crate::error::Result;
use crate::normalize::normalize_lobby;
use crate::protocol::{GridPosition, LobbyEvent, LobbySnapshot, Member, ThreadId, UserId};

/// Size of the lobby grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridBounds {
    pub cols: u16,
    pub rows: u16,
}

impl GridBounds {
    pub fn contains(&self, position: GridPosition) -> bool {
        position.col < self.cols && position.row < self.rows
    }
}

impl Default for GridBounds {
    fn default() -> Self {
        Self { cols: 10, rows: 6 }
    }
}

/// Configuration for a [`LobbyPresence`].
#[derive(Debug, Clone, Default)]
pub struct LobbyConfig {
    pub bounds: GridBounds,
}

impl LobbyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_bounds(mut self, cols: u16, rows: u16) -> Self {
        self.bounds = GridBounds { cols, rows };
        self
    }
}

/// Arrow-key movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// The neighbouring cell, or `None` when stepping below zero.
    pub fn step(self, from: GridPosition) -> Option<GridPosition> {
        let GridPosition { col, row } = from;
        let (col, row) = match self {
            Self::Up => (col, row.checked_sub(1)?),
            Self::Down => (col, row.checked_add(1)?),
            Self::Left => (col.checked_sub(1)?, row),
            Self::Right => (col.checked_add(1)?, row),
        };
        Some(GridPosition { col, row })
    }
}

/// Why a move gesture was refused before reaching the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveRejection {
    #[error("({}, {}) is outside the lobby grid", .0.col, .0.row)]
    OutOfBounds(GridPosition),
    #[error("cannot step {direction:?} past the edge of the grid")]
    OffEdge {
        from: GridPosition,
        direction: Direction,
    },
    #[error("cell is occupied by {0}")]
    Occupied(UserId),
    #[error("another move is still pending")]
    MovePending,
    #[error("not placed on the grid yet")]
    NotPlaced,
}

/// State captured before an optimistic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveSnapshot {
    pub my_position: Option<GridPosition>,
    pub my_entry: Option<Member>,
}

/// The local user's movement state machine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MoveState {
    #[default]
    Idle,
    /// The optimistic position is applied and the backend has not answered.
    Pending {
        target: GridPosition,
        snapshot: MoveSnapshot,
    },
    /// The last move failed and was reverted. Accepts new gestures like `Idle`.
    RolledBack {
        attempted: GridPosition,
        restored: Option<GridPosition>,
    },
}

/// Client-side view of the lobby.
#[derive(Debug)]
pub struct LobbyPresence {
    config: LobbyConfig,
    local_user_id: UserId,
    thread_id: Option<ThreadId>,
    members: HashMap<UserId, Member>,
    my_position: Option<GridPosition>,
    move_state: MoveState,
}

impl LobbyPresence {
    pub fn new(local_user_id: impl Into<UserId>, config: LobbyConfig) -> Self {
        Self {
            config,
            local_user_id: local_user_id.into(),
            thread_id: None,
            members: HashMap::new(),
            my_position: None,
            move_state: MoveState::Idle,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    /// The lobby thread id, known after the roster has been fetched.
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn bounds(&self) -> GridBounds {
        self.config.bounds
    }

    pub fn my_position(&self) -> Option<GridPosition> {
        self.my_position
    }

    pub fn move_state(&self) -> &MoveState {
        &self.move_state
    }

    pub fn is_move_pending(&self) -> bool {
        matches!(self.move_state, MoveState::Pending { .. })
    }

    pub fn member(&self, user_id: &str) -> Option<&Member> {
        self.members.get(user_id)
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// The member standing on `position`, if any.
    pub fn occupant(&self, position: GridPosition) -> Option<&Member> {
        self.members
            .values()
            .find(|m| m.position == Some(position))
    }

    // ── Bootstrap / teardown ────────────────────────────────────────

    /// Join the lobby, then fetch the roster.
    ///
    /// The roster is fetched after the join completes so that it already
    /// contains the local user's own profile and position. `cancelled` is
    /// checked after each step; once set, the remaining steps are skipped and
    /// local state is left untouched by them.
    ///
    /// # Errors
    ///
    /// Propagates the first failing backend call.
    pub async fn bootstrap<B>(&mut self, api: &B, cancelled: &AtomicBool) -> Result<()>
    where
        B: BackendApi + ?Sized,
    {
        let joined = api.join_lobby().await?;
        if cancelled.load(Ordering::Acquire) {
            debug!("lobby bootstrap cancelled after join");
            return Ok(());
        }
        self.my_position = joined.position;

        let snapshot = api.get_lobby().await?;
        if cancelled.load(Ordering::Acquire) {
            debug!("lobby bootstrap cancelled after roster fetch");
            return Ok(());
        }
        self.replace_roster(snapshot);
        debug!(
            members = self.members.len(),
            position = ?self.my_position,
            "lobby bootstrapped"
        );
        Ok(())
    }

    /// Replace the member map with a fetched roster.
    ///
    /// The roster is ground truth. My position follows my roster entry when it
    /// has one; otherwise the current value is kept and written into my entry.
    pub fn replace_roster(&mut self, snapshot: LobbySnapshot) {
        self.thread_id = Some(snapshot.thread_id);
        self.members = snapshot
            .members
            .into_iter()
            .map(|m| (m.user_id.clone(), m))
            .collect();

        if let Some(me) = self.members.get_mut(&self.local_user_id) {
            match me.position {
                Some(position) => self.my_position = Some(position),
                None => me.position = self.my_position,
            }
        }
    }

    /// Leave the lobby and forget local state. Backend failures are logged
    /// and swallowed.
    pub async fn leave<B>(&mut self, api: &B)
    where
        B: BackendApi + ?Sized,
    {
        if let Err(e) = api.leave_lobby().await {
            warn!("leave lobby failed: {e}");
        }
        self.members.clear();
        self.my_position = None;
        self.thread_id = None;
        self.move_state = MoveState::Idle;
    }

    // ── Broadcasts ──────────────────────────────────────────────────

    /// Apply a presence broadcast. Last write wins per user; my position slot
    /// is never touched.
    pub fn apply_event(&mut self, event: LobbyEvent) {
        match event {
            LobbyEvent::MemberJoined(member) => {
                debug!(user_id = %member.user_id, "member joined lobby");
                self.members.insert(member.user_id.clone(), member);
            }
            LobbyEvent::MemberLeft { user_id } => {
                debug!(user_id = %user_id, "member left lobby");
                self.members.remove(&user_id);
            }
            LobbyEvent::PositionUpdated { user_id, position } => {
                match self.members.get_mut(&user_id) {
                    Some(member) => member.position = Some(position),
                    None => debug!(user_id = %user_id, "position update for unknown member"),
                }
            }
        }
    }

    /// Normalize and apply a raw lobby channel envelope. Returns `false` for
    /// envelopes that are not presence broadcasts.
    pub fn apply_envelope(&mut self, raw: &Value) -> bool {
        match normalize_lobby(raw) {
            Some(event) => {
                self.apply_event(event);
                true
            }
            None => {
                debug!("ignoring non-presence lobby envelope");
                false
            }
        }
    }

    // ── Movement ────────────────────────────────────────────────────

    /// Validate and optimistically apply a move to `target`.
    ///
    /// On success the move is `Pending` and the caller must send it to the
    /// backend and report the outcome through
    /// [`complete_move`](Self::complete_move).
    ///
    /// # Errors
    ///
    /// Returns a [`MoveRejection`] and leaves all state unchanged when the
    /// target is off the grid, occupied by someone else, or a move is already
    /// pending.
    pub fn begin_move(&mut self, target: GridPosition) -> std::result::Result<(), MoveRejection> {
        if self.is_move_pending() {
            return Err(MoveRejection::MovePending);
        }
        if !self.config.bounds.contains(target) {
            return Err(MoveRejection::OutOfBounds(target));
        }
        if let Some(occupant) = self.occupant(target) {
            if occupant.user_id != self.local_user_id {
                return Err(MoveRejection::Occupied(occupant.user_id.clone()));
            }
        }

        let snapshot = MoveSnapshot {
            my_position: self.my_position,
            my_entry: self.members.get(&self.local_user_id).cloned(),
        };

        self.my_position = Some(target);
        if let Some(me) = self.members.get_mut(&self.local_user_id) {
            me.position = Some(target);
        }
        self.move_state = MoveState::Pending { target, snapshot };
        debug!(col = target.col, row = target.row, "optimistic move applied");
        Ok(())
    }

    /// Arrow-key variant of [`begin_move`](Self::begin_move). Returns the
    /// target cell.
    ///
    /// # Errors
    ///
    /// [`MoveRejection::NotPlaced`] without a current position and
    /// [`MoveRejection::OffEdge`] when the step would go below row or column
    /// zero, otherwise as [`begin_move`](Self::begin_move).
    pub fn begin_step(
        &mut self,
        direction: Direction,
    ) -> std::result::Result<GridPosition, MoveRejection> {
        if self.is_move_pending() {
            return Err(MoveRejection::MovePending);
        }
        let from = self.my_position.ok_or(MoveRejection::NotPlaced)?;
        let target = direction
            .step(from)
            .ok_or(MoveRejection::OffEdge { from, direction })?;
        self.begin_move(target)?;
        Ok(target)
    }

    /// Settle the pending move. Success keeps the optimistic state; failure
    /// restores the snapshot. No-op when nothing is pending.
    pub fn complete_move<E: std::fmt::Display>(&mut self, outcome: std::result::Result<(), E>) {
        let MoveState::Pending { target, snapshot } = std::mem::take(&mut self.move_state) else {
            debug!("complete_move without a pending move");
            return;
        };

        match outcome {
            Ok(()) => {
                debug!(col = target.col, row = target.row, "move confirmed");
                self.move_state = MoveState::Idle;
            }
            Err(e) => {
                warn!(col = target.col, row = target.row, "move failed, rolling back: {e}");
                self.my_position = snapshot.my_position;
                match snapshot.my_entry {
                    Some(entry) => {
                        self.members.insert(entry.user_id.clone(), entry);
                    }
                    None => {
                        self.members.remove(&self.local_user_id);
                    }
                }
                self.move_state = MoveState::RolledBack {
                    attempted: target,
                    restored: snapshot.my_position,
                };
            }
        }
    }

    /// Move to `target`: optimistic apply, backend call, settle.
    ///
    /// # Errors
    ///
    /// [`MoveRejected`](crate::AtlantiumError::MoveRejected) when the gesture is
    /// refused locally, or the backend error after the move has been rolled
    /// back.
    pub async fn move_to<B>(&mut self, api: &B, target: GridPosition) -> Result<()>
    where
        B: BackendApi + ?Sized,
    {
        self.begin_move(target)?;
        self.send_pending(api, target).await
    }

    /// Arrow-key variant of [`move_to`](Self::move_to).
    ///
    /// # Errors
    ///
    /// As [`move_to`](Self::move_to).
    pub async fn step<B>(&mut self, api: &B, direction: Direction) -> Result<GridPosition>
    where
        B: BackendApi + ?Sized,
    {
        let target = self.begin_step(direction)?;
        self.send_pending(api, target).await?;
        Ok(target)
    }

    async fn send_pending<B>(&mut self, api: &B, target: GridPosition) -> Result<()>
    where
        B: BackendApi + ?Sized,
    {
        match api.move_lobby(target.col, target.row).await {
            Ok(()) => {
                self.complete_move::<crate::AtlantiumError>(Ok(()));
                Ok(())
            }
            Err(e) => {
                self.complete_move(Err(&e));
                Err(e)
            }
        }
    }
}
