//! Identity types shared across ingestion and query.

use std::fmt;

/// The partition grouping unit: one `(season, gameId)` pair maps to exactly
/// one partition file under the pool root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    /// Season the game belongs to, e.g. `2021`.
    pub season: i64,
    /// League-wide game identifier, e.g. `2021090900`.
    pub game_id: i64,
}

impl PartitionKey {
    /// Relative path of this partition's data file under the pool root.
    pub fn rel_path(&self) -> String {
        format!(
            "season={}/gameId={}/tracking.parquet",
            self.season, self.game_id
        )
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(season={}, gameId={})", self.season, self.game_id)
    }
}

/// The entity-level sampling unit: one discrete play of one game.
///
/// A play maps to a variable number of rows (one per player per frame, plus
/// one per frame for the ball) and never spans two partition files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayKey {
    /// Game the play belongs to.
    pub game_id: i64,
    /// Play identifier, unique within the game.
    pub play_id: i64,
}

impl fmt::Display for PlayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(gameId={}, playId={})", self.game_id, self.play_id)
    }
}

/// What a tracking row describes.
///
/// The source exports overload a null `nflId` to mean "this row is the ball".
/// The convention stays in the stored files (the column remains nullable for
/// Parquet compatibility), but in-memory code works with this tagged variant
/// instead of scattering null checks across call sites.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackedEntity {
    /// A player row, carrying the league-wide player identifier.
    Player(i64),
    /// The ball row of a frame.
    Ball,
}

impl TrackedEntity {
    /// Decodes the stored nullable `nflId` value.
    pub fn from_nfl_id(nfl_id: Option<i64>) -> Self {
        match nfl_id {
            Some(id) => TrackedEntity::Player(id),
            None => TrackedEntity::Ball,
        }
    }

    /// Returns true for the ball row of a frame.
    pub fn is_ball(&self) -> bool {
        matches!(self, TrackedEntity::Ball)
    }
}
