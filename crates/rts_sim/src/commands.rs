//! Player commands and action point admission.
//!
//! Commands wait in a per-player FIFO. Each tick the player's action point
//! budget regenerates, then commands are released from the front for as
//! long as the budget covers them. A command the budget cannot cover blocks
//! everything behind it until enough points have accumulated.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ActionPointConfig;
use crate::objects::{ObjectId, PlayerId};
use crate::terrain::CellPos;

/// Identifier of a queued command. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(pub u64);

/// What a command asks its sources to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Act on another object: attack it, or work it if it is a resource.
    ObjectToObject(ObjectId),
    /// Move to a cell.
    ObjectToTerrain(CellPos),
}

/// Who a command is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandSource {
    /// Game objects of the issuing player.
    GameObject,
}

/// An immutable queued command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Identifier.
    pub id: CommandId,
    /// Issuing player.
    pub player: PlayerId,
    /// Addressee class.
    pub source: CommandSource,
    /// Objects carrying out the command.
    pub sources: Vec<ObjectId>,
    /// Order.
    pub kind: CommandKind,
    /// Action points the command consumes when released.
    pub cost: u32,
}

/// Regenerating action point budget of one player.
///
/// Regeneration is spread over the second: the points earned by tick `t`
/// are `floor((t + 1) · rate / tps) - floor(t · rate / tps)`, so the total
/// after `n` ticks is exactly `floor(n · rate / tps)` however the budget
/// was spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionController {
    points: u32,
    capacity: u32,
    rate_per_second: u32,
    ticks_per_second: u32,
}

impl AdmissionController {
    /// Create a budget holding `config.initial` points.
    ///
    /// # Panics
    ///
    /// Panics if `ticks_per_second` is zero.
    #[must_use]
    pub fn new(config: &ActionPointConfig, ticks_per_second: u32) -> Self {
        assert!(ticks_per_second > 0, "ticks per second must be positive");
        Self {
            points: config.initial.min(config.capacity),
            capacity: config.capacity,
            rate_per_second: config.rate_per_second,
            ticks_per_second,
        }
    }

    /// Points available now.
    #[must_use]
    pub const fn points(&self) -> u32 {
        self.points
    }

    /// Upper bound of the budget.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Points earned by tick `tick`.
    #[must_use]
    pub fn earned_at(&self, tick: u64) -> u32 {
        let rate = u64::from(self.rate_per_second);
        let tps = u64::from(self.ticks_per_second);
        let gained = (tick + 1) * rate / tps - tick * rate / tps;
        u32::try_from(gained).unwrap_or(u32::MAX)
    }

    /// Regenerate for tick `tick`, capped at capacity. Returns the points
    /// actually added.
    pub fn regenerate(&mut self, tick: u64) -> u32 {
        let before = self.points;
        self.points = self.points.saturating_add(self.earned_at(tick)).min(self.capacity);
        self.points - before
    }

    /// Spend `cost` points if available.
    pub fn try_spend(&mut self, cost: u32) -> bool {
        if cost > self.points {
            return false;
        }
        self.points -= cost;
        true
    }
}

/// Pending commands and budget of one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PlayerQueue {
    pending: VecDeque<Command>,
    budget: AdmissionController,
}

/// All players' queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandQueue {
    next_id: u64,
    config: ActionPointConfig,
    ticks_per_second: u32,
    players: BTreeMap<PlayerId, PlayerQueue>,
}

impl CommandQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new(config: ActionPointConfig, ticks_per_second: u32) -> Self {
        Self {
            next_id: 0,
            config,
            ticks_per_second,
            players: BTreeMap::new(),
        }
    }

    fn player_mut(&mut self, player: PlayerId) -> &mut PlayerQueue {
        let (config, tps) = (self.config, self.ticks_per_second);
        self.players.entry(player).or_insert_with(|| PlayerQueue {
            pending: VecDeque::new(),
            budget: AdmissionController::new(&config, tps),
        })
    }

    /// Append a command. `cost` is clamped to the budget capacity so every
    /// command can eventually be released.
    ///
    /// # Panics
    ///
    /// Panics when the command id space is exhausted.
    pub fn push(&mut self, player: PlayerId, sources: Vec<ObjectId>, kind: CommandKind, cost: u32) -> CommandId {
        let id = CommandId(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .unwrap_or_else(|| panic!("command id space exhausted"));
        let cost = cost.min(self.config.capacity);
        debug!(command = id.0, player = player.0, ?kind, cost, "Command queued");
        self.player_mut(player).pending.push_back(Command {
            id,
            player,
            source: CommandSource::GameObject,
            sources,
            kind,
            cost,
        });
        id
    }

    /// Run admission for tick `tick`.
    ///
    /// Per player, in player order: commands failing `is_live` are retired
    /// from the front, the budget regenerates, then commands are released
    /// in FIFO order until one would overdraw the budget.
    pub fn release(&mut self, tick: u64, is_live: impl Fn(&Command) -> bool) -> Vec<Command> {
        let mut released = Vec::new();
        for (player, queue) in &mut self.players {
            while queue.pending.front().is_some_and(|c| !is_live(c)) {
                if let Some(command) = queue.pending.pop_front() {
                    debug!(command = command.id.0, player = player.0, "Command retired");
                }
            }
            queue.budget.regenerate(tick);
            while let Some(command) = queue.pending.front() {
                if !is_live(command) {
                    queue.pending.pop_front();
                    continue;
                }
                if !queue.budget.try_spend(command.cost) {
                    break;
                }
                if let Some(command) = queue.pending.pop_front() {
                    debug!(
                        command = command.id.0,
                        player = player.0,
                        remaining = queue.budget.points(),
                        "Command released"
                    );
                    released.push(command);
                }
            }
        }
        released
    }

    /// Budget of a player, if it has ever queued a command.
    #[must_use]
    pub fn budget(&self, player: PlayerId) -> Option<&AdmissionController> {
        self.players.get(&player).map(|q| &q.budget)
    }

    /// Pending commands of a player, front first.
    pub fn pending(&self, player: PlayerId) -> impl Iterator<Item = &Command> {
        self.players.get(&player).into_iter().flat_map(|q| q.pending.iter())
    }

    /// Total number of pending commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.players.values().map(|q| q.pending.len()).sum()
    }

    /// Check if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The id the next command will get.
    #[must_use]
    pub const fn next_id(&self) -> CommandId {
        CommandId(self.next_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rate: u32, capacity: u32, initial: u32) -> ActionPointConfig {
        ActionPointConfig {
            rate_per_second: rate,
            capacity,
            initial,
        }
    }

    #[test]
    fn test_regeneration_spreads_evenly() {
        let budget = AdmissionController::new(&config(30, 1000, 0), 100);
        let gains: Vec<u32> = (0..10).map(|t| budget.earned_at(t)).collect();
        // 0.3 points per tick: one point every third or fourth tick.
        assert_eq!(gains, vec![0, 0, 0, 1, 0, 0, 1, 0, 0, 1]);
        let total: u32 = (0..100).map(|t| budget.earned_at(t)).sum();
        assert_eq!(total, 30);
    }

    #[test]
    fn test_regeneration_caps_at_capacity() {
        let mut budget = AdmissionController::new(&config(1000, 5, 4), 10);
        assert_eq!(budget.regenerate(0), 1);
        assert_eq!(budget.points(), 5);
        assert_eq!(budget.regenerate(1), 0);
    }

    #[test]
    fn test_fifo_blocks_behind_unaffordable() {
        let mut queue = CommandQueue::new(config(0, 10, 5), 100);
        let p = PlayerId(1);
        let a = queue.push(p, vec![ObjectId(1)], CommandKind::ObjectToTerrain(CellPos::new(1, 1)), 3);
        let b = queue.push(p, vec![ObjectId(2)], CommandKind::ObjectToTerrain(CellPos::new(2, 2)), 4);
        let c = queue.push(p, vec![ObjectId(3)], CommandKind::ObjectToTerrain(CellPos::new(3, 3)), 1);
        assert!(a < b && b < c);

        let released = queue.release(0, |_| true);
        assert_eq!(released.iter().map(|c| c.id).collect::<Vec<_>>(), vec![a]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.budget(p).unwrap().points(), 2);
    }

    #[test]
    fn test_cost_clamped_to_capacity() {
        let mut queue = CommandQueue::new(config(100, 4, 0), 10);
        queue.push(PlayerId(0), vec![ObjectId(1)], CommandKind::ObjectToObject(ObjectId(2)), 50);
        assert_eq!(queue.pending(PlayerId(0)).next().unwrap().cost, 4);
        let mut released = Vec::new();
        for tick in 0..4 {
            released.extend(queue.release(tick, |_| true));
        }
        assert_eq!(released.len(), 1);
    }

    #[test]
    fn test_dead_commands_retired() {
        let mut queue = CommandQueue::new(config(0, 10, 10), 100);
        let p = PlayerId(0);
        queue.push(p, vec![ObjectId(7)], CommandKind::ObjectToTerrain(CellPos::new(0, 0)), 2);
        let live = queue.push(p, vec![ObjectId(8)], CommandKind::ObjectToTerrain(CellPos::new(0, 0)), 2);
        let released = queue.release(0, |c| !c.sources.contains(&ObjectId(7)));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].id, live);
        assert_eq!(queue.budget(p).unwrap().points(), 8);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_players_have_separate_budgets() {
        let mut queue = CommandQueue::new(config(0, 3, 3), 100);
        queue.push(PlayerId(0), vec![ObjectId(1)], CommandKind::ObjectToTerrain(CellPos::new(0, 0)), 3);
        queue.push(PlayerId(1), vec![ObjectId(2)], CommandKind::ObjectToTerrain(CellPos::new(0, 0)), 3);
        assert_eq!(queue.release(0, |_| true).len(), 2);
    }
}
