use crate::model::*;

use super::availability::total_capacity;
use super::EngineError;

// ── Allocation Algorithm ──────────────────────────────────────────

/// Pick rooms from `free` (ascending by number) that together sleep `party_size`.
///
/// 1. The first room whose capacity equals the party exactly wins outright.
/// 2. Otherwise rooms are taken in order, accumulating capacity until the
///    party is covered.
///
/// Greedy, not optimal: it does not minimise room count, leftover beds or
/// price. Nothing is written here; the caller commits the returned rooms.
pub fn allocate(free: &[&RoomState], party_size: u32) -> Result<Vec<RoomNumber>, EngineError> {
    if party_size == 0 {
        return Err(EngineError::InvalidParty(party_size));
    }

    if let Some(exact) = free.iter().find(|r| r.capacity == party_size) {
        return Ok(vec![exact.number]);
    }

    let mut remaining = i64::from(party_size);
    let mut selected = Vec::new();
    for room in free {
        if remaining <= 0 {
            break;
        }
        selected.push(room.number);
        remaining -= i64::from(room.capacity);
    }

    if remaining > 0 {
        return Err(EngineError::InsufficientCapacity {
            party_size,
            available: total_capacity(free.iter().copied()),
        });
    }
    Ok(selected)
}
