use ulid::Ulid;

use crate::dates::StayDates;
use crate::model::*;

// ── Availability Index ────────────────────────────────────────────

/// Every room with no occupied date inside `stay`, ascending by room number.
///
/// Dates claimed by `ignoring` count as free, so a reservation being moved
/// never collides with its own current occupancy.
pub fn find_free_rooms<'a>(
    rooms: impl IntoIterator<Item = &'a RoomState>,
    stay: &StayDates,
    ignoring: Option<Ulid>,
) -> Vec<&'a RoomState> {
    let mut free: Vec<&RoomState> = rooms
        .into_iter()
        .filter(|room| room.is_free(stay, ignoring))
        .collect();
    free.sort_by_key(|room| room.number);
    free
}

/// Total beds across a set of rooms.
pub fn total_capacity<'a>(rooms: impl IntoIterator<Item = &'a RoomState>) -> u32 {
    rooms.into_iter().map(|r| r.capacity).sum()
}
