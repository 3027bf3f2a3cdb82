use chrono::NaiveDate;
use tokio::sync::OwnedRwLockReadGuard;
use ulid::Ulid;

use crate::model::*;

use super::availability::find_free_rooms;
use super::conflict::validate_stay;
use super::{Engine, EngineError};

impl Engine {
    /// Read-lock the given rooms in ascending number order. Rooms deleted
    /// since the key snapshot are skipped.
    async fn read_rooms(&self, mut numbers: Vec<RoomNumber>) -> Vec<OwnedRwLockReadGuard<RoomState>> {
        numbers.sort_unstable();
        numbers.dedup();
        let mut guards = Vec::with_capacity(numbers.len());
        for number in numbers {
            if let Some(room) = self.get_room(&number) {
                guards.push(room.read_owned().await);
            }
        }
        guards
    }

    fn room_numbers(&self) -> Vec<RoomNumber> {
        self.rooms.iter().map(|e| *e.key()).collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    /// All rooms, ascending by number.
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        self.read_rooms(self.room_numbers())
            .await
            .iter()
            .map(|g| g.info())
            .collect()
    }

    pub async fn room_info(&self, number: RoomNumber) -> Result<RoomInfo, EngineError> {
        let room = self
            .get_room(&number)
            .ok_or(EngineError::RoomNotFound(number))?;
        let guard = room.read().await;
        Ok(guard.info())
    }

    /// Every occupied date of a room, ascending.
    pub async fn room_occupancy(&self, number: RoomNumber) -> Result<Vec<NaiveDate>, EngineError> {
        let room = self
            .get_room(&number)
            .ok_or(EngineError::RoomNotFound(number))?;
        let guard = room.read().await;
        Ok(guard.occupied_dates())
    }

    pub async fn get_reservation(&self, id: &Ulid) -> Result<Reservation, EngineError> {
        let shared = self
            .get_reservation_arc(id)
            .ok_or(EngineError::ReservationNotFound(*id))?;
        let guard = shared.lock().await;
        Ok(guard.clone())
    }

    /// Reservations matching `filter`, latest start first, ties broken by id.
    pub async fn list_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        if let Some(id) = filter.id {
            return match self.get_reservation(&id).await {
                Ok(r) if filter.matches(&r) => vec![r],
                _ => Vec::new(),
            };
        }

        let shared: Vec<_> = self.reservations.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for reservation in shared {
            let guard = reservation.lock().await;
            if filter.matches(&guard) {
                out.push(guard.clone());
            }
        }
        out.sort_by(|a, b| b.start().cmp(&a.start()).then(a.id.cmp(&b.id)));
        out
    }

    /// Rooms with no occupied date in `[start, start + nights)`, ascending.
    pub async fn free_rooms(&self, start: NaiveDate, nights: u32) -> Result<Vec<RoomInfo>, EngineError> {
        let stay = validate_stay(start, nights, None)?;
        let guards = self.read_rooms(self.room_numbers()).await;
        Ok(find_free_rooms(guards.iter().map(|g| &**g), &stay, None)
            .into_iter()
            .map(RoomState::info)
            .collect())
    }

    /// Rooms that could take over `old` in the reservation: free for its
    /// whole stay, not already assigned, and large enough that the party
    /// stays covered.
    pub async fn replacement_candidates(
        &self,
        id: &Ulid,
        old: RoomNumber,
    ) -> Result<Vec<RoomInfo>, EngineError> {
        let reservation = self.get_reservation(id).await?;
        if !reservation.rooms.contains(&old) {
            return Err(EngineError::RoomNotFound(old));
        }

        let guards = self.read_rooms(self.room_numbers()).await;
        let others: u32 = guards
            .iter()
            .filter(|g| g.number != old && reservation.rooms.contains(&g.number))
            .map(|g| g.capacity)
            .sum();
        Ok(find_free_rooms(guards.iter().map(|g| &**g), &reservation.stay, None)
            .into_iter()
            .filter(|room| !reservation.rooms.contains(&room.number))
            .filter(|room| others + room.capacity >= reservation.party_size)
            .map(RoomState::info)
            .collect())
    }
}
