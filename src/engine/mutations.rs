use std::sync::Arc;

use tokio::sync::{oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::allocation::allocate;
use super::availability::find_free_rooms;
use super::conflict::{check_room_fits, today, validate_party, validate_stay};
use super::{Engine, EngineError, RoomGuards, WalCommand};

fn validate_room_capacity(capacity: u32) -> Result<(), EngineError> {
    if capacity == 0 || capacity > MAX_ROOM_CAPACITY {
        return Err(EngineError::LimitExceeded("room capacity out of range"));
    }
    Ok(())
}

fn price_of(rooms: &RoomGuards, assigned: &[RoomNumber], nights: u32) -> Result<Money, EngineError> {
    stay_price(assigned.iter().map(|n| rooms[n].rate), nights)
        .ok_or(EngineError::LimitExceeded("price overflow"))
}

impl Engine {
    // ── Room catalog ─────────────────────────────────────────

    pub async fn create_room(
        &self,
        number: RoomNumber,
        capacity: u32,
        rate: Money,
    ) -> Result<(), EngineError> {
        validate_room_capacity(capacity)?;
        let _catalog = self.catalog.write().await;
        if self.rooms.len() >= MAX_ROOMS_PER_HOTEL {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&number) {
            return Err(EngineError::RoomExists(number));
        }

        let event = Event::RoomCreated { number, capacity, rate };
        self.wal_append(&event).await?;
        let room = RoomState::new(number, capacity, rate);
        self.rooms.insert(number, Arc::new(RwLock::new(room)));
        tracing::info!(room = number, capacity, rate, "room created");
        Ok(())
    }

    /// Change a room's capacity and/or rate; `None` keeps the current value.
    /// Capacity is frozen while any reservation holds the room.
    pub async fn update_room(
        &self,
        number: RoomNumber,
        capacity: Option<u32>,
        rate: Option<Money>,
    ) -> Result<(), EngineError> {
        if let Some(capacity) = capacity {
            validate_room_capacity(capacity)?;
        }
        let _catalog = self.catalog.read().await;
        let room = self
            .get_room(&number)
            .ok_or(EngineError::RoomNotFound(number))?;
        let mut guard = room.write().await;
        let capacity = capacity.unwrap_or(guard.capacity);
        let rate = rate.unwrap_or(guard.rate);
        if capacity != guard.capacity && !guard.occupied.is_empty() {
            return Err(EngineError::RoomInUse(number));
        }

        let event = Event::RoomUpdated { number, capacity, rate };
        self.wal_append(&event).await?;
        guard.capacity = capacity;
        guard.rate = rate;
        Ok(())
    }

    pub async fn delete_room(&self, number: RoomNumber) -> Result<(), EngineError> {
        let _catalog = self.catalog.write().await;
        let room = self
            .get_room(&number)
            .ok_or(EngineError::RoomNotFound(number))?;
        if !room.read().await.occupied.is_empty() {
            return Err(EngineError::RoomInUse(number));
        }

        let event = Event::RoomDeleted { number };
        self.wal_append(&event).await?;
        self.rooms.remove(&number);
        tracing::info!(room = number, "room deleted");
        Ok(())
    }

    // ── Reservation lifecycle ────────────────────────────────

    /// Validate the stay, pick rooms (the requested one, or by allocation),
    /// commit their dates and price the stay. On any failure no reservation
    /// exists afterwards and no room has changed.
    pub async fn create_reservation(
        &self,
        id: Ulid,
        request: StayRequest,
    ) -> Result<Reservation, EngineError> {
        let result = self.try_create_reservation(id, request).await;
        observability::record_outcome("create", &result);
        result
    }

    async fn try_create_reservation(
        &self,
        id: Ulid,
        request: StayRequest,
    ) -> Result<Reservation, EngineError> {
        validate_party(request.party_size)?;
        if request.customer.len() > MAX_CUSTOMER_LEN || request.requester.len() > MAX_CUSTOMER_LEN {
            return Err(EngineError::LimitExceeded("customer reference too long"));
        }
        let stay = validate_stay(request.start, request.nights, Some(today()))?;

        let mut reservation = Reservation {
            id,
            requester: request.requester,
            customer: request.customer,
            stay,
            party_size: request.party_size,
            rooms: Vec::new(),
            price: 0,
            paid: false,
        };

        let _catalog = self.catalog.read().await;
        // Every create holds the whole ledger from the free-room read to the commit.
        let mut rooms = self.lock_all_rooms().await;
        if self.reservations.contains_key(&id) {
            return Err(EngineError::ReservationExists(id));
        }
        if self.reservations.len() >= MAX_RESERVATIONS_PER_HOTEL {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }

        let selected = match request.room {
            Some(number) => {
                let room = rooms.get(&number).ok_or(EngineError::RoomNotFound(number))?;
                check_room_fits(room, &stay, reservation.party_size, None)?;
                vec![number]
            }
            None => {
                let free = find_free_rooms(rooms.values().map(|g| &**g), &stay, None);
                allocate(&free, reservation.party_size).inspect_err(|e| {
                    tracing::debug!(%id, party = reservation.party_size, start = %stay.start, "allocation failed: {e}");
                })?
            }
        };
        let price = price_of(&rooms, &selected, stay.nights)?;

        let event = Event::ReservationCreated {
            reservation: Reservation {
                rooms: selected,
                price,
                ..reservation.clone()
            },
        };
        self.persist_and_apply(&mut rooms, &mut reservation, &event).await?;
        self.reservations
            .insert(id, Arc::new(Mutex::new(reservation.clone())));

        metrics::histogram!(observability::ROOMS_PER_RESERVATION).record(reservation.rooms.len() as f64);
        tracing::info!(
            %id,
            rooms = ?reservation.rooms,
            start = %reservation.start(),
            nights = reservation.nights(),
            price = reservation.price,
            "reservation created"
        );
        Ok(reservation)
    }

    /// Move a reservation to new dates and/or party size.
    ///
    /// The current dates are released and allocation re-run as one
    /// transaction: the reservation's own occupancy counts as free while
    /// choosing, and nothing changes unless the new allocation succeeds.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        change: StayChange,
    ) -> Result<Reservation, EngineError> {
        let result = self.try_update_reservation(id, change).await;
        observability::record_outcome("update", &result);
        result
    }

    async fn try_update_reservation(
        &self,
        id: Ulid,
        change: StayChange,
    ) -> Result<Reservation, EngineError> {
        let _catalog = self.catalog.read().await;
        let mut reservation = self.lock_reservation(&id).await?;

        let party_size = change.party_size.unwrap_or(reservation.party_size);
        validate_party(party_size)?;
        let start = change.start.unwrap_or(reservation.start());
        let moved = start != reservation.start();
        let stay = validate_stay(
            start,
            change.nights.unwrap_or(reservation.nights()),
            moved.then(today),
        )?;

        let mut rooms = self.lock_all_rooms().await;
        let free = find_free_rooms(rooms.values().map(|g| &**g), &stay, Some(id));
        let selected = allocate(&free, party_size).inspect_err(|e| {
            tracing::debug!(%id, party = party_size, start = %stay.start, "reallocation failed: {e}");
        })?;
        let price = price_of(&rooms, &selected, stay.nights)?;

        let event = Event::ReservationUpdated {
            id,
            stay,
            party_size,
            rooms: selected,
            price,
        };
        self.persist_and_apply(&mut rooms, &mut reservation, &event).await?;

        tracing::info!(
            %id,
            rooms = ?reservation.rooms,
            start = %reservation.start(),
            nights = reservation.nights(),
            price = reservation.price,
            "reservation updated"
        );
        Ok(reservation.clone())
    }

    /// Release exactly this reservation's dates from its rooms and drop the record.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let result = self.try_cancel_reservation(id).await;
        observability::record_outcome("cancel", &result);
        result
    }

    async fn try_cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let _catalog = self.catalog.read().await;
        let mut reservation = self.lock_reservation(&id).await?;
        let mut rooms = self.lock_rooms(reservation.rooms.iter().copied()).await?;

        let event = Event::ReservationCancelled { id };
        self.persist_and_apply(&mut rooms, &mut reservation, &event).await?;
        self.reservations.remove(&id);

        tracing::info!(%id, rooms = ?reservation.rooms, "reservation cancelled");
        Ok(reservation.clone())
    }

    /// Swap one assigned room for another over the reservation's dates.
    pub async fn replace_room(
        &self,
        id: Ulid,
        old: RoomNumber,
        new: RoomNumber,
    ) -> Result<Reservation, EngineError> {
        let result = self.try_replace_room(id, old, new).await;
        observability::record_outcome("replace_room", &result);
        result
    }

    async fn try_replace_room(
        &self,
        id: Ulid,
        old: RoomNumber,
        new: RoomNumber,
    ) -> Result<Reservation, EngineError> {
        let _catalog = self.catalog.read().await;
        let mut reservation = self.lock_reservation(&id).await?;
        if !reservation.rooms.contains(&old) {
            return Err(EngineError::RoomNotFound(old));
        }
        if reservation.rooms.contains(&new) {
            return Err(EngineError::RoomUnavailable(new));
        }

        let mut rooms = self
            .lock_rooms(reservation.rooms.iter().copied().chain([new]))
            .await?;
        let candidate = &rooms[&new];
        if !candidate.is_free(&reservation.stay, None) {
            return Err(EngineError::RoomUnavailable(new));
        }
        let others: u32 = reservation
            .rooms
            .iter()
            .filter(|n| **n != old)
            .map(|n| rooms[n].capacity)
            .sum();
        let covered = others + candidate.capacity;
        if covered < reservation.party_size {
            return Err(EngineError::InsufficientCapacity {
                party_size: reservation.party_size,
                available: covered,
            });
        }

        let mut assigned: Vec<RoomNumber> = reservation
            .rooms
            .iter()
            .copied()
            .filter(|n| *n != old)
            .chain([new])
            .collect();
        assigned.sort_unstable();
        let price = price_of(&rooms, &assigned, reservation.nights())?;

        let event = Event::ReservationUpdated {
            id,
            stay: reservation.stay,
            party_size: reservation.party_size,
            rooms: assigned,
            price,
        };
        self.persist_and_apply(&mut rooms, &mut reservation, &event).await?;

        tracing::info!(%id, old, new, price = reservation.price, "room replaced");
        Ok(reservation.clone())
    }

    /// Payment boundary: flip `paid` when the verified amount matches the
    /// current price exactly. Repeating a successful call is a no-op.
    pub async fn mark_paid(&self, id: Ulid, verified_price: Money) -> Result<(), EngineError> {
        let result = self.try_mark_paid(id, verified_price).await;
        observability::record_outcome("mark_paid", &result);
        result
    }

    async fn try_mark_paid(&self, id: Ulid, verified_price: Money) -> Result<(), EngineError> {
        let _catalog = self.catalog.read().await;
        let mut reservation = self.lock_reservation(&id).await?;
        if reservation.price != verified_price {
            return Err(EngineError::PriceMismatch {
                expected: reservation.price,
                got: verified_price,
            });
        }
        if reservation.paid {
            return Ok(());
        }

        let event = Event::ReservationPaid { id };
        self.persist_and_apply(&mut RoomGuards::new(), &mut reservation, &event)
            .await?;
        tracing::info!(%id, price = verified_price, "reservation paid");
        Ok(())
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive: no ledger transaction can run while the snapshot is taken.
        let _catalog = self.catalog.write().await;
        let mut events = Vec::new();

        let mut numbers: Vec<RoomNumber> = self.rooms.iter().map(|e| *e.key()).collect();
        numbers.sort_unstable();
        for number in numbers {
            let Some(room) = self.get_room(&number) else { continue };
            let guard = room.read().await;
            events.push(Event::RoomCreated {
                number: guard.number,
                capacity: guard.capacity,
                rate: guard.rate,
            });
        }

        let mut ids: Vec<Ulid> = self.reservations.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        for id in ids {
            let Some(shared) = self.get_reservation_arc(&id) else { continue };
            let reservation = shared.lock().await.clone();
            events.push(Event::ReservationCreated { reservation });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
