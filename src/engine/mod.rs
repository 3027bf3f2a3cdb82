mod allocation;
mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use allocation::allocate;
pub use availability::{find_free_rooms, total_capacity};
pub use error::EngineError;

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub type SharedReservation = Arc<Mutex<Reservation>>;

/// Write guards over a set of rooms, keyed (and therefore acquired) in ascending order.
pub(super) type RoomGuards = BTreeMap<RoomNumber, OwnedRwLockWriteGuard<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The Room Ledger of one hotel plus the reservations that claim it.
///
/// Lock order: `catalog` → reservation mutex → room locks ascending by number.
pub struct Engine {
    pub(super) rooms: DashMap<RoomNumber, SharedRoomState>,
    pub(super) reservations: DashMap<Ulid, SharedReservation>,
    /// Read-held by every ledger transaction; write-held while rooms are
    /// added or removed and during compaction.
    pub(super) catalog: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

fn claim_stay(rooms: &mut RoomGuards, reservation: &Reservation) {
    for number in &reservation.rooms {
        if let Some(room) = rooms.get_mut(number) {
            room.reserve(reservation.id, &reservation.stay);
        }
    }
}

fn release_stay(rooms: &mut RoomGuards, reservation: &Reservation) {
    for number in &reservation.rooms {
        if let Some(room) = rooms.get_mut(number) {
            room.release(reservation.id, &reservation.stay);
        }
    }
}

/// Apply a reservation event to its record and the rooms it touches (no
/// locking: caller holds guards on every room of the old and new assignment).
fn apply_to_ledger(rooms: &mut RoomGuards, reservation: &mut Reservation, event: &Event) {
    match event {
        Event::ReservationCreated { reservation: created } => {
            *reservation = created.clone();
            claim_stay(rooms, reservation);
        }
        Event::ReservationUpdated {
            stay,
            party_size,
            rooms: assigned,
            price,
            ..
        } => {
            release_stay(rooms, reservation);
            reservation.stay = *stay;
            reservation.party_size = *party_size;
            reservation.rooms = assigned.clone();
            reservation.price = *price;
            claim_stay(rooms, reservation);
        }
        Event::ReservationCancelled { .. } => release_stay(rooms, reservation),
        Event::ReservationPaid { .. } => reservation.paid = true,
        // Room events are handled at the DashMap level, not here
        Event::RoomCreated { .. } | Event::RoomUpdated { .. } | Event::RoomDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            reservations: DashMap::new(),
            catalog: RwLock::new(()),
            wal_tx,
        };
        for event in &events {
            engine.replay_event(event);
        }
        if !events.is_empty() {
            tracing::info!(
                events = events.len(),
                rooms = engine.rooms.len(),
                reservations = engine.reservations.len(),
                "ledger replayed"
            );
        }
        Ok(engine)
    }

    /// Replay one logged event. We're the sole owner of every Arc here, so the
    /// try_ lock variants always succeed instantly. Never use blocking_lock
    /// here because this may run inside an async context (lazy hotel creation).
    fn replay_event(&self, event: &Event) {
        match event {
            Event::RoomCreated { number, capacity, rate } => {
                let room = RoomState::new(*number, *capacity, *rate);
                self.rooms.insert(*number, Arc::new(RwLock::new(room)));
            }
            Event::RoomUpdated { number, capacity, rate } => {
                if let Some(room) = self.get_room(number) {
                    let mut guard = room.try_write().expect("replay: uncontended write");
                    guard.capacity = *capacity;
                    guard.rate = *rate;
                }
            }
            Event::RoomDeleted { number } => {
                self.rooms.remove(number);
            }
            Event::ReservationCreated { reservation } => {
                let mut record = reservation.clone();
                let mut rooms = self.replay_guards(&reservation.rooms);
                apply_to_ledger(&mut rooms, &mut record, event);
                self.reservations
                    .insert(record.id, Arc::new(Mutex::new(record)));
            }
            Event::ReservationUpdated { id, .. }
            | Event::ReservationCancelled { id }
            | Event::ReservationPaid { id } => {
                let Some(shared) = self.get_reservation_arc(id) else { return };
                let mut record = shared.try_lock_owned().expect("replay: uncontended lock");
                let mut touched: Vec<RoomNumber> = record.rooms.clone();
                if let Event::ReservationUpdated { rooms: assigned, .. } = event {
                    touched.extend(assigned.iter().copied());
                }
                let mut rooms = self.replay_guards(&touched);
                apply_to_ledger(&mut rooms, &mut record, event);
                if matches!(event, Event::ReservationCancelled { .. }) {
                    self.reservations.remove(id);
                }
            }
        }
    }

    fn replay_guards(&self, numbers: &[RoomNumber]) -> RoomGuards {
        let numbers: BTreeSet<RoomNumber> = numbers.iter().copied().collect();
        numbers
            .into_iter()
            .filter_map(|n| {
                let room = self.get_room(&n)?;
                Some((n, room.try_write_owned().expect("replay: uncontended write")))
            })
            .collect()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, number: &RoomNumber) -> Option<SharedRoomState> {
        self.rooms.get(number).map(|e| e.value().clone())
    }

    pub(super) fn get_reservation_arc(&self, id: &Ulid) -> Option<SharedReservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    /// WAL-append + apply in one call. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        rooms: &mut RoomGuards,
        reservation: &mut Reservation,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_ledger(rooms, reservation, event);
        Ok(())
    }

    /// Write-lock the given rooms in ascending number order.
    pub(super) async fn lock_rooms(
        &self,
        numbers: impl IntoIterator<Item = RoomNumber>,
    ) -> Result<RoomGuards, EngineError> {
        let numbers: BTreeSet<RoomNumber> = numbers.into_iter().collect();
        let mut guards = RoomGuards::new();
        for number in numbers {
            let room = self
                .get_room(&number)
                .ok_or(EngineError::RoomNotFound(number))?;
            guards.insert(number, room.write_owned().await);
        }
        Ok(guards)
    }

    /// Write-lock the whole ledger. Caller must hold `catalog` so the room set is stable.
    pub(super) async fn lock_all_rooms(&self) -> RoomGuards {
        let numbers: BTreeSet<RoomNumber> = self.rooms.iter().map(|e| *e.key()).collect();
        let mut guards = RoomGuards::new();
        for number in numbers {
            if let Some(room) = self.get_room(&number) {
                guards.insert(number, room.write_owned().await);
            }
        }
        guards
    }

    /// Lookup reservation, acquire its lock, and confirm it was not cancelled while we waited.
    pub(super) async fn lock_reservation(
        &self,
        id: &Ulid,
    ) -> Result<OwnedMutexGuard<Reservation>, EngineError> {
        let shared = self
            .get_reservation_arc(id)
            .ok_or(EngineError::ReservationNotFound(*id))?;
        let guard = shared.clone().lock_owned().await;
        match self.reservations.get(id) {
            Some(entry) if Arc::ptr_eq(entry.value(), &shared) => Ok(guard),
            _ => Err(EngineError::ReservationNotFound(*id)),
        }
    }
}
