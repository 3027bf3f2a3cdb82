use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::dates::StayDates;

/// Minor currency units (cents). The only money type.
pub type Money = u64;

/// Rooms are identified by their door number.
pub type RoomNumber = u32;

/// One room in the ledger: what it holds, what it costs, and which dates are taken.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub number: RoomNumber,
    pub capacity: u32,
    /// Nightly rate.
    pub rate: Money,
    /// Occupied date → reservation that claimed it. A date can only be claimed once.
    pub occupied: BTreeMap<NaiveDate, Ulid>,
}

impl RoomState {
    pub fn new(number: RoomNumber, capacity: u32, rate: Money) -> Self {
        Self {
            number,
            capacity,
            rate,
            occupied: BTreeMap::new(),
        }
    }

    /// True if no date of `stay` is occupied, ignoring dates owned by `ignoring`.
    pub fn is_free(&self, stay: &StayDates, ignoring: Option<Ulid>) -> bool {
        self.occupied
            .range(stay.start..stay.end())
            .all(|(_, owner)| Some(*owner) == ignoring)
    }

    /// Claim every date of `stay` for `reservation_id`.
    /// Caller must have checked `is_free`; a double claim is a ledger defect.
    pub fn reserve(&mut self, reservation_id: Ulid, stay: &StayDates) {
        for date in stay.dates() {
            let prev = self.occupied.insert(date, reservation_id);
            debug_assert!(
                prev.is_none_or(|owner| owner == reservation_id),
                "room {} double-booked on {date}",
                self.number
            );
        }
    }

    /// Drop the dates of `stay` that belong to `reservation_id`. Dates owned by
    /// other reservations are left alone. Returns how many dates were freed.
    pub fn release(&mut self, reservation_id: Ulid, stay: &StayDates) -> usize {
        let owned: Vec<NaiveDate> = self
            .occupied
            .range(stay.start..stay.end())
            .filter(|(_, owner)| **owner == reservation_id)
            .map(|(date, _)| *date)
            .collect();
        for date in &owned {
            self.occupied.remove(date);
        }
        owned.len()
    }

    pub fn occupied_dates(&self) -> Vec<NaiveDate> {
        self.occupied.keys().copied().collect()
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            number: self.number,
            capacity: self.capacity,
            rate: self.rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    /// Validated, no rooms committed yet.
    New,
    Allocated,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    /// Account that placed the reservation.
    pub requester: String,
    pub customer: String,
    pub stay: StayDates,
    pub party_size: u32,
    /// Assigned rooms, ascending.
    pub rooms: Vec<RoomNumber>,
    pub price: Money,
    pub paid: bool,
}

impl Reservation {
    pub fn start(&self) -> NaiveDate {
        self.stay.start
    }

    pub fn nights(&self) -> u32 {
        self.stay.nights
    }

    pub fn end(&self) -> NaiveDate {
        self.stay.end()
    }

    pub fn occupied_dates(&self) -> Vec<NaiveDate> {
        self.stay.dates()
    }

    pub fn status(&self) -> ReservationStatus {
        if self.rooms.is_empty() {
            ReservationStatus::New
        } else if self.paid {
            ReservationStatus::Paid
        } else {
            ReservationStatus::Allocated
        }
    }
}

/// Σ(rate × nights). `None` on overflow.
pub fn stay_price(rates: impl IntoIterator<Item = Money>, nights: u32) -> Option<Money> {
    rates.into_iter().try_fold(0 as Money, |acc, rate| {
        rate.checked_mul(Money::from(nights))
            .and_then(|p| acc.checked_add(p))
    })
}

/// Ledger events, flat. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        number: RoomNumber,
        capacity: u32,
        rate: Money,
    },
    RoomUpdated {
        number: RoomNumber,
        capacity: u32,
        rate: Money,
    },
    RoomDeleted {
        number: RoomNumber,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationUpdated {
        id: Ulid,
        stay: StayDates,
        party_size: u32,
        rooms: Vec<RoomNumber>,
        price: Money,
    },
    ReservationCancelled {
        id: Ulid,
    },
    ReservationPaid {
        id: Ulid,
    },
}

// ── Requests and query result types ─────────────────────────────

/// A booking intent that already passed the capability layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StayRequest {
    pub requester: String,
    pub customer: String,
    pub start: NaiveDate,
    pub nights: u32,
    pub party_size: u32,
    /// Book exactly this room instead of running allocation.
    pub room: Option<RoomNumber>,
}

/// Fields to change on an existing reservation. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StayChange {
    pub start: Option<NaiveDate>,
    pub nights: Option<u32>,
    pub party_size: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub id: Option<Ulid>,
    pub requester: Option<String>,
    /// Case-insensitive substring match on the customer reference.
    pub customer_contains: Option<String>,
    pub start: Option<NaiveDate>,
    pub paid: Option<bool>,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.id.is_none_or(|id| id == r.id)
            && self.requester.as_ref().is_none_or(|req| *req == r.requester)
            && self.customer_contains.as_ref().is_none_or(|needle| {
                r.customer.to_lowercase().contains(&needle.to_lowercase())
            })
            && self.start.is_none_or(|s| s == r.start())
            && self.paid.is_none_or(|p| p == r.paid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomInfo {
    pub number: RoomNumber,
    pub capacity: u32,
    pub rate: Money,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 11, day).unwrap()
    }

    fn stay(day: u32, nights: u32) -> StayDates {
        StayDates::new(d(day), nights).unwrap()
    }

    #[test]
    fn reserve_and_release_own_dates_only() {
        let mut room = RoomState::new(101, 2, 10_000);
        let a = Ulid::new();
        let b = Ulid::new();
        room.reserve(a, &stay(1, 3));
        room.reserve(b, &stay(4, 2));
        assert_eq!(room.occupied.len(), 5);

        // Releasing a wider window for `a` must not touch `b`'s dates
        let freed = room.release(a, &stay(1, 6));
        assert_eq!(freed, 3);
        assert_eq!(room.occupied_dates(), vec![d(4), d(5)]);
    }

    #[test]
    fn release_unknown_reservation_is_noop() {
        let mut room = RoomState::new(101, 2, 10_000);
        room.reserve(Ulid::new(), &stay(1, 3));
        assert_eq!(room.release(Ulid::new(), &stay(1, 3)), 0);
        assert_eq!(room.occupied.len(), 3);
    }

    #[test]
    fn is_free_respects_half_open_stays() {
        let mut room = RoomState::new(101, 2, 10_000);
        let id = Ulid::new();
        room.reserve(id, &stay(5, 2)); // 5th, 6th
        assert!(room.is_free(&stay(1, 4), None)); // leaves on the 5th
        assert!(room.is_free(&stay(7, 3), None)); // arrives on checkout day
        assert!(!room.is_free(&stay(6, 1), None));
        assert!(!room.is_free(&stay(3, 10), None));
    }

    #[test]
    fn is_free_ignoring_own_reservation() {
        let mut room = RoomState::new(101, 2, 10_000);
        let mine = Ulid::new();
        let other = Ulid::new();
        room.reserve(mine, &stay(1, 3));
        assert!(room.is_free(&stay(2, 2), Some(mine)));
        room.reserve(other, &stay(4, 1));
        assert!(!room.is_free(&stay(2, 3), Some(mine)));
    }

    #[test]
    fn status_follows_rooms_and_paid() {
        let mut r = Reservation {
            id: Ulid::new(),
            requester: "alice".into(),
            customer: "alice".into(),
            stay: stay(1, 3),
            party_size: 2,
            rooms: vec![],
            price: 0,
            paid: false,
        };
        assert_eq!(r.status(), ReservationStatus::New);
        r.rooms.push(101);
        assert_eq!(r.status(), ReservationStatus::Allocated);
        r.paid = true;
        assert_eq!(r.status(), ReservationStatus::Paid);
        assert_eq!(r.end(), d(4));
        assert_eq!(r.occupied_dates(), vec![d(1), d(2), d(3)]);
    }

    #[test]
    fn price_is_rate_times_nights_summed() {
        assert_eq!(stay_price([10_000], 3), Some(30_000));
        assert_eq!(stay_price([10_000, 7_500], 2), Some(35_000));
        assert_eq!(stay_price(std::iter::empty(), 5), Some(0));
        assert_eq!(stay_price([Money::MAX], 2), None);
    }

    #[test]
    fn filter_matches_customer_substring_case_insensitive() {
        let r = Reservation {
            id: Ulid::new(),
            requester: "desk".into(),
            customer: "Ada Lovelace".into(),
            stay: stay(1, 1),
            party_size: 1,
            rooms: vec![101],
            price: 100,
            paid: false,
        };
        let f = ReservationFilter {
            customer_contains: Some("lovel".into()),
            ..Default::default()
        };
        assert!(f.matches(&r));
        let f = ReservationFilter {
            paid: Some(true),
            ..Default::default()
        };
        assert!(!f.matches(&r));
        let f = ReservationFilter {
            start: Some(d(1)),
            requester: Some("desk".into()),
            ..Default::default()
        };
        assert!(f.matches(&r));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated {
            reservation: Reservation {
                id: Ulid::new(),
                requester: "desk".into(),
                customer: "bob".into(),
                stay: stay(2, 4),
                party_size: 3,
                rooms: vec![101, 102],
                price: 80_000,
                paid: false,
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
