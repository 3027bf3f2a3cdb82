/// Max rooms a single hotel may register.
pub const MAX_ROOMS_PER_HOTEL: usize = 10_000;

/// Max live reservations held by a single hotel engine.
pub const MAX_RESERVATIONS_PER_HOTEL: usize = 1_000_000;

/// Longest stay accepted, in nights.
pub const MAX_NIGHTS: u32 = 365;

/// Largest party a single reservation may cover.
pub const MAX_PARTY_SIZE: u32 = 500;

/// Max capacity declared for one room.
pub const MAX_ROOM_CAPACITY: u32 = 100;

/// How far ahead of today a stay may start, in days.
pub const MAX_BOOKING_HORIZON_DAYS: u64 = 3 * 365;

/// Max length of customer and account references.
pub const MAX_CUSTOMER_LEN: usize = 256;

pub const MAX_HOTELS: usize = 1_000;
pub const MAX_HOTEL_NAME_LEN: usize = 128;
