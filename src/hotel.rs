use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

/// One ledger per hotel, opened on first use. Each hotel gets its own
/// Engine + WAL + compactor. Hotel = database name of the pgwire connection.
pub struct HotelManager {
    engines: DashMap<String, Arc<Engine>>,
    opening: Mutex<()>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

/// Reduce a hotel name to a safe file stem.
fn sanitize(hotel: &str) -> io::Result<String> {
    if hotel.len() > MAX_HOTEL_NAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "hotel name too long"));
    }
    let safe: String = hotel
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty hotel name"));
    }
    Ok(safe)
}

impl HotelManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            opening: Mutex::new(()),
            data_dir,
            compact_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Get or lazily open the ledger for `hotel`. Names that sanitize to the
    /// same stem share one ledger, so a WAL file never has two writers.
    pub fn get_or_create(&self, hotel: &str) -> io::Result<Arc<Engine>> {
        let name = sanitize(hotel)?;
        if let Some(engine) = self.engines.get(&name) {
            return Ok(engine.value().clone());
        }

        // Openings are serialized so the count check and the insert cannot
        // interleave with another first connection.
        let _opening = self
            .opening
            .lock()
            .map_err(|_| io::Error::other("hotel registry poisoned"))?;
        if !self.engines.contains_key(&name) && self.engines.len() >= MAX_HOTELS {
            return Err(io::Error::other("too many hotels"));
        }
        let engine = self
            .engines
            .entry(name.clone())
            .or_try_insert_with(|| self.open(&name))?
            .value()
            .clone();
        metrics::gauge!(crate::observability::HOTELS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    fn open(&self, name: &str) -> io::Result<Arc<Engine>> {
        let engine = Arc::new(Engine::new(self.data_dir.join(format!("{name}.wal")))?);
        tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold));
        tracing::info!(hotel = name, "hotel ledger opened");
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StayRequest;
    use chrono::Days;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomledger_test_hotel").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn hotels_are_isolated() {
        let hm = HotelManager::new(test_data_dir("isolation"), 1000);
        let seaside = hm.get_or_create("seaside").unwrap();
        let alpine = hm.get_or_create("alpine").unwrap();

        seaside.create_room(101, 2, 10_000).await.unwrap();
        alpine.create_room(101, 2, 10_000).await.unwrap();

        let start = chrono::Local::now()
            .date_naive()
            .checked_add_days(Days::new(7))
            .unwrap();
        let request = StayRequest {
            requester: "ada".into(),
            customer: "ada".into(),
            start,
            nights: 2,
            party_size: 2,
            room: None,
        };
        seaside.create_reservation(Ulid::new(), request).await.unwrap();

        assert_eq!(seaside.room_occupancy(101).await.unwrap().len(), 2);
        assert!(alpine.room_occupancy(101).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lazy_creation() {
        let dir = test_data_dir("lazy");
        let hm = HotelManager::new(dir.clone(), 1000);
        assert!(hm.is_empty());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);

        let _engine = hm.get_or_create("harbour").unwrap();
        assert!(dir.join("harbour.wal").exists());
        assert_eq!(hm.len(), 1);
    }

    #[tokio::test]
    async fn same_engine_returned() {
        let hm = HotelManager::new(test_data_dir("same"), 1000);
        let a = hm.get_or_create("grand").unwrap();
        let b = hm.get_or_create("grand").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn names_sanitized() {
        let dir = test_data_dir("sanitize");
        let hm = HotelManager::new(dir.clone(), 1000);

        let evil = hm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());
        // Same stem, same ledger
        assert!(Arc::ptr_eq(&evil, &hm.get_or_create("evil").unwrap()));

        assert!(hm.get_or_create("../..").is_err());
        assert!(hm.get_or_create("").is_err());
    }

    #[tokio::test]
    async fn name_length_limit() {
        let hm = HotelManager::new(test_data_dir("name_len"), 1000);
        let err = hm
            .get_or_create(&"x".repeat(MAX_HOTEL_NAME_LEN + 1))
            .err()
            .unwrap();
        assert!(err.to_string().contains("hotel name too long"));
        assert!(hm.get_or_create(&"x".repeat(MAX_HOTEL_NAME_LEN)).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_connections_respect_hotel_limit() {
        let hm = Arc::new(HotelManager::new(test_data_dir("count_race"), 1000));
        for i in 0..MAX_HOTELS - 4 {
            hm.get_or_create(&format!("h{i}")).unwrap();
        }

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let hm = hm.clone();
                tokio::task::spawn_blocking(move || hm.get_or_create(&format!("late{i}")).is_ok())
            })
            .collect();
        let mut opened = 0;
        for h in handles {
            if h.await.unwrap() {
                opened += 1;
            }
        }

        assert_eq!(opened, 4);
        assert_eq!(hm.len(), MAX_HOTELS);
    }

    #[tokio::test]
    async fn hotel_count_limit() {
        let hm = HotelManager::new(test_data_dir("count_limit"), 1000);
        for i in 0..MAX_HOTELS {
            hm.get_or_create(&format!("h{i}")).unwrap();
        }
        let err = hm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many hotels"));
        // Existing hotels stay reachable
        assert!(hm.get_or_create("h0").is_ok());
    }
}
