use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Days, Local, NaiveDate};
use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use roomledger::access::AccessPolicy;
use roomledger::hotel::HotelManager;
use roomledger::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<HotelManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("roomledger_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let hotels = Arc::new(HotelManager::new(dir, 1000));
    let policy = Arc::new(AccessPolicy::new(["frontdesk".to_string()]));

    let hotels2 = hotels.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let hotels = hotels2.clone();
            let policy = policy.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, hotels, policy, "roomledger".to_string(), None)
                    .await;
            });
        }
    });

    (addr, hotels)
}

async fn connect(addr: SocketAddr, user: &str, hotel: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(hotel)
        .user(user)
        .password("roomledger");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

fn day(offset: u64) -> NaiveDate {
    Local::now().date_naive() + Days::new(offset)
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn add_rooms(client: &Client, rooms: &[(u32, u32, u64)]) {
    for (number, capacity, rate) in rooms {
        client
            .batch_execute(&format!(
                "INSERT INTO rooms (number, capacity, rate) VALUES ({number}, {capacity}, {rate})"
            ))
            .await
            .unwrap();
    }
}

async fn book(client: &Client, id: Ulid, start: NaiveDate, nights: u32, party: u32) {
    client
        .batch_execute(&format!(
            "INSERT INTO reservations (id, start, nights, party_size) \
             VALUES ('{id}', '{start}', {nights}, {party})"
        ))
        .await
        .unwrap();
}

async fn reservation(client: &Client, id: Ulid) -> SimpleQueryRow {
    let mut found = rows(client, &format!("SELECT * FROM reservations WHERE id = '{id}'")).await;
    assert_eq!(found.len(), 1, "reservation {id} not visible");
    found.remove(0)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn rooms_round_trip_through_sql() {
    let (addr, _hotels) = start_test_server().await;
    let staff = connect(addr, "frontdesk", "test").await;

    add_rooms(&staff, &[(102, 2, 9000), (101, 1, 5000)]).await;

    let listed = rows(&staff, "SELECT * FROM rooms").await;
    let numbers: Vec<_> = listed.iter().map(|r| r.get("number").unwrap().to_string()).collect();
    assert_eq!(numbers, ["101", "102"]);

    staff
        .batch_execute("UPDATE rooms SET rate = 9500 WHERE number = 102")
        .await
        .unwrap();
    let one = rows(&staff, "SELECT * FROM rooms WHERE number = 102").await;
    assert_eq!(one[0].get("capacity"), Some("2"));
    assert_eq!(one[0].get("rate"), Some("9500"));

    staff.batch_execute("DELETE FROM rooms WHERE number = 101").await.unwrap();
    assert_eq!(rows(&staff, "SELECT * FROM rooms").await.len(), 1);
}

#[tokio::test]
async fn booking_lifecycle() {
    let (addr, _hotels) = start_test_server().await;
    let staff = connect(addr, "frontdesk", "test").await;
    add_rooms(&staff, &[(101, 2, 10_000), (102, 2, 12_000), (103, 4, 20_000)]).await;

    let guest = connect(addr, "ada", "test").await;
    let id = Ulid::new();
    book(&guest, id, day(10), 3, 2).await;

    let row = reservation(&guest, id).await;
    assert_eq!(row.get("customer"), Some("ada"));
    assert_eq!(row.get("requester"), Some("ada"));
    assert_eq!(row.get("rooms"), Some("101"));
    assert_eq!(row.get("price"), Some("30000"));
    assert_eq!(row.get("status"), Some("allocated"));

    // Grow the party; the allocator moves it to the four-bed room.
    guest
        .batch_execute(&format!(
            "UPDATE reservations SET party_size = 4 WHERE id = '{id}'"
        ))
        .await
        .unwrap();
    let row = reservation(&guest, id).await;
    assert_eq!(row.get("rooms"), Some("103"));
    assert_eq!(row.get("price"), Some("60000"));

    // Wrong amount is refused, the right one settles the bill.
    let err = staff
        .batch_execute(&format!(
            "UPDATE reservations SET paid = true WHERE id = '{id}' AND price = 1"
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::RAISE_EXCEPTION));
    staff
        .batch_execute(&format!(
            "UPDATE reservations SET paid = true WHERE id = '{id}' AND price = 60000"
        ))
        .await
        .unwrap();
    assert_eq!(reservation(&guest, id).await.get("status"), Some("paid"));

    guest
        .batch_execute(&format!("DELETE FROM reservations WHERE id = '{id}'"))
        .await
        .unwrap();
    assert!(rows(&guest, &format!("SELECT * FROM reservations WHERE id = '{id}'"))
        .await
        .is_empty());
}

#[tokio::test]
async fn availability_and_room_replacement() {
    let (addr, _hotels) = start_test_server().await;
    let staff = connect(addr, "frontdesk", "test").await;
    add_rooms(&staff, &[(101, 2, 100), (102, 2, 100), (103, 1, 100)]).await;

    let id = Ulid::new();
    book(&staff, id, day(5), 2, 2).await;

    let free = rows(
        &staff,
        &format!("SELECT * FROM availability WHERE start = '{}' AND nights = 2", day(5)),
    )
    .await;
    let numbers: Vec<_> = free.iter().map(|r| r.get("number").unwrap().to_string()).collect();
    assert_eq!(numbers, ["102", "103"]);

    // Same-day turnover: the room is free again on the checkout date.
    let later = rows(
        &staff,
        &format!("SELECT * FROM availability WHERE start = '{}' AND nights = 1", day(7)),
    )
    .await;
    assert_eq!(later.len(), 3);

    let candidates = rows(
        &staff,
        &format!("SELECT * FROM room_candidates WHERE reservation_id = '{id}' AND room = 101"),
    )
    .await;
    assert!(candidates.iter().any(|r| r.get("number") == Some("102")));

    staff
        .batch_execute(&format!(
            "UPDATE reservation_rooms SET room = 102 WHERE reservation_id = '{id}' AND room = 101"
        ))
        .await
        .unwrap();
    assert_eq!(reservation(&staff, id).await.get("rooms"), Some("102"));

    // A single bed cannot hold the party of two.
    let err = staff
        .batch_execute(&format!(
            "UPDATE reservation_rooms SET room = 103 WHERE reservation_id = '{id}' AND room = 102"
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::RAISE_EXCEPTION));
}

#[tokio::test]
async fn overbooking_is_refused() {
    let (addr, _hotels) = start_test_server().await;
    let staff = connect(addr, "frontdesk", "test").await;
    add_rooms(&staff, &[(1, 2, 100)]).await;

    book(&staff, Ulid::new(), day(3), 4, 2).await;
    let err = staff
        .batch_execute(&format!(
            "INSERT INTO reservations (id, start, nights, party_size) VALUES ('{}', '{}', 1, 1)",
            Ulid::new(),
            day(4)
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::RAISE_EXCEPTION));
}

#[tokio::test]
async fn guests_cannot_use_staff_operations() {
    let (addr, _hotels) = start_test_server().await;
    let staff = connect(addr, "frontdesk", "test").await;
    add_rooms(&staff, &[(101, 2, 100)]).await;
    let guest = connect(addr, "ada", "test").await;

    let err = guest
        .batch_execute("INSERT INTO rooms (number, capacity, rate) VALUES (9, 1, 1)")
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::INSUFFICIENT_PRIVILEGE));

    let err = guest
        .batch_execute(&format!(
            "INSERT INTO reservations (id, customer, start, nights, party_size) \
             VALUES ('{}', 'grace', '{}', 1, 1)",
            Ulid::new(),
            day(1)
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::INSUFFICIENT_PRIVILEGE));

    // Staff may book on behalf of a customer.
    let id = Ulid::new();
    staff
        .batch_execute(&format!(
            "INSERT INTO reservations (id, customer, start, nights, party_size) \
             VALUES ('{id}', 'grace', '{}', 1, 1)",
            day(1)
        ))
        .await
        .unwrap();

    let err = guest
        .batch_execute(&format!(
            "UPDATE reservations SET paid = true WHERE id = '{id}' AND price = 100"
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::INSUFFICIENT_PRIVILEGE));

    let err = guest
        .batch_execute(&format!("DELETE FROM reservations WHERE id = '{id}'"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::INSUFFICIENT_PRIVILEGE));
}

#[tokio::test]
async fn guests_only_see_their_own_reservations() {
    let (addr, _hotels) = start_test_server().await;
    let staff = connect(addr, "frontdesk", "test").await;
    add_rooms(&staff, &[(1, 1, 100), (2, 1, 100)]).await;

    let ada = connect(addr, "ada", "test").await;
    let grace = connect(addr, "grace", "test").await;
    let ada_id = Ulid::new();
    book(&ada, ada_id, day(2), 1, 1).await;
    book(&grace, Ulid::new(), day(2), 1, 1).await;

    let seen = rows(&ada, "SELECT * FROM reservations").await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("id"), Some(ada_id.to_string().as_str()));

    assert_eq!(rows(&staff, "SELECT * FROM reservations").await.len(), 2);
    let filtered = rows(&staff, "SELECT * FROM reservations WHERE customer ILIKE '%GRA%'").await;
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].get("customer"), Some("grace"));
}

#[tokio::test]
async fn extended_query_binds_parameters() {
    let (addr, _hotels) = start_test_server().await;
    let staff = connect(addr, "frontdesk", "test").await;
    add_rooms(&staff, &[(101, 2, 100)]).await;

    let id = Ulid::new().to_string();
    let start = day(6).to_string();
    staff
        .execute(
            "INSERT INTO reservations (id, customer, start, nights, party_size) \
             VALUES ($1, $2, $3, $4, $5)",
            &[&id, &"o'brien", &start, &"2", &"1"],
        )
        .await
        .unwrap();

    let found = staff
        .query("SELECT * FROM reservations WHERE id = $1", &[&id])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get::<_, &str>("customer"), "o'brien");
    assert_eq!(found[0].get::<_, &str>("start"), start);
}

#[tokio::test]
async fn hotels_are_isolated_by_database() {
    let (addr, hotels) = start_test_server().await;
    let north = connect(addr, "frontdesk", "north").await;
    let south = connect(addr, "frontdesk", "south").await;

    add_rooms(&north, &[(1, 2, 100)]).await;
    assert_eq!(rows(&north, "SELECT * FROM rooms").await.len(), 1);
    assert!(rows(&south, "SELECT * FROM rooms").await.is_empty());
    assert_eq!(hotels.len(), 2);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let (addr, _hotels) = start_test_server().await;
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("test")
        .user("frontdesk")
        .password("nope");
    assert!(config.connect(NoTls).await.is_err());
}
