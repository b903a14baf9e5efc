use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use hotelcal::property::PropertyManager;
use hotelcal::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<PropertyManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("hotelcal_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let pm = Arc::new(PropertyManager::new(dir, 1000));

    let pm2 = pm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let pm = pm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, pm, "hotelcal".to_string(), None).await;
            });
        }
    });

    (addr, pm)
}

async fn connect(addr: SocketAddr, property: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(property)
        .user("hotelcal")
        .password("hotelcal");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn affected(client: &Client, sql: &str) -> u64 {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .find_map(|m| match m {
            SimpleQueryMessage::CommandComplete(n) => Some(n),
            _ => None,
        })
        .unwrap()
}

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    err.code().map(|c| c.code().to_string()).unwrap_or_default()
}

async fn create_room(client: &Client, total_rooms: u32) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, base_price, base_occupancy, max_adults, max_children, total_rooms, active, name) \
             VALUES ('{id}', 1000000, 2, 3, 2, {total_rooms}, true, 'Garden Suite')"
        ))
        .await
        .unwrap();
    id
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn rooms_round_trip() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "rooms_round_trip").await;

    let id = create_room(&client, 4).await;
    let listed = rows(&client, "SELECT * FROM rooms").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("id"), Some(id.to_string().as_str()));
    assert_eq!(listed[0].get("name"), Some("Garden Suite"));
    assert_eq!(listed[0].get("total_rooms"), Some("4"));

    assert_eq!(affected(&client, &format!("DELETE FROM rooms WHERE id = '{id}'")).await, 1);
    assert!(rows(&client, "SELECT * FROM rooms").await.is_empty());
}

#[tokio::test]
async fn reserve_and_release_over_the_wire() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "reserve_release").await;
    let id = create_room(&client, 1).await;

    let availability = format!(
        "SELECT * FROM availability WHERE room_id = '{id}' AND check_in = '2024-06-01' AND check_out = '2024-06-03'"
    );
    let before = rows(&client, &availability).await;
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].get("available"), Some("t"));
    assert_eq!(before[0].get("date"), None);

    let reserve = format!(
        "INSERT INTO reservations (room_id, check_in, check_out, quantity) \
         VALUES ('{id}', '2024-06-01', '2024-06-03', 1)"
    );
    assert_eq!(affected(&client, &reserve).await, 1);
    assert_eq!(sqlstate(&client, &reserve).await, "55000");

    let after = rows(&client, &availability).await;
    assert_eq!(after[0].get("available"), Some("f"));
    assert_eq!(after[0].get("date"), Some("2024-06-01"));
    assert_eq!(after[0].get("reason"), Some("sold_out"));

    client
        .batch_execute(&format!(
            "DELETE FROM reservations WHERE room_id = '{id}' AND check_in = '2024-06-01' \
             AND check_out = '2024-06-03' AND quantity = 1"
        ))
        .await
        .unwrap();
    let released = rows(&client, &availability).await;
    assert_eq!(released[0].get("available"), Some("t"));
}

#[tokio::test]
async fn collect_all_lists_every_night() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "collect_all").await;
    let id = create_room(&client, 2).await;

    for (date, stock, status) in [("2024-06-02", 2, "stop_sell"), ("2024-06-04", 0, "sold_out")] {
        client
            .batch_execute(&format!(
                "INSERT INTO pricing_days (room_id, date, price_room, price_combo, stock, status) \
                 VALUES ('{id}', '{date}', NULL, NULL, {stock}, '{status}')"
            ))
            .await
            .unwrap();
    }

    let failures = rows(
        &client,
        &format!(
            "SELECT * FROM availability WHERE room_id = '{id}' AND check_in = '2024-06-01' \
             AND check_out = '2024-06-06' AND mode = 'all'"
        ),
    )
    .await;
    let reasons: Vec<_> = failures
        .iter()
        .map(|r| (r.get("date").unwrap(), r.get("reason").unwrap()))
        .collect();
    assert_eq!(
        reasons,
        vec![("2024-06-02", "stop_sell"), ("2024-06-04", "sold_out")]
    );
}

#[tokio::test]
async fn daily_rules_fill_the_calendar() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "daily_rules").await;
    let id = create_room(&client, 3).await;

    let inserted = affected(
        &client,
        &format!(
            "INSERT INTO daily_rules (room_id, date_from, date_to, weekday, price_room, price_combo, stock, status) VALUES \
             ('{id}', '2024-06-01', '2024-06-30', 1, 900000, NULL, NULL, NULL)"
        ),
    )
    .await;
    assert_eq!(inserted, 4);

    let days = rows(
        &client,
        &format!(
            "SELECT * FROM calendar WHERE room_id = '{id}' AND date_from = '2024-06-01' AND date_to = '2024-06-08'"
        ),
    )
    .await;
    assert_eq!(days.len(), 7);
    let monday = days.iter().find(|r| r.get("date") == Some("2024-06-03")).unwrap();
    assert_eq!(monday.get("price_room"), Some("900000"));
    assert_eq!(monday.get("stock"), Some("3"));
    assert_eq!(monday.get("day_of_week"), Some("1"));
    let tuesday = days.iter().find(|r| r.get("date") == Some("2024-06-04")).unwrap();
    assert_eq!(tuesday.get("price_room"), None);

    let prices = rows(
        &client,
        &format!(
            "SELECT * FROM prices WHERE room_id = '{id}' AND check_in = '2024-06-03' AND check_out = '2024-06-05'"
        ),
    )
    .await;
    let got: Vec<_> = prices
        .iter()
        .map(|r| (r.get("price").unwrap(), r.get("source").unwrap()))
        .collect();
    assert_eq!(
        got,
        vec![("900000", "calendar_room"), ("1000000", "room_default")]
    );
}

#[tokio::test]
async fn quote_includes_surcharges_and_snapshot() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "quote").await;
    let id = create_room(&client, 5).await;
    let (adult, child) = (Ulid::new(), Ulid::new());

    client
        .batch_execute(&format!(
            "INSERT INTO surcharges (id, room_id, kind, amount, amount_type, is_per_night, is_mandatory, \
             applies_to_room, applies_to_combo) VALUES \
             ('{adult}', '{id}', 'adult', 200000, 'fixed', true, false, true, true), \
             ('{child}', '{id}', 'child', 100000, 'fixed', false, false, true, true)"
        ))
        .await
        .unwrap();
    assert_eq!(
        rows(&client, &format!("SELECT * FROM surcharges WHERE room_id = '{id}'")).await.len(),
        2
    );

    let lines = rows(
        &client,
        &format!(
            "SELECT * FROM quote WHERE room_id = '{id}' AND check_in = '2024-06-01' AND check_out = '2024-06-03' \
             AND adults = 3 AND children_ages = '5'"
        ),
    )
    .await;
    let kinds: Vec<_> = lines.iter().map(|r| r.get("line").unwrap()).collect();
    assert_eq!(kinds, vec!["night", "night", "surcharge", "surcharge", "total"]);

    let total = lines.last().unwrap();
    assert_eq!(total.get("unit_amount"), Some("2000000"));
    assert_eq!(total.get("amount"), Some("2500000"));
    let snapshot: serde_json::Value = serde_json::from_str(total.get("detail").unwrap()).unwrap();
    assert_eq!(snapshot["total"], 2_500_000);
    assert_eq!(snapshot["surcharges"]["lines"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn errors_carry_sqlstate() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "errors").await;
    let id = create_room(&client, 1).await;

    assert_eq!(sqlstate(&client, "SELEC nonsense").await, "42601");
    assert_eq!(
        sqlstate(
            &client,
            &format!(
                "SELECT * FROM availability WHERE room_id = '{}' AND check_in = '2024-06-01' AND check_out = '2024-06-02'",
                Ulid::new()
            )
        )
        .await,
        "P0001"
    );
    assert_eq!(
        sqlstate(
            &client,
            &format!(
                "SELECT * FROM availability WHERE room_id = '{id}' AND check_in = '2024-06-05' AND check_out = '2024-06-02'"
            )
        )
        .await,
        "22023"
    );
}

#[tokio::test]
async fn properties_are_separate_databases() {
    let (addr, pm) = start_test_server().await;
    let seaside = connect(addr, "seaside").await;
    let mountain = connect(addr, "mountain").await;

    create_room(&seaside, 2).await;
    assert_eq!(rows(&seaside, "SELECT * FROM rooms").await.len(), 1);
    assert!(rows(&mountain, "SELECT * FROM rooms").await.is_empty());
    assert_eq!(pm.len(), 2);
}
