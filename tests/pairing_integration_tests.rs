//! Pairing watcher integration tests: scan detection, idempotent
//! completion, QR expiry, vanished instances, session dismissal, and the
//! idempotent disconnect path.

mod support;

use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use connections::error::LifecycleError;
use connections::events::ConnectionEvent;
use connections::pairing::PairingState;
use connections::providers::ProviderKind;

use support::{engine, evolution_registry, seed_row, test_config};

const EVENT_WAIT: Duration = Duration::from_secs(5);

async fn next_event(
    rx: &mut tokio::sync::broadcast::Receiver<ConnectionEvent>,
) -> ConnectionEvent {
    timeout(EVENT_WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

#[tokio::test]
async fn scan_detection_pairs_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/instance/connect/Vendas"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "base64": "QR1" })))
        .mount(&server)
        .await;
    // every probe reports the device as linked
    Mock::given(method("GET"))
        .and(path("/instance/connectionState/Vendas"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "instance": {
                "instanceName": "Vendas",
                "state": "open",
                "ownerJid": "5511999999999@s.whatsapp.net"
            }
        })))
        .mount(&server)
        .await;

    let eng = engine(evolution_registry(&server.uri()), test_config()).await;
    let row = eng
        .store
        .upsert(seed_row(eng.workspace_id, "Vendas", ProviderKind::Evolution))
        .await
        .unwrap();

    let mut rx = eng.controller.events().subscribe();
    let connected = eng
        .controller
        .connect_instance(eng.workspace_id, row.id)
        .await
        .unwrap();
    assert_eq!(connected.status, "qr");
    assert_eq!(connected.qr_code.as_deref(), Some("QR1"));

    // first event: the qr status change from connect_instance
    let mut paired_count = 0;
    let mut got_message = String::new();
    loop {
        match next_event(&mut rx).await {
            ConnectionEvent::Paired { message, .. } => {
                paired_count += 1;
                got_message = message;
                break;
            }
            _ => continue,
        }
    }
    assert_eq!(paired_count, 1);
    assert_eq!(got_message, "WhatsApp conectado como 5511999999999!");

    // the watcher stops after the terminal transition; despite the provider
    // still answering "open", no second Paired event ever arrives
    let followup = timeout(Duration::from_millis(2500), async {
        loop {
            match rx.recv().await {
                Ok(ConnectionEvent::Paired { .. }) => break,
                Ok(_) => continue,
                Err(_) => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(followup.is_err(), "Paired must fire exactly once");

    let stored = eng.store.get(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "connected");
    assert_eq!(stored.phone_number.as_deref(), Some("5511999999999"));
    assert_eq!(stored.qr_code, None);

    let snapshot = eng
        .controller
        .pairing_snapshot(eng.workspace_id, row.id)
        .await
        .unwrap()
        .expect("terminal session still inspectable");
    assert_eq!(snapshot.state, PairingState::Connected);
    assert_eq!(snapshot.qr_code, None);
}

#[tokio::test]
async fn disconnected_after_first_check_expires_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/instance/connect/Vendas"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "base64": "QR1" })))
        .mount(&server)
        .await;
    // the provider keeps reporting close: the first reading is ignored,
    // the second one expires the code
    Mock::given(method("GET"))
        .and(path("/instance/connectionState/Vendas"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "instance": { "instanceName": "Vendas", "state": "close" }
        })))
        .mount(&server)
        .await;

    let eng = engine(evolution_registry(&server.uri()), test_config()).await;
    let row = eng
        .store
        .upsert(seed_row(eng.workspace_id, "Vendas", ProviderKind::Evolution))
        .await
        .unwrap();

    let mut rx = eng.controller.events().subscribe();
    eng.controller
        .connect_instance(eng.workspace_id, row.id)
        .await
        .unwrap();

    loop {
        match next_event(&mut rx).await {
            ConnectionEvent::PairingExpired { connection_id, .. } => {
                assert_eq!(connection_id, row.id);
                break;
            }
            _ => continue,
        }
    }

    let stored = eng.store.get(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "disconnected");
    assert_eq!(stored.qr_code, None);

    let snapshot = eng
        .controller
        .pairing_snapshot(eng.workspace_id, row.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.state, PairingState::Expired);
}

#[tokio::test]
async fn vanished_instance_tears_down_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/instance/connect/Vendas"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "base64": "QR1" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/instance/connectionState/Vendas"))
        .respond_with(ResponseTemplate::new(404).set_body_string("instance not found"))
        .mount(&server)
        .await;

    let eng = engine(evolution_registry(&server.uri()), test_config()).await;
    let row = eng
        .store
        .upsert(seed_row(eng.workspace_id, "Vendas", ProviderKind::Evolution))
        .await
        .unwrap();

    let mut rx = eng.controller.events().subscribe();
    eng.controller
        .connect_instance(eng.workspace_id, row.id)
        .await
        .unwrap();

    loop {
        match next_event(&mut rx).await {
            ConnectionEvent::PairingFailed { connection_id, .. } => {
                assert_eq!(connection_id, row.id);
                break;
            }
            _ => continue,
        }
    }

    let stored = eng.store.get(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "error");
    assert_eq!(stored.qr_code, None);
}

#[tokio::test]
async fn dismissing_the_pairing_ui_stops_the_watcher() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/instance/connect/Vendas"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "base64": "QR1" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/instance/connectionState/Vendas"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "instance": { "instanceName": "Vendas", "state": "open" }
        })))
        .mount(&server)
        .await;

    let eng = engine(evolution_registry(&server.uri()), test_config()).await;
    let row = eng
        .store
        .upsert(seed_row(eng.workspace_id, "Vendas", ProviderKind::Evolution))
        .await
        .unwrap();

    let mut rx = eng.controller.events().subscribe();
    eng.controller
        .connect_instance(eng.workspace_id, row.id)
        .await
        .unwrap();
    eng.controller
        .dismiss_pairing(eng.workspace_id, row.id)
        .await
        .unwrap();

    // the cancelled watcher never reports the scan
    let paired = timeout(Duration::from_millis(2500), async {
        loop {
            match rx.recv().await {
                Ok(ConnectionEvent::Paired { .. }) => break,
                Ok(_) => continue,
                Err(_) => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(paired.is_err(), "dismissed session must not complete");

    let snapshot = eng
        .controller
        .pairing_snapshot(eng.workspace_id, row.id)
        .await
        .unwrap();
    assert!(snapshot.is_none());
}

#[tokio::test]
async fn qr_refresh_requires_an_awaiting_session() {
    let eng = engine(evolution_registry("http://127.0.0.1:9"), test_config()).await;
    let row = eng
        .store
        .upsert(seed_row(eng.workspace_id, "Vendas", ProviderKind::Evolution))
        .await
        .unwrap();

    let err = eng
        .controller
        .refresh_qr(eng.workspace_id, row.id)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::NotFound(_)));
}

#[tokio::test]
async fn qr_refresh_replaces_the_payload() {
    let server = MockServer::start().await;
    // first fetch issues QR1, refresh issues QR2 through the same endpoint
    Mock::given(method("GET"))
        .and(path("/instance/connect/Vendas"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "base64": "QR1" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/instance/connect/Vendas"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "base64": "QR2" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/instance/connectionState/Vendas"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "instance": { "instanceName": "Vendas", "state": "connecting" }
        })))
        .mount(&server)
        .await;

    let eng = engine(evolution_registry(&server.uri()), test_config()).await;
    let row = eng
        .store
        .upsert(seed_row(eng.workspace_id, "Vendas", ProviderKind::Evolution))
        .await
        .unwrap();

    eng.controller
        .connect_instance(eng.workspace_id, row.id)
        .await
        .unwrap();

    let refreshed = eng
        .controller
        .refresh_qr(eng.workspace_id, row.id)
        .await
        .unwrap();
    assert_eq!(refreshed, "QR2");

    let stored = eng.store.get(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "qr");
    assert_eq!(stored.qr_code.as_deref(), Some("QR2"));

    let snapshot = eng
        .controller
        .pairing_snapshot(eng.workspace_id, row.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.state, PairingState::AwaitingScan);
    assert_eq!(snapshot.qr_code.as_deref(), Some("QR2"));
}

#[tokio::test]
async fn disconnect_of_an_already_disconnected_instance_succeeds() {
    let server = MockServer::start().await;
    // the provider says "nothing to log out" with a 404; that is success
    Mock::given(method("DELETE"))
        .and(path("/instance/logout/Vendas"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let eng = engine(evolution_registry(&server.uri()), test_config()).await;
    let mut row = seed_row(eng.workspace_id, "Vendas", ProviderKind::Evolution);
    row.status = "connected".to_string();
    let row = eng.store.upsert(row).await.unwrap();

    let list = eng
        .controller
        .disconnect_instance(eng.workspace_id, row.id)
        .await
        .unwrap();

    assert_eq!(list.len(), 1);
    assert_eq!(list[0].status, "disconnected");
}
