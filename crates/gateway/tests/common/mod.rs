#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]
//! Shared scaffolding: an ephemeral gateway over in-memory collaborators and
//! a thin WebSocket client driver.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    tokio::net::TcpListener,
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
};

use {
    veil_chat::ChatRepository,
    veil_common::{DeviceFingerprint, UserHash},
    veil_config::VeilConfig,
    veil_gateway::{CoreServices, GatewayState, WorkerIngress, build_app},
    veil_service_traits::{MemoryAuthService, MemoryProfileService, NoopWorkerQueue},
    veil_store::{DocumentStore, MemoryStore},
    veil_vault::MemoryVault,
};

pub const SALT: &str = "test-salt";

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<GatewayState>,
    pub auth: Arc<MemoryAuthService>,
    pub profile: Arc<MemoryProfileService>,
    pub store: Arc<MemoryStore>,
}

impl TestServer {
    pub fn user_hash(&self, user_id: &str) -> UserHash {
        UserHash::derive(SALT, user_id)
    }

    pub fn ingress(&self) -> WorkerIngress {
        WorkerIngress::new(Arc::clone(&self.state))
    }
}

/// Spin up a gateway on an ephemeral port with in-memory everything.
pub async fn start_test_server() -> TestServer {
    let mut config = VeilConfig::default();
    config.auth.user_hash_salt = SALT.into();

    let auth = Arc::new(MemoryAuthService::new());
    let profile = Arc::new(MemoryProfileService::new());
    let store = Arc::new(MemoryStore::new());
    let vault = Arc::new(MemoryVault::new());

    let auth_service: Arc<dyn veil_service_traits::AuthService> =
        Arc::clone(&auth) as Arc<dyn veil_service_traits::AuthService>;
    let profile_service: Arc<dyn veil_service_traits::ProfileService> =
        Arc::clone(&profile) as Arc<dyn veil_service_traits::ProfileService>;
    let services = CoreServices {
        auth: auth_service,
        profile: profile_service,
        worker_queue: Arc::new(NoopWorkerQueue),
    };
    let repo = ChatRepository::new(
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        vault,
        &config.cache,
        config.store.clone(),
    );
    let state = GatewayState::new(repo, services, config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_app(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        state,
        auth,
        profile,
        store,
    }
}

pub type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct Client {
    pub ws: Ws,
}

impl Client {
    pub async fn send(&mut self, frame: serde_json::Value) {
        self.ws
            .send(Message::Text(frame.to_string().into()))
            .await
            .unwrap();
    }

    /// Next text frame as JSON, with a timeout so a missing frame fails the
    /// test instead of hanging it.
    pub async fn recv(&mut self) -> serde_json::Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("connection closed")
                .expect("transport error");
            match msg {
                Message::Text(t) => return serde_json::from_str(t.as_str()).unwrap(),
                Message::Close(frame) => panic!("connection closed: {frame:?}"),
                _ => continue,
            }
        }
    }

    /// Receive until a frame of `kind` arrives, asserting nothing about the
    /// frames skipped on the way.
    pub async fn recv_kind(&mut self, kind: &str) -> serde_json::Value {
        for _ in 0..16 {
            let frame = self.recv().await;
            if frame["type"] == kind {
                return frame;
            }
        }
        panic!("frame of type {kind} never arrived");
    }

    /// True if the server closed the connection before sending another text
    /// frame.
    pub async fn expect_close(&mut self) -> bool {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), self.ws.next()).await {
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(Message::Text(_)))) => return false,
                Ok(Some(Ok(_))) => continue,
                Err(_) => panic!("timed out waiting for close"),
            }
        }
    }
}

pub fn connect_frame(token: &str, device_fp: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "connect",
        "payload": {
            "protocol": 1,
            "token": token,
            "device_fp": device_fp,
            "client": { "name": "test-client", "version": "0.0.1", "platform": "test" }
        }
    })
}

/// Open a socket without handshaking.
pub async fn open_socket(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("ws connect failed");
    Client { ws }
}

/// Full happy-path session: token registered, device trusted, handshake
/// completed through the `connected` ack.
pub async fn connect_device(server: &TestServer, user_id: &str, device_fp: &str) -> Client {
    let token = format!("tok-{user_id}");
    server.auth.insert_token(token.clone(), user_id);
    server
        .auth
        .trust_device(&server.user_hash(user_id), &DeviceFingerprint::new(device_fp));

    let mut client = open_socket(server.addr).await;
    client.send(connect_frame(&token, device_fp)).await;
    let hello = client.recv().await;
    assert_eq!(hello["type"], "connected", "handshake ack expected");
    client
}
