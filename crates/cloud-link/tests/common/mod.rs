//! In-process fake controller shared by the integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream, UnboundedReceiverStream};
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use cloud_link::ClientConfig;
use cloud_link::proto::client_service_server::{ClientService, ClientServiceServer};
use cloud_link::proto::{channel, group, notify, screen, server, transfer, user};

pub const TOKEN: &str = "test-token";
pub const CONTROLLER_VERSION: &str = "0.9.0-test";

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("cloud_link=debug")
            .with_test_writer()
            .init();
    });
}

/// Macro to log messages in tests (visible with --nocapture)
#[allow(unused_macros)]
macro_rules! test_log {
    ($($arg:tt)*) => {
        eprintln!("[TEST] {}", format!($($arg)*));
    };
}

type Subscriber = mpsc::UnboundedSender<Result<channel::Msg, Status>>;

/// What the fake controller knows and what it was told.
#[derive(Default)]
pub struct State {
    pub servers: Mutex<Vec<server::Short>>,
    pub groups: Mutex<Vec<String>>,
    pub users: Mutex<Vec<user::Item>>,
    pub power_events: Mutex<Vec<notify::PowerEvent>>,
    pub transfers: Mutex<Vec<transfer::TransferRes>>,
    pub protocol: AtomicUsize,

    pub beats: AtomicUsize,
    /// Number of upcoming beats to reject
    pub failing_beats: AtomicUsize,
    pub ready: Mutex<Option<bool>>,
    pub running: AtomicUsize,
    pub stop_requests: AtomicUsize,
    pub connected: Mutex<Vec<(String, String)>>,
    pub disconnected: Mutex<Vec<String>>,
    pub server_listings: AtomicUsize,
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
}

#[derive(Clone, Default)]
pub struct FakeController {
    pub state: Arc<State>,
}

fn check_auth(request: Request<()>) -> Result<Request<()>, Status> {
    match request.metadata().get(cloud_link::AUTHORIZATION) {
        Some(token) if token.to_str().ok() == Some(TOKEN) => Ok(request),
        _ => Err(Status::unauthenticated("invalid token")),
    }
}

impl FakeController {
    pub fn new() -> Self {
        let controller = Self::default();
        controller.state.protocol.store(
            cloud_link::PROTOCOL_VERSION as usize,
            Ordering::SeqCst,
        );
        controller
    }

    /// Serve on an ephemeral port and return the address.
    pub async fn start(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = ClientServiceServer::with_interceptor(self.clone(), check_auth);
        tokio::spawn(async move {
            Server::builder()
                .add_service(service)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });
        addr
    }

    pub fn config(addr: SocketAddr) -> ClientConfig {
        ClientConfig::new()
            .address(format!("http://{addr}"))
            .token(TOKEN)
    }

    fn find_server(&self, id: &str) -> Option<server::Short> {
        self.state
            .servers
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }
}

#[tonic::async_trait]
impl ClientService for FakeController {
    async fn beat(&self, _request: Request<()>) -> Result<Response<()>, Status> {
        self.state.beats.fetch_add(1, Ordering::SeqCst);
        let failing = self.state.failing_beats.load(Ordering::SeqCst);
        if failing > 0 {
            self.state.failing_beats.store(failing - 1, Ordering::SeqCst);
            return Err(Status::unavailable("controller busy"));
        }
        Ok(Response::new(()))
    }

    async fn set_ready(&self, request: Request<bool>) -> Result<Response<()>, Status> {
        *self.state.ready.lock().unwrap() = Some(request.into_inner());
        Ok(Response::new(()))
    }

    async fn set_running(&self, _request: Request<()>) -> Result<Response<()>, Status> {
        self.state.running.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(()))
    }

    async fn request_stop(&self, _request: Request<()>) -> Result<Response<()>, Status> {
        self.state.stop_requests.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(()))
    }

    async fn user_connected(
        &self,
        request: Request<user::ConnectedReq>,
    ) -> Result<Response<()>, Status> {
        let req = request.into_inner();
        self.state.connected.lock().unwrap().push((req.name, req.id));
        Ok(Response::new(()))
    }

    async fn user_disconnected(
        &self,
        request: Request<user::DisconnectedReq>,
    ) -> Result<Response<()>, Status> {
        self.state
            .disconnected
            .lock()
            .unwrap()
            .push(request.into_inner().id);
        Ok(Response::new(()))
    }

    async fn transfer_users(
        &self,
        request: Request<transfer::TransferReq>,
    ) -> Result<Response<u32>, Status> {
        let req = request.into_inner();
        if req.target.is_none() {
            return Err(Status::invalid_argument("missing target"));
        }
        let users = self.state.users.lock().unwrap();
        let accepted = req
            .ids
            .iter()
            .filter(|id| users.iter().any(|u| &u.id == *id))
            .count();
        Ok(Response::new(accepted as u32))
    }

    type SubscribeToTransfersStream = ReceiverStream<Result<transfer::TransferRes, Status>>;

    async fn subscribe_to_transfers(
        &self,
        _request: Request<()>,
    ) -> Result<Response<Self::SubscribeToTransfersStream>, Status> {
        let transfers = self.state.transfers.lock().unwrap().clone();
        let (tx, rx) = mpsc::channel(transfers.len().max(1));
        for transfer in transfers {
            tx.try_send(Ok(transfer)).unwrap();
        }
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn publish_message(
        &self,
        request: Request<channel::Msg>,
    ) -> Result<Response<u32>, Status> {
        let msg = request.into_inner();
        let mut subscribers = self.state.subscribers.lock().unwrap();
        let reached = subscribers
            .get_mut(&msg.channel)
            .map(|list| {
                list.retain(|tx| tx.send(Ok(msg.clone())).is_ok());
                list.len()
            })
            .unwrap_or(0);
        Ok(Response::new(reached as u32))
    }

    type SubscribeToChannelStream = UnboundedReceiverStream<Result<channel::Msg, Status>>;

    async fn subscribe_to_channel(
        &self,
        request: Request<String>,
    ) -> Result<Response<Self::SubscribeToChannelStream>, Status> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .subscribers
            .lock()
            .unwrap()
            .entry(request.into_inner())
            .or_default()
            .push(tx);
        Ok(Response::new(UnboundedReceiverStream::new(rx)))
    }

    async fn get_servers(&self, _request: Request<()>) -> Result<Response<server::List>, Status> {
        self.state.server_listings.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(server::List {
            servers: self.state.servers.lock().unwrap().clone(),
        }))
    }

    async fn get_server(
        &self,
        request: Request<String>,
    ) -> Result<Response<server::Short>, Status> {
        let id = request.into_inner();
        self.find_server(&id)
            .map(Response::new)
            .ok_or_else(|| Status::not_found(format!("no server {id}")))
    }

    async fn get_groups(&self, _request: Request<()>) -> Result<Response<group::List>, Status> {
        Ok(Response::new(group::List {
            groups: self.state.groups.lock().unwrap().clone(),
        }))
    }

    async fn get_group(&self, request: Request<String>) -> Result<Response<group::Short>, Status> {
        let name = request.into_inner();
        if name == "restricted" {
            return Err(Status::permission_denied("group is restricted"));
        }
        let groups = self.state.groups.lock().unwrap();
        if groups.contains(&name) {
            Ok(Response::new(group::Short { name }))
        } else {
            Err(Status::not_found(format!("no group {name}")))
        }
    }

    async fn get_users(&self, _request: Request<()>) -> Result<Response<user::List>, Status> {
        Ok(Response::new(user::List {
            users: self.state.users.lock().unwrap().clone(),
        }))
    }

    async fn get_user(&self, request: Request<String>) -> Result<Response<user::Item>, Status> {
        let id = request.into_inner();
        self.state
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .map(Response::new)
            .ok_or_else(|| Status::not_found(format!("no user {id}")))
    }

    async fn get_user_count(&self, _request: Request<()>) -> Result<Response<u32>, Status> {
        Ok(Response::new(self.state.users.lock().unwrap().len() as u32))
    }

    type SubscribeToPowerEventsStream = ReceiverStream<Result<notify::PowerEvent, Status>>;

    async fn subscribe_to_power_events(
        &self,
        _request: Request<()>,
    ) -> Result<Response<Self::SubscribeToPowerEventsStream>, Status> {
        let events = self.state.power_events.lock().unwrap().clone();
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            tx.try_send(Ok(event)).unwrap();
        }
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    type SubscribeToReadyEventsStream = ReceiverStream<Result<notify::ReadyEvent, Status>>;

    async fn subscribe_to_ready_events(
        &self,
        _request: Request<()>,
    ) -> Result<Response<Self::SubscribeToReadyEventsStream>, Status> {
        let (tx, rx) = mpsc::channel(2);
        tx.try_send(Ok(notify::ReadyEvent {
            ready: true,
            name: "lobby-1".into(),
        }))
        .unwrap();
        tx.try_send(Err(Status::internal("ready feed broke"))).unwrap();
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    type SubscribeToScreenStream = ReceiverStream<Result<screen::Lines, Status>>;

    async fn subscribe_to_screen(
        &self,
        request: Request<String>,
    ) -> Result<Response<Self::SubscribeToScreenStream>, Status> {
        let id = request.into_inner();
        let Some(server) = self.find_server(&id) else {
            return Err(Status::not_found(format!("no server {id}")));
        };
        let (tx, rx) = mpsc::channel(1);
        tx.try_send(Ok(screen::Lines {
            lines: vec![format!("[{}] Done (1.2s)!", server.name)],
        }))
        .unwrap();
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn get_proto_ver(&self, _request: Request<()>) -> Result<Response<u32>, Status> {
        Ok(Response::new(self.state.protocol.load(Ordering::SeqCst) as u32))
    }

    async fn get_ctrl_ver(&self, _request: Request<()>) -> Result<Response<String>, Status> {
        Ok(Response::new(CONTROLLER_VERSION.to_string()))
    }
}
