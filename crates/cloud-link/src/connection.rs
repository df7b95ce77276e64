//! The authenticated transport to the controller.
//!
//! A [`Connection`] owns one multiplexed tonic [`Channel`]. Every client the
//! connection hands out is a clone sharing that channel, so unary calls and
//! subscriptions all ride the same HTTP/2 connection.

use std::future::Future;
use std::sync::Arc;

use tonic::codegen::InterceptedService;
use tonic::transport::{Certificate, Channel, ClientTlsConfig};
use tonic::{Response, Status};

use crate::bridge::{Bridge, CallFuture};
use crate::cache::TtlCell;
use crate::call::{CallHandle, Observer};
use crate::config::{ClientConfig, Endpoint, TransportSecurity};
use crate::credential::Credential;
use crate::error::Result;
use crate::proto;
use crate::proto::client_service_client::ClientServiceClient;

type Client = ClientServiceClient<InterceptedService<Channel, Credential>>;

struct Caches {
    servers: Arc<TtlCell<Vec<proto::server::Short>>>,
    groups: Arc<TtlCell<Vec<String>>>,
    users: Arc<TtlCell<Vec<proto::user::Item>>>,
    user_count: Arc<TtlCell<u32>>,
    proto_ver: Arc<TtlCell<u32>>,
    ctrl_ver: Arc<TtlCell<String>>,
}

impl Caches {
    fn new(config: &ClientConfig) -> Self {
        let ttl = config.cache_ttl;
        Self {
            servers: Arc::new(TtlCell::with_ttl(ttl)),
            groups: Arc::new(TtlCell::with_ttl(ttl)),
            users: Arc::new(TtlCell::with_ttl(ttl)),
            user_count: Arc::new(TtlCell::with_ttl(ttl)),
            proto_ver: Arc::new(TtlCell::with_ttl(ttl)),
            ctrl_ver: Arc::new(TtlCell::with_ttl(ttl)),
        }
    }

    fn clear(&self) {
        self.servers.clear();
        self.groups.clear();
        self.users.clear();
        self.user_count.clear();
        self.proto_ver.clear();
        self.ctrl_ver.clear();
    }
}

/// One authenticated connection to the controller.
///
/// Unary calls return a [`CallFuture`] without waiting; streaming calls
/// return a [`CallHandle`]. Calls may be issued from any thread, they run on
/// the runtime that was current when the connection was made.
pub struct Connection {
    endpoint: Endpoint,
    client: Client,
    bridge: Bridge,
    caches: Caches,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Validate `config` and open the transport.
    ///
    /// Fails with [`Error::Configuration`](crate::Error::Configuration)
    /// before touching the network if the endpoint or token is unusable, and
    /// with [`Error::Transport`](crate::Error::Transport) if the handshake
    /// fails or does not finish within the configured connect timeout. Must be
    /// called from within a tokio runtime.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint()?;
        let credential = config.credential()?;

        let mut transport = tonic::transport::Endpoint::from_shared(endpoint.uri())?
            .connect_timeout(config.connect_timeout);
        if let TransportSecurity::Tls { trust_anchor } = endpoint.security() {
            let tls = ClientTlsConfig::new()
                .ca_certificate(Certificate::from_pem(trust_anchor))
                .domain_name(endpoint.host().to_string());
            transport = transport.tls_config(tls)?;
        }

        tracing::debug!(%endpoint, "connecting to controller");
        let channel = transport.connect().await?;
        tracing::info!(%endpoint, "connected to controller");

        Ok(Self {
            client: ClientServiceClient::with_interceptor(channel, credential),
            bridge: Bridge::new(tokio::runtime::Handle::current(), config.max_in_flight),
            caches: Caches::new(config),
            endpoint,
        })
    }

    /// The endpoint this connection talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The bridge unary calls are dispatched through.
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Forget every cached value.
    pub fn clear_caches(&self) {
        self.caches.clear();
    }

    fn unary<T, F, Fut>(&self, call: F) -> CallFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = Result<Response<T>, Status>> + Send + 'static,
    {
        let pending = call(self.client.clone());
        self.bridge
            .dispatch(async move { Ok(pending.await?.into_inner()) })
    }

    fn subscribe<T, F, Fut, O>(&self, method: &'static str, open: F, observer: O) -> CallHandle
    where
        T: Send + 'static,
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = Result<Response<tonic::Streaming<T>>, Status>> + Send + 'static,
        O: Observer<T>,
    {
        let opening = open(self.client.clone());
        tracing::debug!(method, "opening subscription");
        CallHandle::spawn(
            self.bridge.runtime(),
            method,
            async move { opening.await.map(Response::into_inner) },
            observer,
        )
    }

    /// Tell the controller this server is alive.
    pub fn beat(&self) -> CallFuture<()> {
        self.unary(|mut c| async move { c.beat(()).await })
    }

    /// Mark this server as (not) accepting users.
    pub fn set_ready(&self, ready: bool) -> CallFuture<()> {
        self.unary(|mut c| async move { c.set_ready(ready).await })
    }

    /// Mark this server as fully started.
    pub fn set_running(&self) -> CallFuture<()> {
        self.unary(|mut c| async move { c.set_running(()).await })
    }

    /// Ask the controller to stop this server.
    pub fn request_stop(&self) -> CallFuture<()> {
        self.unary(|mut c| async move { c.request_stop(()).await })
    }

    /// Report a user joining this server.
    pub fn user_connected(&self, request: proto::user::ConnectedReq) -> CallFuture<()> {
        self.unary(|mut c| async move { c.user_connected(request).await })
    }

    /// Report a user leaving this server.
    pub fn user_disconnected(&self, request: proto::user::DisconnectedReq) -> CallFuture<()> {
        self.unary(|mut c| async move { c.user_disconnected(request).await })
    }

    /// Move users; resolves with the number the controller accepted.
    pub fn transfer_users(&self, request: proto::transfer::TransferReq) -> CallFuture<u32> {
        self.unary(|mut c| async move { c.transfer_users(request).await })
    }

    /// Publish on a channel; resolves with the number of subscribers reached.
    pub fn publish_message(&self, message: proto::channel::Msg) -> CallFuture<u32> {
        self.unary(|mut c| async move { c.publish_message(message).await })
    }

    /// All servers, bypassing the cache.
    pub fn get_servers(&self) -> CallFuture<proto::server::List> {
        self.unary(|mut c| async move { c.get_servers(()).await })
    }

    /// One server by id.
    pub fn get_server(&self, id: String) -> CallFuture<proto::server::Short> {
        self.unary(|mut c| async move { c.get_server(id).await })
    }

    /// All group names, bypassing the cache.
    pub fn get_groups(&self) -> CallFuture<proto::group::List> {
        self.unary(|mut c| async move { c.get_groups(()).await })
    }

    /// One group by name.
    pub fn get_group(&self, name: String) -> CallFuture<proto::group::Short> {
        self.unary(|mut c| async move { c.get_group(name).await })
    }

    /// All users, bypassing the cache.
    pub fn get_users(&self) -> CallFuture<proto::user::List> {
        self.unary(|mut c| async move { c.get_users(()).await })
    }

    /// One user by id.
    pub fn get_user(&self, id: String) -> CallFuture<proto::user::Item> {
        self.unary(|mut c| async move { c.get_user(id).await })
    }

    /// Number of users in the cloud, bypassing the cache.
    pub fn get_user_count(&self) -> CallFuture<u32> {
        self.unary(|mut c| async move { c.get_user_count(()).await })
    }

    /// Protocol revision of the controller, bypassing the cache.
    pub fn get_proto_ver(&self) -> CallFuture<u32> {
        self.unary(|mut c| async move { c.get_proto_ver(()).await })
    }

    /// Controller version string, bypassing the cache.
    pub fn get_ctrl_ver(&self) -> CallFuture<String> {
        self.unary(|mut c| async move { c.get_ctrl_ver(()).await })
    }

    /// Transfers the controller resolved for this server's users.
    pub fn subscribe_to_transfers<O>(&self, observer: O) -> CallHandle
    where
        O: Observer<proto::transfer::TransferRes>,
    {
        self.subscribe(
            "SubscribeToTransfers",
            |mut c| async move { c.subscribe_to_transfers(()).await },
            observer,
        )
    }

    /// Messages published on `channel` from now on.
    pub fn subscribe_to_channel<O>(&self, channel: String, observer: O) -> CallHandle
    where
        O: Observer<proto::channel::Msg>,
    {
        self.subscribe(
            "SubscribeToChannel",
            |mut c| async move { c.subscribe_to_channel(channel).await },
            observer,
        )
    }

    /// Servers starting and stopping.
    pub fn subscribe_to_power_events<O>(&self, observer: O) -> CallHandle
    where
        O: Observer<proto::notify::PowerEvent>,
    {
        self.subscribe(
            "SubscribeToPowerEvents",
            |mut c| async move { c.subscribe_to_power_events(()).await },
            observer,
        )
    }

    /// Servers changing readiness.
    pub fn subscribe_to_ready_events<O>(&self, observer: O) -> CallHandle
    where
        O: Observer<proto::notify::ReadyEvent>,
    {
        self.subscribe(
            "SubscribeToReadyEvents",
            |mut c| async move { c.subscribe_to_ready_events(()).await },
            observer,
        )
    }

    /// Console output of the server with id `server`.
    pub fn subscribe_to_screen<O>(&self, server: String, observer: O) -> CallHandle
    where
        O: Observer<proto::screen::Lines>,
    {
        self.subscribe(
            "SubscribeToScreen",
            |mut c| async move { c.subscribe_to_screen(server).await },
            observer,
        )
    }

    /// All servers, served from the cache while fresh.
    pub fn servers(&self) -> CallFuture<Vec<proto::server::Short>> {
        let client = self.client.clone();
        self.caches
            .servers
            .read_or_fetch(&self.bridge, move || fetch_servers(client))
    }

    /// Cached servers without waiting; refreshes in the background if stale.
    pub fn servers_now(&self) -> Option<Vec<proto::server::Short>> {
        let client = self.client.clone();
        self.caches
            .servers
            .read_now_and_refresh(&self.bridge, move || fetch_servers(client))
    }

    /// All group names, served from the cache while fresh.
    pub fn groups(&self) -> CallFuture<Vec<String>> {
        let client = self.client.clone();
        self.caches
            .groups
            .read_or_fetch(&self.bridge, move || fetch_groups(client))
    }

    /// Cached group names without waiting; refreshes in the background if stale.
    pub fn groups_now(&self) -> Option<Vec<String>> {
        let client = self.client.clone();
        self.caches
            .groups
            .read_now_and_refresh(&self.bridge, move || fetch_groups(client))
    }

    /// All users, served from the cache while fresh.
    pub fn users(&self) -> CallFuture<Vec<proto::user::Item>> {
        let client = self.client.clone();
        self.caches
            .users
            .read_or_fetch(&self.bridge, move || fetch_users(client))
    }

    /// Cached users without waiting; refreshes in the background if stale.
    pub fn users_now(&self) -> Option<Vec<proto::user::Item>> {
        let client = self.client.clone();
        self.caches
            .users
            .read_now_and_refresh(&self.bridge, move || fetch_users(client))
    }

    /// Number of users in the cloud, served from the cache while fresh.
    pub fn user_count(&self) -> CallFuture<u32> {
        let client = self.client.clone();
        self.caches
            .user_count
            .read_or_fetch(&self.bridge, move || fetch_user_count(client))
    }

    /// Cached user count without waiting; refreshes in the background if stale.
    pub fn user_count_now(&self) -> Option<u32> {
        let client = self.client.clone();
        self.caches
            .user_count
            .read_now_and_refresh(&self.bridge, move || fetch_user_count(client))
    }

    /// Protocol revision of the controller, served from the cache while fresh.
    pub fn proto_ver(&self) -> CallFuture<u32> {
        let client = self.client.clone();
        self.caches
            .proto_ver
            .read_or_fetch(&self.bridge, move || fetch_proto_ver(client))
    }

    /// Controller version string, served from the cache while fresh.
    pub fn ctrl_ver(&self) -> CallFuture<String> {
        let client = self.client.clone();
        self.caches
            .ctrl_ver
            .read_or_fetch(&self.bridge, move || fetch_ctrl_ver(client))
    }
}

async fn fetch_servers(mut client: Client) -> Result<Vec<proto::server::Short>> {
    Ok(client.get_servers(()).await?.into_inner().servers)
}

async fn fetch_groups(mut client: Client) -> Result<Vec<String>> {
    Ok(client.get_groups(()).await?.into_inner().groups)
}

async fn fetch_users(mut client: Client) -> Result<Vec<proto::user::Item>> {
    Ok(client.get_users(()).await?.into_inner().users)
}

async fn fetch_user_count(mut client: Client) -> Result<u32> {
    Ok(client.get_user_count(()).await?.into_inner())
}

async fn fetch_proto_ver(mut client: Client) -> Result<u32> {
    Ok(client.get_proto_ver(()).await?.into_inner())
}

async fn fetch_ctrl_ver(mut client: Client) -> Result<String> {
    Ok(client.get_ctrl_ver(()).await?.into_inner())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_missing_address_fails_before_connecting() {
        let config = ClientConfig::new().token("secret");
        let err = Connection::connect(&config).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("CONTROLLER_ADDRESS")));
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_connecting() {
        let config = ClientConfig::new().address("http://127.0.0.1:1");
        let err = Connection::connect(&config).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("SERVER_TOKEN")));
    }

    #[tokio::test]
    async fn test_unreachable_controller_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ClientConfig::new()
            .address(format!("http://{addr}"))
            .token("secret");
        let err = Connection::connect(&config).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_unroutable_controller_fails_within_connect_timeout() {
        // Reserved, unroutable: the handshake either times out or is refused
        let config = ClientConfig::new()
            .address("http://10.255.255.1:8080")
            .token("secret")
            .connect_timeout(Duration::from_millis(200));
        let err = tokio::time::timeout(Duration::from_secs(5), Connection::connect(&config))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_invalid_tunables_fail_before_connecting() {
        let config = ClientConfig::new()
            .address("http://10.255.255.1:8080")
            .token("secret")
            .heartbeat_interval(Duration::ZERO);
        let err = Connection::connect(&config).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("heartbeat")));
    }
}
