//! Test helpers shared across server modules.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use rstest::fixture;
use tokio_util::sync::CancellationToken;

use super::{Bound, SessionServer, Unbound, connection::ConnectionShared};
use crate::{
    config::SessionConfig,
    handler::LoggingHandler,
    identity::BanList,
    registry::SessionRegistry,
};

pub type TestServer = SessionServer<LoggingHandler, BanList, Bound>;

#[fixture]
/// Returns a bound [`StdTcpListener`] on a free port for use in tests.
///
/// Keeping the listener bound prevents another process from claiming the
/// port between discovery and use.
pub fn free_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("Failed to bind free port listener")
}

pub fn unbound_server() -> SessionServer<LoggingHandler, BanList, Unbound> {
    SessionServer::new(Arc::new(LoggingHandler), Arc::new(BanList::default()))
}

pub fn bind_server(listener: StdTcpListener) -> TestServer {
    unbound_server()
        .bind_existing_listener(listener)
        .expect("Failed to bind")
}

pub fn shared(shutdown: &CancellationToken) -> Arc<ConnectionShared<LoggingHandler, BanList>> {
    Arc::new(ConnectionShared {
        handler: Arc::new(LoggingHandler),
        resolver: Arc::new(BanList::default()),
        registry: Arc::new(SessionRegistry::new()),
        config: SessionConfig::default(),
        shutdown: shutdown.clone(),
    })
}
