use crate::status::{self, StatusDisplay};
use std::cell::Cell;
use std::net::{IpAddr, ToSocketAddrs, UdpSocket};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use upload_protocol::Endpoint;

/// Reports whether the network link is up
pub trait Connectivity {
    fn is_connected(&mut self) -> bool;

    /// Our address on the link, when connected
    fn local_address(&mut self) -> Option<IpAddr>;
}

/// Asks the OS for a route to the upload server.
///
/// Connecting a UDP socket sends nothing; it only selects a source address,
/// which fails when no interface can reach the server.
#[derive(Debug, Clone)]
pub struct HostConnectivity {
    host: String,
    port: u16,
}

impl HostConnectivity {
    pub fn for_endpoint(endpoint: &Endpoint) -> Self {
        Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
        }
    }
}

impl Connectivity for HostConnectivity {
    fn is_connected(&mut self) -> bool {
        self.local_address().is_some()
    }

    fn local_address(&mut self) -> Option<IpAddr> {
        let target = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .ok()?
            .next()?;
        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };

        let socket = UdpSocket::bind(bind).ok()?;
        socket.connect(target).ok()?;
        let local = socket.local_addr().ok()?.ip();
        (!local.is_unspecified()).then_some(local)
    }
}

/// Fixed connectivity; clones share the link state
#[derive(Debug, Clone)]
pub struct StaticConnectivity {
    connected: Rc<Cell<bool>>,
    address: IpAddr,
}

impl StaticConnectivity {
    pub fn online() -> Self {
        Self {
            connected: Rc::new(Cell::new(true)),
            address: IpAddr::from([127, 0, 0, 1]),
        }
    }

    pub fn offline() -> Self {
        let link = Self::online();
        link.set_connected(false);
        link
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.set(connected);
    }
}

impl Connectivity for StaticConnectivity {
    fn is_connected(&mut self) -> bool {
        self.connected.get()
    }

    fn local_address(&mut self) -> Option<IpAddr> {
        self.connected.get().then_some(self.address)
    }
}

/// Block until the link is up, keeping the display informed.
/// Returns false if `shutdown` was raised first.
pub fn wait_for_connectivity(
    connectivity: &mut dyn Connectivity,
    display: &mut dyn StatusDisplay,
    shutdown: &AtomicBool,
    poll_interval: Duration,
) -> bool {
    if !connectivity.is_connected() {
        display.show(status::NETWORK_CONNECTING);
        log::info!("📶 Waiting for network...");

        while !connectivity.is_connected() {
            if shutdown.load(Ordering::SeqCst) {
                return false;
            }
            std::thread::sleep(poll_interval);
        }
    }

    match connectivity.local_address() {
        Some(address) => log::info!("📶 Network connected, local address {}", address),
        None => log::info!("📶 Network connected"),
    }
    display.show(status::NETWORK_CONNECTED);
    true
}
