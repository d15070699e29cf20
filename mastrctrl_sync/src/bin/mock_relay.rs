use mastrctrl_sync::config::DEFAULT_PORT;
use mastrctrl_sync::{init_tracing, RelayEvent, RelayServer};
use tracing::{error, info};

fn main() {
    init_tracing();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("0.0.0.0:{DEFAULT_PORT}"));

    let (server, events) = match RelayServer::spawn_with_addr(&addr) {
        Ok(pair) => pair,
        Err(e) => {
            error!(%addr, error = %e, "relay bind failed");
            std::process::exit(1);
        }
    };
    info!(url = %server.url(), "mock relay running, ctrl-c to stop");

    for event in events.iter() {
        match event {
            RelayEvent::ClientConnected(addr) => info!(%addr, "client connected"),
            RelayEvent::ClientDisconnected(addr) => info!(%addr, "client disconnected"),
            RelayEvent::Relayed { kind, recipients } => {
                info!(kind = kind.as_str(), recipients, "relayed")
            }
        }
    }
}
