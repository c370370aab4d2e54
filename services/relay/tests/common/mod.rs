use relay::feed::FeedStatus;
use relay::{AppState, RelayConfig};
use relay_core::FeedSink;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct TestRelay {
    pub addr: SocketAddr,
    pub sink: FeedSink,
    pub state: AppState,
}

impl TestRelay {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Wait until exactly `n` clients are registered.
    pub async fn wait_for_clients(&self, n: usize) {
        for _ in 0..200 {
            if self.state.client_count() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {n} registered clients, have {}",
            self.state.client_count()
        );
    }
}

pub async fn start_relay(frontend_dir: &Path, vars: &[(&str, &str)]) -> TestRelay {
    let frontend = frontend_dir.display().to_string();
    let vars: Vec<(String, String)> = vars
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    let cfg = RelayConfig::from_lookup(|var| {
        if var == "FRONTEND_DIR" {
            return Some(frontend.clone());
        }
        vars.iter().find(|(k, _)| k == var).map(|(_, v)| v.clone())
    })
    .expect("valid test config");

    let (state, sink, broadcaster) = relay::assemble(&cfg, FeedStatus::new());
    tokio::spawn(broadcaster.run());

    let router = relay::build_router(state.clone(), &cfg.ws_path, &cfg.frontend_dir);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(relay::serve(listener, router));

    TestRelay { addr, sink, state }
}
