use crate::config;
use crate::peer::transport::ConnectionState;
use crate::peer::types::IceCandidate;
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

/// Env var holding the `tracing` filter directive
pub const LOG_ENV: &str = "RELAYCALL_LOG";

/// Installs the global fmt subscriber with local timestamps.
///
/// Does nothing when logging is compiled out. Calling it again, or after
/// another subscriber was installed, is harmless.
pub fn init() {
    if !config::LOGGING_ENABLED || !config::dev::ENABLE_LOGGING {
        return;
    }

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_target(false)
        .try_init();
}

/// Trickle-ICE trace of one candidate
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index, cand.username_fragment
    );
}

pub fn report_connection_state(call_id: Option<&str>, state: ConnectionState) {
    let call_id = call_id.unwrap_or("-");
    match state {
        ConnectionState::Connected => info!(call_id, "peer connection connected"),
        ConnectionState::Disconnected => {
            warn!(call_id, "peer connection disconnected, transport may recover")
        }
        ConnectionState::Failed => warn!(call_id, "peer connection failed"),
        ConnectionState::Closed => info!(call_id, "peer connection closed"),
        other => debug!(call_id, "peer connection state: {:?}", other),
    }
}
