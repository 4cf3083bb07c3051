//! Prometheus instruments for the daemon.
//!
//! Counters, gauges and a per-command timing histogram (the `prometheus`
//! crate ships no summary collector). Serving the exposition format over
//! HTTP is an external adapter's job; [`gather`] renders the text for it.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntGauge, Registry, TextEncoder, histogram_opts, opts,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Client commands dispatched.
    pub static ref COMMANDS: IntCounter = IntCounter::with_opts(opts!(
        "ircd_client_commands_total",
        "Number of client commands processed"
    ))
    .unwrap();

    /// PRIVMSG/NOTICE deliveries to individual recipients.
    pub static ref MESSAGES: IntCounter = IntCounter::with_opts(opts!(
        "ircd_client_messages_total",
        "Number of client messages exchanged"
    ))
    .unwrap();

    /// Open connections, registered or not.
    pub static ref CONNECTIONS: IntGauge = IntGauge::with_opts(opts!(
        "ircd_server_connections",
        "Number of active connections to the server"
    ))
    .unwrap();

    /// Clients present in the nick index.
    pub static ref REGISTERED: IntGauge = IntGauge::with_opts(opts!(
        "ircd_server_registered",
        "Number of registered clients connected"
    ))
    .unwrap();

    /// Live channels.
    pub static ref CHANNELS: IntGauge = IntGauge::with_opts(opts!(
        "ircd_server_channels",
        "Number of active channels"
    ))
    .unwrap();

    /// Dispatch latency per command code.
    pub static ref COMMAND_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "ircd_client_command_duration_seconds",
            "Client command processing time in seconds"
        ),
        &["command"]
    )
    .unwrap();
}

/// Register every instrument; call once at startup.
pub fn init() {
    let _ = REGISTRY.register(Box::new(COMMANDS.clone()));
    let _ = REGISTRY.register(Box::new(MESSAGES.clone()));
    let _ = REGISTRY.register(Box::new(CONNECTIONS.clone()));
    let _ = REGISTRY.register(Box::new(REGISTERED.clone()));
    let _ = REGISTRY.register(Box::new(CHANNELS.clone()));
    let _ = REGISTRY.register(Box::new(COMMAND_DURATION.clone()));
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&REGISTRY.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruments_register_and_render() {
        init();
        COMMANDS.inc();
        CONNECTIONS.set(3);
        COMMAND_DURATION.with_label_values(&["PRIVMSG"]).observe(0.001);
        let text = gather();
        assert!(text.contains("ircd_client_commands_total"));
        assert!(text.contains("ircd_server_connections"));
    }
}
