//!
//! collegium development backend binary
//! ------------------------------------
//! Serves the in-memory identity backend, the permission-enforcing business API and the
//! client error sink on one port, for local work against the access layer.

use std::env;
use std::time::Duration;

use anyhow::Result;
use collegium::cli::{flag_value, has_flag, parse_port_arg};
use collegium::devserver::{self, DevState, DEFAULT_PORT};

fn parse_port_env(name: &str) -> Option<u16> {
    env::var(name).ok().and_then(|v| v.parse::<u16>().ok())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("collegium development backend\n\nUSAGE:\n  collegium_devserver [--port N] [--access-ttl-secs N]\n\nOPTIONS:\n  --port N               Listen port (env: COLLEGIUM_DEV_PORT, default {DEFAULT_PORT})\n  --access-ttl-secs N    Access token lifetime (env: COLLEGIUM_DEV_ACCESS_TTL_SECS, default 900)\n\nDemo users (password = username): registrar, bursar, admin, auditor\n");
        return Ok(());
    }

    let port = parse_port_arg(&args, "--port").or(parse_port_env("COLLEGIUM_DEV_PORT")).unwrap_or(DEFAULT_PORT);
    let ttl_secs = flag_value(&args, "--access-ttl-secs")
        .or_else(|| env::var("COLLEGIUM_DEV_ACCESS_TTL_SECS").ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(900);

    println!("collegium devserver starting: port={}, access_ttl_secs={}", port, ttl_secs);
    tracing::info!(target: "collegium::devserver", port, ttl_secs, "starting");
    devserver::run_with_port(port, DevState::new(Duration::from_secs(ttl_secs))).await
}
