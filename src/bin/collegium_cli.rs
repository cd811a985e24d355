//!
//! collegium CLI binary
//! --------------------
//! Connect-mode client for the access layer: sign in, issue one operation through the
//! resilient executor and error boundary, inspect the last captured client error, sign out.
//! The session and the diagnostic cache live under `.collegium/` unless configured.

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

use collegium::cli::{apply_cli_flags, flag_value, has_flag, positionals, print_diagnostic, print_view};
use collegium::transport::Method;
use collegium::{AccessClient, AccessConfig, Operation};

const VALUE_FLAGS: &[&str] = &[
    "--api", "--identity", "--session-file", "--diagnostics-dir", "--logging-endpoint", "--remote-logging",
    "--body", "--requires", "--route",
];

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} login <username> <password>\n  {program} call <METHOD> <endpoint> [--body <json>] [--requires <permission>] [--route <path>]\n  {program} whoami\n  {program} last-error\n  {program} logout\n\nConnection flags (override COLLEGIUM_* env and COLLEGIUM_CONFIG):\n  --api <url>                 Business backend base URL\n  --identity <url>            Identity backend base URL\n  --session-file <path>       Durable session file (default .collegium/session.json)\n  --diagnostics-dir <path>    Diagnostic cache dir (default .collegium/diagnostics)\n  --logging-endpoint <url>    Remote error sink\n  --remote-logging <bool>     Enable remote error delivery\n  --no-remote-logging         Disable remote error delivery\n  -h, --help                  Show this help\n\nExamples:\n  {program} login bursar bursar\n  {program} call GET /api/fees --requires view_fees\n  {program} call POST /api/fees --body '{{\"student\": 2, \"amount\": 900}}' --requires manage_fees"
    );
}

fn load_config(args: &[String]) -> Result<AccessConfig> {
    let mut cfg = AccessConfig::load().context("loading configuration")?;
    let state_dir = PathBuf::from(".collegium");
    if cfg.session_file.is_none() { cfg.session_file = Some(state_dir.join("session.json")); }
    if cfg.diagnostics_dir.is_none() { cfg.diagnostics_dir = Some(state_dir.join("diagnostics")); }
    apply_cli_flags(&mut cfg, args)?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().cloned().unwrap_or_else(|| "collegium_cli".to_string());
    let pos = positionals(args.get(1..).unwrap_or(&[]), VALUE_FLAGS);

    if has_flag(&args, "--help") || has_flag(&args, "-h") || pos.is_empty() {
        print_usage(&program);
        return Ok(());
    }

    let cfg = load_config(&args)?;
    let client = AccessClient::from_config(&cfg)?;

    match pos[0].as_str() {
        "login" => {
            let (Some(user), Some(pass)) = (pos.get(1), pos.get(2)) else {
                print_usage(&program);
                return Err(anyhow!("login needs <username> <password>"));
            };
            let identity = client.login(user, pass).await.context("login failed")?;
            println!(
                "signed in as {} ({}); granted: {}",
                identity.display_name.as_deref().unwrap_or(&identity.user_id),
                identity.roles.join(", "),
                identity.permissions.granted_keys().join(", ")
            );
        }
        "call" => {
            let (Some(method), Some(endpoint)) = (pos.get(1), pos.get(2)) else {
                print_usage(&program);
                return Err(anyhow!("call needs <METHOD> <endpoint>"));
            };
            let method = Method::parse(method).ok_or_else(|| anyhow!("unknown method '{}'", method))?;
            let mut op = Operation::new(method, endpoint.clone());
            if let Some(raw) = flag_value(&args, "--body") {
                let body: Value = serde_json::from_str(&raw).context("--body is not valid JSON")?;
                op = op.body(body);
            }
            if let Some(key) = flag_value(&args, "--requires") {
                op = op.requires(key);
            }
            let route = flag_value(&args, "--route").unwrap_or_else(|| endpoint.clone());
            let view = client.execute_guarded(op, &route).await;
            let code = print_view(&view);
            client.reporter().flush().await;
            if code != 0 {
                std::process::exit(code);
            }
        }
        "whoami" => match client.session().identity() {
            Some(identity) => {
                println!("{}", serde_json::to_string_pretty(identity.as_ref())?);
                if let Some(cred) = client.session().current() {
                    println!("access token expires at {}", cred.expires_at.to_rfc3339());
                }
            }
            None => println!("not signed in"),
        },
        "last-error" => print_diagnostic(client.reporter().last_diagnostic().as_ref()),
        "logout" => {
            client.logout().await;
            println!("signed out");
        }
        other => {
            print_usage(&program);
            return Err(anyhow!("unknown command '{}'", other));
        }
    }
    Ok(())
}
