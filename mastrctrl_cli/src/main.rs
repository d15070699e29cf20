use anyhow::Context;
use clap::Parser;
use mastrctrl_sync::{
    actor, demo_parameters, init_tracing, ConnectionEvent, ServerEndpoint, SessionSnapshot,
    SyncConfig, SystemClock,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mastrctrl", about = "Join a MastrCtrl sync channel from the terminal")]
struct Args {
    /// Named endpoint to use (see MASTRCTRL_ENDPOINT).
    #[arg(long, conflicts_with = "url")]
    endpoint: Option<String>,

    /// Connect to this ws:// or wss:// URL instead of a named endpoint.
    #[arg(long)]
    url: Option<String>,

    /// Publish the demo parameter set once connected.
    #[arg(long, default_value_t = false)]
    demo: bool,

    /// Set a parameter after connecting, e.g. `--set drive=0.8`. Repeatable.
    #[arg(long = "set", value_name = "ID=VALUE", value_parser = parse_assignment)]
    set: Vec<(String, f64)>,

    #[arg(long)]
    fade_delay_secs: Option<u64>,

    #[arg(long, default_value_t = false)]
    no_large_display: bool,

    /// Exit after this many milliseconds instead of waiting for ctrl-c.
    #[arg(long)]
    run_for_ms: Option<u64>,
}

fn parse_assignment(raw: &str) -> Result<(String, f64), String> {
    let (id, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ID=VALUE, got {raw:?}"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("bad value in {raw:?}: {e}"))?;
    Ok((id.trim().to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let mut config = SyncConfig::from_env().context("invalid environment configuration")?;
    if let Some(url) = args.url.as_deref() {
        config
            .endpoints
            .upsert_and_select(ServerEndpoint::new("cli", "Command line", url)?);
    } else if let Some(id) = args.endpoint.as_deref() {
        config.endpoints.select(id)?;
    }
    if let Some(secs) = args.fade_delay_secs {
        config.fade_delay = mastrctrl_sync::config::clamp_fade_delay(Duration::from_secs(secs));
    }
    if args.no_large_display {
        config.large_display = false;
    }

    let endpoint = config.endpoints.current().clone();
    info!(endpoint = %endpoint.id, url = %endpoint.url, "starting session");

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (handle, task) = actor::spawn(config, Arc::new(SystemClock), Some(events_tx));
    handle.connect().await?;

    let mut published = false;
    let stop = async {
        match args.run_for_ms {
            Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "ctrl-c handler unavailable");
                    std::future::pending::<()>().await;
                }
            }
        }
    };
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    ConnectionEvent::Connected { url } => {
                        info!(%url, "connected");
                        if !published {
                            published = true;
                            if args.demo {
                                handle.load_parameters(demo_parameters()).await?;
                            }
                            for (id, value) in &args.set {
                                handle.set_value(id, *value).await?;
                            }
                        }
                    }
                    ConnectionEvent::RetriesExhausted { attempts } => {
                        warn!(attempts, "server unreachable, giving up");
                        break;
                    }
                    other => info!(event = ?other, "connection"),
                }
            }
        }
    }

    let snapshot = handle.snapshot().await?;
    print_snapshot(&snapshot);
    handle.shutdown().await?;
    task.await.context("session task panicked")?;
    Ok(())
}

fn print_snapshot(snap: &SessionSnapshot) {
    println!("status:    {} ({})", snap.status, snap.endpoint);
    println!(
        "structure: {}",
        snap.structure_hash.as_deref().unwrap_or("<none>")
    );
    for p in &snap.parameters {
        println!("  {:<14} {:>6}  {}", p.id, p.text, p.color);
    }
    if let Some(display) = &snap.display {
        println!("display:   {} {}", display.name, display.text);
    }
    println!("history:   {} recent messages", snap.history.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_parse() {
        assert_eq!(parse_assignment("drive=0.8"), Ok(("drive".to_string(), 0.8)));
        assert_eq!(parse_assignment(" mix = 1 "), Ok(("mix".to_string(), 1.0)));
        assert!(parse_assignment("drive").is_err());
        assert!(parse_assignment("drive=loud").is_err());
    }

    #[test]
    fn flags_parse() {
        let args = Args::try_parse_from([
            "mastrctrl",
            "--url",
            "ws://127.0.0.1:9000",
            "--demo",
            "--set",
            "drive=0.5",
            "--set",
            "tone=0.1",
            "--run-for-ms",
            "250",
        ])
        .unwrap();
        assert!(args.demo);
        assert_eq!(args.set.len(), 2);
        assert_eq!(args.run_for_ms, Some(250));
        assert!(Args::try_parse_from(["mastrctrl", "--url", "ws://x", "--endpoint", "pi"]).is_err());
    }
}
