mod cli;
mod logging;

use clap::Parser;
use cli::Cli;
use rtc_tunnel::{PortMap, RunningTunnel, TunnelSupervisor};
use std::future::Future;
use tracing::{error, info, instrument};

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // --help and --version
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    logging::init_logging(&cli);

    if let Err(e) = run(cli).await {
        error!("Error: {}", e);
        // The log filter may hide the line above; this one always reaches stderr.
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[instrument(name = "run", skip(cli), fields(host = %cli.host))]
async fn run(cli: Cli) -> rtc_tunnel::Result<()> {
    info!(
        "rtc-tunnel v{} - forwarding to {}",
        env!("CARGO_PKG_VERSION"),
        cli.host
    );

    let port_map = PortMap::load(cli.config.as_deref())?;

    // Register handlers before anything is announced so an early signal
    // still takes the clean path.
    let shutdown = shutdown_signal()?;

    let tunnel = TunnelSupervisor::from_port_map(&cli.host, &port_map)
        .with_connect_timeout(cli.connect_timeout())
        .start()
        .await?;

    print_banner(&port_map, &tunnel);

    tunnel.run_until(shutdown).await?;

    println!("\nShutting down.");
    Ok(())
}

fn print_banner(port_map: &PortMap, tunnel: &RunningTunnel) {
    for binding in tunnel.bindings() {
        println!("{}", binding);
    }

    println!("Tunnel active.");
    for (spec, binding) in port_map.specs().iter().zip(tunnel.bindings()) {
        let label = spec
            .label
            .clone()
            .unwrap_or_else(|| spec.protocol.to_string());
        println!(
            "  {:<5} -> {}://localhost:{}",
            label,
            spec.protocol.scheme(),
            binding.local_addr.port()
        );
    }
}

#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    })
}
