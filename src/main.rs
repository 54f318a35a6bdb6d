use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use rtp_recv::{
    init_tracing, CpalSink, MetricsContext, MetricsServerConfig, ModuleArgs, RtpRecv,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Module arguments as key=value pairs: sink=<device> [sap_address=<group>]
    #[arg(required = true)]
    module_args: Vec<String>,

    /// Serve Prometheus metrics on this address, e.g. 127.0.0.1:9100
    #[arg(long)]
    metrics_bind: Option<std::net::SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let args = Args::parse();
    let modargs =
        ModuleArgs::parse(&args.module_args).context("failed to parse module arguments")?;

    let metrics = MetricsContext::new()?;
    if let Some(bind) = args.metrics_bind {
        let addr = metrics
            .serve_metrics(MetricsServerConfig { bind })
            .await
            .context("failed to start metrics endpoint")?;
        info!("metrics served on http://{addr}/metrics");
    }

    let sink = Arc::new(CpalSink::new(&modargs.sink).context("failed to open audio sink")?);
    let recv = RtpRecv::bind(modargs.sap_address, sink, metrics)
        .context("failed to bind SAP socket")?;

    info!(
        "listening for SAP announcements on {}",
        recv.local_addr()?
    );

    tokio::select! {
        result = recv.run() => result.context("discovery loop failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    Ok(())
}
