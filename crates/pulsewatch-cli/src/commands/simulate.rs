use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};

use pulsewatch_core::{HubMessage, Pipeline, PipelineConfig, SampleRecord, SerialOpener};

/// Longest wait for a single sample before giving up.
const SAMPLE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn run(
    config: PipelineConfig,
    count: usize,
    seed: Option<u64>,
    port: &str,
    baudrate: Option<u32>,
) -> anyhow::Result<()> {
    let sampling_rate = config.sampling_rate;
    let rt = super::runtime()?;
    rt.block_on(async move {
        let pipeline = Pipeline::start_with(config, Arc::new(SerialOpener), seed)?;
        let reply = pipeline.controller().connect(port, baudrate).await;
        if !reply.is_success() {
            pipeline.shutdown().await;
            bail!(
                "cannot connect to {port}: {}",
                reply.message.unwrap_or_default()
            );
        }
        // Registered after connecting so only the requested source is printed.
        let mut viewer = pipeline.hub().register();

        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let mut printed = 0;
        while printed < count {
            let message = tokio::time::timeout(SAMPLE_TIMEOUT, viewer.outbox.recv())
                .await
                .with_context(|| format!("no sample from {port} within {SAMPLE_TIMEOUT:?}"))?;
            let Some(message) = message else { break };
            if let HubMessage::Sample(sample) = message {
                let record = SampleRecord::new(&sample, sampling_rate);
                writeln!(out, "{}", serde_json::to_string(&record)?)?;
                printed += 1;
            }
        }
        out.flush()?;

        pipeline.controller().disconnect().await;
        pipeline.shutdown().await;
        anyhow::Ok(())
    })
}
