use std::sync::Arc;

use pulsewatch_core::{Pipeline, PipelineConfig, SerialOpener};

pub fn run(config: PipelineConfig) -> anyhow::Result<()> {
    let prefix = config.debug_prefix.clone();
    let rt = super::runtime()?;
    let ports = rt.block_on(async move {
        let pipeline = Pipeline::start_with(config, Arc::new(SerialOpener), None)?;
        let ports = pipeline.controller().list_sources();
        pipeline.shutdown().await;
        anyhow::Ok(ports)
    })?;

    let real = ports.iter().filter(|p| !p.starts_with(&prefix)).count();
    println!("Found {real} serial port(s):");
    println!();
    for port in &ports {
        let kind = if port.starts_with(&prefix) { "debug (simulated)" } else { "serial" };
        println!("  {port:<24} {kind}");
    }
    Ok(())
}
