use std::sync::Arc;

use pulsewatch_core::Pipeline;

use super::FileConfig;

pub struct ServeOptions {
    pub file: FileConfig,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub connect: Option<String>,
    pub baudrate: Option<u32>,
}

pub fn run(opts: ServeOptions) -> anyhow::Result<()> {
    let FileConfig {
        pipeline: pipeline_config,
        server: mut server_config,
    } = opts.file;
    if let Some(host) = opts.host {
        server_config.host = host;
    }
    if let Some(port) = opts.port {
        server_config.port = port;
    }

    let base = format!("http://{}:{}", server_config.host, server_config.port);
    println!("pulsewatch server v{}", pulsewatch_core::VERSION);
    println!("   {base}");
    println!(
        "   {} Hz sampling, {} Hz notch (Q={}), {} samples per position",
        pipeline_config.sampling_rate,
        pipeline_config.notch_frequency,
        pipeline_config.quality_factor,
        pipeline_config.buffer_capacity
    );
    println!();
    println!("   Endpoints:");
    println!("     POST /login           Form login, sets the session cookie");
    println!("     GET  /api/ports       Serial ports and debug ports");
    println!("     POST /api/connect     {{\"port\": \"DEBUG_COM1\", \"baudrate\": 115200}}");
    println!("     POST /api/disconnect  Revert to the fallback source");
    println!("     GET  /api/status      Source state and diagnostics");
    println!("     GET  /ws              WebSocket sample stream");
    println!();

    let rt = super::runtime()?;
    rt.block_on(async move {
        let pipeline = Arc::new(Pipeline::start(pipeline_config)?);
        if let Some(port) = opts.connect {
            let reply = pipeline.controller().connect(&port, opts.baudrate).await;
            if !reply.is_success() {
                log::warn!(
                    "startup connect to {port} failed: {}",
                    reply.message.as_deref().unwrap_or("unknown error")
                );
            }
        }
        pulsewatch_server::run_server(pipeline, server_config).await?;
        anyhow::Ok(())
    })
}
