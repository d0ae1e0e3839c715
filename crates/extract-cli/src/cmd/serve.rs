use anyhow::Context;
use extract_core::config::Config;
use std::path::Path;

pub fn run(root: &Path, port: u16, no_open: bool, no_orchestrator: bool) -> anyhow::Result<()> {
    // Fail fast on an uninitialized root instead of inside the runtime.
    Config::load(root).context("failed to load config")?;

    let rt = tokio::runtime::Runtime::new()?;
    let root_buf = root.to_path_buf();

    rt.block_on(async move {
        tokio::select! {
            result = extract_server::serve(root_buf, port, !no_open, !no_orchestrator) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                Ok(())
            }
        }
    })
}
