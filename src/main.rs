use anyhow::Context;
use std::io;
use tracing::info;

mod config;
mod dispatcher;
mod image_reference;
mod oci_registry;
mod resolver;
mod resource_list;
mod state;
mod workload;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

static CONFIG_PATH_ENV_VAR: &str = "IMAGE_DIGEST_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the ResourceList
    tracing_subscriber::fmt().with_writer(io::stderr).init();
    info!("Starting kpt-image-digest {}", env!("CARGO_PKG_VERSION"));

    let mut resource_list = resource_list::read_resource_list(io::stdin().lock())
        .context("Failed to read ResourceList from stdin")?;

    let function_config = match &resource_list.function_config {
        Some(function_config) => config::config_from_function_config(function_config)?,
        None => None,
    };
    let config = match function_config {
        Some(config) => config,
        None => config::load_config_from_env(CONFIG_PATH_ENV_VAR)?,
    };
    let registry_client = oci_registry::create_client(&config)?;
    info!(
        "Scanning {} resources for unpinned container images",
        resource_list.items.len()
    );

    let summary = dispatcher::pin_image_digests(
        &mut resource_list.items,
        &registry_client,
        config.concurrency,
    )
    .await;
    resource_list.push_results(&summary);

    resource_list::write_resource_list(io::stdout().lock(), &resource_list)
        .context("Failed to write ResourceList to stdout")?;

    Ok(())
}
