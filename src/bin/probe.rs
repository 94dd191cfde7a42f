use std::error::Error;

use clap::Parser;
use log::{debug, error, info};
use reqwest::Client;

use msi_probe::arm::ArmClient;
use msi_probe::identity::ImdsIdentityProvider;
use msi_probe::logging::{self, ContextLogger};
use msi_probe::{Args, PodIdentity, ProbeConfig, ProbeLoop};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();
    logging::init();

    let config = ProbeConfig::from(Args::parse());
    debug!("Probe config: {:#?}", config);

    let pod = PodIdentity::from_env();
    info!("starting demo pod {}", pod);
    let logger = ContextLogger::new(&pod);

    let client = Client::builder().timeout(config.request_timeout).build()?;
    let identity = ImdsIdentityProvider::new(client.clone());
    let arm = ArmClient::new(client, config.arm_endpoint.clone());

    let probe = match ProbeLoop::new(&config, identity, arm, logger.clone()) {
        Ok(probe) => probe,
        Err(e) => {
            error!("failed to get msiendpoint, {} {}", e, logger.fields());
            return Err(e.into());
        }
    };

    info!("Probing {} every {:?}", probe.endpoint(), config.retry_wait);
    probe.run().await;

    Ok(())
}
