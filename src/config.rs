use std::fmt;
use std::time::Duration;

use clap::Parser;

/// Instance metadata endpoint used by virtual machines and AKS nodes.
pub const DEFAULT_MSI_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Repeatedly probes MSI token acquisition and an ARM list call
#[derive(Parser, Debug, Clone)]
#[command(name = "probe")]
pub struct Args {
    /// retry wait time in seconds
    #[arg(long = "retry-wait-time", env = "RETRY_WAIT_TIME", default_value_t = 20)]
    pub retry_wait_time: u64,

    /// resourcename for aad id
    #[arg(
        long = "aad-resourcename",
        env = "AAD_RESOURCENAME",
        default_value = "https://management.azure.com/"
    )]
    pub resource: String,

    /// subscriptionID for test
    #[arg(
        long = "subscriptionID",
        env = "SUBSCRIPTION_ID",
        default_value = "c1089427-83d3-4286-9f35-5af546a6eb67"
    )]
    pub subscription_id: String,

    /// clientID for the msi id
    #[arg(
        long = "clientID",
        env = "CLIENT_ID",
        default_value = "89f69b3d-5b41-4b14-afbf-18fd96104e14"
    )]
    pub client_id: String,

    /// any resource group with reader permission to the aad object
    #[arg(
        long = "resourceGroup",
        env = "RESOURCE_GROUP",
        default_value = "MC_nbhatia-eu-01_eu-1_eastus"
    )]
    pub resource_group: String,

    /// MSI token endpoint
    #[arg(long = "msi-endpoint", env = "MSI_ENDPOINT", default_value = DEFAULT_MSI_ENDPOINT)]
    pub msi_endpoint: String,

    /// Azure Resource Manager endpoint
    #[arg(
        long = "arm-endpoint",
        env = "ARM_ENDPOINT",
        default_value = "https://management.azure.com"
    )]
    pub arm_endpoint: String,

    /// HTTP request timeout in seconds
    #[arg(long = "request-timeout", env = "REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout: u64,
}

/// Immutable settings for the probe loop, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    pub retry_wait: Duration,
    pub resource_uri: String,
    pub subscription_id: String,
    pub client_id: String,
    pub resource_group: String,
    pub msi_endpoint: String,
    pub arm_endpoint: String,
    pub request_timeout: Duration,
}

impl From<Args> for ProbeConfig {
    fn from(args: Args) -> Self {
        ProbeConfig {
            retry_wait: Duration::from_secs(args.retry_wait_time),
            resource_uri: args.resource,
            subscription_id: args.subscription_id,
            client_id: args.client_id,
            resource_group: args.resource_group,
            msi_endpoint: args.msi_endpoint,
            arm_endpoint: args.arm_endpoint.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(args.request_timeout),
        }
    }
}

/// Pod metadata injected through the downward API, attached to every log line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodIdentity {
    pub pod_name: String,
    pub pod_namespace: String,
    pub pod_ip: String,
}

impl PodIdentity {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the pod fields through `lookup`; unset variables become empty strings.
    ///
    /// The namespace is read from `MY_POD_NAME` as well.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        PodIdentity {
            pod_name: lookup("MY_POD_NAME").unwrap_or_default(),
            pod_namespace: lookup("MY_POD_NAME").unwrap_or_default(),
            pod_ip: lookup("MY_POD_IP").unwrap_or_default(),
        }
    }
}

impl fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.pod_namespace, self.pod_name, self.pod_ip)
    }
}
