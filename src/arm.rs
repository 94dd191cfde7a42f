//! Azure Resource Manager probe: an environment or managed identity credential
//! and one VM list call.

use async_trait::async_trait;
use azure_core::auth::TokenCredential;
use azure_identity::{DefaultAzureCredential, DefaultAzureCredentialBuilder};
use log::debug;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{ProbeError, ProbeResult};

/// Compute API version used for listing virtual machines.
pub const COMPUTE_API_VERSION: &str = "2018-04-01";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VirtualMachine {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
}

#[async_trait]
pub trait ResourceManager: Send + Sync {
    type Authorizer: Send + Sync;

    /// Builds credentials from `AZURE_*` environment variables, falling back
    /// to the managed identity when no secrets are configured.
    fn authorizer_from_environment(&self) -> ProbeResult<Self::Authorizer>;

    /// Lists the virtual machines of one resource group (first page only).
    async fn list_virtual_machines(
        &self,
        authorizer: &Self::Authorizer,
        subscription_id: &str,
        resource_group: &str,
    ) -> ProbeResult<Vec<VirtualMachine>>;
}

#[derive(Debug, Clone)]
pub struct ArmClient {
    client: Client,
    endpoint: String,
}

impl ArmClient {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        ArmClient {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn scope(&self) -> String {
        format!("{}/.default", self.endpoint)
    }

    fn virtual_machines_url(&self, subscription_id: &str, resource_group: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines?api-version={}",
            self.endpoint, subscription_id, resource_group, COMPUTE_API_VERSION
        )
    }

    async fn list_with_bearer(
        &self,
        bearer: &str,
        subscription_id: &str,
        resource_group: &str,
    ) -> ProbeResult<Vec<VirtualMachine>> {
        let list_error = |message: String| ProbeError::List { message };

        let url = self.virtual_machines_url(subscription_id, resource_group);
        debug!("Listing virtual machines: {}", url);
        let response = self
            .client
            .get(url)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| list_error(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| list_error(e.to_string()))?;
        if !status.is_success() {
            let detail = serde_json::from_str::<CloudErrorBody>(&body)
                .map(|b| format!(": {} {}", b.error.code, b.error.message))
                .unwrap_or_default();
            return Err(list_error(format!("HTTP {}{}", status, detail)));
        }

        let page: VirtualMachineListResult = serde_json::from_str(&body)
            .map_err(|e| list_error(format!("invalid list response: {e}")))?;
        Ok(page.value)
    }
}

#[derive(Debug, Deserialize)]
struct VirtualMachineListResult {
    #[serde(default)]
    value: Vec<VirtualMachine>,
}

#[derive(Debug, Deserialize)]
struct CloudErrorBody {
    error: CloudError,
}

#[derive(Debug, Default, Deserialize)]
struct CloudError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[async_trait]
impl ResourceManager for ArmClient {
    type Authorizer = DefaultAzureCredential;

    fn authorizer_from_environment(&self) -> ProbeResult<DefaultAzureCredential> {
        DefaultAzureCredentialBuilder::new()
            .exclude_azure_cli_credential()
            .build()
            .map_err(|e| ProbeError::Auth {
                message: e.to_string(),
            })
    }

    async fn list_virtual_machines(
        &self,
        authorizer: &DefaultAzureCredential,
        subscription_id: &str,
        resource_group: &str,
    ) -> ProbeResult<Vec<VirtualMachine>> {
        let scope = self.scope();
        let token = authorizer
            .get_token(&[scope.as_str()])
            .await
            .map_err(|e| ProbeError::List {
                message: format!("failed to get ARM token: {e}"),
            })?;

        self.list_with_bearer(token.token.secret(), subscription_id, resource_group)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VM_PATH: &str = "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines";

    #[test]
    fn builds_scope_and_list_url() {
        let arm = ArmClient::new(Client::new(), "https://management.azure.com/");
        assert_eq!(arm.scope(), "https://management.azure.com/.default");
        assert_eq!(
            arm.virtual_machines_url("sub-1", "MC_rg_eastus"),
            "https://management.azure.com/subscriptions/sub-1/resourceGroups/MC_rg_eastus/providers/Microsoft.Compute/virtualMachines?api-version=2018-04-01"
        );
    }

    #[test]
    fn authorizer_falls_back_to_managed_identity_without_secrets() {
        for key in [
            "AZURE_TENANT_ID",
            "AZURE_CLIENT_ID",
            "AZURE_CLIENT_SECRET",
            "AZURE_CLIENT_CERTIFICATE_PATH",
            "AZURE_FEDERATED_TOKEN_FILE",
            "AZURE_USERNAME",
            "AZURE_PASSWORD",
        ] {
            std::env::remove_var(key);
        }

        let arm = ArmClient::new(Client::new(), "https://management.azure.com");
        assert!(arm.authorizer_from_environment().is_ok());
    }

    #[tokio::test]
    async fn lists_first_page_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(VM_PATH))
            .and(query_param("api-version", COMPUTE_API_VERSION))
            .and(header("Authorization", "Bearer t0ken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [
                    {"id": format!("{VM_PATH}/vm-0"), "name": "vm-0", "location": "eastus"},
                    {"id": format!("{VM_PATH}/vm-1"), "name": "vm-1", "location": "eastus"}
                ],
                "nextLink": "https://management.azure.com/next"
            })))
            .expect(1)
            .mount(&server)
            .await;
        let arm = ArmClient::new(Client::new(), server.uri());

        let vms = arm.list_with_bearer("t0ken", "sub-1", "rg").await.unwrap();
        assert_eq!(vms.len(), 2);
        assert_eq!(vms[1].name, "vm-1");
    }

    #[tokio::test]
    async fn empty_group_lists_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(VM_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": []})))
            .mount(&server)
            .await;
        let arm = ArmClient::new(Client::new(), server.uri());

        let vms = arm.list_with_bearer("t", "sub-1", "rg").await.unwrap();
        assert!(vms.is_empty());
    }

    #[tokio::test]
    async fn surfaces_cloud_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(VM_PATH))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": {"code": "AuthorizationFailed", "message": "no read permission"}
            })))
            .mount(&server)
            .await;
        let arm = ArmClient::new(Client::new(), server.uri());

        let err = arm.list_with_bearer("t", "sub-1", "rg").await.unwrap_err();
        match err {
            ProbeError::List { message } => {
                assert!(message.contains("403"));
                assert!(message.contains("AuthorizationFailed"));
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
