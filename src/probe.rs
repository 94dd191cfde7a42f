//! The credential probe loop.
//!
//! The loop has a single state, running. Every iteration ends in a
//! [`Transition`]: `Wait` after both MSI probes succeeded, `Retry` as soon as
//! either of them fails. ARM failures and token mismatches are logged and
//! never change the transition. The only way out is the fatal endpoint error
//! returned by [`ProbeLoop::new`].

use std::time::Duration;

use crate::arm::ResourceManager;
use crate::config::ProbeConfig;
use crate::error::{ProbeError, ProbeResult};
use crate::identity::{Identity, IdentityProvider, MsiEndpoint, TokenSource};
use crate::logging::ContextLogger;
use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Start the next iteration immediately.
    Retry,
    /// Sleep, then start the next iteration.
    Wait(Duration),
}

/// What happened during one iteration.
#[derive(Debug)]
pub struct IterationReport {
    /// VMs listed by the ARM probe, if it got that far.
    pub vm_count: Option<usize>,
    /// Every error logged during the iteration, in order.
    pub errors: Vec<ProbeError>,
    /// Whether the two MSI tokens were compared.
    pub cross_checked: bool,
    pub transition: Transition,
}

impl IterationReport {
    fn new() -> Self {
        IterationReport {
            vm_count: None,
            errors: Vec::new(),
            cross_checked: false,
            transition: Transition::Retry,
        }
    }
}

pub struct ProbeLoop<'a, I, R> {
    config: &'a ProbeConfig,
    endpoint: MsiEndpoint,
    identity: I,
    arm: R,
    logger: ContextLogger,
}

impl<'a, I, R> ProbeLoop<'a, I, R>
where
    I: IdentityProvider,
    R: ResourceManager,
{
    /// Resolves the MSI endpoint; failing here means the loop never starts.
    pub fn new(config: &'a ProbeConfig, identity: I, arm: R, logger: ContextLogger) -> ProbeResult<Self> {
        let endpoint = MsiEndpoint::resolve(&config.msi_endpoint)?;
        Ok(ProbeLoop {
            config,
            endpoint,
            identity,
            arm,
            logger,
        })
    }

    pub fn endpoint(&self) -> &MsiEndpoint {
        &self.endpoint
    }

    /// Runs until the process is terminated.
    pub async fn run(&self) {
        loop {
            if let Some(wait) = delay(self.iterate().await.transition) {
                tokio::time::sleep(wait).await;
            }
        }
    }

    pub async fn iterate(&self) -> IterationReport {
        let mut report = IterationReport::new();

        self.probe_arm(&mut report).await;

        let system = match self.probe_msi(&Identity::SystemAssigned).await {
            Ok(token) => token,
            Err(e) => {
                self.fail(&mut report, e);
                return report;
            }
        };

        let user_assigned = Identity::UserAssigned {
            client_id: self.config.client_id.clone(),
        };
        let user = match self.probe_msi(&user_assigned).await {
            Ok(token) => token,
            Err(e) => {
                self.fail(&mut report, e);
                return report;
            }
        };

        report.cross_checked = true;
        if !system.same_access_token(&user) {
            self.logger.error(format!(
                "msi, emsi test failed system-assigned({}) user-assigned({})",
                describe(&system),
                describe(&user)
            ));
            report.errors.push(ProbeError::TokenMismatch);
        }

        report.transition = Transition::Wait(self.config.retry_wait);
        report
    }

    async fn probe_arm(&self, report: &mut IterationReport) {
        let authorizer = match self.arm.authorizer_from_environment() {
            Ok(authorizer) => authorizer,
            Err(e) => {
                self.fail(report, e);
                return;
            }
        };

        match self
            .arm
            .list_virtual_machines(&authorizer, &self.config.subscription_id, &self.config.resource_group)
            .await
        {
            Ok(vms) => {
                self.logger
                    .info(format!("successful ARM operations, vm count {}", vms.len()));
                report.vm_count = Some(vms.len());
            }
            Err(e) => self.fail(report, e),
        }
    }

    async fn probe_msi(&self, identity: &Identity) -> ProbeResult<Token> {
        let mut source = self
            .identity
            .token_from_msi(&self.endpoint, &self.config.resource_uri, identity)?;
        source.refresh().await?;

        let token = source.token();
        if token.is_zero() {
            return Err(ProbeError::ZeroToken {
                endpoint: self.endpoint.to_string(),
            });
        }

        match identity {
            Identity::SystemAssigned => self.logger.info(format!(
                "successfully acquired a token using the MSI, msiEndpoint({})",
                self.endpoint
            )),
            Identity::UserAssigned { client_id } => self.logger.info(format!(
                "successfully acquired a token, userAssignedID MSI, msiEndpoint({}) clientID({})",
                self.endpoint, client_id
            )),
        }
        if let Some(claims) = token.claims() {
            self.logger.debug(format!("token claims {}", claims));
        }
        Ok(token)
    }

    fn fail(&self, report: &mut IterationReport, err: ProbeError) {
        self.logger.error(&err);
        report.errors.push(err);
    }
}

/// How long to sleep before the next iteration, if at all.
pub fn delay(transition: Transition) -> Option<Duration> {
    match transition {
        Transition::Retry => None,
        Transition::Wait(wait) if wait.is_zero() => None,
        Transition::Wait(wait) => Some(wait),
    }
}

fn describe(token: &Token) -> String {
    match token.claims() {
        Some(claims) => claims.to_string(),
        None => format!("{:?}", token),
    }
}
