use std::fmt;

use log::{debug, error, info};

use crate::config::PodIdentity;

/// Installs the global `log` backend. Level comes from `RUST_LOG`, defaulting to `info`.
pub fn init() {
    if std::env::var_os("RUST_LOG").is_none() {
        pretty_env_logger::formatted_timed_builder()
            .filter_level(log::LevelFilter::Info)
            .init();
    } else {
        pretty_env_logger::init_timed();
    }
}

/// Logger value carrying the pod fields, passed to everything that logs.
#[derive(Debug, Clone)]
pub struct ContextLogger {
    fields: String,
}

impl ContextLogger {
    pub fn new(pod: &PodIdentity) -> Self {
        ContextLogger {
            fields: format!(
                "podnamespace={} podname={} podip={}",
                pod.pod_namespace, pod.pod_name, pod.pod_ip
            ),
        }
    }

    pub fn fields(&self) -> &str {
        &self.fields
    }

    pub fn info(&self, msg: impl fmt::Display) {
        info!("{} {}", msg, self.fields);
    }

    pub fn error(&self, msg: impl fmt::Display) {
        error!("{} {}", msg, self.fields);
    }

    pub fn debug(&self, msg: impl fmt::Display) {
        debug!("{} {}", msg, self.fields);
    }
}
