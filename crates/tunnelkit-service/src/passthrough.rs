//! Built-in engine that accepts JSON object configurations and routes nothing
//!
//! Lets the daemon, the command channel and the observers run end to end on
//! hosts without a tunnel backend.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tunnelkit_command::StatusMessage;
use tunnelkit_core::{ConfigChecker, JsonConfigChecker};

use crate::engine::{Engine, ServiceContext, TunnelService};

#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEngine;

impl ConfigChecker for PassthroughEngine {
    fn check_config(&self, content: &str) -> Result<(), String> {
        JsonConfigChecker.check_config(content)
    }
}

impl Engine for PassthroughEngine {
    fn new_service(
        &self,
        config: &str,
        context: ServiceContext,
    ) -> Result<Box<dyn TunnelService>, String> {
        self.check_config(config)?;
        Ok(Box::new(PassthroughService::new(context)))
    }
}

struct PassthroughService {
    context: ServiceContext,
    running: AtomicBool,
    connections: AtomicU32,
    system: Mutex<System>,
}

impl PassthroughService {
    fn new(context: ServiceContext) -> Self {
        Self {
            context,
            running: AtomicBool::new(false),
            connections: AtomicU32::new(0),
            system: Mutex::new(System::new()),
        }
    }

    /// Resident set size of this process in bytes
    fn resident_memory(&self) -> u64 {
        let pid = Pid::from_u32(std::process::id());
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system.process(pid).map_or(0, sysinfo::Process::memory)
    }
}

#[async_trait]
impl TunnelService for PassthroughService {
    async fn start(&self) -> Result<(), String> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err("service is already started".to_string());
        }
        self.context.log.write_message(&format!(
            "(passthrough) service started, include_all_networks={} exclude_local_networks={}",
            self.context.options.include_all_networks, self.context.options.exclude_local_networks
        ));
        Ok(())
    }

    async fn close(&self) -> Result<(), String> {
        if self.running.swap(false, Ordering::SeqCst) {
            self.context.log.write_message("(passthrough) service closed");
        }
        Ok(())
    }

    async fn close_connections(&self) -> Result<(), String> {
        if !self.running.load(Ordering::SeqCst) {
            return Err("service is not running".to_string());
        }
        let dropped = self.connections.swap(0, Ordering::SeqCst);
        self.context
            .log
            .write_message(&format!("(passthrough) closed {dropped} connections"));
        Ok(())
    }

    fn status(&self) -> StatusMessage {
        let workers = tokio::runtime::Handle::try_current()
            .map(|handle| handle.metrics().num_workers())
            .unwrap_or(0);
        StatusMessage {
            memory: self.resident_memory(),
            workers: u32::try_from(workers).unwrap_or(u32::MAX),
            connections: self.connections.load(Ordering::SeqCst),
        }
    }
}
