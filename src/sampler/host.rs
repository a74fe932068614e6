//! Host metric source backed by `sysinfo`

use std::path::Path;

use sysinfo::{Disks, System};

use crate::error::MetricError;

use super::MetricSource;

const MB: f64 = (1u64 << 20) as f64;
const GB: u64 = 1 << 30;

/// Reads memory, root disk and cpu information from the local host
pub struct HostMetrics {
    system: System,
    disks: Disks,
}

impl HostMetrics {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            disks: Disks::new(),
        }
    }
}

impl Default for HostMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for HostMetrics {
    fn system_section(&mut self) -> Result<String, MetricError> {
        self.system.refresh_memory();

        let hostname = System::host_name().ok_or(MetricError::Unavailable("hostname"))?;
        if self.system.total_memory() == 0 {
            return Err(MetricError::Collector {
                section: "system",
                message: "host reported no memory".into(),
            });
        }

        let total = self.system.total_memory() as f64 / MB;
        let used = self.system.used_memory() as f64 / MB;

        Ok(format!(
            "Hostname: {}\nTotal Memory: {:.2} MB\nUsed Memory: {:.2} MB\nOS: {}",
            hostname,
            total,
            used,
            std::env::consts::OS
        ))
    }

    fn disk_section(&mut self) -> Result<String, MetricError> {
        self.disks.refresh_list();

        let root = self
            .disks
            .list()
            .iter()
            .find(|disk| disk.mount_point() == Path::new("/"))
            .ok_or(MetricError::Unavailable("root disk"))?;

        Ok(format!(
            "Total Disk Space: {} GB\nFree Disk Space: {} GB",
            root.total_space() / GB,
            root.available_space() / GB
        ))
    }

    fn cpu_section(&mut self) -> Result<String, MetricError> {
        self.system.refresh_cpu();

        let cpus = self.system.cpus();
        let first = cpus.first().ok_or(MetricError::Unavailable("cpu info"))?;
        let cores = self.system.physical_core_count().unwrap_or(cpus.len());

        Ok(format!("CPU: {}\nCores: {}", first.brand(), cores))
    }
}
