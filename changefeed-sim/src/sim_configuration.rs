use anyhow::{Context, Result};
use changefeed_processor::{ProcessorConfiguration, ProcessorOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// configuration settings loaded from the config file
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LoadConfiguration {
    /// Processor settings shared by every simulated host
    pub(crate) processor: ProcessorConfiguration,
    /// Simulation scenario
    pub(crate) simulation: SimulationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SimulationConfig {
    pub(crate) hosts: usize,
    pub(crate) partitions: usize,
    pub(crate) documents_per_second: u64,
    pub(crate) duration_secs: u64,
    #[serde(default)]
    pub(crate) stop_host_after_secs: Option<u64>,
    #[serde(default)]
    pub(crate) split_after_secs: Option<u64>,
}

/// Validated simulation settings.
#[derive(Debug)]
pub(crate) struct SimConfiguration {
    /// Options of host 0; other hosts only differ by host name
    pub(crate) processor: ProcessorOptions,
    pub(crate) hosts: usize,
    pub(crate) partitions: usize,
    pub(crate) documents_per_second: u64,
    pub(crate) duration: Duration,
    pub(crate) stop_host_after: Option<Duration>,
    pub(crate) split_after: Option<Duration>,
}

impl SimConfiguration {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let load_config: LoadConfiguration = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        load_config.try_into()
    }

    /// Options for the host at `index`.
    pub(crate) fn host_options(&self, index: usize) -> ProcessorOptions {
        ProcessorOptions {
            host_name: format!("{}-{}", self.processor.host_name, index),
            ..self.processor.clone()
        }
    }
}

impl TryFrom<LoadConfiguration> for SimConfiguration {
    type Error = anyhow::Error;

    fn try_from(config: LoadConfiguration) -> Result<Self> {
        let processor = ProcessorOptions::try_from(config.processor)
            .context("Invalid processor configuration")?;
        let simulation = config.simulation;

        if simulation.hosts == 0 {
            anyhow::bail!("simulation.hosts must be at least 1");
        }
        if simulation.partitions == 0 {
            anyhow::bail!("simulation.partitions must be at least 1");
        }

        Ok(SimConfiguration {
            processor,
            hosts: simulation.hosts,
            partitions: simulation.partitions,
            documents_per_second: simulation.documents_per_second,
            duration: Duration::from_secs(simulation.duration_secs),
            stop_host_after: simulation.stop_host_after_secs.map(Duration::from_secs),
            split_after: simulation.split_after_secs.map(Duration::from_secs),
        })
    }
}
