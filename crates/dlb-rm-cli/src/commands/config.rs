//! Config command.

use dlb_rm_core::DeviceConfig;

use crate::output::{print_json, OutputFormat};

/// Show the effective device configuration.
pub fn config(config: &DeviceConfig, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            let port_cap = config
                .effective_port_cap()
                .map_or_else(|| "none".to_string(), |cap| cap.to_string());
            println!("{:<20} {:?}", "revision", config.revision);
            println!("{:<20} {}", "num_vfs", config.num_vfs);
            println!("{:<20} {}", "port_cap", port_cap);
            println!("{:<20} {}", "cq_drain_retries", config.cq_drain_retries);
            println!("{:<20} {}", "queue_drain_retries", config.queue_drain_retries);
            println!("{:<20} {}us", "worker_backoff", config.worker_backoff_us);
            println!("{:<20} {}ms", "mbox_timeout", config.mbox_timeout_ms);
            println!("{:<20} {}s", "reset_timeout", config.reset_timeout_s);
        }
        OutputFormat::Json => print_json(config)?,
        OutputFormat::Raw => print!("{}", toml::to_string(config)?),
    }
    Ok(())
}
