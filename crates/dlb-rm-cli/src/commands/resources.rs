//! Resources command.
//!
//! This is a pure shim that delegates to `dlb_rm_core::Device`.

use clap::Args;
use dlb_rm_core::{Device, DeviceConfig, Func};

use crate::output::{print_resources, FunctionRow, OutputFormat};

/// Arguments for the resources command.
#[derive(Args)]
pub struct ResourcesArgs {
    /// Show only this VF (omit for the PF and every VF).
    #[arg(long)]
    pub vf: Option<u32>,
}

/// Rows for `funcs` as the device currently reports them.
pub fn rows(device: &Device, funcs: &[Func]) -> anyhow::Result<Vec<FunctionRow>> {
    funcs
        .iter()
        .map(|&func| {
            Ok(FunctionRow {
                func: func.to_string(),
                resources: device.get_num_resources(func)?,
            })
        })
        .collect()
}

/// The PF followed by every enabled VF.
pub fn all_funcs(config: &DeviceConfig) -> Vec<Func> {
    std::iter::once(Func::Pf)
        .chain((0..config.num_vfs).map(Func::Vf))
        .collect()
}

/// Show the resources each function starts with.
pub fn resources(args: &ResourcesArgs, config: DeviceConfig, format: OutputFormat) -> anyhow::Result<()> {
    let funcs = match args.vf {
        Some(vf) => vec![Func::Vf(vf)],
        None => all_funcs(&config),
    };
    let (device, _) = Device::simulated(config)?;
    print_resources(&rows(&device, &funcs)?, format)
}
