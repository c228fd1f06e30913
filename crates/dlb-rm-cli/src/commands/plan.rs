//! Plan command: apply a partitioning plan to a simulated device.
//!
//! A plan is a TOML document. `[[vf]]` tables hand resources to virtual
//! functions; `[[domain]]` tables create scheduling domains with their pools,
//! queues and ports, optionally map queues to ports, and start the domain.
//! Ports and maps refer to pools, queues and ports by their position in the
//! domain's own lists.
//!
//! ```toml
//! [[vf]]
//! id = 0
//! sched_domains = 1
//! ldb_queues = 2
//! ldb_ports = 1
//! ldb_credit_pools = 1
//! ldb_credits = 512
//! hist_list_entries = 64
//!
//! [[domain]]
//! vf = 0
//! resources = { num_ldb_queues = 2, num_ldb_ports = 1, num_ldb_credits = 512, num_ldb_credit_pools = 1, num_hist_list_entries = 32 }
//! ldb_pools = [{ num_ldb_credits = 512 }]
//! ldb_queues = [{}, {}]
//! ldb_ports = [{ ldb_pool = 0 }]
//! maps = [{ port = 0, queue = 0 }, { port = 0, queue = 1, priority = 4 }]
//! start = true
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Args;
use dlb_rm_core::args::{
    CreateDirPoolArgs, CreateDirPortArgs, CreateDirQueueArgs, CreateLdbPoolArgs,
    CreateLdbPortArgs, CreateLdbQueueArgs, CreateSchedDomainArgs, MapQidArgs,
};
use dlb_rm_core::{Device, DeviceConfig, Func, MapOutcome};
use serde::{Deserialize, Serialize};

use super::resources::{all_funcs, rows};
use crate::output::{print_json, print_resources, FunctionRow, OutputFormat};

/// Arguments for the plan command.
#[derive(Args)]
pub struct PlanArgs {
    /// Plan file (TOML).
    pub file: PathBuf,

    /// Reset every domain again after applying the plan.
    #[arg(long)]
    pub teardown: bool,
}

/// Resources handed to one VF. Omitted classes are left untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct VfPlan {
    id: u32,
    sched_domains: Option<u32>,
    ldb_queues: Option<u32>,
    ldb_ports: Option<u32>,
    dir_ports: Option<u32>,
    ldb_credit_pools: Option<u32>,
    dir_credit_pools: Option<u32>,
    ldb_credits: Option<u32>,
    dir_credits: Option<u32>,
    hist_list_entries: Option<u32>,
    atomic_inflights: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LdbPortPlan {
    ldb_pool: usize,
    dir_pool: usize,
    #[serde(flatten)]
    args: CreateLdbPortArgs,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DirPortPlan {
    ldb_pool: usize,
    dir_pool: usize,
    /// Create the paired directed queue too.
    with_queue: bool,
    #[serde(flatten)]
    args: CreateDirPortArgs,
}

impl Default for DirPortPlan {
    fn default() -> Self {
        Self {
            ldb_pool: 0,
            dir_pool: 0,
            with_queue: true,
            args: CreateDirPortArgs::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MapPlan {
    port: usize,
    queue: usize,
    priority: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DomainPlan {
    /// Owning VF; the PF when omitted.
    vf: Option<u32>,
    resources: CreateSchedDomainArgs,
    ldb_pools: Vec<CreateLdbPoolArgs>,
    dir_pools: Vec<CreateDirPoolArgs>,
    ldb_queues: Vec<CreateLdbQueueArgs>,
    ldb_ports: Vec<LdbPortPlan>,
    dir_ports: Vec<DirPortPlan>,
    maps: Vec<MapPlan>,
    start: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Plan {
    vf: Vec<VfPlan>,
    domain: Vec<DomainPlan>,
}

impl Plan {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading plan {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing plan {}", path.display()))
    }
}

#[derive(Debug, Serialize)]
struct MapReport {
    port: u32,
    qid: u32,
    priority: u32,
    outcome: MapOutcome,
}

/// Ids a domain's objects received, as its owner numbers them.
#[derive(Debug, Serialize)]
struct DomainReport {
    owner: String,
    id: u32,
    ldb_pools: Vec<u32>,
    dir_pools: Vec<u32>,
    ldb_queues: Vec<u32>,
    ldb_ports: Vec<u32>,
    dir_ports: Vec<u32>,
    maps: Vec<MapReport>,
    started: bool,
}

#[derive(Debug, Serialize)]
struct PlanReport {
    domains: Vec<DomainReport>,
    remaining: Vec<FunctionRow>,
}

fn pick(ids: &[u32], index: usize, what: &str) -> anyhow::Result<u32> {
    match ids.get(index) {
        Some(&id) => Ok(id),
        None => bail!("{what} {index} is not defined in this domain"),
    }
}

fn assign_vf(device: &Device, vf: &VfPlan) -> anyhow::Result<()> {
    type Update = fn(&Device, u32, u32) -> dlb_rm_core::Result<()>;
    let updates: [(Option<u32>, Update, &str); 10] = [
        (vf.sched_domains, Device::update_vf_sched_domains, "scheduling domains"),
        (vf.ldb_queues, Device::update_vf_ldb_queues, "ldb queues"),
        (vf.ldb_ports, Device::update_vf_ldb_ports, "ldb ports"),
        (vf.dir_ports, Device::update_vf_dir_ports, "dir ports"),
        (vf.ldb_credit_pools, Device::update_vf_ldb_credit_pools, "ldb credit pools"),
        (vf.dir_credit_pools, Device::update_vf_dir_credit_pools, "dir credit pools"),
        (vf.ldb_credits, Device::update_vf_ldb_credits, "ldb credits"),
        (vf.dir_credits, Device::update_vf_dir_credits, "dir credits"),
        (vf.hist_list_entries, Device::update_vf_hist_list_entries, "history-list entries"),
        (vf.atomic_inflights, Device::update_vf_atomic_inflights, "atomic inflights"),
    ];
    for (num, update, what) in updates {
        if let Some(num) = num {
            update(device, vf.id, num)
                .with_context(|| format!("assigning {num} {what} to vf{}", vf.id))?;
        }
    }
    Ok(())
}

fn build_domain(device: &Device, plan: &DomainPlan) -> anyhow::Result<DomainReport> {
    let func = plan.vf.map_or(Func::Pf, Func::Vf);
    if let Func::Vf(vf) = func {
        if !device.vf_is_locked(vf)? {
            device.lock_vf(vf)?;
        }
    }

    let id = device
        .create_sched_domain(func, &plan.resources)
        .with_context(|| format!("creating {func} domain"))?;
    tracing::debug!(%func, domain_id = id, "plan domain created");

    let ldb_pools = plan
        .ldb_pools
        .iter()
        .map(|args| device.create_ldb_pool(func, id, args))
        .collect::<Result<Vec<_>, _>>()
        .context("creating ldb pools")?;
    let dir_pools = plan
        .dir_pools
        .iter()
        .map(|args| device.create_dir_pool(func, id, args))
        .collect::<Result<Vec<_>, _>>()
        .context("creating dir pools")?;
    let ldb_queues = plan
        .ldb_queues
        .iter()
        .map(|args| device.create_ldb_queue(func, id, args))
        .collect::<Result<Vec<_>, _>>()
        .context("creating ldb queues")?;

    let mut ldb_ports = Vec::with_capacity(plan.ldb_ports.len());
    for port in &plan.ldb_ports {
        let mut args = port.args;
        args.ldb_credit_pool_id = pool_or_zero(&ldb_pools, port.ldb_pool, "ldb pool")?;
        args.dir_credit_pool_id = pool_or_zero(&dir_pools, port.dir_pool, "dir pool")?;
        ldb_ports.push(
            device
                .create_ldb_port(func, id, &args)
                .context("creating ldb port")?,
        );
    }

    let mut dir_ports = Vec::with_capacity(plan.dir_ports.len());
    for port in &plan.dir_ports {
        let mut args = port.args;
        args.ldb_credit_pool_id = pool_or_zero(&ldb_pools, port.ldb_pool, "ldb pool")?;
        args.dir_credit_pool_id = pool_or_zero(&dir_pools, port.dir_pool, "dir pool")?;
        let p = device
            .create_dir_port(func, id, &args)
            .context("creating dir port")?;
        if port.with_queue {
            let queue = CreateDirQueueArgs {
                port_id: i32::try_from(p).context("dir port id out of range")?,
            };
            device
                .create_dir_queue(func, id, &queue)
                .context("creating dir queue")?;
        }
        dir_ports.push(p);
    }

    let mut maps = Vec::with_capacity(plan.maps.len());
    for map in &plan.maps {
        let args = MapQidArgs {
            port_id: pick(&ldb_ports, map.port, "ldb port")?,
            qid: pick(&ldb_queues, map.queue, "ldb queue")?,
            priority: map.priority,
        };
        let outcome = device.map_qid(func, id, &args).context("mapping queue")?;
        maps.push(MapReport {
            port: args.port_id,
            qid: args.qid,
            priority: args.priority,
            outcome,
        });
    }

    if plan.start {
        device.start_domain(func, id).context("starting domain")?;
    }

    Ok(DomainReport {
        owner: func.to_string(),
        id,
        ldb_pools,
        dir_pools,
        ldb_queues,
        ldb_ports,
        dir_ports,
        maps,
        started: plan.start,
    })
}

/// Pool id at `index`; a domain without pools of that kind uses id 0, which
/// the device ignores.
fn pool_or_zero(pools: &[u32], index: usize, what: &str) -> anyhow::Result<u32> {
    if pools.is_empty() {
        return Ok(0);
    }
    pick(pools, index, what)
}

fn apply(device: &Device, config: &DeviceConfig, plan: &Plan) -> anyhow::Result<PlanReport> {
    for vf in &plan.vf {
        assign_vf(device, vf)?;
    }
    let domains = plan
        .domain
        .iter()
        .enumerate()
        .map(|(i, domain)| build_domain(device, domain).with_context(|| format!("domain #{i}")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let remaining = rows(device, &all_funcs(config))?;
    Ok(PlanReport { domains, remaining })
}

fn teardown(device: &Device, report: &PlanReport) -> anyhow::Result<()> {
    for domain in &report.domains {
        let func = if domain.owner == "pf" {
            Func::Pf
        } else {
            let vf = domain.owner.trim_start_matches("vf").parse()?;
            Func::Vf(vf)
        };
        device
            .reset_domain(func, domain.id)
            .with_context(|| format!("resetting {} domain {}", domain.owner, domain.id))?;
    }
    Ok(())
}

/// Apply a plan to a fresh simulated device and report the outcome.
pub fn plan(args: &PlanArgs, config: DeviceConfig, format: OutputFormat) -> anyhow::Result<()> {
    let plan = Plan::load(&args.file)?;
    let (device, _) = Device::simulated(config.clone())?;
    let report = apply(&device, &config, &plan)?;
    if args.teardown {
        teardown(&device, &report)?;
        tracing::info!(domains = report.domains.len(), "plan torn down");
    }

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            for d in &report.domains {
                println!(
                    "{} domain {}: {} ldb queues, {} ldb ports, {} dir ports, {} maps{}",
                    d.owner,
                    d.id,
                    d.ldb_queues.len(),
                    d.ldb_ports.len(),
                    d.dir_ports.len(),
                    d.maps.len(),
                    if d.started { ", started" } else { "" }
                );
            }
            println!();
            print_resources(&report.remaining, format)?;
        }
        OutputFormat::Raw => {
            for d in &report.domains {
                println!("{} {} {}", d.owner, d.id, u8::from(d.started));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
        [[vf]]
        id = 0
        sched_domains = 1
        ldb_queues = 2
        ldb_ports = 1
        ldb_credit_pools = 1
        ldb_credits = 512
        hist_list_entries = 64

        [[domain]]
        resources = { num_ldb_queues = 1, num_ldb_ports = 1, num_dir_ports = 1, num_ldb_credits = 256, num_dir_credits = 64, num_ldb_credit_pools = 1, num_dir_credit_pools = 1, num_hist_list_entries = 32 }
        ldb_pools = [{ num_ldb_credits = 256 }]
        dir_pools = [{ num_dir_credits = 64 }]
        ldb_queues = [{}]
        ldb_ports = [{}]
        dir_ports = [{}]
        maps = [{ port = 0, queue = 0, priority = 2 }]
        start = true

        [[domain]]
        vf = 0
        resources = { num_ldb_queues = 2, num_ldb_ports = 1, num_ldb_credits = 512, num_ldb_credit_pools = 1, num_hist_list_entries = 32 }
        ldb_pools = [{ num_ldb_credits = 512 }]
        ldb_queues = [{}, { num_qid_inflights = 16 }]
        ldb_ports = [{ ldb_pool = 0, cq_depth = 64 }]
        maps = [{ port = 0, queue = 0 }, { port = 0, queue = 1, priority = 4 }]
    "#;

    fn device(num_vfs: u32) -> (Device, DeviceConfig) {
        let config = DeviceConfig {
            num_vfs,
            ..DeviceConfig::default()
        };
        let (device, _) = Device::simulated(config.clone()).unwrap();
        (device, config)
    }

    #[test]
    fn test_plan_applies_and_tears_down() {
        let plan: Plan = toml::from_str(PLAN).unwrap();
        assert_eq!(plan.domain[1].ldb_ports[0].args.cq_depth, 64);
        assert!(plan.domain[0].dir_ports[0].with_queue);

        let (device, config) = device(1);
        let report = apply(&device, &config, &plan).unwrap();
        assert_eq!(report.domains.len(), 2);
        assert_eq!(report.domains[0].owner, "pf");
        assert_eq!(report.domains[0].maps[0].outcome, MapOutcome::Mapped);
        assert_eq!(report.domains[1].owner, "vf0");
        assert_eq!(report.domains[1].id, 0);
        assert_eq!(report.domains[1].ldb_queues, vec![0, 1]);
        assert_eq!(report.remaining[1].resources.num_sched_domains, 0);
        assert!(device.vf_is_locked(0).unwrap());

        teardown(&device, &report).unwrap();
        assert!(device.snapshot().domains.is_empty());
    }

    #[test]
    fn test_plan_rejects_dangling_reference() {
        let text = r"
            [[domain]]
            resources = { num_ldb_queues = 1, num_ldb_ports = 1, num_ldb_credits = 64, num_ldb_credit_pools = 1, num_hist_list_entries = 32 }
            ldb_pools = [{ num_ldb_credits = 64 }]
            ldb_queues = [{}]
            ldb_ports = [{}]
            maps = [{ port = 0, queue = 3 }]
        ";
        let plan: Plan = toml::from_str(text).unwrap();
        let (device, config) = device(0);
        let err = apply(&device, &config, &plan).unwrap_err();
        assert!(format!("{err:#}").contains("ldb queue 3"));
    }

    #[test]
    fn test_plan_rejects_unknown_keys() {
        assert!(toml::from_str::<Plan>("[[vf]]\nid = 0\nqueues = 3\n").is_err());
    }
}
