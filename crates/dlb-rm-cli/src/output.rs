//! Output formatting for CLI.

use clap::ValueEnum;
use dlb_rm_core::NumResources;
use serde::Serialize;

/// Output format selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output.
    Json,
    /// Raw values (for scripting).
    Raw,
}

/// Resources available to one function.
#[derive(Debug, Serialize)]
pub struct FunctionRow {
    /// `pf` or `vfN`.
    pub func: String,
    /// Counts and longest runs.
    #[serde(flatten)]
    pub resources: NumResources,
}

/// Pretty-printed JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Per-function resource rows in the chosen format.
pub fn print_resources(rows: &[FunctionRow], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => print_resources_table(rows),
        OutputFormat::Json => print_json(rows)?,
        OutputFormat::Raw => {
            for row in rows {
                let r = &row.resources;
                println!(
                    "{} {} {} {} {} {} {} {} {} {} {}",
                    row.func,
                    r.num_sched_domains,
                    r.num_ldb_queues,
                    r.num_ldb_ports,
                    r.num_dir_ports,
                    r.num_ldb_credits,
                    r.num_dir_credits,
                    r.num_hist_list_entries,
                    r.num_atomic_inflights,
                    r.num_ldb_credit_pools,
                    r.num_dir_credit_pools
                );
            }
        }
    }
    Ok(())
}

fn print_resources_table(rows: &[FunctionRow]) {
    println!(
        "{:<5} {:>4} {:>5} {:>5} {:>5} {:>13} {:>11} {:>11} {:>11} {:>7}",
        "FUNC", "DOMS", "LDBQ", "LDBP", "DIRP", "LDB CRD", "DIR CRD", "HIST", "ATOMIC", "POOLS"
    );
    for row in rows {
        let r = &row.resources;
        println!(
            "{:<5} {:>4} {:>5} {:>5} {:>5} {:>13} {:>11} {:>11} {:>11} {:>7}",
            row.func,
            r.num_sched_domains,
            r.num_ldb_queues,
            r.num_ldb_ports,
            r.num_dir_ports,
            run(r.num_ldb_credits, r.max_contiguous_ldb_credits),
            run(r.num_dir_credits, r.max_contiguous_dir_credits),
            run(r.num_hist_list_entries, r.max_contiguous_hist_list_entries),
            run(r.num_atomic_inflights, r.max_contiguous_atomic_inflights),
            format!("{}/{}", r.num_ldb_credit_pools, r.num_dir_credit_pools),
        );
    }
}

/// Total and longest contiguous run, e.g. `16384(16384)`.
fn run(total: u32, longest: u32) -> String {
    if total == longest {
        total.to_string()
    } else {
        format!("{total}({longest})")
    }
}
