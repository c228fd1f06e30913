//! Resource accounting across domain create/reset sequences and VF
//! transfers.

use dlb_rm_core::args::{
    CreateDirPoolArgs, CreateDirPortArgs, CreateDirQueueArgs, CreateSchedDomainArgs,
};
use dlb_rm_core::hw::regs;
use dlb_rm_core::{
    Device, DeviceConfig, Error, ErrorKind, Func, MemRegisterFile, Snapshot, Status,
    MAX_NUM_DOMAINS, MAX_NUM_HIST_LIST_ENTRIES, MAX_NUM_LDB_CREDITS, MAX_NUM_LDB_PORTS,
    MAX_NUM_LDB_QUEUES,
};

fn device(num_vfs: u32) -> (Device, MemRegisterFile) {
    Device::simulated(DeviceConfig {
        num_vfs,
        ..DeviceConfig::default()
    })
    .unwrap()
}

fn status<T: std::fmt::Debug>(result: Result<T, Error>) -> Status {
    result.unwrap_err().status().unwrap()
}

fn domain_args(queues: u32, ports: u32, credits: u32) -> CreateSchedDomainArgs {
    CreateSchedDomainArgs {
        num_ldb_queues: queues,
        num_ldb_ports: ports,
        num_hist_list_entries: 32 * ports,
        num_ldb_credits: credits,
        num_atomic_inflights: 16 * queues,
        ..CreateSchedDomainArgs::default()
    }
}

fn free(runs: &[(usize, usize)]) -> usize {
    runs.iter().map(|&(_, len)| len).sum()
}

/// Available plus attached equals the totals a lone PF starts with.
fn assert_pf_conserved(snap: &Snapshot) {
    let pf = &snap.functions[0];
    let owned: Vec<_> = snap.domains.iter().filter(|d| d.owner == Func::Pf).collect();

    assert_eq!(
        pf.avail_domains.len() + pf.used_domains.len(),
        MAX_NUM_DOMAINS
    );
    assert_eq!(pf.used_domains.len(), owned.len());
    assert_eq!(
        pf.avail_ldb_queues.len() + owned.iter().map(|d| d.ldb_queues.len()).sum::<usize>(),
        MAX_NUM_LDB_QUEUES
    );
    assert_eq!(
        pf.avail_ldb_ports.len() + owned.iter().map(|d| d.ldb_ports.len()).sum::<usize>(),
        MAX_NUM_LDB_PORTS
    );
    assert_eq!(
        free(&pf.ldb_credits)
            + owned
                .iter()
                .map(|d| d.ldb_credits.total() as usize)
                .sum::<usize>(),
        MAX_NUM_LDB_CREDITS
    );
    assert_eq!(
        free(&pf.hist_list_entries)
            + owned
                .iter()
                .map(|d| d.hist_list_entries.total() as usize)
                .sum::<usize>(),
        MAX_NUM_HIST_LIST_ENTRIES
    );
}

#[test]
fn test_conservation_across_create_and_reset() {
    let (dev, _) = device(0);
    assert_pf_conserved(&dev.snapshot());

    let a = dev.create_sched_domain(Func::Pf, &domain_args(4, 2, 512)).unwrap();
    let b = dev.create_sched_domain(Func::Pf, &domain_args(1, 1, 100)).unwrap();
    let c = dev.create_sched_domain(Func::Pf, &domain_args(8, 4, 2048)).unwrap();
    assert_pf_conserved(&dev.snapshot());

    dev.reset_domain(Func::Pf, b).unwrap();
    assert_pf_conserved(&dev.snapshot());
    dev.start_domain(Func::Pf, a).unwrap();
    dev.reset_domain(Func::Pf, a).unwrap();
    assert_pf_conserved(&dev.snapshot());

    let d = dev.create_sched_domain(Func::Pf, &domain_args(2, 2, 700)).unwrap();
    assert_pf_conserved(&dev.snapshot());
    dev.reset_domain(Func::Pf, c).unwrap();
    dev.reset_domain(Func::Pf, d).unwrap();

    let snap = dev.snapshot();
    assert!(snap.domains.is_empty());
    assert_eq!(snap.functions[0].ldb_credits, vec![(0, MAX_NUM_LDB_CREDITS)]);
    assert_pf_conserved(&snap);
}

#[test]
fn test_failed_create_leaves_no_trace() {
    let (dev, _) = device(0);
    dev.create_sched_domain(Func::Pf, &domain_args(2, 1, 256)).unwrap();
    let before = dev.snapshot();

    let cases = [
        (
            CreateSchedDomainArgs {
                num_hist_list_entries: MAX_NUM_HIST_LIST_ENTRIES as u32,
                ..domain_args(1, 1, 16)
            },
            Status::HistListEntriesUnavailable,
        ),
        (
            domain_args(1, 1, MAX_NUM_LDB_CREDITS as u32),
            Status::LdbCreditsUnavailable,
        ),
        (domain_args(1, 0, 16), Status::LdbPortRequiredForLdbQueues),
        (
            CreateSchedDomainArgs {
                num_ldb_credit_pools: 65,
                ..domain_args(0, 0, 0)
            },
            Status::LdbCreditPoolsUnavailable,
        ),
    ];
    for (args, expected) in cases {
        assert_eq!(status(dev.create_sched_domain(Func::Pf, &args)), expected);
        assert_eq!(dev.snapshot(), before);
    }
}

#[test]
fn test_domains_exhaust() {
    let (dev, _) = device(0);
    for _ in 0..MAX_NUM_DOMAINS {
        dev.create_sched_domain(Func::Pf, &CreateSchedDomainArgs::default())
            .unwrap();
    }
    assert_eq!(
        status(dev.create_sched_domain(Func::Pf, &CreateSchedDomainArgs::default())),
        Status::DomainUnavailable
    );
}

#[test]
fn test_reset_unconfigured_domain_rejected() {
    let (dev, _) = device(0);
    let err = dev.reset_domain(Func::Pf, 3).unwrap_err();
    assert_eq!(err.status(), Some(Status::DomainNotConfigured));
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(!dev.reset_failed());
}

#[test]
fn test_stuck_drain_latches_reset_failure() {
    let (dev, regs) = Device::simulated(DeviceConfig {
        queue_drain_retries: 16,
        ..DeviceConfig::default()
    })
    .unwrap();
    let args = CreateSchedDomainArgs {
        num_dir_ports: 1,
        num_dir_credits: 64,
        num_dir_credit_pools: 1,
        ..CreateSchedDomainArgs::default()
    };
    let d = dev.create_sched_domain(Func::Pf, &args).unwrap();
    let pool = dev
        .create_dir_pool(Func::Pf, d, &CreateDirPoolArgs { num_dir_credits: 64 })
        .unwrap();
    let port = dev
        .create_dir_port(
            Func::Pf,
            d,
            &CreateDirPortArgs {
                dir_credit_pool_id: pool,
                ..CreateDirPortArgs::default()
            },
        )
        .unwrap();
    let queue = dev
        .create_dir_queue(
            Func::Pf,
            d,
            &CreateDirQueueArgs {
                port_id: port as i32,
            },
        )
        .unwrap();
    assert_eq!(queue, port);
    dev.start_domain(Func::Pf, d).unwrap();
    regs.set(regs::qid_dir_enqueue_cnt(port), 5);
    assert_eq!(dev.get_dir_queue_depth(Func::Pf, d, port).unwrap(), 5);

    let err = dev.reset_domain(Func::Pf, d).unwrap_err();
    assert!(matches!(err, Error::Timeout { attempts: 16, .. }));
    assert!(dev.reset_failed());
    assert!(dev.snapshot().reset_failed);
    assert_eq!(
        status(dev.create_sched_domain(Func::Pf, &CreateSchedDomainArgs::default())),
        Status::DomainResetFailed
    );
}

#[test]
fn test_transfer_moves_and_returns_resources() {
    let (dev, _) = device(2);
    dev.update_vf_sched_domains(1, 2).unwrap();
    dev.update_vf_ldb_queues(1, 4).unwrap();
    dev.update_vf_ldb_ports(1, 2).unwrap();
    dev.update_vf_ldb_credits(1, 1024).unwrap();
    dev.update_vf_hist_list_entries(1, 64).unwrap();

    let vf = dev.get_num_resources(Func::Vf(1)).unwrap();
    assert_eq!(vf.num_sched_domains, 2);
    assert_eq!(vf.num_ldb_queues, 4);
    assert_eq!(vf.max_contiguous_ldb_credits, 1024);
    let pf = dev.get_num_resources(Func::Pf).unwrap();
    assert_eq!(pf.num_ldb_queues, MAX_NUM_LDB_QUEUES as u32 - 4);

    // Replacing, not adding.
    dev.update_vf_ldb_queues(1, 1).unwrap();
    assert_eq!(dev.get_num_resources(Func::Vf(1)).unwrap().num_ldb_queues, 1);
    assert_eq!(
        dev.get_num_resources(Func::Pf).unwrap().num_ldb_queues,
        MAX_NUM_LDB_QUEUES as u32 - 1
    );

    dev.reset_vf_resources(1).unwrap();
    let vf = dev.get_num_resources(Func::Vf(1)).unwrap();
    assert_eq!(vf.num_sched_domains, 0);
    assert_eq!(vf.num_ldb_credits, 0);
    assert_pf_conserved(&dev.snapshot());
}

#[test]
fn test_failed_transfer_leaves_no_trace() {
    let (dev, _) = device(1);
    dev.update_vf_ldb_queues(0, 8).unwrap();
    let before = dev.snapshot();

    assert!(dev
        .update_vf_ldb_queues(0, MAX_NUM_LDB_QUEUES as u32 + 1)
        .is_err());
    assert!(dev
        .update_vf_ldb_credits(0, MAX_NUM_LDB_CREDITS as u32 + 1)
        .is_err());
    assert!(matches!(
        dev.update_vf_ldb_queues(5, 1),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(dev.snapshot(), before);
}

#[test]
fn test_vf_domain_uses_virtual_ids() {
    let (dev, _) = device(1);
    // Give the PF's first domain away so the VF's is not physical 0.
    dev.create_sched_domain(Func::Pf, &CreateSchedDomainArgs::default())
        .unwrap();
    dev.update_vf_sched_domains(0, 1).unwrap();
    dev.update_vf_ldb_queues(0, 2).unwrap();
    dev.update_vf_ldb_ports(0, 1).unwrap();
    dev.update_vf_ldb_credits(0, 128).unwrap();
    dev.update_vf_hist_list_entries(0, 32).unwrap();
    dev.update_vf_atomic_inflights(0, 32).unwrap();

    // Unregistered VFs are refused.
    assert!(matches!(
        dev.create_sched_domain(Func::Vf(0), &CreateSchedDomainArgs::default()),
        Err(Error::PermissionDenied(_))
    ));

    dev.lock_vf(0).unwrap();
    let d = dev
        .create_sched_domain(Func::Vf(0), &domain_args(2, 1, 128))
        .unwrap();
    assert_eq!(d, 0);
    let snap = dev.snapshot();
    let vf_domain = snap
        .domains
        .iter()
        .find(|dom| dom.owner == Func::Vf(0))
        .unwrap();
    assert_ne!(vf_domain.id, 0);

    // The same id names a different domain for the PF.
    dev.start_domain(Func::Vf(0), d).unwrap();
    let snap = dev.snapshot();
    for dom in &snap.domains {
        assert_eq!(dom.started, dom.owner == Func::Vf(0));
    }

    dev.reset_vf(0).unwrap();
    dev.unlock_vf(0).unwrap();
    assert!(!dev.vf_is_locked(0).unwrap());
    assert_eq!(
        dev.get_num_resources(Func::Vf(0)).unwrap().num_sched_domains,
        1
    );
}

#[test]
fn test_snapshot_serializes() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (dev, _) = device(0);
    let d = dev
        .create_sched_domain(Func::Pf, &domain_args(1, 1, 256))
        .unwrap();

    let json = serde_json::to_value(dev.snapshot()).unwrap();
    let domain = &json["domains"][0];
    assert_eq!(domain["id"], d);
    assert_eq!(domain["started"], false);
    assert_eq!(domain["ldb_credits"]["base"], 0);
    assert_eq!(domain["ldb_credits"]["bound"], 256);
    assert_eq!(json["functions"][0]["ldb_credits"][0][0], 256);
    assert_eq!(json["reset_failed"], false);
}
