//! CQ interrupt waits, sequence-number groups and VF sessions over the
//! in-process mailbox link.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dlb_rm_core::args::{
    CreateDirPoolArgs, CreateLdbPoolArgs, CreateLdbPortArgs, CreateLdbQueueArgs,
    CreateSchedDomainArgs, MapQidArgs, UnmapQidArgs,
};
use dlb_rm_core::mbox::{LocalLink, VfClient};
use dlb_rm_core::{
    Device, DeviceConfig, Error, Func, MapOutcome, Status, UnmapOutcome, WaitOutcome,
};

fn device(num_vfs: u32) -> Arc<Device> {
    let (dev, _) = Device::simulated(DeviceConfig {
        num_vfs,
        worker_backoff_us: 10,
        ..DeviceConfig::default()
    })
    .unwrap();
    Arc::new(dev)
}

/// PF domain with one queue and one port, returning (domain, queue, port).
fn one_port_domain(dev: &Device) -> (u32, u32, u32) {
    let args = CreateSchedDomainArgs {
        num_ldb_queues: 1,
        num_ldb_ports: 1,
        num_hist_list_entries: 32,
        num_ldb_credits: 128,
        num_ldb_credit_pools: 1,
        ..CreateSchedDomainArgs::default()
    };
    let d = dev.create_sched_domain(Func::Pf, &args).unwrap();
    let pool = dev
        .create_ldb_pool(Func::Pf, d, &CreateLdbPoolArgs { num_ldb_credits: 128 })
        .unwrap();
    let q = dev
        .create_ldb_queue(Func::Pf, d, &CreateLdbQueueArgs::default())
        .unwrap();
    let p = dev
        .create_ldb_port(
            Func::Pf,
            d,
            &CreateLdbPortArgs {
                ldb_credit_pool_id: pool,
                ..CreateLdbPortArgs::default()
            },
        )
        .unwrap();
    (d, q, p)
}

fn spawn_waiter(dev: &Arc<Device>, d: u32, p: u32) -> thread::JoinHandle<WaitOutcome> {
    let dev = Arc::clone(dev);
    thread::spawn(move || {
        dev.wait_for_cq_interrupt(Func::Pf, d, p, true, Some(Duration::from_secs(5)))
            .unwrap()
    })
}

#[test]
fn test_disable_releases_cq_waiter() {
    let dev = device(0);
    let (d, _, p) = one_port_domain(&dev);

    let waiter = spawn_waiter(&dev, d, p);
    thread::sleep(Duration::from_millis(20));
    dev.disable_ldb_port(Func::Pf, d, p).unwrap();
    assert_eq!(waiter.join().unwrap(), WaitOutcome::Disabled);

    dev.enable_ldb_port(Func::Pf, d, p).unwrap();
    let waiter = spawn_waiter(&dev, d, p);
    thread::sleep(Duration::from_millis(20));
    dev.wake_cq(Func::Pf, d, p, true).unwrap();
    assert_eq!(waiter.join().unwrap(), WaitOutcome::Woken);
}

#[test]
fn test_domain_reset_releases_cq_waiter() {
    let dev = device(0);
    let (d, _, p) = one_port_domain(&dev);

    let waiter = spawn_waiter(&dev, d, p);
    thread::sleep(Duration::from_millis(20));
    dev.reset_domain(Func::Pf, d).unwrap();
    assert_eq!(waiter.join().unwrap(), WaitOutcome::Disabled);

    let err = dev
        .wait_for_cq_interrupt(Func::Pf, d, p, true, Some(Duration::from_millis(1)))
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::DomainNotConfigured));
}

#[test]
fn test_cq_wait_on_unknown_port() {
    let dev = device(0);
    let (d, _, p) = one_port_domain(&dev);
    let err = dev
        .wait_for_cq_interrupt(Func::Pf, d, p + 1, true, None)
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::InvalidPortId));
}

#[test]
fn test_sequence_number_groups() {
    let dev = device(0);
    assert_eq!(dev.get_group_sequence_numbers(1).unwrap(), 32);
    dev.set_group_sequence_numbers(1, 128).unwrap();
    assert_eq!(dev.get_group_sequence_numbers(1).unwrap(), 128);
    assert!(matches!(
        dev.set_group_sequence_numbers(1, 100),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        dev.get_group_sequence_numbers(4),
        Err(Error::InvalidArgument(_))
    ));

    let args = CreateSchedDomainArgs {
        num_ldb_queues: 1,
        num_ldb_ports: 1,
        ..CreateSchedDomainArgs::default()
    };
    let d = dev.create_sched_domain(Func::Pf, &args).unwrap();
    let ordered = CreateLdbQueueArgs {
        num_sequence_numbers: 128,
        num_qid_inflights: 64,
        num_atomic_inflights: 0,
    };
    dev.create_ldb_queue(Func::Pf, d, &ordered).unwrap();
    assert_eq!(dev.get_group_sequence_number_occupancy(1).unwrap(), 1);
    assert!(matches!(
        dev.set_group_sequence_numbers(1, 64),
        Err(Error::PermissionDenied(_))
    ));

    dev.reset_domain(Func::Pf, d).unwrap();
    assert_eq!(dev.get_group_sequence_number_occupancy(1).unwrap(), 0);
    dev.set_group_sequence_numbers(1, 64).unwrap();
}

#[test]
fn test_vf_session_over_mailbox() {
    let dev = device(1);
    dev.update_vf_sched_domains(0, 1).unwrap();
    dev.update_vf_ldb_queues(0, 2).unwrap();
    dev.update_vf_ldb_ports(0, 1).unwrap();
    dev.update_vf_ldb_credit_pools(0, 1).unwrap();
    dev.update_vf_ldb_credits(0, 256).unwrap();
    dev.update_vf_hist_list_entries(0, 64).unwrap();

    let mut vf = VfClient::new(LocalLink::new(Arc::clone(&dev), 0), 100);
    vf.register().unwrap();

    let args = CreateSchedDomainArgs {
        num_ldb_queues: 2,
        num_ldb_ports: 1,
        num_hist_list_entries: 64,
        num_ldb_credits: 256,
        num_ldb_credit_pools: 1,
        ..CreateSchedDomainArgs::default()
    };
    let d = vf.create_sched_domain(&args).unwrap();
    let pool = vf
        .create_ldb_pool(d, &CreateLdbPoolArgs { num_ldb_credits: 256 })
        .unwrap();
    assert!(matches!(
        vf.create_dir_pool(d, &CreateDirPoolArgs { num_dir_credits: 1 }),
        Err(Error::Rejected(_))
    ));
    let q0 = vf.create_ldb_queue(d, &CreateLdbQueueArgs::default()).unwrap();
    let q1 = vf.create_ldb_queue(d, &CreateLdbQueueArgs::default()).unwrap();
    assert_eq!((q0, q1), (0, 1));
    let p = vf
        .create_ldb_port(
            d,
            &CreateLdbPortArgs {
                ldb_credit_pool_id: pool,
                ..CreateLdbPortArgs::default()
            },
        )
        .unwrap();
    assert!(vf.ldb_port_owned_by_domain(d, p).unwrap());
    assert!(!vf.ldb_port_owned_by_domain(d, p + 1).unwrap());

    let map = |qid| MapQidArgs {
        port_id: p,
        qid,
        priority: 3,
    };
    assert_eq!(vf.map_qid(d, &map(q0)).unwrap(), MapOutcome::Mapped);
    assert_eq!(vf.map_qid(d, &map(q1)).unwrap(), MapOutcome::Mapped);
    vf.start_domain(d).unwrap();

    let unmap = UnmapQidArgs {
        port_id: p,
        qid: q1,
    };
    assert_eq!(vf.unmap_qid(d, &unmap).unwrap(), UnmapOutcome::Unmapped);
    assert_eq!(vf.pending_port_unmaps(d, p).unwrap(), 0);
    assert_eq!(vf.get_ldb_queue_depth(d, q0).unwrap(), 0);

    // The PF sees the same domain under its physical id.
    let snap = dev.snapshot();
    let domain = snap
        .domains
        .iter()
        .find(|dom| dom.owner == Func::Vf(0))
        .unwrap();
    assert!(domain.started);
    assert_eq!(domain.mappings.len(), 1);

    vf.reset_sched_domain(d).unwrap();
    vf.unregister().unwrap();
    assert!(dev.snapshot().domains.is_empty());
}
