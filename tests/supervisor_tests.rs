//! Launching, tracking and reconciling plot processes.


use std::path::{Path, PathBuf};
use std::sync::Arc;

use plotrunner::config::Settings;
use plotrunner::error::Exhausted;
use plotrunner::notify::{LogNotifier, NotifyQueue};
use plotrunner::scheduler::JobStatus;
use plotrunner::{RunnerError, Supervisor};
use test_harness::{FakeDisk, FakeSpawner, TestSupervisor, FIRST_PID};

fn arg_after<'a>(args: &'a [String], flag: &str) -> &'a str {
    let pos = args.iter().position(|a| a == flag).unwrap();
    &args[pos + 1]
}

#[tokio::test]
async fn launch_reserves_both_directories() {
    let t = TestSupervisor::new(&[1000], &[1000], 2);

    let id = t.supervisor.launch_one().await.unwrap();

    let temp = &t.supervisor.temp_pool().members()[0];
    let farm = &t.supervisor.farm_pool().members()[0];
    assert!(temp.is_reserved_by(&id));
    assert!(farm.is_reserved_by(&id));
    assert_eq!(t.supervisor.active_count().await, 1);

    let jobs = t.supervisor.active_jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, id);
    assert_eq!(jobs[0].pid, Some(FIRST_PID));
    assert_eq!(jobs[0].status, JobStatus::Running);
    assert!(!jobs[0].status.is_terminal());
    assert_eq!(jobs[0].temp_dir, PathBuf::from("/temp0"));
    assert_eq!(jobs[0].dest_dir, PathBuf::from("/farm0"));

    let commands = t.spawner.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].program, "chia");
    assert_eq!(arg_after(&commands[0].args, "-t"), "/temp0");
    assert_eq!(arg_after(&commands[0].args, "-d"), "/farm0");

    t.wait_for_subject("plot process 1000 started").await;
}

#[tokio::test]
async fn concurrency_cap_blocks_extra_launches() {
    let t = TestSupervisor::new(&[100_000], &[100_000], 2);

    t.supervisor.launch_one().await.unwrap();
    t.supervisor.launch_one().await.unwrap();
    assert_eq!(t.supervisor.remaining_capacity().await, 0);

    let err = t.supervisor.launch_one().await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::AdmissionExhausted(Exhausted::ConcurrencyCap { active: 2, max: 2 })
    ));
    assert!(err.is_transient());
    assert_eq!(t.spawner.spawn_count(), 2);
    assert_eq!(t.supervisor.active_count().await, 2);
}

#[tokio::test]
async fn simultaneous_launches_respect_the_cap() {
    let t = TestSupervisor::new(&[100_000, 100_000], &[100_000], 3);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let supervisor = Arc::clone(&t.supervisor);
            tokio::spawn(async move { supervisor.launch_one().await })
        })
        .collect();

    let mut started = 0;
    let mut capped = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => started += 1,
            Err(RunnerError::AdmissionExhausted(Exhausted::ConcurrencyCap { .. })) => capped += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(started, 3);
    assert_eq!(capped, 7);
    assert_eq!(t.spawner.spawn_count(), 3);
}

#[tokio::test]
async fn launches_never_overcommit_a_directory() {
    // Unit 100: the temp dir admits a first plot at 250 free and a second at
    // 150 usable, then has only 50 left.
    let t = TestSupervisor::new(&[250], &[100_000], 10);

    t.supervisor.launch_one().await.unwrap();
    t.supervisor.launch_one().await.unwrap();

    let err = t.supervisor.launch_one().await.unwrap_err();
    match err {
        RunnerError::AdmissionExhausted(Exhausted::NoAdmissibleDir { pool }) => {
            assert_eq!(pool, "temp")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(t.spawner.spawn_count(), 2);
    assert_eq!(t.supervisor.temp_pool().members()[0].reservation_count(), 2);
}

#[tokio::test]
async fn full_farm_leaves_temp_unreserved() {
    let t = TestSupervisor::new(&[1000], &[50], 2);

    let err = t.supervisor.launch_one().await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::AdmissionExhausted(Exhausted::NoAdmissibleDir { ref pool }) if pool == "farm"
    ));
    assert_eq!(t.supervisor.temp_pool().members()[0].reservation_count(), 0);
    assert_eq!(t.spawner.spawn_count(), 0);
}

#[tokio::test]
async fn successful_exit_releases_reservations() {
    let t = TestSupervisor::new(&[1000], &[1000], 2);
    let id = t.supervisor.launch_one().await.unwrap();

    assert!(t.spawner.finish(FIRST_PID, 0));
    t.wait_for_active(0).await;

    let temp = &t.supervisor.temp_pool().members()[0];
    let farm = &t.supervisor.farm_pool().members()[0];
    assert!(!temp.is_reserved_by(&id));
    assert!(!farm.is_reserved_by(&id));
    assert_eq!(temp.reservation_count(), 0);

    let snapshot = t.supervisor.status_snapshot().await;
    assert_eq!(snapshot.succeeded, 1);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(snapshot.running, 0);

    t.wait_for_subject("plot process 1000 finished").await;
    assert_eq!(
        t.subjects().await,
        vec!["plot process 1000 started", "plot process 1000 finished"]
    );
}

#[tokio::test]
async fn failed_exit_releases_reservations_and_reports() {
    let t = TestSupervisor::new(&[1000], &[1000], 2);
    t.supervisor.launch_one().await.unwrap();

    assert!(t.spawner.finish(FIRST_PID, 1));
    t.wait_for_active(0).await;

    assert_eq!(t.supervisor.temp_pool().members()[0].reservation_count(), 0);
    assert_eq!(t.supervisor.farm_pool().members()[0].reservation_count(), 0);

    let snapshot = t.supervisor.status_snapshot().await;
    assert_eq!(snapshot.succeeded, 0);
    assert_eq!(snapshot.failed, 1);

    t.wait_for_subject("plot process 1000 finished with error")
        .await;
    let bodies = t.notifier.bodies();
    assert!(bodies.last().unwrap().contains("exit code 1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_is_reported_before_an_immediate_exit() {
    for _ in 0..20 {
        let t = TestSupervisor::new(&[1000], &[1000], 2);
        t.spawner.exit_immediately(2);

        t.supervisor.launch_one().await.unwrap();
        t.wait_for_subject("plot process 1000 finished with error")
            .await;

        assert_eq!(
            t.subjects().await,
            vec![
                "plot process 1000 started",
                "plot process 1000 finished with error"
            ]
        );
        assert_eq!(t.supervisor.active_count().await, 0);
    }
}

#[tokio::test]
async fn freed_space_is_admissible_again() {
    let t = TestSupervisor::new(&[150], &[100_000], 10);
    t.supervisor.launch_one().await.unwrap();
    assert!(t.supervisor.launch_one().await.is_err());

    t.spawner.finish(FIRST_PID, 0);
    t.wait_for_active(0).await;

    t.supervisor.launch_one().await.unwrap();
    assert_eq!(t.spawner.spawn_count(), 2);
}

#[tokio::test]
async fn spawn_failure_reserves_nothing() {
    let t = TestSupervisor::new(&[1000], &[1000], 2);
    t.spawner.fail_spawns();

    let err = t.supervisor.launch_one().await.unwrap_err();
    match &err {
        RunnerError::SpawnFailure { program, source } => {
            assert_eq!(program, "chia");
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.is_transient());

    assert_eq!(t.supervisor.active_count().await, 0);
    assert_eq!(t.supervisor.temp_pool().members()[0].reservation_count(), 0);
    assert_eq!(t.supervisor.farm_pool().members()[0].reservation_count(), 0);
}

#[tokio::test]
async fn empty_pool_is_fatal_for_launch() {
    let t = TestSupervisor::new(&[1000], &[], 2);

    let err = t.supervisor.launch_one().await.unwrap_err();
    assert!(matches!(err, RunnerError::PoolMisconfigured(ref name) if name == "farm"));
    assert!(t.supervisor.check_directories().is_err());
}

#[tokio::test]
async fn check_directories_requires_readable_disks() {
    let t = TestSupervisor::new(&[1000, 1000], &[1000], 2);
    t.supervisor.check_directories().unwrap();

    t.disk.fail("/temp1");
    let err = t.supervisor.check_directories().unwrap_err();
    assert!(matches!(err, RunnerError::DiskQuery { ref path, .. } if path == Path::new("/temp1")));
}

#[tokio::test]
async fn kill_all_signals_every_job() {
    let t = TestSupervisor::new(&[100_000], &[100_000], 3);
    t.supervisor.launch_one().await.unwrap();
    t.supervisor.launch_one().await.unwrap();

    assert_eq!(t.supervisor.kill_all().await, 2);
    assert_eq!(t.spawner.terminated(), vec![FIRST_PID, FIRST_PID + 1]);

    t.wait_for_active(0).await;
    let snapshot = t.supervisor.status_snapshot().await;
    assert_eq!(snapshot.failed, 2);
    assert_eq!(t.supervisor.temp_pool().members()[0].reservation_count(), 0);

    t.wait_for_subject("plot process 1001 finished with error")
        .await;
    assert!(t
        .notifier
        .bodies()
        .iter()
        .any(|b| b.contains("killed by SIGTERM")));
}

#[tokio::test]
async fn kill_all_with_nothing_running() {
    let t = TestSupervisor::new(&[1000], &[1000], 2);
    assert_eq!(t.supervisor.kill_all().await, 0);
}

#[tokio::test]
async fn status_snapshot_reports_pools_and_jobs() {
    let t = TestSupervisor::new(&[1000, 250], &[1000], 2);
    t.supervisor.launch_one().await.unwrap();

    let snapshot = t.supervisor.status_snapshot().await;
    assert_eq!(snapshot.running, 1);
    assert_eq!(snapshot.max_concurrency, 2);
    assert_eq!(snapshot.jobs.len(), 1);

    let names: Vec<_> = snapshot.pools.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["farm", "temp"]);

    // First pick from the temp pool is its second member.
    let temp = &snapshot.pools[1];
    assert_eq!(temp.dirs[1].reservations, 1);
    assert_eq!(temp.dirs[1].slots_available, 1);
    assert_eq!(temp.dirs[0].slots_available, 10);
    assert_eq!(temp.total_slots, 11);

    let report = snapshot.to_string();
    assert!(report.contains("Plots running:\t1 of 2"));
    assert!(report.contains("temp directory /temp1 status:"));
    assert!(report.contains("TOTAL FARM PLOTS AVAILABLE:\t9"));

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["running"], 1);
    assert_eq!(json["pools"][0]["name"], "farm");
}

#[tokio::test]
async fn from_settings_derives_concurrency() {
    let settings = Settings {
        temp_dirs: vec![PathBuf::from("/temp0")],
        dest_dirs: vec![PathBuf::from("/farm0")],
        max_memory_mb: 6400,
        ..Settings::default()
    };
    let notify = NotifyQueue::start(Arc::new(LogNotifier));

    // 8 threads / 2 per plot = 4, 6400 MB / 3200 MB = 2
    let supervisor = Supervisor::from_settings(
        &settings,
        8,
        FakeDisk::new(),
        FakeSpawner::new(),
        notify.clone(),
    )
    .unwrap();
    assert_eq!(supervisor.max_concurrency(), 2);
    assert_eq!(supervisor.temp_pool().count(), 1);

    let limited = Settings {
        max_parallel: Some(1),
        ..settings.clone()
    };
    let supervisor =
        Supervisor::from_settings(&limited, 8, FakeDisk::new(), FakeSpawner::new(), notify.clone())
            .unwrap();
    assert_eq!(supervisor.max_concurrency(), 1);

    let err = Supervisor::from_settings(&settings, 1, FakeDisk::new(), FakeSpawner::new(), notify)
        .err()
        .unwrap();
    assert!(matches!(err, RunnerError::Config(_)));
}
