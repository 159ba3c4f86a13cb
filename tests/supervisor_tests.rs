//! Fleet supervisor: batching, isolation, roster handling and shutdown
use std::sync::Arc;
use std::time::Duration;

use shopee_realtime_bot::application::{Supervisor, SupervisorError, SupervisorSettings, SupervisorState};
use shopee_realtime_bot::domain::Account;
use shopee_realtime_bot::infrastructure::JsonRoster;
use shopee_realtime_bot::test_utils::{RecordingRunner, RunEvent, StaticRoster};

fn settings(width: usize) -> SupervisorSettings {
    SupervisorSettings {
        max_parallel_agents: width,
        sync_interval: Duration::from_secs(60),
        batch_pause: Duration::from_secs(1),
    }
}

fn accounts(n: usize) -> Vec<Account> {
    (0..n).map(|i| Account::new(format!("A{i}"), format!("Shop {i}"))).collect()
}

fn position(events: &[RunEvent], wanted: &RunEvent) -> usize {
    events.iter().position(|e| e == wanted).unwrap()
}

#[tokio::test(start_paused = true)]
async fn batches_never_overlap_and_respect_width() {
    let runner = Arc::new(RecordingRunner::new().with_delay(Duration::from_secs(10)));
    let supervisor = Supervisor::new(Arc::new(StaticRoster::default()), runner.clone(), settings(3));
    let started = tokio::time::Instant::now();

    let summary = supervisor.run_cycle(accounts(7)).await;

    assert_eq!(summary.dispatched, 7);
    assert_eq!(summary.succeeded, 7);
    assert_eq!(summary.failed, 0);
    assert_eq!(runner.peak_concurrency(), 3);

    let events = runner.events();
    for (finished, next_batch) in [(0..3, 3..6), (3..6, 6..7)] {
        for done in finished {
            for next in next_batch.clone() {
                assert!(
                    position(&events, &RunEvent::Finished(format!("A{done}")))
                        < position(&events, &RunEvent::Started(format!("A{next}")))
                );
            }
        }
    }

    // three batches of 10s plus two pauses; no pause after the last batch
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(32) && elapsed < Duration::from_secs(33), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn panicking_agent_is_contained() {
    let runner = Arc::new(RecordingRunner::new().panicking_for("A1").failing_for("A2"));
    let supervisor = Supervisor::new(Arc::new(StaticRoster::default()), runner.clone(), settings(5));

    let summary = supervisor.run_cycle(accounts(4)).await;

    assert_eq!(summary.dispatched, 4);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(runner.started().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn empty_roster_is_fatal_at_startup() {
    let roster = Arc::new(StaticRoster::new(vec![Account::new("A1", "Only shop").disabled()]));
    let runner = Arc::new(RecordingRunner::new());
    let supervisor = Supervisor::new(roster, runner.clone(), settings(5));

    let result = supervisor.run().await;

    assert!(matches!(result, Err(SupervisorError::EmptyRoster)));
    assert_eq!(supervisor.state().await, SupervisorState::Stopped);
    assert!(runner.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unreadable_roster_is_fatal_at_startup() {
    let roster = Arc::new(StaticRoster::new(accounts(2)));
    roster.set_failing(true);
    let supervisor = Supervisor::new(roster, Arc::new(RecordingRunner::new()), settings(5));

    assert!(matches!(supervisor.run().await, Err(SupervisorError::Roster(_))));
}

#[tokio::test(start_paused = true)]
async fn cycles_repeat_on_the_interval_until_stopped() {
    let runner = Arc::new(RecordingRunner::new());
    let supervisor = Arc::new(Supervisor::new(Arc::new(StaticRoster::new(accounts(2))), runner.clone(), settings(5)));

    let task = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run().await }
    });

    // cycles at t=0, 60s and 120s
    tokio::time::sleep(Duration::from_secs(150)).await;
    supervisor.stop();
    let stats = task.await.unwrap().unwrap();

    assert_eq!(stats.total_cycles, 3);
    assert_eq!(stats.success_count, 6);
    assert_eq!(stats.fail_count, 0);
    assert!(!stats.is_running);
    assert!(stats.last_cycle_at.is_some());
    assert_eq!(supervisor.state().await, SupervisorState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn roster_failure_mid_run_skips_only_that_cycle() {
    let roster = Arc::new(StaticRoster::new(accounts(1)));
    let supervisor =
        Arc::new(Supervisor::new(roster.clone(), Arc::new(RecordingRunner::new()), settings(5)));

    let task = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run().await }
    });

    tokio::time::sleep(Duration::from_secs(30)).await;
    roster.set_failing(true);
    tokio::time::sleep(Duration::from_secs(60)).await;
    roster.set_failing(false);
    roster.replace(accounts(3));
    tokio::time::sleep(Duration::from_secs(60)).await;
    supervisor.stop();
    let stats = task.await.unwrap().unwrap();

    assert_eq!(stats.total_cycles, 2);
    assert_eq!(stats.success_count, 4);
    assert_eq!(stats.accounts_count, 3);
}

#[tokio::test]
async fn disabled_accounts_are_never_dispatched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.json");
    std::fs::write(
        &path,
        r#"[{"shopee_account_id":"A","shop_name":"Toko A","enabled":true},
            {"shopee_account_id":"B","shop_name":"Toko B","enabled":false}]"#,
    )
    .unwrap();

    let runner = Arc::new(RecordingRunner::new());
    let supervisor = Arc::new(Supervisor::new(Arc::new(JsonRoster::new(&path)), runner.clone(), settings(5)));
    let task = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run().await }
    });

    for _ in 0..100 {
        if supervisor.stats().await.total_cycles >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    supervisor.stop();
    let stats = task.await.unwrap().unwrap();

    assert_eq!(runner.started(), vec!["A".to_string()]);
    assert_eq!(stats.total_cycles, 1);
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.fail_count, 0);
    assert_eq!(stats.accounts_count, 1);
}
