use rstest::rstest;
use std::sync::Arc;
use tact_core::clock::{Clock, FixedClock};
use tact_core::config::Config;
use tact_core::model::{DayKey, Event, EventKind, Task, TaskStatus};
use tact_core::storage::{BackendPreference, Storage, StorageOptions};
use tact_core::sync::SyncBus;
use tact_core::task_api::{NewTask, TaskApi, TaskFilter};
use time::macros::datetime;

struct Fixture {
    api: TaskApi,
    clock: Arc<FixedClock>,
    _dir: tempfile::TempDir,
}

fn fixture(preference: BackendPreference, config: Config) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(&StorageOptions::in_dir(dir.path(), preference));
    let clock = Arc::new(FixedClock::new(datetime!(2024-06-03 08:00 UTC)));
    let api = TaskApi::new(storage, SyncBus::Unavailable, clock.clone(), config);
    Fixture {
        api,
        clock,
        _dir: dir,
    }
}

fn draft(title: &str, day: Option<DayKey>, estimate_min: u32) -> NewTask {
    NewTask {
        title: title.to_string(),
        day,
        estimate_min,
        ..NewTask::default()
    }
}

fn assert_invariant(tasks: &[Task]) {
    for task in tasks {
        assert!(
            task.completion_consistent(),
            "{} is {} with completedAt {:?}",
            task.id,
            task.status,
            task.completed_at
        );
    }
}

#[rstest]
#[case::indexed(BackendPreference::Indexed)]
#[case::fallback(BackendPreference::Fallback)]
#[tokio::test]
async fn closing_a_day_rolls_unfinished_tasks_and_renders_summary(
    #[case] preference: BackendPreference,
) {
    let f = fixture(preference, Config::default());
    let today = f.clock.today();

    let a = f.api.add(draft("A", Some(today), 30), false).await.unwrap();
    f.clock.advance(time::Duration::seconds(1));
    let b = f.api.add(draft("B", Some(today), 0), false).await.unwrap();
    f.clock.advance(time::Duration::seconds(1));
    let c = f.api.add(draft("C", Some(today), 0), false).await.unwrap();

    f.clock.set(datetime!(2024-06-03 09:00 UTC));
    let completed = f.api.complete(&c.id).await.unwrap();

    f.clock.set(datetime!(2024-06-03 18:00 UTC));
    let report = f.api.close_day().await.unwrap();

    for id in [&a.id, &b.id] {
        let task = f.api.get(id).await.unwrap();
        assert_eq!(task.rollover_count, 1);
        assert_eq!(task.day_key, Some(DayKey::parse("2024-06-04").unwrap()));
        assert_eq!(task.status, TaskStatus::Today);
    }
    let c_after = f.api.get(&c.id).await.unwrap();
    assert_eq!(c_after.completed_at, completed.completed_at);

    assert_eq!(
        report.summary,
        "# 2024-06-03 \u{2014} Daily Summary \u{2014} Week 23\n\
         \n\
         ## Done (1)\n\
         - C  \u{2014} 09:00\n\
         \n\
         ## Rolled over to 2024-06-04 (2)\n\
         - A ~30m\n\
         - B\n"
    );
    assert_eq!(report.snapshot.counts.done, 1);
    assert_eq!(report.snapshot.counts.unfinished, 2);
    assert_eq!(report.snapshot.snapshot_markdown, report.summary);
    assert!(report.escalations.is_empty());

    let events = f.api.events(100).await.unwrap();
    let rollovers: Vec<&Event> = events
        .iter()
        .filter(|event| event.kind == EventKind::Rollover)
        .collect();
    assert_eq!(rollovers.len(), 2);
    assert!(rollovers.iter().all(|event| event.meta["to"] == "2024-06-04"));
    let close = events
        .iter()
        .find(|event| event.kind == EventKind::CloseDay)
        .unwrap();
    assert_eq!(close.kind, EventKind::CloseDay);
    assert_eq!(close.task_id, None);
    assert_eq!(close.meta["day"], "2024-06-03");
}

#[rstest]
#[case::indexed(BackendPreference::Indexed)]
#[case::fallback(BackendPreference::Fallback)]
#[tokio::test]
async fn wip_limit_rejects_third_start(#[case] preference: BackendPreference) {
    let f = fixture(preference, Config::default());
    let today = f.clock.today();
    let mut ids = Vec::new();
    for title in ["one", "two", "three"] {
        ids.push(f.api.add(draft(title, Some(today), 0), false).await.unwrap().id);
    }

    f.api.start(&ids[0]).await.unwrap();
    f.api.start(&ids[1]).await.unwrap();
    let err = f.api.start(&ids[2]).await.unwrap_err();

    assert_eq!(err.code(), "admission_rejected");
    assert_eq!(err.message(), "WIP limit reached (2/2)");
    assert_eq!(f.api.get(&ids[2]).await.unwrap().status, TaskStatus::Today);

    // Re-confirming an active task skips the check.
    f.api.start(&ids[0]).await.unwrap();

    f.api.complete(&ids[1]).await.unwrap();
    f.api.start(&ids[2]).await.unwrap();
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(5)]
#[tokio::test]
async fn start_succeeds_below_limit_and_fails_at_it(#[case] limit: i64) {
    let config = Config {
        wip_limit: limit,
        ..Config::default()
    };
    let f = fixture(BackendPreference::Memory, config);
    let today = f.clock.today();

    for index in 0..limit {
        let task = f
            .api
            .add(draft(&format!("task {index}"), Some(today), 0), true)
            .await
            .unwrap();
        f.api.start(&task.id).await.unwrap();
    }
    let extra = f.api.add(draft("extra", Some(today), 0), true).await.unwrap();
    assert_eq!(
        f.api.start(&extra.id).await.unwrap_err().code(),
        "admission_rejected"
    );
}

#[tokio::test]
async fn rollover_count_grows_by_one_per_close() {
    let f = fixture(BackendPreference::Memory, Config::default());
    let today = f.clock.today();
    let task = f.api.add(draft("Chronic", Some(today), 0), false).await.unwrap();

    let mut previous = 0;
    for _ in 0..4 {
        f.api.close_day().await.unwrap();
        // A second close of the same day finds nothing left to roll.
        f.api.close_day().await.unwrap();
        let current = f.api.get(&task.id).await.unwrap().rollover_count;
        assert_eq!(current, previous + 1);
        previous = current;
        f.clock.advance(time::Duration::days(1));
    }
}

#[tokio::test]
async fn escalation_surfaces_at_threshold() {
    let config = Config {
        rollover_threshold: 2,
        ..Config::default()
    };
    let f = fixture(BackendPreference::Memory, config);
    let today = f.clock.today();
    let task = f.api.add(draft("Taxes", Some(today), 60), false).await.unwrap();

    let first = f.api.close_day().await.unwrap();
    assert!(first.escalations.is_empty());

    f.clock.advance(time::Duration::days(1));
    let second = f.api.close_day().await.unwrap();
    assert_eq!(second.escalations.len(), 1);
    assert_eq!(second.escalations[0].task_id, task.id);
    assert_eq!(second.escalations[0].rollover_count, 2);
    assert!(second.summary.contains("- Taxes \u{21a9}\u{fe0e}1 ~60m"));
}

#[tokio::test]
async fn invariant_holds_through_a_busy_day() {
    let f = fixture(BackendPreference::Memory, Config::default());
    let today = f.clock.today();
    let a = f.api.add(draft("A", Some(today), 10), false).await.unwrap();
    let b = f.api.add(draft("B", None, 0), false).await.unwrap();

    f.api.start(&a.id).await.unwrap();
    f.api.defer(&a.id, Some("blocked on review")).await.unwrap();
    f.api.complete(&a.id).await.unwrap();
    f.api.undo(&a.id).await.unwrap();
    f.api.schedule(&b.id, Some(today)).await.unwrap();
    f.api.start(&b.id).await.unwrap();
    f.api.complete(&b.id).await.unwrap();
    f.api.close_day().await.unwrap();

    let tasks: Vec<Task> = f.api.lifecycle().storage().all().await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_invariant(&tasks);
}

#[rstest]
#[case::indexed(BackendPreference::Indexed)]
#[case::fallback(BackendPreference::Fallback)]
#[tokio::test]
async fn filters_use_tag_and_project_indexes(#[case] preference: BackendPreference) {
    let f = fixture(preference, Config::default());
    let today = f.clock.today();
    let tagged = |title: &str, day: Option<DayKey>, tags: &[&str], project: Option<&str>| NewTask {
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        project_id: project.map(str::to_string),
        ..draft(title, day, 0)
    };

    f.api
        .add(tagged("Outline deck", Some(today), &["deep", "slides"], Some("clientA")), false)
        .await
        .unwrap();
    f.api
        .add(tagged("Invoice", Some(today), &["admin"], Some("clientA")), false)
        .await
        .unwrap();
    f.api
        .add(tagged("Research", None, &["deep"], Some("clientB")), false)
        .await
        .unwrap();

    let titles = |tasks: Vec<Task>| -> Vec<String> { tasks.into_iter().map(|t| t.title).collect() };

    let deep_today = f.api.board_for(today, &TaskFilter::parse("@deep")).await.unwrap();
    assert_eq!(titles(deep_today.open), vec!["Outline deck"]);

    let client_a = f.api.board_for(today, &TaskFilter::parse("#clientA")).await.unwrap();
    assert_eq!(client_a.open.len(), 2);

    let deep_backlog = f.api.backlog(&TaskFilter::parse("@deep")).await.unwrap();
    assert_eq!(titles(deep_backlog), vec!["Research"]);

    let narrowed = f
        .api
        .board_for(today, &TaskFilter::parse("#clientA invoice"))
        .await
        .unwrap();
    assert_eq!(titles(narrowed.open), vec!["Invoice"]);
}

#[tokio::test]
async fn rolled_tasks_show_in_backlog_until_their_day() {
    let f = fixture(BackendPreference::Memory, Config::default());
    let today = f.clock.today();
    let task = f.api.add(draft("Carry over", Some(today), 0), false).await.unwrap();

    f.api.close_day().await.unwrap();
    let backlog = f.api.backlog(&TaskFilter::default()).await.unwrap();
    assert_eq!(backlog.len(), 1);
    assert_eq!(backlog[0].id, task.id);

    f.clock.advance(time::Duration::days(1));
    assert!(f.api.backlog(&TaskFilter::default()).await.unwrap().is_empty());
    assert_eq!(f.api.board().await.unwrap().open.len(), 1);
}
