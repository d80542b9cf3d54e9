//! Integration tests for the task scheduler across every combination of
//! execution mode, priority and I/O policy

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use common::{environment_matches, test_scheduler, TestTaskFactory};
use tasksched::{
    from_here, ExecutionMode, TaskPriority, TaskRunner, TaskRunnerExt, TaskScheduler, TaskTraits,
};

const TASKS_PER_THREAD: usize = 150;

fn all_traits() -> Vec<TaskTraits> {
    TaskPriority::ALL
        .into_iter()
        .flat_map(|priority| {
            let traits = TaskTraits::new().with_priority(priority);
            [traits, traits.with_file_io()]
        })
        .collect()
}

fn all_combinations() -> Vec<(ExecutionMode, TaskTraits)> {
    ExecutionMode::ALL
        .into_iter()
        .flat_map(|mode| all_traits().into_iter().map(move |traits| (mode, traits)))
        .collect()
}

#[test]
fn test_post_single_task_each_combination() {
    let scheduler = test_scheduler(4);

    for (mode, traits) in all_combinations() {
        let factory = TestTaskFactory::new(scheduler.create_task_runner_with_traits(traits, mode));
        assert!(!factory.runner().runs_tasks_on_current_thread());
        assert!(factory.post_task(false));
        factory.wait_for_all_tasks_to_run();
    }

    scheduler.join_for_testing();
}

#[test]
fn test_post_nested_tasks_each_combination() {
    let scheduler = test_scheduler(4);

    for (mode, traits) in all_combinations() {
        let factory = TestTaskFactory::new(scheduler.create_task_runner_with_traits(traits, mode));
        for _ in 0..10 {
            assert!(factory.post_task(true));
        }
        factory.wait_for_all_tasks_to_run();
        assert_eq!(factory.tasks_run(), 20);
    }

    scheduler.join_for_testing();
}

#[test]
fn test_multiple_posting_threads() {
    let scheduler = test_scheduler(4);

    let factories: Vec<TestTaskFactory> = all_combinations()
        .into_iter()
        .map(|(mode, traits)| {
            TestTaskFactory::new(scheduler.create_task_runner_with_traits(traits, mode))
        })
        .collect();

    thread::scope(|scope| {
        for factory in &factories {
            scope.spawn(move || {
                for _ in 0..TASKS_PER_THREAD {
                    assert!(factory.post_task(false));
                }
            });
        }
    });

    for factory in &factories {
        factory.wait_for_all_tasks_to_run();
        assert_eq!(factory.tasks_run(), TASKS_PER_THREAD);
    }

    let stats = scheduler.stats();
    assert_eq!(stats.tasks_posted, (factories.len() * TASKS_PER_THREAD) as u64);
    assert_eq!(stats.tasks_panicked, 0);

    scheduler.join_for_testing();
}

#[test]
fn test_post_task_with_traits_runs_in_matching_environment() {
    let scheduler = test_scheduler(2);
    let mismatches = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    for traits in all_traits() {
        for _ in 0..10 {
            let mismatches = mismatches.clone();
            let runs = runs.clone();
            assert!(scheduler.post_task_with_traits(
                from_here!(),
                traits,
                Box::new(move || {
                    if !environment_matches(traits) {
                        mismatches.fetch_add(1, Ordering::SeqCst);
                    }
                    runs.fetch_add(1, Ordering::SeqCst);
                }),
            ));
        }
    }

    scheduler.flush_for_testing();
    assert_eq!(runs.load(Ordering::SeqCst), 60);
    assert_eq!(mismatches.load(Ordering::SeqCst), 0);
    scheduler.join_for_testing();
}

#[test]
fn test_pool_threads_stay_within_bound() {
    let max_threads = 2;
    let scheduler = test_scheduler(max_threads);
    let runner =
        scheduler.create_parallel_task_runner(TaskTraits::new().with_priority(TaskPriority::UserVisible));

    for _ in 0..100 {
        assert!(runner.post_task(|| thread::yield_now()));
    }
    scheduler.flush_for_testing();

    // One pool in use and no dedicated threads
    assert!(scheduler.stats().worker_threads <= max_threads);
    scheduler.join_for_testing();
}

#[test]
fn test_join_for_testing_leaves_nothing_running() {
    let scheduler = test_scheduler(4);
    let runs = Arc::new(AtomicUsize::new(0));

    for (mode, traits) in all_combinations() {
        let runner = scheduler.create_task_runner_with_traits(traits, mode);
        for _ in 0..20 {
            let runs = runs.clone();
            runner.post_task(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }
    }

    scheduler.join_for_testing();
    let after_join = runs.load(Ordering::SeqCst);
    assert_eq!(after_join, all_combinations().len() * 20);

    let stats = scheduler.stats();
    assert_eq!(stats.worker_threads, 0);
    assert_eq!(stats.tasks_outstanding, 0);
    assert!(scheduler.is_shutdown());

    thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(runs.load(Ordering::SeqCst), after_join);
}

#[test]
fn test_drop_shuts_down() {
    let runner = {
        let scheduler = TaskScheduler::create().unwrap();
        scheduler.create_sequenced_task_runner(TaskTraits::new())
    };
    assert!(!runner.post_task(|| {}));
}
