#![cfg(test)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serial_test::serial;
use tracing_test::traced_test;

use foundation_taskron::synchro::SyncCounter;
use foundation_taskron::taskron::{create_task_continuation, reschedule_task, yield_task};

use super::support::scheduler_with_workers;

/// WHY: a yielded task extends itself on the same worker instead of
/// re-entering the queue.
/// WHAT: a task yields until its counter reaches one hundred; it ran a
/// hundred times, and only its very first hop came through the queue.
#[test]
#[traced_test]
#[serial]
fn yield_loop_runs_one_hundred_times() {
    let scheduler = scheduler_with_workers(1);

    let runs = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(SyncCounter::new(1));

    {
        let runs = runs.clone();
        let done = done.clone();

        scheduler.detach_task(move || {
            let so_far = runs.fetch_add(1, Ordering::SeqCst) + 1;

            if so_far < 100 {
                yield_task(&[]);
            } else {
                done.signal(false);
            }
        });
    }

    done.wait();

    assert_eq!(runs.load(Ordering::SeqCst), 100);

    let worker = &scheduler.workers()[0];
    assert_eq!(worker.fetched_task_count(), 1);
    assert_eq!(worker.direct_continuation_count(), 99);
}

/// WHY: of several ready continuations, the first runs on the spawning
/// worker without a trip through the wake/fetch path.
/// WHAT: a task spawns two dependency-free continuations; the queue
/// fetch counter accounts for every task but one.
#[test]
#[traced_test]
#[serial]
fn continuation_is_preferred_over_the_queue() {
    let scheduler = scheduler_with_workers(1);

    let done = Arc::new(SyncCounter::new(2));

    {
        let done = done.clone();

        scheduler.detach_task(move || {
            for _ in 0..2 {
                let done = done.clone();
                create_task_continuation(&[], move || {
                    done.signal(false);
                });
            }
        });
    }

    done.wait();

    let worker = &scheduler.workers()[0];

    // the root and the second continuation came through the queue; the
    // first continuation was handed over directly.
    assert_eq!(worker.direct_continuation_count(), 1);
    assert_eq!(worker.fetched_task_count(), 2);
}

/// WHY: a continuation created where no task is executing has nothing
/// to inherit and no worker to prefer; it must still run, as a plain
/// dispatched task.
/// WHAT: a foreign-thread continuation completes through the queue and
/// the direct hand-over counters stay untouched.
#[test]
#[traced_test]
#[serial]
fn foreign_continuations_run_as_plain_tasks() {
    let scheduler = scheduler_with_workers(2);

    let done = Arc::new(SyncCounter::new(1));

    {
        let done = done.clone();

        scheduler.create_task_continuation(&[], move || {
            done.signal(false);
        });
    }

    done.wait();

    for worker in scheduler.workers() {
        assert_eq!(worker.direct_continuation_count(), 0);
    }
}

/// WHY: rescheduling acts on the task currently executing on the
/// calling thread; with nothing executing there is nothing to act on.
/// WHAT: calling it from the test thread is a contract violation.
#[test]
#[should_panic(expected = "nothing is executing here")]
fn rescheduling_off_any_execution_is_a_contract_violation() {
    reschedule_task(&[]);
}

/// WHY: yielding extends the task currently executing on the calling
/// thread; with nothing executing there is nothing to extend.
/// WHAT: calling it from the test thread is a contract violation.
#[test]
#[should_panic(expected = "nothing is executing here")]
fn yielding_off_any_execution_is_a_contract_violation() {
    yield_task(&[]);
}

/// WHY: a rescheduled task runs again as a fresh task once its new
/// dependencies allow, re-entering through the queue.
/// WHAT: a task reschedules itself once and therefore runs twice.
#[test]
#[traced_test]
#[serial]
fn reschedule_runs_the_task_again() {
    let scheduler = scheduler_with_workers(1);

    let runs = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(SyncCounter::new(1));

    {
        let runs = runs.clone();
        let done = done.clone();

        scheduler.detach_task(move || {
            if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                reschedule_task(&[]);
            } else {
                done.signal(false);
            }
        });
    }

    done.wait();

    assert_eq!(runs.load(Ordering::SeqCst), 2);

    let worker = &scheduler.workers()[0];
    assert_eq!(worker.fetched_task_count(), 2);
    assert_eq!(worker.direct_continuation_count(), 0);
}
