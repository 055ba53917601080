#![cfg(test)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serial_test::serial;
use tracing_test::traced_test;

use foundation_taskron::synchro::SyncCounter;
use foundation_taskron::taskron::{create_task, detach_task};

use super::support::scheduler_with_workers;

/// WHY: forked work must all complete before a join task gated on it
/// runs.
/// WHAT: a root forks three counting tasks and a join task depending on
/// all three; the join observes every fork's contribution.
#[test]
#[traced_test]
#[serial]
fn fan_out_fan_in_joins_after_all_forks() {
    let scheduler = scheduler_with_workers(2);

    let counter = Arc::new(AtomicUsize::new(0));
    let join_saw = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(SyncCounter::new(1));

    {
        let counter = counter.clone();
        let join_saw = join_saw.clone();
        let done = done.clone();

        scheduler.detach_task(move || {
            let forks: Vec<_> = (0..3)
                .map(|_| {
                    let counter = counter.clone();
                    create_task(&[], move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                })
                .collect();

            let counter = counter.clone();
            let join_saw = join_saw.clone();
            let done = done.clone();
            create_task(&forks, move || {
                join_saw.store(counter.load(Ordering::SeqCst), Ordering::SeqCst);
                done.signal(false);
            });
        });
    }

    done.wait();

    assert_eq!(join_saw.load(Ordering::SeqCst), 3);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

/// WHY: a dependency chain imposes a total order on execution.
/// WHAT: four chained tasks append their index to a shared vector; the
/// vector ends up in chain order.
#[test]
#[traced_test]
#[serial]
fn linear_chain_runs_in_dependency_order() {
    let scheduler = scheduler_with_workers(2);

    let order = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(SyncCounter::new(1));

    {
        let order = order.clone();
        let done = done.clone();

        scheduler.detach_task(move || {
            let mut previous = None;

            for index in 1..=4 {
                let order = order.clone();
                let done = done.clone();

                let dependencies: Vec<_> = previous.iter().cloned().collect();
                previous = Some(create_task(&dependencies, move || {
                    order.lock().unwrap().push(index);

                    if index == 4 {
                        done.signal(false);
                    }
                }));
            }
        });
    }

    done.wait();

    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3, 4]);
}

/// WHY: a worker drowning in tasks must shed load to idle peers.
/// WHAT: one worker receives a burst of one thousand tasks; by the time
/// the burst drains, the other worker has executed some of them too.
#[test]
#[traced_test]
#[serial]
fn work_spreads_to_idle_workers() {
    let scheduler = scheduler_with_workers(2);
    assert_eq!(scheduler.worker_count(), 2);

    let executed = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(SyncCounter::new(1000));

    {
        let executed = executed.clone();
        let done = done.clone();

        scheduler.detach_task(move || {
            for _ in 0..1000 {
                let executed = executed.clone();
                let done = done.clone();

                detach_task(move || {
                    executed.fetch_add(1, Ordering::SeqCst);
                    done.signal(false);
                });
            }
        });
    }

    done.wait();

    assert_eq!(executed.load(Ordering::SeqCst), 1000);

    for worker in scheduler.workers() {
        assert!(
            worker.fetched_task_count() >= 1,
            "worker {} never executed anything",
            worker.index()
        );
    }
}

/// WHY: creating tasks from a non-worker thread must dispatch them onto
/// the pool instead of failing; a dependency-gated one follows once its
/// predecessor finishes.
/// WHAT: a foreign thread wires a two-task chain through the scheduler
/// handle; both run, in dependency order.
#[test]
#[traced_test]
#[serial]
fn foreign_threads_dispatch_created_tasks() {
    let scheduler = scheduler_with_workers(2);

    let gate = Arc::new(SyncCounter::new(1));
    let counter = Arc::new(AtomicUsize::new(0));
    let follower_saw = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(SyncCounter::new(1));

    let leader = {
        let gate = gate.clone();
        let counter = counter.clone();

        scheduler.create_task(&[], move || {
            gate.wait();
            counter.fetch_add(1, Ordering::SeqCst);
        })
    };

    {
        let counter = counter.clone();
        let follower_saw = follower_saw.clone();
        let done = done.clone();

        scheduler.create_task(&[leader], move || {
            follower_saw.store(counter.load(Ordering::SeqCst), Ordering::SeqCst);
            done.signal(false);
        });
    }

    // the chain is fully wired; let the leader finish.
    gate.signal(false);
    done.wait();

    assert_eq!(follower_saw.load(Ordering::SeqCst), 1);
}

/// WHY: foreign threads have no execution context; their detached tasks
/// dispatch onto some worker instead.
/// WHAT: a zero-dependency task detached from the test thread runs to
/// completion.
#[test]
#[traced_test]
#[serial]
fn zero_dependency_task_completes_immediately() {
    let scheduler = scheduler_with_workers(2);

    let done = Arc::new(SyncCounter::new(1));

    let signalled = done.clone();
    scheduler.detach_task(move || {
        signalled.signal(false);
    });

    done.wait();
}
