mod continuations;
mod scheduling;

#[cfg(test)]
pub(crate) mod support {
    use foundation_taskron::taskron::{Scheduler, NUM_WORKERS_ENV};

    /// Bring up a scheduler with at most `workers` workers and a fixed
    /// balancing seed. Callers must hold the serial-test lock, since the
    /// worker cap travels through the environment.
    pub(crate) fn scheduler_with_workers(workers: usize) -> Scheduler {
        std::env::set_var(NUM_WORKERS_ENV, workers.to_string());

        let scheduler =
            Scheduler::initialize_with_seed(0xBAD5_EED5, None).expect("scheduler comes up");

        std::env::remove_var(NUM_WORKERS_ENV);

        scheduler
    }
}
