use sysinfo::System;

use crate::bytesize::ByteSize;

/// Static facts about the host, read once at startup.
#[derive(Debug, Clone, Copy)]
pub struct SystemFacts {
    pub cpu_threads: usize,
    pub total_memory: ByteSize,
    pub available_memory: ByteSize,
}

impl SystemFacts {
    pub fn probe() -> Self {
        let cpu_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let mut sys = System::new();
        sys.refresh_memory();

        Self {
            cpu_threads,
            total_memory: ByteSize::from_u64(sys.total_memory()),
            available_memory: ByteSize::from_u64(sys.available_memory()),
        }
    }
}

/// How many plots fit in both the CPU and the memory budget at once.
///
/// `limit` can only lower the result. Computed once per run; it does not
/// follow later changes in load.
pub fn max_concurrency(
    cpu_threads: usize,
    threads_per_job: usize,
    memory_budget: ByteSize,
    memory_per_job: ByteSize,
    limit: Option<usize>,
) -> usize {
    if threads_per_job == 0 || memory_per_job.bytes() <= 0 {
        return 0;
    }
    let by_cpu = cpu_threads / threads_per_job;
    let by_memory = usize::try_from(memory_budget / memory_per_job).unwrap_or(0);
    let budget = by_cpu.min(by_memory);
    match limit {
        Some(limit) => budget.min(limit),
        None => budget,
    }
}
