use std::env;

use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct Config {
    pub executors: ExecutorConfig,
    pub scheduler: SchedulerConfig,
}

impl Config {
    pub fn new(executors: ExecutorConfig, scheduler: SchedulerConfig) -> Self {
        Self {
            executors,
            scheduler,
        }
    }

    pub fn from_env() -> Self {
        Self {
            executors: ExecutorConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(default(), default())
    }
}

/// Shape of a single worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub threads: usize,
    pub thread_name: String,
}

impl PoolConfig {
    pub fn new(threads: usize, thread_name: impl Into<String>) -> Self {
        Self {
            threads: max(threads, 1),
            thread_name: thread_name.into(),
        }
    }

    /// Pool for blocking work: twice the number of cores, but never fewer than four threads.
    pub fn io() -> Self {
        Self::new(max(4, 2 * num_cpus::get()), "conduit-io")
    }

    /// Pool for compute-bound work: one thread per core.
    pub fn cpu() -> Self {
        Self::new(num_cpus::get(), "conduit-cpu")
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub io: PoolConfig,
    pub cpu: PoolConfig,
}

impl ExecutorConfig {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Some(n) = threads_from_env("CONDUIT_IO_THREADS") {
            out.io.threads = n;
        }

        if let Some(n) = threads_from_env("CONDUIT_CPU_THREADS") {
            out.cpu.threads = n;
        }

        out
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            io: PoolConfig::io(),
            cpu: PoolConfig::cpu(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub timer_thread_name: String,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Ok(name) = env::var("CONDUIT_TIMER_THREAD") {
            let name = name.trim();

            if !name.is_empty() {
                out.timer_thread_name = name.to_string();
            }
        }

        out
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timer_thread_name: "conduit-timer".to_string(),
        }
    }
}

fn threads_from_env(key: &str) -> Option<usize> {
    let value = env::var(key).ok()?;

    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            warn!("invalid thread count {:?} for {}, using default", value, key);
            None
        }
    }
}
