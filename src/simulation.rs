use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_prune::{EngineConfig, EngineError, MemoryVersionStore, RetentionEngine};
use strata_retention::Version;

/// Statistics collected during a simulation run
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub policy: String,
    pub commits: u64,
    pub readers: usize,
    pub pins_granted: u64,
    pub pins_refused: u64,
    pub versions_pruned: u64,
    pub sweeps: u64,
    pub retained: Vec<Version>,
    pub durable: Vec<Version>,
    pub total_time: Duration,
    pub commits_per_second: f64,
}

impl SimulationStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Retention Simulation Statistics               ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Policy:                    {:>30} ║", self.policy);
        println!("║  Commits:                   {:>30} ║", self.commits);
        println!("║  Readers:                   {:>30} ║", self.readers);
        println!("║  Pins Granted / Refused:    {:>30} ║", format!("{} / {}", self.pins_granted, self.pins_refused));
        println!("║  Versions Pruned:           {:>30} ║", self.versions_pruned);
        println!("║  Sweeps:                    {:>30} ║", self.sweeps);
        println!("║  Retained Versions:         {:>30} ║", self.retained.len());
        println!("║  Durable Versions:          {:>30} ║", self.durable.len());
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Commits/Second:            {:>30.0} ║", self.commits_per_second);
        println!("╚════════════════════════════════════════════════════════════╝");
        println!("  retained: {}", render(&self.retained));
        println!("  durable:  {}", render(&self.durable));
    }
}

/// Collapse a sorted version list into ranges, e.g. `10, 16..25`.
fn render(versions: &[Version]) -> String {
    let mut parts = Vec::new();
    let mut iter = versions.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}..{}", start, end));
        }
    }
    if parts.is_empty() {
        "(none)".to_string()
    } else {
        parts.join(", ")
    }
}

/// Reader task: repeatedly pins a recent version, holds it briefly, releases it
async fn reader_loop(
    engine: Arc<RetentionEngine<MemoryVersionStore>>,
    mut rng: StdRng,
    holder: String,
    stop: Arc<AtomicBool>,
    granted: Arc<AtomicU64>,
    refused: Arc<AtomicU64>,
) {
    while !stop.load(Ordering::Relaxed) {
        let last = engine.last_version();
        if last == 0 {
            tokio::task::yield_now().await;
            continue;
        }
        let lookback = rng.gen_range(0..=last.min(32));
        let version = last.saturating_sub(lookback).max(1);

        match engine.request_pin(version, holder.as_str()) {
            Ok(handle) => {
                granted.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(Duration::from_micros(rng.gen_range(50..2000))).await;
                engine.release_pin(&handle);
            }
            Err(_) => {
                refused.fetch_add(1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        }
    }
}

/// Commit `commits` versions while `readers` tasks pin and release history
pub async fn simulate(
    config: EngineConfig,
    commits: u64,
    readers: usize,
    seed: Option<u64>,
) -> Result<SimulationStats, EngineError> {
    let policy = config.policy()?;
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Retention Simulation                                ║");
    println!("║  {} | Commits: {} | Readers: {}", policy, commits, readers);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let store = Arc::new(MemoryVersionStore::new());
    let engine = Arc::new(RetentionEngine::open(store.clone(), config).await?);

    let stop = Arc::new(AtomicBool::new(false));
    let granted = Arc::new(AtomicU64::new(0));
    let refused = Arc::new(AtomicU64::new(0));

    println!("\n[Phase 1/2] Committing versions...");

    let mut handles = vec![];
    for idx in 0..readers {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(idx as u64)),
            None => StdRng::from_entropy(),
        };
        handles.push(tokio::spawn(reader_loop(
            engine.clone(),
            rng,
            format!("reader-{}", idx),
            stop.clone(),
            granted.clone(),
            refused.clone(),
        )));
    }

    for version in 1..=commits {
        store.save(version);
        engine.on_commit(version).await?;

        if version % 100 == 0 {
            println!("  Commits completed: {}/{}", version, commits);
        }
        if version % 10 == 0 {
            tokio::task::yield_now().await;
        }
    }

    stop.store(true, Ordering::Relaxed);
    for handle in handles {
        let _ = handle.await;
    }

    println!("[Phase 1/2] ✓ Completed");
    println!("[Phase 2/2] Settling...");

    let report = engine.settle().await;
    if let strata_prune::SweepOutcome::Aborted { version, error } = &report.outcome {
        tracing::warn!(version, %error, "final sweep aborted");
    }
    engine.shutdown().await;

    println!("[Phase 2/2] ✓ Completed");

    let total_time = start.elapsed();
    let stats = engine.stats();

    Ok(SimulationStats {
        policy: policy.to_string(),
        commits,
        readers,
        pins_granted: granted.load(Ordering::Relaxed),
        pins_refused: refused.load(Ordering::Relaxed),
        versions_pruned: stats.versions_pruned,
        sweeps: stats.sweeps,
        retained: engine.retained_versions(),
        durable: engine.store().durable(),
        total_time,
        commits_per_second: commits as f64 / total_time.as_secs_f64().max(f64::EPSILON),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_prune::EngineConfigBuilder;
    use strata_retention::PruningStrategy;

    #[test]
    fn test_render_ranges() {
        assert_eq!(render(&[]), "(none)");
        assert_eq!(render(&[10, 16, 17, 18, 25]), "10, 16..18, 25");
    }

    #[tokio::test]
    async fn test_simulation_converges_without_readers() {
        let config = EngineConfigBuilder::new()
            .strategy(PruningStrategy::Syncable)
            .build();

        let stats = simulate(config, 25, 0, Some(7)).await.unwrap();

        let mut expected: Vec<Version> = vec![10];
        expected.extend(16..=25);
        assert_eq!(stats.retained, expected);
        assert_eq!(stats.durable, vec![10, 20]);
    }

    #[tokio::test]
    async fn test_simulation_with_readers_settles() {
        let config = EngineConfigBuilder::new()
            .strategy(PruningStrategy::Everything)
            .build();

        let stats = simulate(config, 200, 4, Some(42)).await.unwrap();

        assert_eq!(stats.retained, vec![200]);
    }
}
