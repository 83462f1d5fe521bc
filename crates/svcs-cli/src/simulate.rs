//! Capture simulator
//!
//! Drives a repository the way a fleet of scanning probes would: several
//! probes capture onto their own branches while others stream straight onto
//! the default branch, all concurrently, with shuffled arrival order and
//! resent messages. The probe branches are then merged back, conflicts are
//! resolved by a seeded coin, and the resulting repository is checked for
//! structural invariants.
//!
//! Message content is fully determined by the seed; which concurrent commit
//! wins a race is not.

use futures::future::try_join_all;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use svcs_chunk::{
    Aabb, AudioAnnotation, ChunkPayload, Geometry, GeometryKind, Point3, SemanticLabels,
};
use svcs_core::{RepoConfig, RepoError, Repository};
use svcs_ingest::{Buffered, CommitMode, StreamMessage};
use svcs_merge::{ConflictPolicy, MergeOptions, MergeOutcome, Resolution, ResolutionChoice};

const LABELS: &[&str] = &[
    "chair", "table", "lamp", "door", "window", "plant", "sofa", "shelf", "desk", "rug",
];

const PHRASES: &[&str] = &[
    "this wall needs repainting",
    "the window latch is broken",
    "move the sofa closer to the lamp",
    "measure the doorway again",
    "the plant by the window is new",
];

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Probes capturing onto their own branch
    pub branch_probes: usize,
    /// Probes capturing straight onto the default branch
    pub direct_probes: usize,
    pub messages_per_probe: usize,
    /// Cells per horizontal axis of the scanned area
    pub extent: i32,
    /// Fraction of messages sent twice
    pub resend_rate: f64,
    /// Policy applied before the simulator resolves conflicts itself
    pub policy: ConflictPolicy,
    pub repo: RepoConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            branch_probes: 4,
            direct_probes: 2,
            messages_per_probe: 64,
            extent: 8,
            resend_rate: 0.05,
            policy: ConflictPolicy::Manual,
            repo: RepoConfig::default(),
        }
    }
}

/// Per-session tallies
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub sessions: usize,
    pub messages: usize,
    pub duplicates: usize,
    pub fast_forward: usize,
    pub merged: usize,
    pub parked: usize,
    pub empty: usize,
    pub chunks_committed: usize,
}

/// Branch merge tallies
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeStats {
    pub attempted: usize,
    pub no_op: usize,
    pub fast_forward: usize,
    pub merged: usize,
    /// Requests that first came back with conflicts
    pub conflicted: usize,
    pub conflict_regions: usize,
    pub resolved: usize,
}

/// Outcome of a simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub sessions: SessionStats,
    pub merges: MergeStats,
    pub chunks_stored: usize,
    pub snapshots: usize,
    pub branches: usize,
    pub main_tip: String,
    /// Change summary from the root to the final tip
    pub changes: String,
    pub violations: Vec<String>,
    pub elapsed_ms: u128,
}

impl SimulationReport {
    /// Whether every invariant held
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut out = String::new();
        out.push_str("=== Spatial VCS Simulator Report ===\n\n");
        out.push_str(&format!("Seed: {}\n", self.seed));
        out.push_str(&format!("Elapsed: {} ms\n\n", self.elapsed_ms));

        let s = &self.sessions;
        out.push_str("Sessions\n");
        out.push_str(&format!("  Sessions:        {}\n", s.sessions));
        out.push_str(&format!("  Messages:        {} ({} resent)\n", s.messages, s.duplicates));
        out.push_str(&format!("  Fast-forward:    {}\n", s.fast_forward));
        out.push_str(&format!("  Merged at flush: {}\n", s.merged));
        out.push_str(&format!("  Parked:          {}\n", s.parked));
        out.push_str(&format!("  Chunks:          {}\n\n", s.chunks_committed));

        let m = &self.merges;
        out.push_str("Merges\n");
        out.push_str(&format!("  Attempted:       {}\n", m.attempted));
        out.push_str(&format!("  No-op:           {}\n", m.no_op));
        out.push_str(&format!("  Fast-forward:    {}\n", m.fast_forward));
        out.push_str(&format!("  Merge commits:   {}\n", m.merged));
        out.push_str(&format!(
            "  Conflicted:      {} ({} regions, {} resolved)\n\n",
            m.conflicted, m.conflict_regions, m.resolved
        ));

        out.push_str("Repository\n");
        out.push_str(&format!("  Chunks stored:   {}\n", self.chunks_stored));
        out.push_str(&format!("  Snapshots:       {}\n", self.snapshots));
        out.push_str(&format!("  Branches:        {}\n", self.branches));
        out.push_str(&format!("  Main tip:        {}\n", self.main_tip));
        out.push_str(&format!("  Changes:         {}\n", self.changes));

        if !self.violations.is_empty() {
            out.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                out.push_str(&format!("{}. {v}\n", i + 1));
            }
        }
        out.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));
        out
    }
}

/// Everything one probe will send, decided up front from the seed
#[derive(Debug, Clone)]
struct ProbePlan {
    name: String,
    branch: String,
    /// `(seq, bounds, payload)` in source order
    items: Vec<(u64, Aabb, ChunkPayload)>,
    /// Arrival order as indices into `items`, resends included
    arrival: Vec<usize>,
}

fn cell_bounds(cell_size: f64, x: i32, y: i32, z: i32) -> Result<Aabb, RepoError> {
    let min = Point3::new(
        f64::from(x) * cell_size,
        f64::from(y) * cell_size,
        f64::from(z) * cell_size,
    );
    let max = Point3::new(min.x + cell_size, min.y + cell_size, min.z + cell_size);
    Aabb::new(min, max).map_err(|e| RepoError::Internal(e.to_string()))
}

fn random_payload(rng: &mut StdRng, seq: u64) -> ChunkPayload {
    match rng.gen_range(0..100) {
        0..=49 => {
            let label = LABELS[rng.gen_range(0..LABELS.len())];
            // Coarse confidences so independent probes often agree exactly
            let confidence = f32::from(rng.gen_range(5_u8..=9)) / 10.0;
            ChunkPayload::Semantic(SemanticLabels::single(label, confidence))
        }
        50..=84 => {
            let len = rng.gen_range(8..32);
            ChunkPayload::Geometry(Geometry {
                kind: if rng.gen_bool(0.5) {
                    GeometryKind::Mesh
                } else {
                    GeometryKind::PointCloud
                },
                data: (0..len).map(|_| rng.gen()).collect(),
            })
        }
        _ => ChunkPayload::Audio(AudioAnnotation {
            transcript: PHRASES[rng.gen_range(0..PHRASES.len())].to_owned(),
            language: Some("en".to_owned()),
            start_ms: seq * 250,
            duration_ms: rng.gen_range(500..3000),
        }),
    }
}

fn plan_probe(
    rng: &mut StdRng,
    config: &SimulatorConfig,
    name: String,
    branch: String,
) -> Result<ProbePlan, RepoError> {
    let cell_size = config.repo.index.cell_size;
    let mut items = Vec::with_capacity(config.messages_per_probe);
    for seq in 1..=config.messages_per_probe as u64 {
        let x = rng.gen_range(0..config.extent.max(1));
        let y = rng.gen_range(0..config.extent.max(1));
        let z = rng.gen_range(0..2);
        items.push((seq, cell_bounds(cell_size, x, y, z)?, random_payload(rng, seq)));
    }
    let mut arrival: Vec<usize> = (0..items.len()).collect();
    let resends: Vec<usize> = (0..items.len())
        .filter(|_| rng.gen_bool(config.resend_rate.clamp(0.0, 1.0)))
        .collect();
    arrival.extend(resends);
    arrival.shuffle(rng);
    Ok(ProbePlan {
        name,
        branch,
        items,
        arrival,
    })
}

#[derive(Debug, Default)]
struct ProbeResult {
    messages: usize,
    duplicates: usize,
    mode: Option<CommitMode>,
    chunks: usize,
}

async fn run_probe(repo: &Repository, plan: ProbePlan) -> Result<ProbeResult, RepoError> {
    let session = repo.open_session(&plan.branch, &plan.name)?;
    let mut result = ProbeResult::default();
    for index in &plan.arrival {
        let (seq, bounds, payload) = &plan.items[*index];
        let message = StreamMessage::new(session.id, *seq, *bounds, payload.clone());
        result.messages += 1;
        if repo.submit(message).await? == Buffered::Duplicate {
            result.duplicates += 1;
        }
    }
    let outcome = repo.end_session(session.id).await?;
    result.chunks = outcome.chunks;
    result.mode = Some(outcome.mode);
    Ok(result)
}

/// Merge `source` into the default branch, resolving conflicts at random
fn merge_back(
    repo: &Repository,
    source: &str,
    rng: &mut StdRng,
    policy: ConflictPolicy,
    stats: &mut MergeStats,
) -> Result<(), RepoError> {
    let target = repo.config().default_branch.clone();
    let options = MergeOptions {
        policy: Some(policy),
        ..MergeOptions::default()
    };
    stats.attempted += 1;
    let outcome = match repo.propose_merge(&target, source, None, &options) {
        Err(RepoError::ConflictsPending { conflicts, .. }) => {
            stats.conflicted += 1;
            stats.conflict_regions += conflicts.len();
            let resolutions: Vec<_> = conflicts
                .iter()
                .map(|conflict| {
                    let candidates = conflict.candidates();
                    let choice = match candidates.choose(rng) {
                        Some(chunk) if rng.gen_bool(0.9) => ResolutionChoice::Keep(*chunk),
                        _ => ResolutionChoice::Clear,
                    };
                    Resolution::new(conflict.region, choice)
                })
                .collect();
            stats.resolved += resolutions.len();
            repo.submit_resolutions(&target, source, None, &resolutions, &options)?
        }
        other => other?,
    };
    match outcome {
        MergeOutcome::NoOp { .. } => stats.no_op += 1,
        MergeOutcome::FastForward { .. } => stats.fast_forward += 1,
        MergeOutcome::Merged { .. } => stats.merged += 1,
    }
    Ok(())
}

fn check_invariants(repo: &Repository, merged: &[String]) -> Vec<String> {
    let graph = repo.graph();
    let mut violations = Vec::new();

    if let Err(e) = graph.verify_journal() {
        violations.push(format!("branch journal: {e}"));
    }
    for branch in graph.list_branches() {
        match graph.snapshot(&branch.tip) {
            Ok(snapshot) => {
                if let Err(e) = graph.verify_references(snapshot.index()) {
                    violations.push(format!("branch {}: {e}", branch.name));
                }
            }
            Err(e) => violations.push(format!("branch {}: {e}", branch.name)),
        }
        if !graph.is_ancestor(graph.root(), branch.tip) {
            violations.push(format!("branch {} is not reachable from the root", branch.name));
        }
    }

    match graph.branch(graph.default_branch()) {
        Ok(main) => {
            if let Err(e) = graph.history(main.tip) {
                violations.push(format!("history of {}: {e}", main.name));
            }
            for name in merged {
                match graph.branch(name) {
                    Ok(b) if !graph.is_ancestor(b.tip, main.tip) => {
                        violations.push(format!("{name} was merged but is not an ancestor of {}", main.name));
                    }
                    Ok(_) => {}
                    Err(e) => violations.push(format!("{name}: {e}")),
                }
            }
        }
        Err(e) => violations.push(format!("default branch: {e}")),
    }
    violations
}

/// Run a full simulation
///
/// # Errors
/// Returns error if the repository cannot be opened or an operation fails
/// in a way the simulator does not expect
pub async fn run_simulation(config: SimulatorConfig) -> Result<SimulationReport, RepoError> {
    let started = Instant::now();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let repo = Arc::new(Repository::open(config.repo.clone())?);
    let main = repo.config().default_branch.clone();

    let mut plans = Vec::new();
    for i in 0..config.branch_probes {
        let branch = format!("probe-{i}");
        repo.create_branch(&branch, &main)?;
        plans.push(plan_probe(&mut rng, &config, format!("probe-{i}"), branch)?);
    }
    for i in 0..config.direct_probes {
        plans.push(plan_probe(&mut rng, &config, format!("direct-{i}"), main.clone())?);
    }
    tracing::info!(
        seed = config.seed,
        probes = plans.len(),
        messages = config.messages_per_probe,
        "simulation started"
    );

    let results = try_join_all(plans.into_iter().map(|plan| {
        let repo = Arc::clone(&repo);
        async move { run_probe(&repo, plan).await }
    }))
    .await?;

    let mut sessions = SessionStats::default();
    let mut parked = Vec::new();
    for result in results {
        sessions.sessions += 1;
        sessions.messages += result.messages;
        sessions.duplicates += result.duplicates;
        sessions.chunks_committed += result.chunks;
        match result.mode {
            Some(CommitMode::FastForward) => sessions.fast_forward += 1,
            Some(CommitMode::Merged { .. }) => sessions.merged += 1,
            Some(CommitMode::Parked { branch, .. }) => {
                sessions.parked += 1;
                parked.push(branch);
            }
            Some(CommitMode::Empty) | None => sessions.empty += 1,
        }
    }

    let mut merges = MergeStats::default();
    let mut sources: Vec<String> = (0..config.branch_probes).map(|i| format!("probe-{i}")).collect();
    sources.extend(parked);
    for source in &sources {
        merge_back(&repo, source, &mut rng, config.policy, &mut merges)?;
    }

    let violations = check_invariants(&repo, &sources);
    let tip = repo.branch(&main)?.tip;
    let changes = repo.change_report(&repo.graph().root().to_string(), &main)?;
    let report = SimulationReport {
        seed: config.seed,
        sessions,
        merges,
        chunks_stored: repo.store().len(),
        snapshots: repo.graph().len(),
        branches: repo.list_branches().len(),
        main_tip: tip.to_string(),
        changes: changes.summary,
        violations,
        elapsed_ms: started.elapsed().as_millis(),
    };
    repo.shutdown().await;
    tracing::info!(
        passed = report.passed(),
        snapshots = report.snapshots,
        elapsed_ms = report.elapsed_ms,
        "simulation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SimulatorConfig {
        SimulatorConfig {
            seed: 7,
            branch_probes: 2,
            direct_probes: 1,
            messages_per_probe: 12,
            extent: 3,
            ..SimulatorConfig::default()
        }
    }

    #[test]
    fn plans_are_seeded() {
        let config = small();
        let a = plan_probe(&mut StdRng::seed_from_u64(1), &config, "p".into(), "main".into()).unwrap();
        let b = plan_probe(&mut StdRng::seed_from_u64(1), &config, "p".into(), "main".into()).unwrap();
        assert_eq!(a.items, b.items);
        assert_eq!(a.arrival, b.arrival);
        assert!(a.arrival.len() >= a.items.len());
    }

    #[test]
    fn generated_payloads_are_valid() {
        let mut rng = StdRng::seed_from_u64(3);
        for seq in 0..200 {
            assert!(random_payload(&mut rng, seq).validate().is_ok());
        }
    }

    #[tokio::test]
    async fn small_simulation_passes() {
        let report = run_simulation(small()).await.unwrap();
        assert!(report.passed(), "{}", report.generate_text());
        assert_eq!(report.sessions.sessions, 3);
        assert_eq!(report.sessions.messages, 36 + report.sessions.duplicates);
        assert_eq!(report.merges.attempted, 2 + report.sessions.parked);
        assert!(report.generate_text().contains("Result: PASS"));
    }
}
