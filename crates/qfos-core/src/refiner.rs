//! Session refinement: collision detection and graph-based splitting.
//!
//! A collision bundle is a temporally merged but semantically
//! heterogeneous session: several unrelated fan-outs landed close enough
//! in time for the bundler to join them. The refiner detects candidates by
//! low MIBCS and tries to split them along the connected components of a
//! pairwise-similarity graph. A split is only accepted when the component
//! MIBCS beats the parent by a configured margin; otherwise the session
//! passes through flagged `low_coherence`.
//!
//! IP-based refinement is disabled by default: intra-bundle IP diversity
//! correlates weakly (r ~= 0.023) with collision status. The config toggle
//! is honored as an interface but the pathway ignores IP entirely.
//!
//! Refinement conserves membership: the union of child `request_ids`
//! always equals the parent's.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::OptimizerConfig;
use crate::embedding::EmbeddingMatrix;
use crate::metrics::{session_rows, similarity_profile};
use crate::sampling::rng_for;
use crate::types::{RefinementOrigin, Session, SessionFlag};

const SALT_REFINER_BASE: u64 = 0x2000_0000;

/// Graph-splitting session refiner.
#[derive(Debug, Clone)]
pub struct SessionRefiner<'a> {
    config: &'a OptimizerConfig,
}

impl<'a> SessionRefiner<'a> {
    pub fn new(config: &'a OptimizerConfig) -> Self {
        if config.ip_refinement_enabled {
            tracing::warn!(
                "ip_refinement_enabled is set; the pathway ignores IP (weak collision \
                 correlation) and splits on semantic similarity only"
            );
        }
        Self { config }
    }

    /// Refine a bundler output set.
    ///
    /// Candidate sessions may be replaced by two or more children whose
    /// member sets partition the parent's. `timestamps` maps matrix rows
    /// to request timestamps so child sessions carry exact bounds.
    /// `fold_tag` keeps the sampler streams deterministic per evaluation.
    pub fn refine(
        &self,
        sessions: Vec<Session>,
        matrix: &EmbeddingMatrix,
        row_of: &HashMap<Uuid, usize>,
        timestamps: &[DateTime<Utc>],
        fold_tag: u64,
    ) -> Vec<Session> {
        if !self.config.refinement_enabled {
            return sessions;
        }

        let mut refined = Vec::with_capacity(sessions.len());
        for (index, session) in sessions.into_iter().enumerate() {
            match self.try_split(&session, matrix, row_of, timestamps, fold_tag, index as u64)
            {
                SplitOutcome::Accepted(children) => {
                    tracing::debug!(
                        parent = %session.session_id,
                        children = children.len(),
                        "split collision bundle"
                    );
                    refined.extend(children);
                }
                SplitOutcome::Rejected => {
                    let mut session = session;
                    if !session.has_flag(SessionFlag::LowCoherence) {
                        session.flags.push(SessionFlag::LowCoherence);
                    }
                    refined.push(session);
                }
                SplitOutcome::NotCandidate => refined.push(session),
            }
        }

        // Children land inside the parent's time range; restore global
        // emission order (provider ascending, then start ascending).
        refined.sort_by(|a, b| {
            (&a.provider, a.start_ts, &a.session_id)
                .cmp(&(&b.provider, b.start_ts, &b.session_id))
        });
        refined
    }

    fn try_split(
        &self,
        session: &Session,
        matrix: &EmbeddingMatrix,
        row_of: &HashMap<Uuid, usize>,
        timestamps: &[DateTime<Utc>],
        fold_tag: u64,
        index: u64,
    ) -> SplitOutcome {
        if session.size() < self.config.min_bundle_size {
            return SplitOutcome::NotCandidate;
        }

        let rows = session_rows(session, row_of);
        let mut rng = rng_for(
            self.config.seed,
            session.window_used,
            fold_tag,
            SALT_REFINER_BASE + index,
        );
        let parent_profile = similarity_profile(
            matrix,
            &rows,
            self.config.max_intra_bundle_pairs,
            &mut rng,
        );
        let parent_mibcs = match parent_profile {
            Some(p) if p.mean < self.config.coherence_floor => p.mean,
            // Coherent or undefined similarity: leave the session alone.
            _ => return SplitOutcome::NotCandidate,
        };

        // Member-local similarity graph: edge (i, j) iff cosine >= threshold.
        let n = rows.len();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
        for i in 0..n {
            for j in (i + 1)..n {
                if matrix.cosine(rows[i], rows[j]) >= self.config.similarity_threshold {
                    adjacency[i].push(j);
                    adjacency[j].push(i);
                }
            }
        }

        let components = connected_components(&adjacency);
        let (mut large, residual): (Vec<Vec<usize>>, Vec<Vec<usize>>) = components
            .into_iter()
            .partition(|c| c.len() >= self.config.min_sub_bundle_size);

        if large.len() < 2 {
            return SplitOutcome::Rejected;
        }

        // Weighted mean of the would-be component MIBCS must beat the
        // parent by the configured improvement.
        let mut weighted_sum = 0.0f32;
        let mut weight = 0usize;
        for component in &large {
            let component_rows: Vec<usize> = component.iter().map(|&i| rows[i]).collect();
            let mibcs = similarity_profile(
                matrix,
                &component_rows,
                self.config.max_intra_bundle_pairs,
                &mut rng,
            )
            .map(|p| p.mean)
            .unwrap_or(0.0);
            weighted_sum += mibcs * component.len() as f32;
            weight += component.len();
        }
        let component_mibcs = weighted_sum / weight as f32;
        if component_mibcs <= parent_mibcs + self.config.min_mibcs_improvement {
            return SplitOutcome::Rejected;
        }

        // Attach each residual member to the nearest large component
        // (highest mean cosine; ties go to the earliest component).
        for member in residual.into_iter().flatten() {
            let mut best = 0usize;
            let mut best_sim = f32::MIN;
            for (c, component) in large.iter().enumerate() {
                let sim = component
                    .iter()
                    .map(|&i| matrix.cosine(rows[member], rows[i]))
                    .sum::<f32>()
                    / component.len() as f32;
                if sim > best_sim {
                    best_sim = sim;
                    best = c;
                }
            }
            large[best].push(member);
        }

        SplitOutcome::Accepted(emit_children(session, large, &rows, timestamps))
    }
}

/// Build child sessions from member-index components.
fn emit_children(
    parent: &Session,
    components: Vec<Vec<usize>>,
    rows: &[usize],
    timestamps: &[DateTime<Utc>],
) -> Vec<Session> {
    components
        .into_iter()
        .enumerate()
        .map(|(k, mut component)| {
            // Parent member order is temporal; keep it.
            component.sort_unstable();
            let request_ids: Vec<Uuid> =
                component.iter().map(|&i| parent.request_ids[i]).collect();
            let start_ts = timestamps[rows[component[0]]];
            let end_ts = timestamps[rows[component[component.len() - 1]]];
            let mut flags = Vec::new();
            if request_ids.len() == 1 {
                flags.push(SessionFlag::Singleton);
            }
            Session {
                session_id: format!("{}.s{k}", parent.session_id),
                provider: parent.provider.clone(),
                start_ts,
                end_ts,
                request_ids,
                window_used: parent.window_used,
                refinement_origin: Some(RefinementOrigin::SplitFrom(
                    parent.session_id.clone(),
                )),
                mibcs: None,
                confidence: None,
                flags,
            }
        })
        .collect()
}

enum SplitOutcome {
    Accepted(Vec<Session>),
    Rejected,
    NotCandidate,
}

/// Connected components over an adjacency list, BFS, deterministic order.
fn connected_components(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adjacency.len();
    let mut visited = vec![false; n];
    let mut components = Vec::new();

    for start in 0..n {
        if visited[start] {
            continue;
        }
        let mut component = Vec::new();
        let mut queue = std::collections::VecDeque::from([start]);
        visited[start] = true;
        while let Some(node) = queue.pop_front() {
            component.push(node);
            for &next in &adjacency[node] {
                if !visited[next] {
                    visited[next] = true;
                    queue.push_back(next);
                }
            }
        }
        component.sort_unstable();
        components.push(component);
    }

    components
}
