//! Staleness planning: which stages must run for a repository.
//!
//! A pure function of the stored record, the fetcher's current view of the
//! repository, and the caller's force flags. No I/O happens here.
//!
//! # Rules
//!
//! Content is *provably unchanged* only when the stored record and the
//! current info both carry a revision id and the two are equal. Otherwise
//! everything reruns, whatever the force flags or stored statuses say.
//!
//! ```text
//! fetch = force.redownload || !unchanged || !stored.download_succeeded
//! chunk = fetch || force.rechunk || !stored.chunking_succeeded
//! embed = chunk || force.reembed || !stored.embedding_succeeded
//! ```
//!
//! Each stage's need is monotonic in its predecessors, so the planned set
//! is always a suffix of the pipeline.

use std::fmt;

use serde::Serialize;

use crate::models::{RepositoryInfo, RepositoryRecord, Stage};

/// Caller overrides for the staleness decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForceFlags {
    pub redownload: bool,
    pub rechunk: bool,
    pub reembed: bool,
}

impl ForceFlags {
    /// Rerun every stage.
    pub fn refresh() -> Self {
        Self {
            redownload: true,
            rechunk: true,
            reembed: true,
        }
    }

    pub fn any(&self) -> bool {
        self.redownload || self.rechunk || self.reembed
    }
}

/// Why a plan looks the way it does. Used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanReason {
    /// No record exists yet.
    NewRepository,
    /// The stored revision differs from the current one.
    RevisionChanged,
    /// The stored or current revision is unknown, so nothing can be reused.
    UnknownRevision,
    /// Same revision, but a force flag asked for rework.
    Forced,
    /// Same revision, but a stage did not finish last time.
    Resume,
    /// Same revision and every stage succeeded.
    UpToDate,
}

impl fmt::Display for PlanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanReason::NewRepository => "new repository",
            PlanReason::RevisionChanged => "revision changed",
            PlanReason::UnknownRevision => "revision unknown",
            PlanReason::Forced => "forced",
            PlanReason::Resume => "resuming incomplete run",
            PlanReason::UpToDate => "up to date",
        };
        f.write_str(s)
    }
}

/// The set of stages to run for one `index` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StagePlan {
    pub fetch: bool,
    pub chunk: bool,
    pub embed: bool,
    pub reason: PlanReason,
}

impl StagePlan {
    fn full(reason: PlanReason) -> Self {
        Self {
            fetch: true,
            chunk: true,
            embed: true,
            reason,
        }
    }

    /// True when nothing needs to run (fast path).
    pub fn is_noop(&self) -> bool {
        !self.fetch && !self.chunk && !self.embed
    }

    pub fn includes(&self, stage: Stage) -> bool {
        match stage {
            Stage::Fetch => self.fetch,
            Stage::Chunk => self.chunk,
            Stage::Embed => self.embed,
        }
    }

    /// Planned stages in pipeline order.
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL.into_iter().filter(|s| self.includes(*s))
    }

    /// Whether the plan replaces the repository's content with a different
    /// revision (as opposed to reworking the same one).
    pub fn is_content_change(&self) -> bool {
        matches!(
            self.reason,
            PlanReason::RevisionChanged | PlanReason::UnknownRevision
        )
    }
}

/// Decide which stages must run.
pub fn plan_stages(
    existing: Option<&RepositoryRecord>,
    current: &RepositoryInfo,
    force: ForceFlags,
) -> StagePlan {
    let existing = match existing {
        Some(record) => record,
        None => return StagePlan::full(PlanReason::NewRepository),
    };

    match (&existing.revision_id, &current.revision_id) {
        (Some(stored), Some(now)) if stored == now => {}
        (Some(_), Some(_)) => return StagePlan::full(PlanReason::RevisionChanged),
        _ => return StagePlan::full(PlanReason::UnknownRevision),
    }

    let fetch = force.redownload || !existing.download_succeeded();
    let chunk = fetch || force.rechunk || !existing.chunking_succeeded();
    let embed = chunk || force.reembed || !existing.embedding_succeeded();

    let reason = if !embed {
        PlanReason::UpToDate
    } else if force.any() {
        PlanReason::Forced
    } else {
        PlanReason::Resume
    };

    StagePlan {
        fetch,
        chunk,
        embed,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StageStatus;

    fn info(rev: Option<&str>) -> RepositoryInfo {
        RepositoryInfo {
            owner: "a".into(),
            name: "b".into(),
            url: "https://github.com/a/b".into(),
            revision_id: rev.map(String::from),
        }
    }

    fn indexed(rev: Option<&str>) -> RepositoryRecord {
        let mut record = RepositoryRecord::new(&info(rev));
        record.revision_id = rev.map(String::from);
        record.download = StageStatus::Succeeded;
        record.chunking = StageStatus::Succeeded;
        record.embedding = StageStatus::Succeeded;
        record
    }

    fn flags(plan: &StagePlan) -> (bool, bool, bool) {
        (plan.fetch, plan.chunk, plan.embed)
    }

    #[test]
    fn new_repository_runs_everything() {
        let plan = plan_stages(None, &info(Some("c1")), ForceFlags::default());
        assert_eq!(flags(&plan), (true, true, true));
        assert_eq!(plan.reason, PlanReason::NewRepository);
    }

    #[test]
    fn unchanged_and_complete_is_noop() {
        let record = indexed(Some("c1"));
        let plan = plan_stages(Some(&record), &info(Some("c1")), ForceFlags::default());
        assert!(plan.is_noop());
        assert_eq!(plan.reason, PlanReason::UpToDate);
        assert_eq!(plan.stages().count(), 0);
    }

    #[test]
    fn revision_change_overrides_flags() {
        let record = indexed(Some("c1"));
        let plan = plan_stages(Some(&record), &info(Some("c2")), ForceFlags::default());
        assert_eq!(flags(&plan), (true, true, true));
        assert!(plan.is_content_change());
    }

    #[test]
    fn legacy_record_without_revision_is_fully_reindexed() {
        let record = indexed(None);
        let plan = plan_stages(Some(&record), &info(Some("c1")), ForceFlags::default());
        assert_eq!(flags(&plan), (true, true, true));
        assert_eq!(plan.reason, PlanReason::UnknownRevision);
    }

    #[test]
    fn unknown_current_revision_is_fully_reindexed() {
        let record = indexed(Some("c1"));
        let plan = plan_stages(Some(&record), &info(None), ForceFlags::default());
        assert_eq!(flags(&plan), (true, true, true));
    }

    #[test]
    fn force_redownload_cascades() {
        let record = indexed(Some("c1"));
        let force = ForceFlags {
            redownload: true,
            ..Default::default()
        };
        let plan = plan_stages(Some(&record), &info(Some("c1")), force);
        assert_eq!(flags(&plan), (true, true, true));
        assert_eq!(plan.reason, PlanReason::Forced);
    }

    #[test]
    fn force_rechunk_skips_fetch() {
        let record = indexed(Some("c1"));
        let force = ForceFlags {
            rechunk: true,
            ..Default::default()
        };
        let plan = plan_stages(Some(&record), &info(Some("c1")), force);
        assert_eq!(flags(&plan), (false, true, true));
    }

    #[test]
    fn force_reembed_only_embeds() {
        let record = indexed(Some("c1"));
        let force = ForceFlags {
            reembed: true,
            ..Default::default()
        };
        let plan = plan_stages(Some(&record), &info(Some("c1")), force);
        assert_eq!(flags(&plan), (false, false, true));
        assert_eq!(plan.stages().collect::<Vec<_>>(), vec![Stage::Embed]);
    }

    #[test]
    fn refresh_sets_every_flag() {
        let record = indexed(Some("c1"));
        let plan = plan_stages(Some(&record), &info(Some("c1")), ForceFlags::refresh());
        assert_eq!(flags(&plan), (true, true, true));
    }

    #[test]
    fn failed_embedding_resumes_at_embed() {
        let mut record = indexed(Some("c1"));
        record.embedding = StageStatus::Failed;
        let plan = plan_stages(Some(&record), &info(Some("c1")), ForceFlags::default());
        assert_eq!(flags(&plan), (false, false, true));
        assert_eq!(plan.reason, PlanReason::Resume);
    }

    #[test]
    fn failed_chunking_resumes_at_chunk() {
        let mut record = indexed(Some("c1"));
        record.chunking = StageStatus::Failed;
        record.embedding = StageStatus::NotStarted;
        let plan = plan_stages(Some(&record), &info(Some("c1")), ForceFlags::default());
        assert_eq!(flags(&plan), (false, true, true));
    }

    #[test]
    fn failed_download_reruns_everything() {
        let mut record = indexed(Some("c1"));
        record.download = StageStatus::Failed;
        let plan = plan_stages(Some(&record), &info(Some("c1")), ForceFlags::default());
        assert_eq!(flags(&plan), (true, true, true));
    }

    #[test]
    fn planned_stages_form_a_suffix() {
        let record = indexed(Some("c1"));
        for bits in 0..8u8 {
            let force = ForceFlags {
                redownload: bits & 1 != 0,
                rechunk: bits & 2 != 0,
                reembed: bits & 4 != 0,
            };
            let plan = plan_stages(Some(&record), &info(Some("c1")), force);
            assert!(!plan.fetch || plan.chunk);
            assert!(!plan.chunk || plan.embed);
        }
    }
}
