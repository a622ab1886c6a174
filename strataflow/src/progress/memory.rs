//! Process-local progress store.

use super::{ProgressStore, SessionState, StageUpdate};
use crate::core::{Questionnaire, SessionStatus};
use crate::errors::ProgressError;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// In-memory progress store backed by a concurrent map.
///
/// Sessions live until [`ProgressStore::remove`] is called.
#[derive(Debug, Default)]
pub struct InMemoryProgressStore {
    sessions: DashMap<String, SessionState>,
}

impl InMemoryProgressStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no session is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn create(
        &self,
        session_id: &str,
        questionnaire: Arc<Questionnaire>,
        stage_ids: &[String],
    ) -> Result<(), ProgressError> {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(ProgressError::SessionExists(session_id.to_string())),
            Entry::Vacant(slot) => {
                let mut state = SessionState::new(session_id, questionnaire, stage_ids);
                state.refresh_progress();
                slot.insert(state);
                debug!(session_id, stages = stage_ids.len(), "Session created");
                Ok(())
            }
        }
    }

    async fn mark(
        &self,
        session_id: &str,
        stage_id: &str,
        update: StageUpdate,
    ) -> Result<(), ProgressError> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| ProgressError::SessionNotFound(session_id.to_string()))?;
        if session.is_finished() {
            return Err(ProgressError::AlreadyFinalized(session_id.to_string()));
        }

        let stage = session
            .stages
            .get_mut(stage_id)
            .ok_or_else(|| ProgressError::UnknownStage {
                session_id: session_id.to_string(),
                stage: stage_id.to_string(),
            })?;
        let status = update.status();
        stage.apply(update)?;
        session.refresh_progress();

        debug!(session_id, stage = stage_id, %status, progress = session.progress_percent, "Stage marked");
        Ok(())
    }

    async fn snapshot(&self, session_id: &str) -> Result<SessionState, ProgressError> {
        self.sessions
            .get(session_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| ProgressError::SessionNotFound(session_id.to_string()))
    }

    async fn finalize(&self, session_id: &str, status: SessionStatus) -> Result<(), ProgressError> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| ProgressError::SessionNotFound(session_id.to_string()))?;
        if session.is_finished() {
            return Err(ProgressError::AlreadyFinalized(session_id.to_string()));
        }

        session.status = status;
        session.finished_at = Some(Utc::now());
        session.refresh_progress();
        debug!(session_id, %status, "Session finalized");
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.remove(session_id).map(|(_, state)| state)
    }

    async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Provenance, StageResult, StageStatus};
    use crate::pipeline::FailureRecord;
    use serde_json::{json, Map};

    fn stages() -> Vec<String> {
        vec!["BLOC1".to_string(), "BLOC2".to_string()]
    }

    fn result(stage_id: &str) -> Arc<StageResult> {
        let mut data = Map::new();
        data.insert("score".to_string(), json!(1));
        Arc::new(StageResult::new(
            data,
            Provenance {
                stage_id: stage_id.to_string(),
                assistant_id: "asst".to_string(),
                thread_id: "thread".to_string(),
                run_id: "run".to_string(),
                completed_at: Utc::now(),
                poll_count: 1,
                tool_submissions: 0,
                repaired: false,
            },
        ))
    }

    async fn store_with_session() -> InMemoryProgressStore {
        let store = InMemoryProgressStore::new();
        store
            .create("s1", Arc::new(Questionnaire::default()), &stages())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let store = store_with_session().await;
        let err = store
            .create("s1", Arc::new(Questionnaire::default()), &stages())
            .await
            .unwrap_err();
        assert_eq!(err, ProgressError::SessionExists("s1".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_and_snapshot() {
        let store = store_with_session().await;
        store.mark("s1", "BLOC1", StageUpdate::Running).await.unwrap();
        store
            .mark("s1", "BLOC1", StageUpdate::Completed(result("BLOC1")))
            .await
            .unwrap();

        let snapshot = store.snapshot("s1").await.unwrap();
        assert_eq!(snapshot.stage_status("BLOC1"), Some(StageStatus::Completed));
        assert_eq!(snapshot.stage_status("BLOC2"), Some(StageStatus::Pending));
        assert!((snapshot.progress_percent - 50.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.completed_results().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_independent_of_later_writes() {
        let store = store_with_session().await;
        let before = store.snapshot("s1").await.unwrap();

        store.mark("s1", "BLOC2", StageUpdate::Running).await.unwrap();

        assert_eq!(before.stage_status("BLOC2"), Some(StageStatus::Pending));
        assert_eq!(
            store.snapshot("s1").await.unwrap().stage_status("BLOC2"),
            Some(StageStatus::Running)
        );
    }

    #[tokio::test]
    async fn test_mark_rejects_backward_transition() {
        let store = store_with_session().await;
        store.mark("s1", "BLOC1", StageUpdate::Running).await.unwrap();
        store
            .mark("s1", "BLOC1", StageUpdate::Completed(result("BLOC1")))
            .await
            .unwrap();

        let err = store.mark("s1", "BLOC1", StageUpdate::Running).await.unwrap_err();
        assert!(matches!(err, ProgressError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_mark_unknown_session_and_stage() {
        let store = store_with_session().await;
        assert_eq!(
            store.mark("nope", "BLOC1", StageUpdate::Running).await.unwrap_err(),
            ProgressError::SessionNotFound("nope".to_string())
        );
        assert!(matches!(
            store.mark("s1", "BLOC9", StageUpdate::Running).await.unwrap_err(),
            ProgressError::UnknownStage { .. }
        ));
    }

    #[tokio::test]
    async fn test_finalize_freezes_session() {
        let store = store_with_session().await;
        store.mark("s1", "BLOC1", StageUpdate::Running).await.unwrap();
        store
            .mark(
                "s1",
                "BLOC1",
                StageUpdate::Failed(FailureRecord::new("BLOC1", "remote failure")),
            )
            .await
            .unwrap();
        store
            .finalize("s1", SessionStatus::CompletedWithErrors)
            .await
            .unwrap();

        let snapshot = store.snapshot("s1").await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::CompletedWithErrors);
        assert!(snapshot.finished_at.is_some());
        assert_eq!(snapshot.failures()[0].stage, "BLOC1");

        assert_eq!(
            store.finalize("s1", SessionStatus::Completed).await.unwrap_err(),
            ProgressError::AlreadyFinalized("s1".to_string())
        );
        assert_eq!(
            store.mark("s1", "BLOC2", StageUpdate::Running).await.unwrap_err(),
            ProgressError::AlreadyFinalized("s1".to_string())
        );
    }

    #[tokio::test]
    async fn test_remove_and_list() {
        let store = store_with_session().await;
        store
            .create("s0", Arc::new(Questionnaire::default()), &stages())
            .await
            .unwrap();
        assert_eq!(store.session_ids().await, vec!["s0", "s1"]);

        let removed = store.remove("s1").await.unwrap();
        assert_eq!(removed.session_id, "s1");
        assert!(store.snapshot("s1").await.is_err());
        assert!(store.remove("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_marks() {
        let store = Arc::new(InMemoryProgressStore::new());
        let ids: Vec<String> = (0..16).map(|i| format!("S{i}")).collect();
        store
            .create("s1", Arc::new(Questionnaire::default()), &ids)
            .await
            .unwrap();

        let handles: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.mark("s1", &id, StageUpdate::Running).await.unwrap();
                    store.mark("s1", &id, StageUpdate::Completed(result(&id))).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = store.snapshot("s1").await.unwrap();
        assert!((snapshot.progress_percent - 100.0).abs() < f64::EPSILON);
    }
}
