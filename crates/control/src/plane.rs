// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The control plane proper.

use crate::dashboard::DashboardJob;
use crate::ring::EventRing;
use crate::ControlError;
use ep_core::{EngineEvent, Job, JobId, JobState, Worker};
use ep_engine::{CancelAck, Engine};
use ep_recipes::{build_plan, Catalog, PlanOptions, Recipe};
use ep_storage::{Preferences, PrefsStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// What a launch (or retry) hands back to the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchReceipt {
    pub job_id: JobId,
    pub preset_id: String,
    pub state: JobState,
    pub input: Value,
}

/// Partial preferences update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrefsPatch {
    #[serde(default)]
    pub recipe_defaults: Option<HashMap<String, Map<String, Value>>>,
    #[serde(default)]
    pub worker_concurrency: Option<HashMap<Worker, u32>>,
}

/// Front-end surface: recipes, jobs, dashboard, preferences, events.
pub struct ControlPlane {
    engine: Engine,
    catalog: Catalog,
    prefs_store: PrefsStore,
    prefs: Mutex<Preferences>,
    ring: Arc<Mutex<EventRing>>,
}

impl ControlPlane {
    /// Wire the control plane to a running engine and start collecting
    /// events into the ring buffer.
    pub fn new(engine: Engine, catalog: Catalog, prefs_store: PrefsStore) -> Arc<Self> {
        let prefs = prefs_store.load();
        let ring = Arc::new(Mutex::new(EventRing::default()));

        let plane = Arc::new(Self {
            engine,
            catalog,
            prefs_store,
            prefs: Mutex::new(prefs),
            ring: Arc::clone(&ring),
        });

        let mut events = plane.engine.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => ring.lock().push(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(dropped = n, "event ring lagged behind the engine");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        plane
    }

    // -- recipes --

    /// Recipes available for launch, in catalog order.
    pub fn recipes_list(&self) -> Vec<&Recipe> {
        self.catalog.iter().collect()
    }

    /// Launch a recipe: saved per-recipe defaults merge under the user
    /// input, the catalog compiles a plan, the engine takes it from there.
    pub async fn launch_recipe(
        &self,
        recipe_id: &str,
        input: Map<String, Value>,
        options: PlanOptions,
    ) -> Result<LaunchReceipt, ControlError> {
        let recipe = self.catalog.require(recipe_id)?;

        let mut effective = self
            .prefs
            .lock()
            .recipe_defaults
            .get(recipe_id)
            .cloned()
            .unwrap_or_default();
        for (key, value) in input {
            effective.insert(key, value);
        }

        let plan = build_plan(recipe, &effective, options)?;
        let job = self.engine.submit(plan).await?;
        tracing::info!(recipe = recipe_id, job = %job.job_id, "recipe launched");

        Ok(LaunchReceipt {
            job_id: job.job_id.clone(),
            preset_id: job.preset_id.clone(),
            state: job.state,
            input: job.input,
        })
    }

    // -- jobs --

    pub async fn jobs_list(&self) -> Vec<Job> {
        self.engine.jobs().await
    }

    pub async fn jobs_get(&self, job_id: &JobId) -> Option<Job> {
        self.engine.job(job_id).await
    }

    pub async fn jobs_cancel(&self, job_id: &JobId) -> CancelAck {
        self.engine.cancel(job_id).await
    }

    /// Re-launch a job's recipe with the job's last input.
    pub async fn jobs_retry(&self, job_id: &JobId) -> Result<LaunchReceipt, ControlError> {
        let job = self
            .engine
            .job(job_id)
            .await
            .ok_or_else(|| ControlError::JobNotFound(job_id.to_string()))?;

        let input = match &job.input {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => return Err(ControlError::BadJobInput(job_id.to_string())),
        };

        let options = PlanOptions {
            retry_of: Some(job_id.to_string()),
            ..PlanOptions::default()
        };
        // The retry launches the recipe as saved in the catalog; the job's
        // input already contains the original merge.
        let recipe = self.catalog.require(&job.preset_id)?;
        let plan = build_plan(recipe, &input, options)?;
        let retried = self.engine.submit(plan).await?;
        tracing::info!(retry_of = %job_id, job = %retried.job_id, "job retried");

        Ok(LaunchReceipt {
            job_id: retried.job_id.clone(),
            preset_id: retried.preset_id.clone(),
            state: retried.state,
            input: retried.input,
        })
    }

    // -- dashboard --

    /// Snapshot of every known job, newest first.
    pub async fn dashboard_snapshot(&self) -> Vec<DashboardJob> {
        let mut rows: Vec<DashboardJob> = self
            .engine
            .jobs()
            .await
            .iter()
            .map(DashboardJob::from_job)
            .collect();
        rows.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        rows
    }

    // -- preferences --

    pub fn preferences(&self) -> Preferences {
        self.prefs.lock().clone()
    }

    /// Merge a patch per field, persist atomically, and re-apply worker
    /// concurrency to the engine.
    pub async fn update_preferences(&self, patch: PrefsPatch) -> Result<Preferences, ControlError> {
        let updated = {
            let mut prefs = self.prefs.lock();
            if let Some(defaults) = patch.recipe_defaults {
                for (recipe_id, values) in defaults {
                    prefs.recipe_defaults.insert(recipe_id, values);
                }
            }
            if let Some(concurrency) = patch.worker_concurrency {
                for (worker, limit) in concurrency {
                    prefs.worker_concurrency.insert(worker, limit.max(1));
                }
            }
            prefs.clone()
        };

        self.prefs_store.save(&updated)?;
        self.engine
            .set_concurrency(updated.worker_concurrency.clone())
            .await;
        Ok(updated)
    }

    // -- events --

    /// Live engine event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.engine.subscribe()
    }

    /// Recent events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<EngineEvent> {
        self.ring.lock().recent(limit)
    }

    /// Recent events for one job, oldest first.
    pub fn events_for_job(&self, job_id: &JobId) -> Vec<EngineEvent> {
        self.ring.lock().for_job(job_id)
    }
}

#[cfg(test)]
#[path = "plane_tests.rs"]
mod tests;
