use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub updated_at: String,
    pub last_ok: Option<String>,
    pub last_error: Option<String>,
    pub restart_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub pid: u32,
    pub updated_at: String,
    pub uptime_seconds: u64,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Component status board owned by one gateway instance.
#[derive(Debug)]
pub struct HealthRegistry {
    started_at: Instant,
    components: Mutex<BTreeMap<String, ComponentHealth>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            components: Mutex::new(BTreeMap::new()),
        }
    }

    fn upsert_component<F>(&self, component: &str, update: F)
    where
        F: FnOnce(&mut ComponentHealth),
    {
        let mut map = self.components.lock();
        let now = now_rfc3339();
        let entry = map
            .entry(component.to_string())
            .or_insert_with(|| ComponentHealth {
                status: "starting".into(),
                updated_at: now.clone(),
                last_ok: None,
                last_error: None,
                restart_count: 0,
            });
        update(entry);
        entry.updated_at = now;
    }

    pub fn mark_component_ok(&self, component: &str) {
        self.upsert_component(component, |entry| {
            entry.status = "ok".into();
            entry.last_ok = Some(now_rfc3339());
            entry.last_error = None;
        });
    }

    #[allow(clippy::needless_pass_by_value)]
    pub fn mark_component_error(&self, component: &str, error: impl ToString) {
        let err = error.to_string();
        self.upsert_component(component, move |entry| {
            entry.status = "error".into();
            entry.last_error = Some(err);
        });
    }

    pub fn bump_component_restart(&self, component: &str) {
        self.upsert_component(component, |entry| {
            entry.restart_count = entry.restart_count.saturating_add(1);
        });
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let components = self.components.lock().clone();
        let status = if components.values().any(|c| c.status == "error") {
            "degraded"
        } else {
            "ok"
        };
        HealthSnapshot {
            status,
            pid: std::process::id(),
            updated_at: now_rfc3339(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            components,
        }
    }

    pub fn snapshot_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or_else(|_| {
            serde_json::json!({
                "status": "error",
                "message": "failed to serialize health snapshot"
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_component_starts_ok_after_mark() {
        let health = HealthRegistry::new();
        health.mark_component_ok("gateway");
        let snap = health.snapshot();
        assert_eq!(snap.status, "ok");
        let gateway = &snap.components["gateway"];
        assert_eq!(gateway.status, "ok");
        assert!(gateway.last_ok.is_some());
        assert_eq!(gateway.restart_count, 0);
    }

    #[test]
    fn error_then_ok_clears_last_error() {
        let health = HealthRegistry::new();
        health.mark_component_error("channel:telegram", "poll failed");
        assert_eq!(health.snapshot().status, "degraded");
        assert_eq!(
            health.snapshot().components["channel:telegram"]
                .last_error
                .as_deref(),
            Some("poll failed")
        );

        health.mark_component_ok("channel:telegram");
        let snap = health.snapshot();
        assert_eq!(snap.status, "ok");
        assert!(snap.components["channel:telegram"].last_error.is_none());
    }

    #[test]
    fn restarts_accumulate() {
        let health = HealthRegistry::new();
        health.bump_component_restart("channel:cli");
        health.bump_component_restart("channel:cli");
        assert_eq!(health.snapshot().components["channel:cli"].restart_count, 2);
    }

    #[test]
    fn registries_are_independent() {
        let a = HealthRegistry::new();
        let b = HealthRegistry::new();
        a.mark_component_error("x", "boom");
        assert!(b.snapshot().components.is_empty());
    }

    #[test]
    fn snapshot_json_has_expected_shape() {
        let health = HealthRegistry::new();
        health.mark_component_ok("gateway");
        let json = health.snapshot_json();
        assert_eq!(json["status"], "ok");
        assert!(json["pid"].as_u64().is_some());
        assert!(json["uptime_seconds"].as_u64().is_some());
        assert_eq!(json["components"]["gateway"]["status"], "ok");
    }
}
