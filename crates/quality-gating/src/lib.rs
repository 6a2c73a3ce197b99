//! User-controlled quality gating: analysts decide when data is ready for
//! analysis. Rules are evaluated against live metrics; a rule fails when
//! its predicate is violated. Failed blocking rules block the component
//! outright, failed warning rules only annotate it. Approvals snapshot a
//! DataVersion and expire on a clock.

use chrono::{Duration, Utc};
use data_versioning::VersionManager;
use screener_core::{
    Component, GateStatus, QualityGateRecord, QualityRule, RuleOperator, ScreenerError,
};
use serde_json::json;
use std::collections::BTreeMap;
use store::Database;

/// Live metrics a component is judged on.
#[derive(Debug, Clone)]
pub struct ComponentMetricsSnapshot {
    pub data_quality_score: f64,
    pub data_freshness_hours: f64,
    pub record_count: i64,
}

/// Evaluation outcome for one (symbol, component).
#[derive(Debug, Clone)]
pub struct ComponentQualityStatus {
    pub symbol: String,
    pub component: Component,
    pub quality_score: f64,
    pub data_freshness_hours: f64,
    pub record_count: i64,
    pub blocking_failures: Vec<String>,
    pub warnings: Vec<String>,
    pub gate_status: GateStatus,
    pub latest_gate: Option<QualityGateRecord>,
}

/// Admission-control decision.
#[derive(Debug, Clone)]
pub struct AdmissionDecision {
    pub symbol: String,
    pub allowed: bool,
    pub blocking_components: Vec<Component>,
    pub warning_components: Vec<Component>,
    pub details: BTreeMap<&'static str, ComponentQualityStatus>,
}

/// Default rule set; overridable from the quality_gate_rules table.
pub fn default_rules() -> Vec<QualityRule> {
    vec![
        QualityRule {
            component: Component::Fundamentals,
            metric: "data_quality_score".to_string(),
            threshold: 0.7,
            operator: RuleOperator::Gte,
            blocks_analysis: true,
            description: "Fundamental data quality must be >= 70%".to_string(),
        },
        QualityRule {
            component: Component::PriceData,
            metric: "data_freshness_hours".to_string(),
            threshold: 48.0,
            operator: RuleOperator::Lte,
            blocks_analysis: true,
            description: "Price data must be <= 48 hours old".to_string(),
        },
        QualityRule {
            component: Component::NewsData,
            metric: "record_count".to_string(),
            threshold: 3.0,
            operator: RuleOperator::Gte,
            blocks_analysis: false,
            description: "News data should have >= 3 articles".to_string(),
        },
        QualityRule {
            component: Component::SentimentData,
            metric: "data_quality_score".to_string(),
            threshold: 0.6,
            operator: RuleOperator::Gte,
            blocks_analysis: false,
            description: "Sentiment quality should be >= 60%".to_string(),
        },
    ]
}

pub struct QualityGatingEngine {
    db: Database,
    versions: VersionManager,
    rules: Vec<QualityRule>,
}

impl QualityGatingEngine {
    pub fn new(db: Database, versions: VersionManager) -> Self {
        Self {
            db,
            versions,
            rules: default_rules(),
        }
    }

    pub fn with_rules(mut self, rules: Vec<QualityRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Construct with the persisted rule set, seeding the defaults into
    /// the store on first run.
    pub async fn from_store(db: Database, versions: VersionManager) -> Result<Self, ScreenerError> {
        let mut rules = db.load_quality_rules().await?;
        if rules.is_empty() {
            rules = default_rules();
            for rule in &rules {
                db.upsert_quality_rule(rule).await?;
            }
            tracing::info!("seeded {} default quality rules", rules.len());
        }
        Ok(Self {
            db,
            versions,
            rules,
        })
    }

    pub fn rules(&self) -> &[QualityRule] {
        &self.rules
    }

    /// Live metrics per component, read through the versioned store.
    /// Absent data reports zero quality, 999h freshness, zero records.
    async fn component_metrics(
        &self,
        symbol: &str,
        component: Component,
    ) -> Result<ComponentMetricsSnapshot, ScreenerError> {
        let mut metrics = ComponentMetricsSnapshot {
            data_quality_score: 0.0,
            data_freshness_hours: 999.0,
            record_count: 0,
        };

        match component {
            Component::Fundamentals => {
                let versioned = self.versions.versioned_fundamentals(symbol, None).await?;
                if let Some(snapshot) = versioned.payload {
                    metrics.record_count = 1;
                    metrics.data_freshness_hours =
                        versioned.info.age_days.unwrap_or(999.0) * 24.0;
                    metrics.data_quality_score =
                        (snapshot.quality_score * versioned.info.quality_score).clamp(0.0, 1.0);
                }
            }
            Component::PriceData => {
                let versioned = self.versions.versioned_price(symbol, None).await?;
                if let Some(bar) = versioned.payload {
                    metrics.record_count = self.db.price_bar_count(symbol).await?;
                    metrics.data_freshness_hours =
                        versioned.info.age_days.unwrap_or(999.0) * 24.0;
                    metrics.data_quality_score =
                        (bar.quality_score * versioned.info.quality_score).clamp(0.0, 1.0);
                }
            }
            Component::NewsData => {
                let versioned = self.versions.versioned_news(symbol, 30, None).await?;
                if let Some(aggregate) = versioned.payload {
                    metrics.record_count = aggregate.article_count as i64;
                    metrics.data_freshness_hours =
                        versioned.info.age_days.unwrap_or(999.0) * 24.0;
                    // Coverage saturates at ten articles
                    let coverage = (aggregate.article_count as f64 / 10.0).min(0.9);
                    metrics.data_quality_score =
                        (coverage * versioned.info.quality_score).clamp(0.0, 1.0);
                }
            }
            Component::SentimentData => {
                let versioned = self.versions.versioned_sentiment(symbol, None).await?;
                if let Some(daily) = versioned.payload {
                    metrics.record_count = self.db.sentiment_count(symbol).await?;
                    metrics.data_freshness_hours =
                        versioned.info.age_days.unwrap_or(999.0) * 24.0;
                    let coverage = (metrics.record_count as f64 / 30.0)
                        .min(0.8)
                        .max(daily.quality_score * 0.8);
                    metrics.data_quality_score =
                        (coverage * versioned.info.quality_score).clamp(0.0, 1.0);
                }
            }
        }
        Ok(metrics)
    }

    fn metric_value(metrics: &ComponentMetricsSnapshot, name: &str) -> Option<f64> {
        match name {
            "data_quality_score" => Some(metrics.data_quality_score),
            "data_freshness_hours" => Some(metrics.data_freshness_hours),
            "record_count" => Some(metrics.record_count as f64),
            _ => None,
        }
    }

    /// Evaluate every applicable rule. A rule FAILS when its predicate is
    /// violated; blocking failures and warnings are kept separate.
    fn evaluate_rules(
        &self,
        component: Component,
        metrics: &ComponentMetricsSnapshot,
    ) -> (Vec<String>, Vec<String>) {
        let mut blocking = Vec::new();
        let mut warnings = Vec::new();
        for rule in &self.rules {
            if rule.component != component {
                continue;
            }
            let Some(value) = Self::metric_value(metrics, &rule.metric) else {
                tracing::warn!("rule references unknown metric {:?}", rule.metric);
                continue;
            };
            if !rule.operator.holds(value, rule.threshold) {
                if rule.blocks_analysis {
                    blocking.push(rule.description.clone());
                } else {
                    warnings.push(rule.description.clone());
                }
            }
        }
        (blocking, warnings)
    }

    /// Quality status for one (symbol, component) pair.
    pub async fn evaluate_component(
        &self,
        symbol: &str,
        component: Component,
    ) -> Result<ComponentQualityStatus, ScreenerError> {
        let metrics = self.component_metrics(symbol, component).await?;
        let (blocking, warnings) = self.evaluate_rules(component, &metrics);
        let latest_gate = self.db.latest_gate(symbol, component).await?;

        let gate_status = if !blocking.is_empty() {
            GateStatus::Blocked
        } else {
            match &latest_gate {
                Some(gate) if gate.status == GateStatus::Approved => {
                    match gate.expires_at {
                        Some(expiry) if Utc::now() > expiry => GateStatus::Expired,
                        _ => GateStatus::Approved,
                    }
                }
                Some(gate) if gate.status == GateStatus::Rejected => GateStatus::Rejected,
                _ => GateStatus::Pending,
            }
        };

        Ok(ComponentQualityStatus {
            symbol: symbol.to_string(),
            component,
            quality_score: metrics.data_quality_score,
            data_freshness_hours: metrics.data_freshness_hours,
            record_count: metrics.record_count,
            blocking_failures: blocking,
            warnings,
            gate_status,
            latest_gate,
        })
    }

    /// Quality status across all four components.
    pub async fn evaluate_symbol(
        &self,
        symbol: &str,
    ) -> Result<BTreeMap<&'static str, ComponentQualityStatus>, ScreenerError> {
        let mut statuses = BTreeMap::new();
        for component in Component::ALL {
            statuses.insert(
                component.as_str(),
                self.evaluate_component(symbol, component).await?,
            );
        }
        Ok(statuses)
    }

    fn new_gate_id(symbol: &str, component: Component) -> String {
        format!(
            "{symbol}_{}_{}",
            component.as_str(),
            Utc::now().timestamp_micros()
        )
    }

    /// Open an approval request. A component failing a blocking rule is
    /// recorded as BLOCKED immediately.
    pub async fn request_approval(
        &self,
        symbol: &str,
        component: Component,
        requested_by: &str,
    ) -> Result<QualityGateRecord, ScreenerError> {
        let status = self.evaluate_component(symbol, component).await?;
        let now = Utc::now();
        let gate = if status.gate_status == GateStatus::Blocked {
            QualityGateRecord {
                gate_id: Self::new_gate_id(symbol, component),
                symbol: symbol.to_string(),
                component,
                status: GateStatus::Blocked,
                quality_score: status.quality_score,
                approval_timestamp: None,
                approved_by: None,
                expires_at: None,
                blocking_rules: status.blocking_failures.clone(),
                metadata: json!({ "auto_blocked": true }),
                created_at: now,
                updated_at: now,
            }
        } else {
            QualityGateRecord {
                gate_id: Self::new_gate_id(symbol, component),
                symbol: symbol.to_string(),
                component,
                status: GateStatus::Pending,
                quality_score: status.quality_score,
                approval_timestamp: None,
                approved_by: None,
                expires_at: None,
                blocking_rules: Vec::new(),
                metadata: json!({ "requested_by": requested_by }),
                created_at: now,
                updated_at: now,
            }
        };
        self.db.save_gate(&gate).await?;
        Ok(gate)
    }

    /// Approve a component for analysis. Fails with `GateBlocked` when a
    /// blocking rule currently fails; on success the gate row and the
    /// DataVersion snapshot swap are written together, deactivating the
    /// previously active version.
    pub async fn approve_component(
        &self,
        symbol: &str,
        component: Component,
        approved_by: &str,
        duration_hours: i64,
    ) -> Result<QualityGateRecord, ScreenerError> {
        let status = self.evaluate_component(symbol, component).await?;
        if status.gate_status == GateStatus::Blocked {
            return Err(ScreenerError::GateBlocked(format!(
                "cannot approve {}/{}: {}",
                symbol,
                component.as_str(),
                status.blocking_failures.join("; ")
            )));
        }

        let now = Utc::now();
        let expires_at = now + Duration::hours(duration_hours);
        let gate_id = status
            .latest_gate
            .as_ref()
            .filter(|g| g.status == GateStatus::Pending)
            .map(|g| g.gate_id.clone())
            .unwrap_or_else(|| Self::new_gate_id(symbol, component));

        let gate = QualityGateRecord {
            gate_id,
            symbol: symbol.to_string(),
            component,
            status: GateStatus::Approved,
            quality_score: status.quality_score,
            approval_timestamp: Some(now),
            approved_by: Some(approved_by.to_string()),
            expires_at: Some(expires_at),
            blocking_rules: Vec::new(),
            metadata: json!({
                "approval_duration_hours": duration_hours,
                "quality_at_approval": status.quality_score,
            }),
            created_at: now,
            updated_at: now,
        };
        self.db.save_gate(&gate).await?;

        // Snapshot the approved dataset; the previous active version for
        // this pair is deactivated in the same transaction
        let version = screener_core::DataVersionRecord {
            version_id: format!(
                "{symbol}_{}_v_{}",
                component.as_str(),
                now.timestamp_micros()
            ),
            symbol: symbol.to_string(),
            component,
            data_snapshot: json!({
                "component": component.as_str(),
                "quality_score": status.quality_score,
                "record_count": status.record_count,
                "snapshot_timestamp": now.to_rfc3339(),
            }),
            approval_gate_id: Some(gate.gate_id.clone()),
            created_at: now,
            approved_at: Some(now),
            expires_at: Some(expires_at),
            is_active: true,
        };
        self.db.activate_version(&version).await?;

        tracing::info!(
            "approved {}/{} until {}",
            symbol,
            component.as_str(),
            expires_at
        );
        Ok(gate)
    }

    pub async fn reject_component(
        &self,
        symbol: &str,
        component: Component,
        rejected_by: &str,
        reason: &str,
    ) -> Result<QualityGateRecord, ScreenerError> {
        let status = self.evaluate_component(symbol, component).await?;
        let now = Utc::now();
        let gate = QualityGateRecord {
            gate_id: Self::new_gate_id(symbol, component),
            symbol: symbol.to_string(),
            component,
            status: GateStatus::Rejected,
            quality_score: status.quality_score,
            approval_timestamp: None,
            approved_by: None,
            expires_at: None,
            blocking_rules: Vec::new(),
            metadata: json!({
                "rejected_by": rejected_by,
                "rejection_reason": reason,
            }),
            created_at: now,
            updated_at: now,
        };
        self.db.save_gate(&gate).await?;
        Ok(gate)
    }

    /// Admission control: analysis is allowed iff every required component
    /// holds a live approval and nothing is blocked or rejected.
    pub async fn is_analysis_allowed(
        &self,
        symbol: &str,
        required_components: &[Component],
    ) -> Result<AdmissionDecision, ScreenerError> {
        let mut allowed = true;
        let mut blocking_components = Vec::new();
        let mut warning_components = Vec::new();
        let mut details = BTreeMap::new();

        for component in required_components {
            let status = self.evaluate_component(symbol, *component).await?;
            match status.gate_status {
                GateStatus::Blocked | GateStatus::Rejected => {
                    allowed = false;
                    blocking_components.push(*component);
                }
                GateStatus::Pending | GateStatus::Expired => {
                    allowed = false;
                    warning_components.push(*component);
                }
                GateStatus::Approved => {}
            }
            details.insert(component.as_str(), status);
        }

        tracing::info!("analysis allowed for {}: {}", symbol, allowed);
        Ok(AdmissionDecision {
            symbol: symbol.to_string(),
            allowed,
            blocking_components,
            warning_components,
            details,
        })
    }

    /// Background sweep: expire overdue approvals and deactivate their
    /// data versions. Returns (gates swept, versions deactivated).
    pub async fn sweep_expired(&self) -> Result<(u64, u64), ScreenerError> {
        let now = Utc::now();
        let gates = self.db.expire_approved_gates(now).await?;
        let versions = self.db.deactivate_expired_versions(now).await?;
        if gates > 0 {
            tracing::info!("expired {} quality gates", gates);
        }
        Ok((gates, versions))
    }

    /// Per-symbol evaluation loop; one failure never aborts the siblings.
    pub async fn bulk_evaluate(
        &self,
        symbols: &[String],
    ) -> BTreeMap<String, Result<BTreeMap<&'static str, ComponentQualityStatus>, ScreenerError>>
    {
        let mut results = BTreeMap::new();
        for symbol in symbols {
            let outcome = self.evaluate_symbol(symbol).await;
            if let Err(e) = &outcome {
                tracing::warn!("bulk evaluation failed for {}: {}", symbol, e);
            }
            results.insert(symbol.clone(), outcome);
        }
        results
    }

    /// Per-pair approval loop with the same isolation property.
    pub async fn bulk_approve(
        &self,
        approvals: &[(String, Component)],
        approved_by: &str,
        duration_hours: i64,
    ) -> BTreeMap<String, Result<QualityGateRecord, ScreenerError>> {
        let mut results = BTreeMap::new();
        for (symbol, component) in approvals {
            let key = format!("{symbol}_{}", component.as_str());
            let outcome = self
                .approve_component(symbol, *component, approved_by, duration_hours)
                .await;
            if let Err(e) = &outcome {
                tracing::warn!("bulk approval failed for {key}: {e}");
            }
            results.insert(key, outcome);
        }
        results
    }

    /// Gate counts grouped by component and status.
    pub async fn gate_summary(
        &self,
        symbol: Option<&str>,
    ) -> Result<BTreeMap<String, i64>, ScreenerError> {
        let rows = self.db.gate_status_counts(symbol).await?;
        let mut summary = BTreeMap::new();
        for (component, status, count) in rows {
            *summary.entry(format!("{component}:{status}")).or_default() += count;
        }
        Ok(summary)
    }
}
