//! Plan difference computation.
//!
//! A [`PlanDiff`] is the auditable change record attached to every replan:
//! which features were added or removed (keyed by id) and which fields of
//! the surviving features changed.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use super::{FeatureId, Plan};

/// One field-level modification of a feature that exists in both plans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanChange {
    /// Feature the change applies to.
    pub id: FeatureId,
    /// Field name as it appears in the plan file.
    pub field: String,
    /// Value before the change.
    pub old_value: String,
    /// Value after the change.
    pub new_value: String,
}

impl fmt::Display for PlanChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}: {:?} -> {:?}",
            self.id, self.field, self.old_value, self.new_value
        )
    }
}

/// Difference between two plan lists.
///
/// # Example
///
/// ```
/// use ratchet::plan::{compute_diff, Plan};
///
/// let old = vec![Plan::new(1, "A"), Plan::new(2, "B")];
/// let new = vec![Plan::new(1, "A2"), Plan::new(3, "C")];
///
/// let diff = compute_diff(&old, &new);
/// assert_eq!(diff.added.len(), 1);
/// assert_eq!(diff.removed.len(), 1);
/// assert_eq!(diff.modified[0].field, "description");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanDiff {
    /// Features present only in the new plan, in new-plan order.
    pub added: Vec<Plan>,
    /// Features present only in the old plan, in old-plan order.
    pub removed: Vec<Plan>,
    /// Field changes on features present in both, in new-plan order.
    pub modified: Vec<PlanChange>,
}

impl PlanDiff {
    /// True when the two plans are equivalent on every tracked field.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Total number of recorded changes.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    /// Ids of features with at least one field change.
    #[must_use]
    pub fn modified_ids(&self) -> Vec<FeatureId> {
        let mut seen = HashSet::new();
        self.modified
            .iter()
            .filter(|c| seen.insert(c.id))
            .map(|c| c.id)
            .collect()
    }

    /// One-line human readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no changes".to_string();
        }

        let mut parts = Vec::new();
        if !self.added.is_empty() {
            parts.push(format!("+{} added", self.added.len()));
        }
        if !self.removed.is_empty() {
            parts.push(format!("-{} removed", self.removed.len()));
        }
        if !self.modified.is_empty() {
            parts.push(format!(
                "~{} field changes on {} features",
                self.modified.len(),
                self.modified_ids().len()
            ));
        }
        parts.join(", ")
    }
}

impl fmt::Display for PlanDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary())?;
        for plan in &self.added {
            writeln!(f, "  + #{} {}", plan.id, plan.description)?;
        }
        for plan in &self.removed {
            writeln!(f, "  - #{} {}", plan.id, plan.description)?;
        }
        for change in &self.modified {
            writeln!(f, "  ~ {}", change)?;
        }
        Ok(())
    }
}

/// Compute the difference between an old and a new plan list.
///
/// Steps are compared by content but summarized as counts in the change
/// record. Fields not listed here (including unknown collaborator fields)
/// are not tracked.
#[must_use]
pub fn compute_diff(old: &[Plan], new: &[Plan]) -> PlanDiff {
    let old_by_id: HashMap<FeatureId, &Plan> = old.iter().map(|p| (p.id, p)).collect();
    let new_ids: HashSet<FeatureId> = new.iter().map(|p| p.id).collect();

    let mut diff = PlanDiff::default();

    for plan in new {
        match old_by_id.get(&plan.id) {
            Some(previous) => diff.modified.extend(field_changes(previous, plan)),
            None => diff.added.push(plan.clone()),
        }
    }

    diff.removed = old
        .iter()
        .filter(|p| !new_ids.contains(&p.id))
        .cloned()
        .collect();

    diff
}

fn field_changes(old: &Plan, new: &Plan) -> Vec<PlanChange> {
    let mut changes = Vec::new();
    let id = new.id;

    record(&mut changes, id, "description", &old.description, &new.description);
    record(&mut changes, id, "category", &old.category, &new.category);
    record(
        &mut changes,
        id,
        "tested",
        &old.tested.to_string(),
        &new.tested.to_string(),
    );
    record(
        &mut changes,
        id,
        "deferred",
        &old.deferred.to_string(),
        &new.deferred.to_string(),
    );

    if old.steps != new.steps {
        // Same count with different content still needs a visible record.
        let mut new_summary = format!("{} steps", new.steps.len());
        if old.steps.len() == new.steps.len() {
            new_summary.push_str(" (reworded)");
        }
        changes.push(PlanChange {
            id,
            field: "steps".to_string(),
            old_value: format!("{} steps", old.steps.len()),
            new_value: new_summary,
        });
    }

    record(
        &mut changes,
        id,
        "expected_output",
        &old.expected_output,
        &new.expected_output,
    );
    record(&mut changes, id, "milestone", &old.milestone, &new.milestone);

    changes
}

fn record(changes: &mut Vec<PlanChange>, id: FeatureId, field: &str, old: &str, new: &str) {
    if old != new {
        changes.push(PlanChange {
            id,
            field: field.to_string(),
            old_value: old.to_string(),
            new_value: new.to_string(),
        });
    }
}
