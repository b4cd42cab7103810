//! Service selection.
//!
//! `select` is a pure function of its inputs: the same requirement,
//! preferences, exclusions, and snapshot always yield the same service.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use weave_core::types::{Capability, HealthStatus, ServiceDescriptor};

/// Pick the service that should run a task with the given requirement.
///
/// Excluded and offline services are discarded first. A preferred service
/// that survives and covers at least one required capability wins outright
/// (preferences are tried in order). Otherwise candidates are ranked by
/// matching capability count, then priority (higher first), then name.
/// Returns `None` when no candidate overlaps the requirement at all.
pub fn select<'a>(
    required: &BTreeSet<Capability>,
    preferences: &[String],
    exclusions: &[String],
    snapshot: &'a [ServiceDescriptor],
) -> Option<&'a ServiceDescriptor> {
    let candidates: Vec<&ServiceDescriptor> = snapshot
        .iter()
        .filter(|s| !exclusions.iter().any(|e| e == &s.name))
        .filter(|s| s.status != HealthStatus::Offline)
        .collect();

    for preferred in preferences {
        if let Some(svc) = candidates
            .iter()
            .find(|s| &s.name == preferred && s.overlap(required) > 0)
        {
            return Some(svc);
        }
    }

    candidates
        .into_iter()
        .map(|s| (s, s.overlap(required)))
        .filter(|(_, overlap)| *overlap > 0)
        .min_by(|(a, oa), (b, ob)| rank(a, *oa, b, *ob))
        .map(|(s, _)| s)
}

fn rank(a: &ServiceDescriptor, oa: usize, b: &ServiceDescriptor, ob: usize) -> Ordering {
    ob.cmp(&oa)
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.name.cmp(&b.name))
}
