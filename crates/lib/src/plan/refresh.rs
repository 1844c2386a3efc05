use tracing::{info, warn};

use super::{PlanError, StateDrift};
use crate::provider::{Provider, Providers, RetryConfig, public_attributes, with_retry};
use crate::state::StateSnapshot;

/// Read every recorded resource from its provider and report how the live
/// resources differ from the snapshot.
///
/// Only non-sensitive inputs are compared; providers never report secrets
/// back. The snapshot itself is left untouched.
pub async fn refresh(
  state: &StateSnapshot,
  providers: &Providers,
  retry: &RetryConfig,
) -> Result<Vec<StateDrift>, PlanError> {
  let mut drift = Vec::new();

  for (id, recorded) in &state.resources {
    let provider = providers.for_kind(recorded.kind);
    let provider: &dyn Provider = provider.as_ref();
    let operation = format!("read {id}");

    let live = with_retry(retry, &operation, || provider.read(id, recorded))
      .await
      .map_err(|source| PlanError::Refresh {
        node: id.clone(),
        source,
      })?;

    let Some(live) = live else {
      warn!(node = %id, kind = %recorded.kind, "resource deleted outside of infragraph");
      drift.push(StateDrift::Deleted { node: id.clone() });
      continue;
    };

    let attributes: Vec<(String, serde_json::Value)> = public_attributes(&recorded.inputs)
      .into_iter()
      .filter_map(|(name, expected)| match live.attributes.get(&name) {
        Some(actual) if *actual != expected => Some((name, actual.clone())),
        _ => None,
      })
      .collect();

    if !attributes.is_empty() {
      warn!(
        node = %id,
        attributes = ?attributes.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
        "resource changed outside of infragraph"
      );
      drift.push(StateDrift::Modified {
        node: id.clone(),
        attributes,
      });
    }
  }

  info!(resources = state.resources.len(), drifted = drift.len(), "state refreshed");
  Ok(drift)
}
