//! Passwords generated by the engine itself.
//!
//! A `random_password` node never leaves the process: its result is drawn
//! from the operating system's CSPRNG and persisted in the state snapshot, so
//! later plans see the same value.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rand::RngCore;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;

use super::{Provider, ProviderError, ProvisioningState, RemoteResource, ResourceRequest, public_attributes};
use crate::consts::MIN_PASSWORD_LENGTH;
use crate::resource::{NodeId, ResourceKind};
use crate::state::ResourceState;
use crate::value::Value;

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const NUMERIC: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!#$%&*()-_=+[]{}<>:?";

/// Character requirements for a generated password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
  pub length: usize,
  pub special: bool,
  pub min_upper: usize,
  pub min_lower: usize,
  pub min_numeric: usize,
  pub min_special: usize,
}

impl Default for PasswordPolicy {
  fn default() -> Self {
    Self {
      length: 24,
      special: true,
      min_upper: 2,
      min_lower: 2,
      min_numeric: 2,
      min_special: 2,
    }
  }
}

impl PasswordPolicy {
  /// Read the policy from a node's inputs.
  pub fn from_inputs(inputs: &BTreeMap<String, Value>) -> Result<Self, ProviderError> {
    let count = |name: &str| -> Result<usize, ProviderError> {
      match inputs.get(name).and_then(Value::as_f64) {
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
        _ => Err(ProviderError::Rejected(format!(
          "random_password attribute '{name}' must be a whole number"
        ))),
      }
    };
    let special = inputs.get("special").and_then(Value::as_bool).unwrap_or(true);

    let policy = Self {
      length: count("length")?,
      special,
      min_upper: count("min_upper")?,
      min_lower: count("min_lower")?,
      min_numeric: count("min_numeric")?,
      min_special: if special { count("min_special")? } else { 0 },
    };
    policy.validate()?;
    Ok(policy)
  }

  fn validate(&self) -> Result<(), ProviderError> {
    if self.length < MIN_PASSWORD_LENGTH {
      return Err(ProviderError::Rejected(format!(
        "random_password length {} is below the minimum of {MIN_PASSWORD_LENGTH}",
        self.length
      )));
    }
    let required = self.min_upper + self.min_lower + self.min_numeric + self.min_special;
    if required > self.length {
      return Err(ProviderError::Rejected(format!(
        "random_password requires {required} characters but length is {}",
        self.length
      )));
    }
    Ok(())
  }
}

/// Generate a password satisfying `policy` using the OS random source.
pub fn generate_password(policy: &PasswordPolicy) -> Result<String, ProviderError> {
  policy.validate()?;
  let mut rng = OsRng;

  let mut classes: Vec<(&[u8], usize)> = vec![
    (UPPER, policy.min_upper),
    (LOWER, policy.min_lower),
    (NUMERIC, policy.min_numeric),
  ];
  if policy.special {
    classes.push((SPECIAL, policy.min_special));
  }

  let mut chars: Vec<u8> = Vec::with_capacity(policy.length);
  for (set, minimum) in &classes {
    for _ in 0..*minimum {
      chars.push(pick(set, &mut rng)?);
    }
  }

  let pool: Vec<u8> = classes.iter().flat_map(|(set, _)| set.iter().copied()).collect();
  while chars.len() < policy.length {
    chars.push(pick(&pool, &mut rng)?);
  }
  chars.shuffle(&mut rng);

  String::from_utf8(chars).map_err(|e| ProviderError::Rejected(e.to_string()))
}

fn pick(set: &[u8], rng: &mut OsRng) -> Result<u8, ProviderError> {
  set
    .choose(rng)
    .copied()
    .ok_or_else(|| ProviderError::Rejected("empty character set".to_string()))
}

/// Realizes `random_password` nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomProvider;

#[async_trait]
impl Provider for RandomProvider {
  fn name(&self) -> &'static str {
    "random"
  }

  async fn create(&self, request: &ResourceRequest) -> Result<RemoteResource, ProviderError> {
    if request.kind != ResourceKind::RandomPassword {
      return Err(ProviderError::Rejected(format!("{} is not realized locally", request.kind)));
    }
    let policy = PasswordPolicy::from_inputs(&request.inputs)?;
    let password = generate_password(&policy)?;

    let mut id_bytes = [0u8; 8];
    OsRng.fill_bytes(&mut id_bytes);
    let remote_id = format!("random-{}", hex::encode(id_bytes));

    let mut outputs = BTreeMap::new();
    outputs.insert("id".to_string(), Value::from(remote_id.clone()));
    outputs.insert("result".to_string(), Value::from(password));

    Ok(RemoteResource {
      remote_id,
      attributes: request.public_attributes(),
      outputs,
      state: ProvisioningState::Succeeded,
    })
  }

  async fn read(&self, _id: &NodeId, current: &ResourceState) -> Result<Option<RemoteResource>, ProviderError> {
    Ok(Some(RemoteResource {
      remote_id: current.remote_id.clone(),
      attributes: public_attributes(&current.inputs),
      outputs: current.outputs.clone(),
      state: ProvisioningState::Succeeded,
    }))
  }

  async fn update(&self, request: &ResourceRequest, _current: &ResourceState) -> Result<RemoteResource, ProviderError> {
    Err(ProviderError::Rejected(format!(
      "'{}' cannot be updated in place; every attribute forces a new password",
      request.id
    )))
  }

  async fn delete(&self, _id: &NodeId, _current: &ResourceState) -> Result<(), ProviderError> {
    Ok(())
  }

  async fn status(&self, _kind: ResourceKind, _remote_id: &str) -> Result<ProvisioningState, ProviderError> {
    Ok(ProvisioningState::Succeeded)
  }
}
