use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use tracing::{debug, info, warn};

use super::{LockError, LockInfo, STATE_FORMAT_VERSION, StateBackend, StateError, StateSnapshot};
use crate::config::Secret;
use crate::util::unix_now;

/// State stored behind a REST endpoint.
///
/// `GET address` returns the snapshot (`204`/`404` when none exists) and
/// `POST address` stores it. Locks use the `LOCK` and `UNLOCK` methods on
/// the lock address with a JSON [`LockInfo`] body; a holder answers `423`
/// or `409` with its own lock info. A lease is renewed by sending `LOCK`
/// again with the same id and a later expiry.
pub struct HttpBackend {
  client: reqwest::Client,
  address: String,
  lock_address: String,
  unlock_address: String,
  auth: Option<(String, Option<Secret>)>,
}

impl HttpBackend {
  pub fn new(address: String) -> Result<Self, StateError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(StateError::Request)?;
    Ok(Self {
      client,
      lock_address: address.clone(),
      unlock_address: address.clone(),
      address,
      auth: None,
    })
  }

  pub fn with_lock_address(mut self, address: String) -> Self {
    self.lock_address = address;
    self
  }

  pub fn with_unlock_address(mut self, address: String) -> Self {
    self.unlock_address = address;
    self
  }

  pub fn with_basic_auth(mut self, username: String, password: Option<Secret>) -> Self {
    self.auth = Some((username, password));
    self
  }

  fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
    let builder = self.client.request(method, url);
    match &self.auth {
      Some((user, password)) => builder.basic_auth(user, password.as_ref().map(Secret::expose)),
      None => builder,
    }
  }

  fn lock_method(name: &'static str) -> Result<Method, StateError> {
    Method::from_bytes(name.as_bytes()).map_err(|e| StateError::Http {
      status: 0,
      body: e.to_string(),
    })
  }

  async fn send_lock(&self, info: &LockInfo) -> Result<reqwest::Response, StateError> {
    let response = self
      .request(Self::lock_method("LOCK")?, &self.lock_address)
      .json(info)
      .send()
      .await?;
    Ok(response)
  }

  async fn error_from(response: reqwest::Response) -> StateError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StateError::Http { status, body }
  }

  async fn contention(&self, response: reqwest::Response) -> LockError {
    let location = self.lock_address.clone();
    match response.json::<LockInfo>().await {
      Ok(info) => LockError::Contention { info, location },
      Err(_) => LockError::ContentionUnknown { location },
    }
  }

  async fn send_unlock(&self, body: serde_json::Value) -> Result<(), LockError> {
    let response = self
      .request(Self::lock_method("UNLOCK")?, &self.unlock_address)
      .json(&body)
      .send()
      .await
      .map_err(StateError::Request)?;

    match response.status() {
      status if status.is_success() => Ok(()),
      StatusCode::CONFLICT | StatusCode::LOCKED => {
        let current = response
          .json::<LockInfo>()
          .await
          .map(|info| info.id)
          .unwrap_or_default();
        Err(LockError::Mismatch {
          requested: body["id"].as_str().unwrap_or_default().to_string(),
          current,
        })
      }
      StatusCode::NOT_FOUND => Err(LockError::NotLocked),
      _ => Err(Self::error_from(response).await.into()),
    }
  }
}

#[async_trait]
impl StateBackend for HttpBackend {
  fn describe(&self) -> String {
    self.address.clone()
  }

  async fn load(&self) -> Result<Option<StateSnapshot>, StateError> {
    let response = self.request(Method::GET, &self.address).send().await?;

    match response.status() {
      StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => {
        debug!(address = %self.address, "no remote state");
        Ok(None)
      }
      status if status.is_success() => {
        let body = response.text().await?;
        if body.trim().is_empty() {
          return Ok(None);
        }
        let state: StateSnapshot = serde_json::from_str(&body).map_err(|source| StateError::Parse {
          location: self.address.clone(),
          source,
        })?;
        if state.version != STATE_FORMAT_VERSION {
          return Err(StateError::UnsupportedVersion {
            found: state.version,
            expected: STATE_FORMAT_VERSION,
          });
        }
        Ok(Some(state))
      }
      _ => Err(Self::error_from(response).await),
    }
  }

  async fn save(&self, state: &StateSnapshot) -> Result<(), StateError> {
    let response = self.request(Method::POST, &self.address).json(state).send().await?;
    if response.status().is_success() {
      debug!(address = %self.address, serial = state.serial, "state saved");
      Ok(())
    } else {
      Err(Self::error_from(response).await)
    }
  }

  async fn lock(&self, operation: &str, lease: Duration) -> Result<LockInfo, LockError> {
    let info = LockInfo::new(operation, lease);
    let response = self.send_lock(&info).await?;

    match response.status() {
      status if status.is_success() => {
        info!(lock = %info.id, operation, "state lock acquired");
        Ok(info)
      }
      StatusCode::LOCKED | StatusCode::CONFLICT => Err(self.contention(response).await),
      _ => Err(Self::error_from(response).await.into()),
    }
  }

  async fn renew(&self, lock: &LockInfo, lease: Duration) -> Result<LockInfo, LockError> {
    let renewed = LockInfo {
      expires_at: unix_now().saturating_add(lease.as_secs()),
      ..lock.clone()
    };
    let response = self.send_lock(&renewed).await?;

    match response.status() {
      status if status.is_success() => Ok(renewed),
      StatusCode::LOCKED | StatusCode::CONFLICT => match response.json::<LockInfo>().await {
        // Servers that refuse to re-lock report the current holder.
        Ok(holder) if holder.id == lock.id => Ok(holder),
        Ok(holder) => Err(LockError::Lost {
          id: lock.id.clone(),
          reason: format!("{} now holds it for {}", holder.owner, holder.operation),
        }),
        Err(_) => Err(LockError::Lost {
          id: lock.id.clone(),
          reason: format!("{} reports another holder", self.lock_address),
        }),
      },
      _ => Err(Self::error_from(response).await.into()),
    }
  }

  async fn unlock(&self, lock: &LockInfo) -> Result<(), LockError> {
    let body = serde_json::to_value(lock).map_err(StateError::Serialize)?;
    self.send_unlock(body).await?;
    debug!(lock = %lock.id, "state lock released");
    Ok(())
  }

  async fn force_unlock(&self, id: &str) -> Result<(), LockError> {
    self.send_unlock(serde_json::json!({ "id": id, "force": true })).await?;
    warn!(lock = id, "state lock force-released");
    Ok(())
  }
}
