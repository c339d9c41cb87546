// Copyright 2025 OCL Index Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Retry policy and deadlines for backend calls.
//!
//! Index pushes and store writes are blocking calls on external systems.
//! Each attempt runs under a deadline; transient failures are retried with
//! exponential backoff and jitter, anything else fails immediately.

use rand::random;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::{OclError, OclResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::exponential()
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let jitter_factor = 1.0 + (random::<f64>() - 0.5) * 2.0 * self.jitter;
        let jittered = base * jitter_factor;
        let clamped = jittered.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(clamped)
    }
}

/// Run `operation` under `timeout`, retrying transient failures per `policy`.
///
/// `name` is used in log lines and timeout errors.
pub async fn with_retry<F, Fut, T>(
    name: &str,
    policy: &RetryPolicy,
    timeout: Duration,
    mut operation: F,
) -> OclResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = OclResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = policy.delay_for_attempt(attempt - 1);
            tracing::warn!(
                operation = name,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Retrying after transient failure"
            );
            tokio::time::sleep(delay).await;
        }

        let result = match tokio::time::timeout(timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(OclError::Timeout {
                operation: name.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => last_error = Some(e),
            Err(e) => return Err(e),
        }
    }

    let err = last_error.unwrap_or_else(|| OclError::Transient(format!("{name} failed")));
    tracing::error!(
        operation = name,
        attempts,
        error = %err,
        "Retry attempts exhausted"
    );
    Err(err)
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
