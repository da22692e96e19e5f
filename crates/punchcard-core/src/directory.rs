use std::time::Duration;

use moka::future::Cache;
use uuid::Uuid;

use crate::error::AppError;
use crate::traits::EmployeeDirectory;

const DEFAULT_CAPACITY: u64 = 10_000;
const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Read-through cache in front of an [`EmployeeDirectory`].
///
/// Only hits are cached, so an employee added mid-run is found on the next
/// record that mentions them.
#[derive(Clone)]
pub struct CachedDirectory<E: EmployeeDirectory> {
    inner: E,
    cache: Cache<String, Uuid>,
}

impl<E: EmployeeDirectory> CachedDirectory<E> {
    pub fn new(inner: E) -> Self {
        Self::with_limits(inner, DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    pub fn with_limits(inner: E, capacity: u64, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }
}

impl<E: EmployeeDirectory> EmployeeDirectory for CachedDirectory<E> {
    async fn find_user_id(&self, employee_number: &str) -> Result<Option<Uuid>, AppError> {
        if let Some(user_id) = self.cache.get(employee_number).await {
            return Ok(Some(user_id));
        }
        let found = self.inner.find_user_id(employee_number).await?;
        if let Some(user_id) = found {
            self.cache.insert(employee_number.to_string(), user_id).await;
        }
        Ok(found)
    }
}
