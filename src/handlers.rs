pub mod file_lookup;
pub mod task_add;
pub mod write_back;

use anyhow::{Error, Result};
use async_trait::async_trait;

use crate::models::{notification::Notification, result::HandlerResult};

/// One bounded unit of work run for a notification.
///
/// Returning `Err` reports an unexpected fault; errors that wrap a
/// [`crate::clients::remote::RemoteError`] are reported with that error's
/// failure reason instead. Handlers may see the same notification more than
/// once and must only ever overwrite remote state with the same values.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn process(&self, notification: &Notification) -> Result<HandlerResult, Error>;
}
