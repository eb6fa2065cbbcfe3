//! Scoped device sessions

use keyserver_device::{DeviceConnector, DeviceError, DeviceSession};

/// Connect to `address`, run `work` and close the session before returning.
///
/// A failed close is logged and never overrides the result of `work`.
pub(crate) fn with_session<C, T, E>(
    connector: &C,
    address: &str,
    on_connect_error: impl FnOnce(DeviceError) -> E,
    work: impl FnOnce(&mut C::Session) -> Result<T, E>,
) -> Result<T, E>
where
    C: DeviceConnector,
{
    let mut session = connector.connect(address).map_err(on_connect_error)?;
    let result = work(&mut session);

    if let Err(e) = session.close() {
        tracing::warn!(device = %address, error = %e, "failed to close device session");
    }

    result
}
