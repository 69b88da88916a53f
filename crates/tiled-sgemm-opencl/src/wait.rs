//! Bounded waits on queued commands.

use std::thread;
use std::time::{Duration, Instant};

use opencl3::event::Event;
use opencl3::types::cl_int;
use tiled_sgemm::{Result, SgemmError};

use crate::error::OpenClError;

const CL_COMPLETE: cl_int = 0;
const POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Poll `status` until it reports `CL_COMPLETE`, a negative error status,
/// or `timeout` elapses.
pub(crate) fn poll_until<F>(mut status: F, operation: &str, timeout: Duration) -> Result<()>
where
    F: FnMut() -> Result<cl_int>,
{
    let deadline = Instant::now() + timeout;
    loop {
        let status = status()?;
        if status == CL_COMPLETE {
            return Ok(());
        }
        if status < 0 {
            return Err(SgemmError::resource(format!(
                "{operation} terminated with status {status}"
            )));
        }
        if Instant::now() >= deadline {
            return Err(SgemmError::Timeout {
                operation: operation.to_string(),
                timeout,
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Wait up to `timeout` for `event` to complete.
pub(crate) fn wait_for(event: &Event, operation: &str, timeout: Duration) -> Result<()> {
    poll_until(
        || {
            let status = event
                .command_execution_status()
                .map_err(|e| OpenClError::api("CL_EVENT_COMMAND_EXECUTION_STATUS", e))?;
            Ok(status.0)
        },
        operation,
        timeout,
    )
}
