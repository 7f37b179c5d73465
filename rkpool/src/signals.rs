use anyhow::{Context, Result};
use libworkerpool::{ControlHandle, ControlRequest};
use nix::sys::signal::Signal;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

/// Forward each configured OS signal to the supervisor as a control request.
/// Must be called inside a tokio runtime.
pub fn install(table: Vec<(Signal, ControlRequest)>, control: ControlHandle) -> Result<()> {
    for (sig, request) in table {
        let mut stream = signal(SignalKind::from_raw(sig as i32))
            .with_context(|| format!("Failed to listen for {sig}"))?;
        let control = control.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                info!("Received {sig}, requesting {request:?}");
                if let Err(e) = control.send(request) {
                    warn!("Stop forwarding {sig}: {e}");
                    break;
                }
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use libworkerpool::control::control_channel;
    use nix::sys::signal::raise;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_signal_is_forwarded_as_request() {
        let (control, mut rx) = control_channel();
        install(vec![(Signal::SIGUSR2, ControlRequest::Pause)], control).unwrap();
        raise(Signal::SIGUSR2).unwrap();
        let req = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(req, ControlRequest::Pause);
    }
}
