//! OS signal handling.
//!
//! - **SIGINT** (Ctrl-C), **SIGTERM**, **SIGQUIT** request shutdown. The
//!   stream yields once per delivered signal, so a second signal can cut the
//!   drain short.
//! - **SIGHUP** restarts the broadcast listener.

use futures::stream::{self, BoxStream, StreamExt};
use tokio::signal::unix::{SignalKind, signal};

/// Stream yielding once per shutdown signal.
///
/// Each signal kind has exactly one listener; Ctrl-C arrives as SIGINT.
pub fn shutdown_signals() -> std::io::Result<BoxStream<'static, ()>> {
    let sigint = signal(SignalKind::interrupt())?;
    let sigterm = signal(SignalKind::terminate())?;
    let sigquit = signal(SignalKind::quit())?;

    let signals = stream::unfold(
        (sigint, sigterm, sigquit),
        |(mut sigint, mut sigterm, mut sigquit)| async move {
            tokio::select! {
                _ = sigint.recv()  => {},
                _ = sigterm.recv() => {},
                _ = sigquit.recv() => {},
            }
            Some(((), (sigint, sigterm, sigquit)))
        },
    );
    Ok(signals.boxed())
}

/// Stream yielding once per SIGHUP.
pub fn restart_signals() -> std::io::Result<BoxStream<'static, ()>> {
    let sighup = signal(SignalKind::hangup())?;
    let signals = stream::unfold(sighup, |mut sighup| async move {
        sighup.recv().await?;
        Some(((), sighup))
    });
    Ok(signals.boxed())
}
