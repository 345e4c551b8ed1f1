//! Keepalive pings.
//!
//! The pinger is a task of its own. It only talks to the connection through
//! the send path and stops when its token is cancelled: by `close`, by
//! dispose, or when the last connection handle is dropped. It never waits
//! for a Pong.

use std::{
    sync::Weak,
    time::{Duration, SystemTime},
};

use tokio::{
    io::AsyncWrite,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::connection::{ConnectionState, Inner};

pub(crate) fn spawn<R, W>(
    inner: Weak<Inner<R, W>>,
    token: CancellationToken,
    interval: Duration,
) where
    R: Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(run(inner, token, interval));
}

async fn run<R, W>(inner: Weak<Inner<R, W>>, token: CancellationToken, interval: Duration)
where
    R: Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.state() != ConnectionState::Connected {
            trace!("keep-alive interval ({:?}) reached, not connected", interval);
            continue;
        }

        trace!("keep-alive interval ({:?}) reached", interval);
        if let Err(err) = inner.try_send_ping(SystemTime::now()).await {
            debug!(error = %err, "keepalive ping failed");
            break;
        }
    }

    trace!("keepalive stopped");
}
