//! Host lifecycle signal plumbing.
//!
//! The tuner itself never talks to a concrete host runtime. Whatever owns
//! the process's pause/resume notion implements [`LifecycleSignals`] and
//! hands it to [`super::RateTuner::with_lifecycle`].

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;

/// Signal from the host environment that execution is being suspended or
/// resumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostSignal {
    Pause,
    Resume,
}

/// Source of pause/resume signals, injected at construction.
///
/// `subscribe` opens one subscription; dropping the returned stream is the
/// unsubscribe. The stream ends when the source itself goes away.
pub trait LifecycleSignals {
    fn subscribe(&self) -> BoxStream<'static, HostSignal>;
}

/// Any broadcast channel of [`HostSignal`] works as a source out of the
/// box; hosts fan the same sender out to every interested component.
impl LifecycleSignals for broadcast::Sender<HostSignal> {
    fn subscribe(&self) -> BoxStream<'static, HostSignal> {
        let receiver = broadcast::Sender::subscribe(self);
        futures::stream::unfold(receiver, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(signal) => return Some((signal, rx)),
                    // A lagged subscriber only cares about later signals.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_sender_delivers_signals_in_order() {
        let (tx, _keep_open) = broadcast::channel(8);
        let mut stream = LifecycleSignals::subscribe(&tx);

        tx.send(HostSignal::Pause).unwrap();
        tx.send(HostSignal::Resume).unwrap();

        assert_eq!(stream.next().await, Some(HostSignal::Pause));
        assert_eq!(stream.next().await, Some(HostSignal::Resume));
    }

    #[tokio::test]
    async fn lagged_subscriber_skips_to_later_signals() {
        let (tx, _keep_open) = broadcast::channel(1);
        let mut stream = LifecycleSignals::subscribe(&tx);

        // Capacity 1: the second send evicts the first.
        tx.send(HostSignal::Pause).unwrap();
        tx.send(HostSignal::Resume).unwrap();

        assert_eq!(stream.next().await, Some(HostSignal::Resume));
    }

    #[tokio::test]
    async fn stream_ends_when_source_is_dropped() {
        let (tx, rx) = broadcast::channel(8);
        let mut stream = LifecycleSignals::subscribe(&tx);

        drop(rx);
        drop(tx);

        assert_eq!(stream.next().await, None);
    }
}
