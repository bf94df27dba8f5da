//! Inactivity timer for AI-assisted sessions.
//!
//! One timer per open session, owned by the view that owns the session. The
//! timer never touches the store or the log itself: when it fires it sends a
//! [`TimerFired`] to its owner, which applies the auto-close on its own
//! event loop. Once the owner is torn down the event has nowhere to go, so a
//! late fire is a no-op.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Messages a session must exceed before the timer arms (the welcome flow).
pub const ARM_AFTER_MESSAGES: usize = 2;

/// Signal that a session has been quiet for the full period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub session_id: Uuid,
    pub generation: u64,
}

pub struct InactivityTimer {
    period: Duration,
    tx: mpsc::UnboundedSender<TimerFired>,
    pending: Option<JoinHandle<()>>,
    generation: u64,
}

impl InactivityTimer {
    pub fn new(period: Duration) -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                period,
                tx,
                pending: None,
                generation: 0,
            },
            rx,
        )
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether a new message should (re)start the timer.
    pub fn should_arm(message_count: usize, feedback_given: bool) -> bool {
        message_count > ARM_AFTER_MESSAGES && !feedback_given
    }

    /// Start or restart the countdown. Replaces any pending countdown.
    pub fn reset(&mut self, session_id: Uuid) {
        self.cancel();
        self.generation += 1;
        let fired = TimerFired {
            session_id,
            generation: self.generation,
        };
        let tx = self.tx.clone();
        let period = self.period;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(period).await;
            // Receiver gone means the view was torn down.
            let _ = tx.send(fired);
        }));
    }

    /// Stop the countdown, if any. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Whether `fired` comes from the latest countdown. Older fires are stale.
    pub fn is_current(&self, fired: &TimerFired) -> bool {
        fired.generation == self.generation
    }

    /// Acknowledge a fire so the timer stops reporting itself armed.
    pub fn acknowledge(&mut self, fired: &TimerFired) {
        if self.is_current(fired) {
            self.pending = None;
        }
    }
}

impl Drop for InactivityTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_millis(30);

    #[test]
    fn arms_only_after_welcome_and_without_feedback() {
        assert!(!InactivityTimer::should_arm(1, false));
        assert!(!InactivityTimer::should_arm(2, false));
        assert!(InactivityTimer::should_arm(3, false));
        assert!(!InactivityTimer::should_arm(3, true));
    }

    #[tokio::test]
    async fn fires_once_after_quiet_period() {
        let (mut timer, mut rx) = InactivityTimer::new(PERIOD);
        let session = Uuid::new_v4();
        timer.reset(session);
        assert!(timer.is_armed());

        let fired = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timer fired")
            .expect("channel open");
        assert_eq!(fired.session_id, session);
        assert!(timer.is_current(&fired));

        tokio::time::sleep(PERIOD * 3).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reset_replaces_pending_countdown() {
        let (mut timer, mut rx) = InactivityTimer::new(PERIOD);
        let session = Uuid::new_v4();
        timer.reset(session);
        tokio::time::sleep(PERIOD / 2).await;
        timer.reset(session);

        let fired = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timer fired")
            .expect("channel open");
        assert_eq!(fired.generation, 2);

        tokio::time::sleep(PERIOD * 3).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_prevents_fire() {
        let (mut timer, mut rx) = InactivityTimer::new(PERIOD);
        timer.reset(Uuid::new_v4());
        timer.cancel();
        assert!(!timer.is_armed());

        tokio::time::sleep(PERIOD * 3).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drop_cancels_and_late_fire_is_harmless() {
        let (mut timer, rx) = InactivityTimer::new(PERIOD);
        timer.reset(Uuid::new_v4());
        drop(rx);
        tokio::time::sleep(PERIOD * 3).await;
        drop(timer);
    }

    #[test]
    fn stale_generation_is_not_current() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        rt.block_on(async {
            let (mut timer, _rx) = InactivityTimer::new(PERIOD);
            let session = Uuid::new_v4();
            timer.reset(session);
            let stale = TimerFired {
                session_id: session,
                generation: 1,
            };
            timer.reset(session);
            assert!(!timer.is_current(&stale));
            timer.acknowledge(&stale);
            assert!(timer.is_armed());
        });
    }
}
