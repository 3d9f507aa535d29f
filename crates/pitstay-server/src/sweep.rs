use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pitstay_api::AppState;

/// Background task that expires pending bookings past their deadline.
///
/// Runs on an interval until `shutdown` is cancelled. Clients may also
/// trigger the same pass through `POST /bookings/sweep`; both are safe to
/// overlap because each expiry is a conditional update.
pub async fn run_sweep_loop(state: AppState, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Sweep loop stopping");
                return;
            }
            _ = interval.tick() => {}
        }

        match sweep_once(&state).await {
            Ok(count) => {
                if count > 0 {
                    info!("Sweep: expired {} bookings", count);
                }
            }
            Err(e) => {
                warn!("Sweep error: {:#}", e);
            }
        }
    }
}

pub async fn sweep_once(state: &AppState) -> anyhow::Result<usize> {
    let state = state.clone();
    let expired = tokio::task::spawn_blocking(move || state.engine.sweep()).await??;
    Ok(expired.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    use pitstay_api::AppStateInner;
    use pitstay_core::{BookingPolicy, ManualClock};
    use pitstay_db::Database;
    use pitstay_gateway::Dispatcher;
    use pitstay_types::api::CreateBookingRequest;
    use pitstay_types::models::{BookingStatus, CancelledBy, PointsTransactionType};

    fn state_with_clock() -> (AppState, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let state = Arc::new(AppStateInner::with_clock(
            Arc::new(Database::open_in_memory().unwrap()),
            Dispatcher::new(),
            "test-secret".into(),
            BookingPolicy::default(),
            clock.clone(),
        ));
        (state, clock)
    }

    fn pending_booking(state: &AppState) -> Uuid {
        let (guest, host) = (Uuid::new_v4(), Uuid::new_v4());
        state
            .ledger
            .award(guest, PointsTransactionType::SubscriptionBonus, 50, "welcome")
            .unwrap();
        state
            .engine
            .request_booking(
                guest,
                CreateBookingRequest {
                    host_id: host,
                    race_id: Uuid::new_v4(),
                    property_id: Uuid::new_v4(),
                    check_in_date: NaiveDate::from_ymd_opt(2026, 9, 4).unwrap(),
                    check_out_date: NaiveDate::from_ymd_opt(2026, 9, 7).unwrap(),
                    guests_count: 1,
                    points_cost: 10,
                    request_message: None,
                },
            )
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn sweep_once_expires_only_overdue_bookings() {
        let (state, clock) = state_with_clock();
        let id = pending_booking(&state);

        assert_eq!(sweep_once(&state).await.unwrap(), 0);

        clock.advance(chrono::Duration::hours(49));
        assert_eq!(sweep_once(&state).await.unwrap(), 1);
        assert_eq!(sweep_once(&state).await.unwrap(), 0);

        let booking = state.db.get_booking(id).unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Cancelled);
        assert_eq!(booking.cancelled_by, Some(CancelledBy::System));
    }

    #[tokio::test]
    async fn loop_stops_on_cancellation() {
        let (state, _clock) = state_with_clock();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_sweep_loop(state, Duration::from_millis(10), shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweep loop did not stop")
            .unwrap();
    }
}
