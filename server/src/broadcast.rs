//! Fixed-cadence state push.
//!
//! Every tick sends the lobby snapshot to everyone outside a room and a personal game view
//! to every member of a room that has had a game. Clients who did not cause a change learn
//! about it through this loop, so the tick period bounds how stale their view can be.

use crate::network::shutdown_signalled;
use crate::registry::SessionRegistry;
use log::{debug, info};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Spawns the broadcast loop; it stops once `shutdown` fires.
pub fn spawn_broadcaster(
    registry: SessionRegistry,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    registry.broadcast_lobby_snapshot().await;
                    registry.broadcast_game_views().await;

                    ticks += 1;
                    if ticks % 600 == 0 {
                        debug!(
                            "Broadcast tick {}: {} sessions, {} rooms",
                            ticks,
                            registry.session_count().await,
                            registry.room_count().await
                        );
                    }
                }
                _ = shutdown_signalled(&mut shutdown) => break,
            }
        }
        info!("Broadcaster stopped");
    })
}
