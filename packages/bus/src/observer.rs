//! Hierarchical observation: one task per `get`, following every entry the
//! worker announces under its prefix.

use futures_util::stream::BoxStream;
use statebus_core::{Handle, Notification};
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, StreamMap};
use tracing::debug;

/// Announcement that `handle` now publishes through the entry `id`.
///
/// The subscription is taken by the worker when it sends the join, so the
/// observer sees the entry from the moment it was announced.
pub(crate) struct Join {
    pub handle: Handle,
    /// Unique per worker; a re-set handle gets a new id.
    pub id: u64,
    pub subscription: BoxStream<'static, Notification>,
}

type Members = StreamMap<(Handle, u64), BoxStream<'static, Notification>>;

/// Forward every notification of the joined members to `tx` until the
/// receiving side is dropped, or the worker is gone and every member has
/// drained.
pub(crate) async fn run(
    prefix: Handle,
    mut joins: mpsc::UnboundedReceiver<Join>,
    tx: mpsc::Sender<Notification>,
) {
    let mut members: Members = StreamMap::new();
    let mut worker_alive = true;

    loop {
        if !worker_alive && members.is_empty() {
            break;
        }

        tokio::select! {
            _ = tx.closed() => break,
            join = joins.recv(), if worker_alive => match join {
                Some(join) => follow(&mut members, join),
                None => worker_alive = false,
            },
            Some((_, notification)) = members.next(), if !members.is_empty() => {
                if tx.send(notification).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!(handle = %prefix, "observer stopped");
}

/// Start following a member, dropping any superseded member of the same
/// handle. Members that completed keep draining until their terminal
/// notification.
fn follow(members: &mut Members, join: Join) {
    let superseded: Vec<(Handle, u64)> = members
        .keys()
        .filter(|(handle, id)| *handle == join.handle && *id != join.id)
        .cloned()
        .collect();
    for key in superseded {
        members.remove(&key);
    }

    members.insert((join.handle, join.id), join.subscription);
}
