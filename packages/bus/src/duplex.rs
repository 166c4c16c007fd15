//! A handle's publish and observe sides bound together.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use statebus_core::{Handle, Notification, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{BusError, Result};
use crate::handler::BusHandler;
use crate::worker::NotificationStream;

const OUTGOING_CAPACITY: usize = 64;

/// Publishes under one handle and observes everything below it, minus its
/// own notifications.
///
/// ```rust,no_run
/// # async fn demo(bus: statebus_bus::BusHandler) -> statebus_bus::Result<()> {
/// use futures_util::StreamExt;
/// use statebus_core::handle;
///
/// let mut chat = bus.duplex(&handle!("room.lobby.alice")).await?;
/// chat.send(serde_json::json!("hello")).await?;
/// while let Some(notification) = chat.next().await {
///     println!("{notification:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Duplex {
    handle: Handle,
    outgoing: Option<mpsc::Sender<std::result::Result<Value, String>>>,
    incoming: NotificationStream,
}

impl Duplex {
    pub(crate) async fn open(bus: &BusHandler, handle: &Handle) -> Result<Self> {
        let incoming = bus.observe(handle).await?;
        let (tx, rx) = mpsc::channel(OUTGOING_CAPACITY);
        bus.publish(handle, ReceiverStream::new(rx)).await?;
        Ok(Self {
            handle: handle.clone(),
            outgoing: Some(tx),
            incoming,
        })
    }

    /// The handle this duplex publishes under.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Publish a value.
    pub async fn send(&self, value: Value) -> Result<()> {
        self.emit(Ok(value)).await
    }

    /// Publish an error, ending the published side.
    pub async fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.emit(Err(error.into())).await?;
        self.outgoing = None;
        Ok(())
    }

    /// Complete the published side. Observing continues.
    pub fn close(&mut self) {
        self.outgoing = None;
    }

    async fn emit(&self, item: std::result::Result<Value, String>) -> Result<()> {
        let outgoing = self.outgoing.as_ref().ok_or(BusError::WorkerClosed)?;
        outgoing.send(item).await.map_err(|_| BusError::WorkerClosed)
    }
}

impl Stream for Duplex {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.incoming).poll_next(cx) {
                Poll::Ready(Some(notification)) if notification.handle == self.handle => continue,
                other => return other,
            }
        }
    }
}
