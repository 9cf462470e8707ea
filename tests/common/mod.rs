#![allow(dead_code)]

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serial_link::{
    client::{LinkEvent, LinkEventKind},
    options::{LinkOptions, LinkOptionsBuilder},
    transport::mock::MockHandle,
    LinkClient,
};
use tokio::{sync::broadcast, time::timeout};
use tracing::{debug, Level};

/// Options suitable for a mock: 9600 baud 8E1, short timeout.
pub fn options() -> LinkOptionsBuilder {
    LinkOptions::builder("/dev/ttyMock")
        .baud_rate(9600)
        .timeout(Duration::from_millis(100))
}

/// A closed link on a fresh mock, plus a subscription to its events.
pub async fn mock_link(
    options: LinkOptionsBuilder,
) -> (LinkClient, MockHandle, broadcast::Receiver<LinkEvent>) {
    serial_link::logging::init(Level::DEBUG, None).await;

    let mock = MockHandle::new();
    let link = LinkClient::new(options.build(), mock.connector());
    let events = link.events();

    (link, mock, events)
}

/// Wait for the next event matching the predicate, skipping others.
pub async fn wait_for<F>(
    events: &mut broadcast::Receiver<LinkEvent>,
    predicate: F,
) -> Result<LinkEventKind>
where
    F: Fn(&LinkEventKind) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event.kind) => return Ok(event.kind),
                Ok(event) => debug!(%event, "Skipping"),
                Err(broadcast::error::RecvError::Lagged(n)) => debug!(n, "Lagged"),
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(eyre!("Event stream closed"))
                }
            }
        }
    })
    .await?
}

pub async fn wait_sent(events: &mut broadcast::Receiver<LinkEvent>) -> Result<Vec<u8>> {
    match wait_for(events, |kind| matches!(kind, LinkEventKind::Sent(_))).await? {
        LinkEventKind::Sent(frame) => Ok(frame),
        other => Err(eyre!("Unexpected event {other:?}")),
    }
}

pub async fn wait_closed(events: &mut broadcast::Receiver<LinkEvent>) -> Result<bool> {
    match wait_for(events, |kind| matches!(kind, LinkEventKind::Closed { .. })).await? {
        LinkEventKind::Closed { fatal } => Ok(fatal),
        other => Err(eyre!("Unexpected event {other:?}")),
    }
}
