use std::time::Duration;

use color_eyre::Result;
use common::{mock_link, options, wait_for, wait_sent};
use pretty_assertions::assert_eq;
use serial_link::client::LinkEventKind;
use tokio::time::{timeout, Instant};

mod common;

fn is_cycle(kind: &LinkEventKind) -> bool {
    matches!(kind, LinkEventKind::PollCycle { .. })
}

fn polling() -> serial_link::options::LinkOptionsBuilder {
    options().poll(true).poll_interval(Duration::from_millis(50))
}

#[tokio::test]
async fn commands_are_polled_in_order() -> Result<()> {
    let (link, mock, mut events) = mock_link(polling()).await;
    mock.set_loopback(true);
    link.add_poll_command(vec![0x01, 0x03]);
    link.add_poll_command(vec![0x01, 0x04]);
    link.start()?;

    let cycle = wait_for(&mut events, is_cycle).await?;
    assert!(matches!(
        cycle,
        LinkEventKind::PollCycle {
            offered: 2,
            skipped: 0,
            ..
        }
    ));
    assert_eq!(
        mock.written()[..2].to_vec(),
        vec![vec![0x01, 0x03], vec![0x01, 0x04]]
    );

    link.close().await?;

    Ok(())
}

#[tokio::test]
async fn unanswered_poll_does_not_stall_polling() -> Result<()> {
    let (link, mock, mut events) = mock_link(polling()).await;
    link.add_poll_command(vec![0x01, 0x03]);
    link.add_poll_command(vec![0x01, 0x04]);
    link.start()?;

    // The device misses the first cycle entirely.
    let cycle = wait_for(&mut events, is_cycle).await?;
    assert!(matches!(
        cycle,
        LinkEventKind::PollCycle {
            offered: 2,
            skipped: 0,
            ..
        }
    ));
    assert!(!link.is_sending());

    mock.set_loopback(true);
    for _ in 0..2 {
        let cycle = wait_for(&mut events, is_cycle).await?;
        assert!(matches!(
            cycle,
            LinkEventKind::PollCycle {
                offered: 2,
                skipped: 0,
                ..
            }
        ));
    }

    let written = mock.written();
    assert!(written.len() >= 6, "{written:?}");
    assert_eq!(
        written[..4].to_vec(),
        vec![
            vec![0x01, 0x03],
            vec![0x01, 0x04],
            vec![0x01, 0x03],
            vec![0x01, 0x04]
        ]
    );

    link.close().await?;

    Ok(())
}

#[tokio::test]
async fn outstanding_exchange_skips_commands() -> Result<()> {
    let (link, mock, mut events) = mock_link(polling()).await;
    link.add_poll_command(vec![0x01, 0x03]);
    link.add_poll_command(vec![0x01, 0x04]);
    link.start()?;

    // Nobody answers this one, so the poller never gets a turn.
    link.send(vec![0xAA])?;
    assert_eq!(wait_sent(&mut events).await?, vec![0xAA]);

    let mut stamps = vec![];
    for _ in 0..2 {
        let cycle = wait_for(&mut events, is_cycle).await?;
        assert!(matches!(
            cycle,
            LinkEventKind::PollCycle {
                offered: 0,
                skipped: 2,
                ..
            }
        ));
        stamps.push(Instant::now());
    }

    assert!(stamps[1] - stamps[0] >= Duration::from_millis(40));
    assert_eq!(mock.written(), vec![vec![0xAA]]);

    link.close().await?;

    Ok(())
}

#[tokio::test]
async fn answered_exchange_lets_polling_resume() -> Result<()> {
    let (link, mock, mut events) = mock_link(polling()).await;
    link.add_poll_command(vec![0x01, 0x03]);
    link.start()?;

    link.send(vec![0xAA])?;
    wait_sent(&mut events).await?;
    wait_for(&mut events, |kind| {
        matches!(kind, LinkEventKind::PollCycle { skipped: 1, .. })
    })
    .await?;

    mock.inject_read(vec![0xAA, 0x00]);
    assert_eq!(wait_sent(&mut events).await?, vec![0x01, 0x03]);
    wait_for(&mut events, |kind| {
        matches!(kind, LinkEventKind::PollCycle { offered: 1, .. })
    })
    .await?;

    link.close().await?;

    Ok(())
}

#[tokio::test]
async fn stopped_polling_keeps_the_link() -> Result<()> {
    let (link, mock, mut events) = mock_link(polling()).await;
    mock.set_loopback(true);
    link.add_poll_command(vec![0x01, 0x03]);
    link.start()?;

    wait_for(&mut events, is_cycle).await?;
    link.stop_polling();

    let more = timeout(Duration::from_millis(200), wait_for(&mut events, is_cycle)).await;
    assert!(more.is_err(), "Polling went on: {more:?}");
    assert!(link.opened());

    link.send(vec![0x05])?;
    assert_eq!(wait_sent(&mut events).await?, vec![0x05]);

    link.close().await?;

    Ok(())
}

#[tokio::test]
async fn polling_disabled() -> Result<()> {
    let (link, mock, mut events) = mock_link(options().poll_interval(Duration::from_millis(20))).await;
    link.add_poll_command(vec![0x01, 0x03]);
    link.start()?;

    let cycle = timeout(Duration::from_millis(150), wait_for(&mut events, is_cycle)).await;
    assert!(cycle.is_err());
    assert!(mock.write_attempts().is_empty());

    link.close().await?;

    Ok(())
}

#[tokio::test]
async fn closing_stops_the_poller() -> Result<()> {
    let (link, mock, mut events) = mock_link(polling()).await;
    mock.set_loopback(true);
    link.add_poll_command(vec![0x01, 0x03]);
    link.start()?;

    wait_for(&mut events, is_cycle).await?;
    link.close().await?;

    let written = mock.written().len();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(mock.written().len(), written);

    Ok(())
}
