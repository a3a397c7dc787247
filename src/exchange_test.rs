use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use media_bus::{PixelFormat, VideoFrame};

use super::{FrameExchange, SlotValue, FETCH_POLL_INTERVAL};
use crate::{
    error::{ConfigurationError, ExchangeError},
    running::RunningFlag,
};

#[test]
fn test_zero_slots_is_configuration_error() {
    let res: Result<FrameExchange<u32>, ConfigurationError> =
        FrameExchange::new(0, RunningFlag::new());
    assert!(res.is_err());
}

#[test]
fn test_newest_wins() -> anyhow::Result<()> {
    let exchange = FrameExchange::new(1, RunningFlag::new())?;
    for i in 0..5u32 {
        exchange.put(0, i)?;
    }
    assert_eq!(exchange.fetch(0)?, SlotValue::Frame(4));

    exchange.put(0, 10)?;
    assert_eq!(exchange.fetch(0)?, SlotValue::Frame(10));
    Ok(())
}

#[test]
fn test_slot_out_of_range() -> anyhow::Result<()> {
    let exchange = FrameExchange::new(2, RunningFlag::new())?;
    assert_eq!(
        exchange.put(2, 1u8),
        Err(ExchangeError::SlotOutOfRange { slot: 2, len: 2 })
    );
    assert!(exchange.fetch(5).is_err());
    Ok(())
}

#[test]
fn test_fetch_blocks_until_put() -> anyhow::Result<()> {
    let exchange = Arc::new(FrameExchange::new(1, RunningFlag::new())?);
    let consumer = {
        let exchange = exchange.clone();
        thread::spawn(move || exchange.fetch(0))
    };
    thread::sleep(Duration::from_millis(50));
    exchange.put(0, 7u64)?;
    assert_eq!(consumer.join().unwrap()?, SlotValue::Frame(7));
    Ok(())
}

#[test]
fn test_shutdown_unblocks_every_fetch() -> anyhow::Result<()> {
    let running = RunningFlag::new();
    let exchange = Arc::new(FrameExchange::<u32>::new(3, running.clone())?);
    let consumers: Vec<_> = (0..3)
        .map(|i| {
            let exchange = exchange.clone();
            thread::spawn(move || exchange.fetch(i))
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    let start = Instant::now();
    running.stop();
    exchange.shutdown();
    for consumer in consumers {
        assert!(consumer.join().unwrap()?.is_stop());
    }
    assert!(start.elapsed() < Duration::from_secs(1));
    Ok(())
}

#[test]
fn test_flag_alone_releases_fetch() -> anyhow::Result<()> {
    let running = RunningFlag::new();
    let exchange = Arc::new(FrameExchange::<u32>::new(1, running.clone())?);
    let consumer = {
        let exchange = exchange.clone();
        thread::spawn(move || exchange.fetch(0))
    };
    thread::sleep(Duration::from_millis(20));
    let start = Instant::now();
    running.stop();
    assert!(consumer.join().unwrap()?.is_stop());
    assert!(start.elapsed() < FETCH_POLL_INTERVAL * 5);

    // stopped exchange answers immediately, even with a value pending
    exchange.put(0, 1)?;
    assert!(exchange.fetch(0)?.is_stop());
    Ok(())
}

#[test]
fn test_two_devices_share_one_frame() -> anyhow::Result<()> {
    let running = RunningFlag::new();
    let exchange = Arc::new(FrameExchange::new(2, running.clone())?);

    let frame = Arc::new(VideoFrame::new(vec![1u8; 12], 2, 2, PixelFormat::Bgr24));
    for slot in 0..exchange.len() {
        exchange.put(slot, frame.clone())?;
    }

    let consumers: Vec<_> = (0..2)
        .map(|slot| {
            let exchange = exchange.clone();
            thread::spawn(move || -> anyhow::Result<(Arc<VideoFrame>, usize)> {
                let mut seen = None;
                let mut stops = 0;
                loop {
                    match exchange.fetch(slot)? {
                        SlotValue::Frame(f) => seen = Some(f),
                        SlotValue::Stop => {
                            stops += 1;
                            break;
                        }
                    }
                }
                Ok((seen.expect("frame fetched before stop"), stops))
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    running.stop();
    exchange.shutdown();

    for consumer in consumers {
        let (seen, stops) = consumer.join().unwrap()?;
        assert!(Arc::ptr_eq(&seen, &frame));
        assert_eq!(stops, 1);
    }
    Ok(())
}
