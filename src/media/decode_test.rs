use std::sync::Arc;
use std::thread;

use media_bus::{
    open_decoder, open_encoder, DecoderSettings, EncoderSettings, PixelFormat, VideoFrame,
};
use parking_lot::Mutex;

use super::{DecodePipeline, FrameSink, RawFileSink};
use crate::{
    exchange::FrameExchange,
    media::{EncodeOutput, EncodePipeline},
    net::{wire, ConnectOptions, Connection, LazyConnection, Listener},
    running::RunningFlag,
};

const W: u32 = 4;
const H: u32 = 2;

fn decoder_settings() -> DecoderSettings {
    DecoderSettings {
        width: W,
        height: H,
        ..Default::default()
    }
}

fn collecting_sink() -> (Box<dyn FrameSink>, Arc<Mutex<Vec<VideoFrame>>>) {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let frames = frames.clone();
        move |frame: VideoFrame| -> anyhow::Result<()> {
            frames.lock().push(frame);
            Ok(())
        }
    };
    (Box::new(sink), frames)
}

/// Decode pipeline accepting on an ephemeral port; returns the port and the
/// thread running it.
fn spawn_decoder(
    running: RunningFlag,
    sink: Box<dyn FrameSink>,
    pre_allocated: usize,
) -> anyhow::Result<(u16, thread::JoinHandle<anyhow::Result<(super::DecodeStats, usize)>>)> {
    let listener = Listener::bind(0, running.clone())?;
    let port = listener.local_addr()?.port();
    let handle = thread::spawn(move || {
        let conn = listener.accept()?;
        let mut pipeline = DecodePipeline::new(
            0,
            open_decoder(&decoder_settings())?,
            LazyConnection::Ready(conn),
            running,
            sink,
            (W, H),
        )
        .with_packet_buffer(pre_allocated, 1024);
        let stats = pipeline.run();
        Ok((stats, pipeline.buffer_capacity()))
    });
    Ok((port, handle))
}

fn client(port: u16, running: RunningFlag) -> anyhow::Result<Connection> {
    Ok(Connection::connect(
        "127.0.0.1",
        port,
        running,
        ConnectOptions {
            max_attempts: Some(20),
            ..Default::default()
        },
    )?)
}

#[test]
fn test_stream_round_trip() -> anyhow::Result<()> {
    const N: u8 = 5;
    let running = RunningFlag::new();
    let (sink, frames) = collecting_sink();
    let (port, decoder) = spawn_decoder(running.clone(), sink, 16)?;

    let settings = EncoderSettings {
        width: W,
        height: H,
        ..Default::default()
    };
    let mut encoder = EncodePipeline::new(
        0,
        Arc::new(FrameExchange::new(1, running.clone())?),
        running.clone(),
        open_encoder(&settings)?,
        (W, H),
        EncodeOutput::Stream(LazyConnection::endpoint(
            "127.0.0.1",
            port,
            ConnectOptions::default(),
        )),
    );
    encoder.connect()?;
    for i in 0..N {
        let gray = 16 + i * 40;
        let frame = VideoFrame::new(vec![gray; (W * H * 3) as usize], W, H, PixelFormat::Bgr24);
        encoder.encode_frame(&frame)?;
    }
    encoder.finish()?;

    let (stats, _) = decoder.join().unwrap()?;
    assert_eq!(stats.packets_in, N as u64);
    assert_eq!(stats.frames_out, N as u64);

    let frames = frames.lock();
    assert_eq!(frames.len(), N as usize);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.pts, Some(i as i64));
        assert_eq!(frame.format, PixelFormat::Bgr24);
        frame.validate()?;
    }
    // gray survives the nv12 round trip within rounding
    let first = frames[0].data[0] as i32;
    assert!((first - 16).abs() <= 2, "got {}", first);
    Ok(())
}

#[test]
fn test_malformed_packet_then_valid_packet() -> anyhow::Result<()> {
    let running = RunningFlag::new();
    let (sink, frames) = collecting_sink();
    let (port, decoder) = spawn_decoder(running.clone(), sink, 4)?;

    let mut conn = client(port, running)?;
    let frame_size = PixelFormat::Nv12.frame_size(W, H);
    wire::write_packet(&mut conn, &[1, 2, 3])?;
    wire::write_packet(&mut conn, &vec![128u8; frame_size])?;
    wire::write_end_of_stream(&mut conn)?;

    let (stats, capacity) = decoder.join().unwrap()?;
    assert_eq!(stats.packets_in, 2);
    assert_eq!(stats.codec_errors, 1);
    assert_eq!(stats.frames_out, 1);
    assert_eq!(frames.lock()[0].pts, Some(1));
    assert_eq!(capacity, frame_size);
    Ok(())
}

#[test]
fn test_desync_length_ends_session() -> anyhow::Result<()> {
    let running = RunningFlag::new();
    let (sink, frames) = collecting_sink();
    let (port, decoder) = spawn_decoder(running.clone(), sink, 4)?;

    let mut conn = client(port, running)?;
    conn.send_exact(&(-1i32).to_be_bytes())?;
    conn.send_exact(&[0u8; 64])?;

    let (stats, capacity) = decoder.join().unwrap()?;
    assert_eq!(stats.packets_in, 0);
    assert!(frames.lock().is_empty());
    assert_eq!(capacity, 4);
    Ok(())
}

#[test]
fn test_peer_close_flushes_and_stops() -> anyhow::Result<()> {
    let running = RunningFlag::new();
    let (sink, frames) = collecting_sink();
    let (port, decoder) = spawn_decoder(running.clone(), sink, 64)?;

    {
        let mut conn = client(port, running)?;
        wire::write_packet(&mut conn, &vec![0u8; PixelFormat::Nv12.frame_size(W, H)])?;
    }

    let (stats, capacity) = decoder.join().unwrap()?;
    assert_eq!(stats.frames_out, 1);
    assert_eq!(stats.transport_errors, 0);
    assert_eq!(frames.lock().len(), 1);
    assert_eq!(capacity, 64);
    Ok(())
}

#[test]
fn test_raw_file_sink_appends_frames() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("decoded").join("out_0.bgr24");
    let mut sink = RawFileSink::create(&path)?;
    sink.consume(VideoFrame::new(vec![1u8; 6], 2, 1, PixelFormat::Bgr24))?;
    sink.consume(VideoFrame::new(vec![2u8; 6], 2, 1, PixelFormat::Bgr24))?;
    sink.finish()?;
    assert_eq!(std::fs::read(&path)?, [vec![1u8; 6], vec![2u8; 6]].concat());
    Ok(())
}
