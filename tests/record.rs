mod common;

use common::*;
use sma_rs::{Link, RecordReader, SmaError};
use std::time::Duration;

fn link(transport: ScriptedTransport) -> Link<ScriptedTransport> {
    Link::new(transport, Duration::from_millis(50))
}

#[tokio::test]
async fn record_spread_over_three_frames() {
    let part1: Vec<u8> = (0x20..0x40).collect();
    let part2: Vec<u8> = (0x40..0x60).collect();
    let part3: Vec<u8> = (0x60..0x68).collect();

    let mut first = data2plus_header(0, 2);
    first.extend(&part1);
    let mut last = part3.clone();
    last.extend([0x00, 0x00]);

    let mut transport = ScriptedTransport::new();
    transport.push(raw_frame([0x01, 0x00], &first, false));
    transport.push(raw_frame([0x08, 0x00], &part2, false));
    transport.push(raw_frame([0x01, 0x00], &last, true));

    let mut link = link(transport);
    let mut frame = link.read_frame().await.unwrap();
    assert!(!frame.terminated);
    assert_eq!(frame.view().fragments_remaining(), Some(2));

    let record = RecordReader::default()
        .read(&mut link, &mut frame)
        .await
        .unwrap();

    assert_eq!(link.transport().frame_reads, 3);
    assert_eq!(record.remaining, 2);
    assert_eq!(record.payload, [part1, part2, part3].concat());
    assert!(frame.terminated);
}

#[tokio::test]
async fn escaped_bytes_survive_reassembly() {
    let data = [0x7E, 0x7D, 0x11, 0x12, 0x13, 0x01];
    let mut transport = ScriptedTransport::new();
    transport.push(data_reply(&data, 0));

    let mut link = link(transport);
    let mut frame = link.read_frame().await.unwrap();
    assert_eq!(frame.view().source_serial(), Some(INVERTER_SERIAL));

    let record = RecordReader::default()
        .read(&mut link, &mut frame)
        .await
        .unwrap();
    assert_eq!(record.payload, data);
    assert_eq!(link.transport().frame_reads, 1);
}

#[tokio::test]
async fn missing_continuation_times_out() {
    let mut first = data2plus_header(0, 0);
    first.extend([0x20; 16]);
    let mut transport = ScriptedTransport::new();
    transport.push(raw_frame([0x01, 0x00], &first, false));

    let mut link = link(transport);
    let mut frame = link.read_frame().await.unwrap();
    let err = RecordReader::default()
        .read(&mut link, &mut frame)
        .await
        .unwrap_err();
    assert!(matches!(err, SmaError::Timeout));
}

#[tokio::test]
async fn runaway_continuations_hit_the_ceiling() {
    let mut first = data2plus_header(0, 0);
    first.extend([0x20; 150]);

    let mut transport = ScriptedTransport::new();
    transport.push(raw_frame([0x01, 0x00], &first, false));
    for _ in 0..8 {
        transport.push(raw_frame([0x08, 0x00], &[0x30; 200], false));
    }
    transport.push(raw_frame([0x01, 0x00], &[0x40, 0x00, 0x00], true));

    let mut link = link(transport);
    let mut frame = link.read_frame().await.unwrap();
    let err = RecordReader::default()
        .read(&mut link, &mut frame)
        .await
        .unwrap_err();

    assert!(matches!(err, SmaError::RecordOverflow(500)));
    assert_eq!(link.transport().frame_reads, 3);
}
