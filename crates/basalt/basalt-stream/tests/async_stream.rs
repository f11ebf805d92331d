mod common;

use basalt_stream::{CancelToken, Role, StreamError, StreamReader, StreamWriter, Transfer};
use common::{pattern, scratch_facility, unique_name};
use std::time::{Duration, Instant};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_write_and_read_meet() {
    let (_dir, facility) = scratch_facility();
    let name = unique_name("async");

    let mut writer = StreamWriter::open_in(&facility, &name, Role::Host, 64).unwrap();
    let mut reader = StreamReader::open_in(&facility, &name, Role::Client, 0).unwrap();

    let sent = pattern(10_000);
    let (written, received) = tokio::join!(
        writer.write_async(sent.clone(), CancelToken::new()),
        reader.read_async(sent.len(), CancelToken::new()),
    );

    assert_eq!(written.unwrap(), Transfer::Complete(sent.len()));
    let (got, transfer) = received.unwrap();
    assert_eq!(transfer, Transfer::Complete(sent.len()));
    assert_eq!(got, sent);
}

#[tokio::test]
async fn async_read_times_out() {
    let (_dir, facility) = scratch_facility();
    let name = unique_name("async_timeout");

    let _writer = StreamWriter::open_in(&facility, &name, Role::Host, 16).unwrap();
    let mut reader = StreamReader::open_in(&facility, &name, Role::Client, 0).unwrap();
    reader.set_read_timeout(Some(Duration::from_millis(100)));

    let start = Instant::now();
    let err = reader.read_async(4, CancelToken::new()).await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, StreamError::Timeout { transferred: 0, .. }));
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
}

#[tokio::test]
async fn async_read_cancels_without_error() {
    let (_dir, facility) = scratch_facility();
    let name = unique_name("async_cancel");

    let mut writer = StreamWriter::open_in(&facility, &name, Role::Host, 16).unwrap();
    let mut reader = StreamReader::open_in(&facility, &name, Role::Client, 0).unwrap();
    writer.write(&[1, 2], 0, 2).unwrap();

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let (got, transfer) = reader.read_async(8, cancel).await.unwrap();
    assert_eq!(transfer, Transfer::Canceled { transferred: 2 });
    assert_eq!(got, vec![1, 2]);
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_read_loses_no_bytes() {
    let (_dir, facility) = scratch_facility();
    let name = unique_name("async_dropped_read");

    let mut writer = StreamWriter::open_in(&facility, &name, Role::Host, 16).unwrap();
    let mut reader = StreamReader::open_in(&facility, &name, Role::Client, 0).unwrap();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), reader.read_async(4, CancelToken::new())).await;
    assert!(abandoned.is_err());

    writer.write(&[1, 2, 3, 4], 0, 4).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(reader.available_data(), 4);

    reader.set_read_timeout(Some(Duration::from_millis(300)));
    let mut buf = [0u8; 4];
    assert_eq!(reader.read(&mut buf, 0, 4).unwrap(), 4);
    assert_eq!(buf, [1, 2, 3, 4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_write_stops_pushing() {
    let (_dir, facility) = scratch_facility();
    let name = unique_name("async_dropped_write");

    let mut writer = StreamWriter::open_in(&facility, &name, Role::Host, 4).unwrap();
    let mut reader = StreamReader::open_in(&facility, &name, Role::Client, 0).unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        writer.write_async(pattern(16), CancelToken::new()),
    )
    .await;
    assert!(abandoned.is_err());
    tokio::time::sleep(Duration::from_millis(200)).await;

    // the ring filled before the drop; draining it must not let the rest through
    let mut buf = [0u8; 4];
    assert_eq!(reader.read(&mut buf, 0, 4).unwrap(), 4);
    assert_eq!(buf.to_vec(), pattern(4));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(reader.available_data(), 0);

    // and the endpoint lock was released for the next call
    writer.set_write_timeout(Some(Duration::from_millis(300)));
    assert_eq!(writer.write(&[7, 7], 0, 2).unwrap(), 2);
}
