//! Framing over a live duplex stream.

use tandem_sync::net::{read_frame, read_json, write_frame, write_json};
use tandem_sync::protocol::ChannelHello;
use tandem_types::PeerId;
use tokio::io::AsyncWriteExt;

const MAX: usize = 1024;

#[tokio::test]
async fn frames_arrive_in_order_and_intact() {
    let (mut a, mut b) = tokio::io::duplex(64);

    let writer = tokio::spawn(async move {
        for payload in [&b"one"[..], &b""[..], &[7u8; 200][..]] {
            write_frame(&mut a, payload, MAX).await.unwrap();
        }
    });

    assert_eq!(read_frame(&mut b, MAX).await.unwrap(), b"one");
    assert_eq!(read_frame(&mut b, MAX).await.unwrap(), b"");
    assert_eq!(read_frame(&mut b, MAX).await.unwrap(), vec![7u8; 200]);
    writer.await.unwrap();
}

#[tokio::test]
async fn closed_stream_is_eof() {
    let (mut a, mut b) = tokio::io::duplex(64);
    a.shutdown().await.unwrap();
    drop(a);

    let err = read_frame(&mut b, MAX).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

#[tokio::test]
async fn hello_with_wrong_shape_is_invalid_data() {
    let (mut a, mut b) = tokio::io::duplex(256);
    write_frame(&mut a, br#"{"connection_id":"c"}"#, MAX)
        .await
        .unwrap();

    let err = read_json::<_, ChannelHello>(&mut b, MAX).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[tokio::test]
async fn hello_crosses_the_stream() {
    let (mut a, mut b) = tokio::io::duplex(256);
    let hello = ChannelHello::new("c-1", PeerId::parse("C1").unwrap());
    write_json(&mut a, &hello, MAX).await.unwrap();

    let received: ChannelHello = read_json(&mut b, MAX).await.unwrap();
    assert_eq!(received, hello);
}

#[tokio::test]
async fn frames_split_across_reads_are_reassembled() {
    let mut io = tokio_test::io::Builder::new()
        .read(&[0, 0])
        .read(&[0, 5, b'h', b'e'])
        .read(b"llo")
        .build();

    assert_eq!(read_frame(&mut io, MAX).await.unwrap(), b"hello");
}

#[tokio::test]
async fn writes_put_the_length_before_the_payload() {
    let mut io = tokio_test::io::Builder::new()
        .write(&[0, 0, 0, 2])
        .write(b"hi")
        .build();

    write_frame(&mut io, b"hi", MAX).await.unwrap();
}

#[tokio::test]
async fn read_errors_surface_unchanged() {
    let mut io = tokio_test::io::Builder::new()
        .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
        .build();

    let err = read_frame(&mut io, MAX).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
}
