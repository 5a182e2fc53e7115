use crate::*;
use bytes::BytesMut;
use kestrel_rpc_core::DEFAULT_MAX_FRAME_LEN;
use kestrel_rpc_stream::client::{ClientConfig, ServiceProxy};
use kestrel_rpc_stream::frame::{FrameDecoder, WireCodec};
use kestrel_rpc_stream::proto::{MessageType, RpcMessage};
use kestrel_rpc_stream::server::ServerConfig;
use log::*;
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[logfn]
#[rstest]
fn test_ping_pong_raw(runner: TestRunner) {
    runner.block_on(async move {
        let ext = kestrel_rpc_stream::default_extensions();
        let (_server, hello, addr) = init_server(ServerConfig::default(), ext.clone()).await;
        let codec = WireCodec::new(ext, DEFAULT_MAX_FRAME_LEN);
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let mut buf = BytesMut::new();
        for seq in [3, 4, 5] {
            codec.encode(&RpcMessage::ping(1, 1, seq), &mut buf).expect("encode");
        }
        stream.write_all(&buf).await.expect("write");

        let mut decoder = FrameDecoder::new(codec);
        let mut pongs = Vec::new();
        while pongs.len() < 3 {
            let n = tokio::time::timeout(Duration::from_secs(2), stream.read_buf(decoder.buffer_mut()))
                .await
                .expect("pong in time")
                .expect("read");
            assert!(n > 0, "server closed the connection");
            while let Some(msg) = decoder.next_message().expect("decode") {
                assert_eq!(msg.msg_type, MessageType::Pong);
                pongs.push(msg.request_id);
            }
        }
        assert_eq!(pongs, vec![3, 4, 5]);
        assert_eq!(hello.invoked(), 0);
        info!("got pongs {:?}", pongs);
    });
}

#[logfn]
#[rstest]
fn test_client_ping(runner: TestRunner) {
    runner.block_on(async move {
        let ext = kestrel_rpc_stream::default_extensions();
        let (_server, hello, addr) = init_server(ServerConfig::default(), ext.clone()).await;
        let client = init_client(ClientConfig::default(), ext);
        let conn = client.get_conn(addr).await.expect("connect");
        for _ in 0..3 {
            assert!(conn.ping());
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!conn.is_closed());
        assert_eq!(conn.pending_count(), 0);
        assert_eq!(hello.invoked(), 0);
    });
}

#[logfn]
#[rstest]
fn test_heartbeat_keeps_conn(runner: TestRunner) {
    runner.block_on(async move {
        let ext = kestrel_rpc_stream::default_extensions();
        let server_config = ServerConfig { idle_timeout: Duration::from_millis(600), ..Default::default() };
        let (_server, _hello, addr) = init_server(server_config, ext.clone()).await;
        let client_config = ClientConfig { heartbeat_interval: Duration::from_millis(150), ..Default::default() };
        let client = init_client(client_config, ext);
        let proxy = ServiceProxy::new(client.clone(), hello_key());
        proxy.call("hello", vec![json!("a")]).await.expect("first call");
        let conn = client.get_conn(addr).await.expect("conn");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!conn.is_closed());
        proxy.call("hello", vec![json!("b")]).await.expect("second call");
        let conn2 = client.get_conn(addr).await.expect("conn");
        assert!(Arc::ptr_eq(&conn, &conn2));
    });
}

#[logfn]
#[rstest]
fn test_idle_conn_closed(runner: TestRunner) {
    runner.block_on(async move {
        let ext = kestrel_rpc_stream::default_extensions();
        let server_config = ServerConfig { idle_timeout: Duration::from_millis(300), ..Default::default() };
        let (server, _hello, addr) = init_server(server_config, ext.clone()).await;
        // Heartbeat slower than the idle timeout
        let client_config = ClientConfig { heartbeat_interval: Duration::from_secs(10), ..Default::default() };
        let client = init_client(client_config, ext);
        let proxy = ServiceProxy::new(client.clone(), hello_key());
        proxy.call("hello", vec![json!("a")]).await.expect("first call");
        let conn = client.get_conn(addr).await.expect("conn");
        assert_eq!(server.get_alive_conn(), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(conn.is_closed());
        assert_eq!(server.get_alive_conn(), 0);

        // A new connection is made for the next call
        proxy.call("hello", vec![json!("b")]).await.expect("call after idle close");
        let conn2 = client.get_conn(addr).await.expect("conn");
        assert!(!Arc::ptr_eq(&conn, &conn2));
    });
}
